//! Rete networks shuffle tuples of opaque identifiers around: the
//! network never interprets a value beyond equality, ordering and
//! hashing.  Hosts that need richer values (strings, model objects)
//! intern them into identifiers at the boundary, and only the
//! boundary ever sees the richer representation.
//!
//! Tuples are the bulk of what every node stores, so they must stay
//! light: a tuple is a boxed slice of values, with explicit clones.

/// A concrete value is a machine integer.  Aggregators also emit
/// counts as values, so signed 64-bit integers let hosts share one
/// representation for identifiers and numbers.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Value(i64);

impl Value {
    #[inline]
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<usize> for Value {
    #[inline]
    fn from(raw: usize) -> Self {
        Self(raw as i64)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `Tuple` is an immutable, fixed-arity sequence of `Value`s.  The
/// arity is implicit in the slice length; every collection of tuples
/// in the network is homogeneous, and shape checks happen once, when
/// the recipes are validated, rather than per tuple.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tuple {
    values: Box<[Value]>,
}

impl Tuple {
    #[inline]
    #[must_use]
    pub fn from_vec(values: Vec<Value>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    #[inline]
    #[must_use]
    pub fn from_box(values: Box<[Value]>) -> Self {
        Self { values }
    }

    #[inline]
    #[must_use]
    pub fn from_slice(values: &[Value]) -> Self {
        Self::from_vec(values.to_vec())
    }

    /// Returns the empty tuple; it is the only tuple of arity 0.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[inline]
    #[must_use]
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }

    /// Returns a new tuple with the values of `self`, followed by
    /// those of `suffix`.
    #[must_use]
    pub fn concat(&self, suffix: &[Value]) -> Self {
        let mut values = Vec::with_capacity(self.values.len() + suffix.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(suffix);
        Self::from_vec(values)
    }
}

impl From<Vec<Value>> for Tuple {
    #[inline]
    fn from(values: Vec<Value>) -> Self {
        Self::from_vec(values)
    }
}

impl From<&[Value]> for Tuple {
    #[inline]
    fn from(values: &[Value]) -> Self {
        Self::from_slice(values)
    }
}

impl<const N: usize> From<[i64; N]> for Tuple {
    #[inline]
    fn from(raw: [i64; N]) -> Self {
        Self::from_vec(raw.iter().map(|x| Value(*x)).collect())
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

#[test]
fn test_construct() {
    let from_vec: Tuple = vec![Value::new(1), Value::new(2)].into();
    assert_eq!(from_vec, Tuple::from_box(vec![Value::new(1), Value::new(2)].into_boxed_slice()));
    assert_eq!(from_vec, Tuple::from([1, 2]));
    assert_eq!(from_vec, Tuple::from_slice(&[Value::new(1), Value::new(2)]));

    assert_eq!(from_vec.arity(), 2);
    assert_eq!(from_vec.get(0), Some(Value::new(1)));
    assert_eq!(from_vec.get(2), None);
    assert_eq!(Tuple::empty().arity(), 0);
}

#[test]
fn test_concat_display() {
    let tuple = Tuple::from([1, 2]).concat(&[Value::new(3)]);
    assert_eq!(tuple, Tuple::from([1, 2, 3]));
    assert_eq!(format!("{}", tuple), "(1, 2, 3)");
}
