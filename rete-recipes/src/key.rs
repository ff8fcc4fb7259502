//! Input keys name the external relations a plan reads from.  The
//! backing model decides what each key can do: some relations can be
//! listed in full, others (unbounded or expensive ones) only answer
//! membership checks.
use crate::mask::TupleMask;
use crate::value::Tuple;
use crate::value::Value;
use std::sync::Arc;

/// What the backing model can do with an input key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyKind {
    /// The full extension can be listed; served by enumerator nodes.
    Enumerable,
    /// Only point membership checks; served by filter nodes.
    Stateless,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InputKey {
    name: Arc<str>,
    arity: usize,
    kind: KeyKind,
}

impl InputKey {
    #[must_use]
    pub fn new(name: &str, arity: usize, kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            arity,
            kind,
        }
    }

    #[must_use]
    pub fn enumerable(name: &str, arity: usize) -> Self {
        Self::new(name, arity, KeyKind::Enumerable)
    }

    #[must_use]
    pub fn stateless(name: &str, arity: usize) -> Self {
        Self::new(name, arity, KeyKind::Stateless)
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[must_use]
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        self.kind == KeyKind::Enumerable
    }
}

impl std::fmt::Display for InputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A `Seed` fixes some positions of an input key's tuples, and leaves
/// the rest as wildcards.  Enumerator nodes for the same key but
/// different seeds hold different sub-extensions.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Seed {
    values: Box<[Option<Value>]>,
}

impl Seed {
    #[must_use]
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    /// Returns the seed that matches every tuple of width `arity`.
    #[must_use]
    pub fn unbound(arity: usize) -> Self {
        Self::new(vec![None; arity])
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_unbound(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    #[must_use]
    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    /// Returns the mask of fixed positions, and the tuple of their
    /// values: the shape `BackingModel::enumerate_tuples` expects.
    #[must_use]
    pub fn to_mask(&self) -> (TupleMask, Tuple) {
        TupleMask::from_bindings(&self.values)
    }

    /// Returns whether `tuple` agrees with every fixed position.
    #[must_use]
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple.arity() == self.values.len()
            && self
                .values
                .iter()
                .zip(tuple.values().iter())
                .all(|(fixed, value)| fixed.map_or(true, |fixed| fixed == *value))
    }
}

#[test]
fn test_seed_matches() {
    let seed = Seed::new(vec![None, Some(Value::new(3))]);
    assert!(seed.matches(&Tuple::from([1, 3])));
    assert!(!seed.matches(&Tuple::from([1, 2])));
    assert!(!seed.matches(&Tuple::from([3])));
    assert!(!seed.is_unbound());

    let (mask, bound) = seed.to_mask();
    assert_eq!(mask.indices(), &[1]);
    assert_eq!(bound, Tuple::from([3]));
}

#[test]
fn test_unbound_seed() {
    let seed = Seed::unbound(2);
    assert!(seed.is_unbound());
    assert!(seed.matches(&Tuple::from([7, 8])));
    assert_eq!(seed.to_mask().0.width(), 0);
}

#[test]
fn test_key() {
    let key = InputKey::enumerable("Foo", 1);
    assert!(key.is_enumerable());
    assert_eq!(format!("{}", key), "Foo/1");
    assert_ne!(key, InputKey::stateless("Foo", 1));
}
