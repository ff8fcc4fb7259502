//! Joins, projections and indexers all restructure tuples by picking
//! a subset of their positions, in a given order.  A `TupleMask`
//! records that choice once, along with the width of the tuples it
//! applies to, so that mismatches can be caught when recipes are
//! validated instead of when data flows.
use crate::value::Tuple;
use crate::value::Value;

/// A `TupleMask` maps a source tuple of width `source_width` to the
/// tuple of the values found at `indices`, in that order.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TupleMask {
    indices: Box<[usize]>,
    source_width: usize,
}

impl TupleMask {
    /// Returns a mask that keeps the values at `indices`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when an index is out of bounds for `source_width`.
    pub fn new(indices: Vec<usize>, source_width: usize) -> Result<Self, &'static str> {
        if indices.iter().any(|index| *index >= source_width) {
            return Err("Mask index out of bounds for source width.");
        }

        Ok(Self {
            indices: indices.into_boxed_slice(),
            source_width,
        })
    }

    /// Returns the mask that keeps every position, in order.
    #[must_use]
    pub fn identity(source_width: usize) -> Self {
        Self {
            indices: (0..source_width).collect(),
            source_width,
        }
    }

    /// Returns the mask that keeps nothing; every tuple maps to the
    /// empty tuple.
    #[must_use]
    pub fn empty(source_width: usize) -> Self {
        Self {
            indices: Box::new([]),
            source_width,
        }
    }

    /// Returns a mask that keeps the positions whose indicator is
    /// true, in increasing order.
    #[must_use]
    pub fn from_keep_indicators(keep: &[bool]) -> Self {
        Self {
            indices: keep
                .iter()
                .enumerate()
                .filter_map(|(index, keep)| if *keep { Some(index) } else { None })
                .collect(),
            source_width: keep.len(),
        }
    }

    /// Returns the mask of bound positions in `bindings`, along with
    /// the tuple of bound values.
    #[must_use]
    pub fn from_bindings(bindings: &[Option<Value>]) -> (Self, Tuple) {
        let keep = bindings.iter().map(Option::is_some).collect::<Vec<_>>();
        let mask = Self::from_keep_indicators(&keep);
        let bound = bindings.iter().filter_map(|x| *x).collect::<Vec<_>>();

        (mask, Tuple::from_vec(bound))
    }

    #[inline]
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[inline]
    #[must_use]
    pub fn source_width(&self) -> usize {
        self.source_width
    }

    /// Width of the tuples produced by `transform`.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.indices.len() == self.source_width
            && self.indices.iter().enumerate().all(|(i, index)| i == *index)
    }

    /// Returns the mask of the positions not kept by `self`, in
    /// increasing order.
    #[must_use]
    pub fn complement(&self) -> Self {
        let mut keep = vec![true; self.source_width];
        for index in self.indices.iter() {
            keep[*index] = false;
        }

        Self::from_keep_indicators(&keep)
    }

    /// Projects `tuple` through the mask.
    ///
    /// Panics if `tuple` does not have the mask's source width: tuple
    /// shapes are checked at recipe validation, so a mismatch here is
    /// an internal bug.
    #[inline]
    #[must_use]
    pub fn transform(&self, tuple: &Tuple) -> Tuple {
        assert_eq!(tuple.arity(), self.source_width);

        let values = tuple.values();
        Tuple::from_vec(self.indices.iter().map(|index| values[*index]).collect())
    }
}

#[test]
fn test_transform() {
    let mask = TupleMask::new(vec![2, 0], 3).expect("ok");
    assert_eq!(mask.width(), 2);
    assert_eq!(mask.transform(&Tuple::from([1, 2, 3])), Tuple::from([3, 1]));
    assert!(!mask.is_identity());
    assert!(TupleMask::identity(3).is_identity());
    assert_eq!(TupleMask::empty(2).transform(&Tuple::from([1, 2])), Tuple::empty());
}

#[test]
fn test_out_of_bounds() {
    assert!(TupleMask::new(vec![0, 3], 3).is_err());
}

#[test]
fn test_complement() {
    let mask = TupleMask::new(vec![1], 3).expect("ok");
    assert_eq!(mask.complement().indices(), &[0, 2]);
    assert_eq!(TupleMask::identity(2).complement().width(), 0);
}

#[test]
fn test_from_bindings() {
    let (mask, bound) =
        TupleMask::from_bindings(&[None, Some(Value::new(4)), None, Some(Value::new(5))]);
    assert_eq!(mask.indices(), &[1, 3]);
    assert_eq!(mask.source_width(), 4);
    assert_eq!(bound, Tuple::from([4, 5]));
}
