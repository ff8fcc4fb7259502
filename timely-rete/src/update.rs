//! Every change that flows through the network is a signed
//! multiplicity for one tuple at one logical time, exactly like a
//! differential dataflow update.  Outside timely evaluation, every
//! update carries the neutral timestamp and the time dimension
//! collapses.
use differential_dataflow::consolidation::consolidate_updates;
use differential_dataflow::lattice::Lattice;
use rete_recipes::Tuple;

/// Logical time.  External updates enter at `NEUTRAL`; recursive
/// operators stamp derived tuples with their derivation depth.
pub type Timestamp = u64;

/// The only timestamp non-timely networks ever use.
pub const NEUTRAL: Timestamp = 0;

/// `(tuple, time, diff)`, in the order differential dataflow uses.
pub type Update = (Tuple, Timestamp, isize);

/// Returns the least upper bound of two timestamps: the time at which
/// a result combining both inputs becomes visible.
#[inline]
#[must_use]
pub fn join_times(left: Timestamp, right: Timestamp) -> Timestamp {
    left.join(&right)
}

/// Sorts `updates`, sums the diffs of identical `(tuple, time)` pairs
/// and drops the zeros.
#[inline]
pub fn consolidate(updates: &mut Vec<Update>) {
    consolidate_updates(updates);
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    Insert,
    Delete,
}

impl Direction {
    #[must_use]
    pub fn from_insertion(is_insertion: bool) -> Self {
        if is_insertion {
            Self::Insert
        } else {
            Self::Delete
        }
    }

    /// The unit multiplicity change for this direction.
    #[inline]
    #[must_use]
    pub fn diff(self) -> isize {
        match self {
            Self::Insert => 1,
            Self::Delete => -1,
        }
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Insert => Self::Delete,
            Self::Delete => Self::Insert,
        }
    }
}

/// A half-open interval of logical time during which a tuple was
/// present; `end` is `None` while it still is.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

#[test]
fn test_join_times() {
    assert_eq!(join_times(1, 3), 3);
    assert_eq!(join_times(NEUTRAL, NEUTRAL), NEUTRAL);
}

#[test]
fn test_consolidate() {
    let mut updates = vec![
        (Tuple::from([2]), 0, 1),
        (Tuple::from([1]), 0, 1),
        (Tuple::from([2]), 0, -1),
        (Tuple::from([1]), 1, 1),
        (Tuple::from([1]), 0, 1),
    ];

    consolidate(&mut updates);
    assert_eq!(updates, vec![(Tuple::from([1]), 0, 2), (Tuple::from([1]), 1, 1)]);
}

#[test]
fn test_direction() {
    assert_eq!(Direction::from_insertion(true).diff(), 1);
    assert_eq!(Direction::Insert.opposite(), Direction::Delete);
}
