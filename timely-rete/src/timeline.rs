//! Stateful nodes remember, for every tuple they hold, how its
//! multiplicity evolves over logical time: a timeline.  In timeless
//! networks a timeline degenerates to a single count at the neutral
//! timestamp.
//!
//! Many operators are not linear in their inputs (distinct, negation,
//! aggregation).  For those we reason about step functions: the value
//! of a timeline after each of its breakpoints.  An operator computes
//! its output step function before and after an input change, and
//! emits the difference.
use crate::config::TimelineRepresentation;
use crate::update::Interval;
use crate::update::Timestamp;
use crate::update::Update;
use crate::update::NEUTRAL;
use rete_recipes::Tuple;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use timely::order::PartialOrder;

/// `(time, value from that time on)`, sorted by time; the value before
/// the first step is 0.
pub type Steps = Vec<(Timestamp, isize)>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Timeline {
    /// All the multiplicity, stamped with the earliest time at which
    /// the tuple was present.
    FirstOnly { at: Timestamp, count: isize },
    /// Every diff, keyed by time.
    Faithful(BTreeMap<Timestamp, isize>),
}

impl Timeline {
    #[must_use]
    pub fn new(representation: TimelineRepresentation) -> Self {
        match representation {
            TimelineRepresentation::FirstOnly => Self::FirstOnly { at: NEUTRAL, count: 0 },
            TimelineRepresentation::Faithful => Self::Faithful(BTreeMap::new()),
        }
    }

    /// Adds the `(time, diff)` pairs in `diffs`.
    pub fn apply(&mut self, diffs: &[(Timestamp, isize)]) {
        match self {
            Self::Faithful(map) => {
                for (time, diff) in diffs.iter().copied() {
                    let entry = map.entry(time).or_insert(0);
                    *entry += diff;
                    if *entry == 0 {
                        map.remove(&time);
                    }
                }
            }
            Self::FirstOnly { at, count } => {
                // Compaction only makes sense on the complete batch:
                // a retraction and its replacement may arrive in
                // either order.
                let mut merged = BTreeMap::new();
                if *count != 0 {
                    merged.insert(*at, *count);
                }

                for (time, diff) in diffs.iter().copied() {
                    *merged.entry(time).or_insert(0) += diff;
                }

                let total: isize = merged.values().sum();
                let mut running = 0;
                let mut first_present = None;
                for (time, diff) in merged.iter() {
                    running += diff;
                    if running > 0 && first_present.is_none() {
                        first_present = Some(*time);
                    }
                }

                *count = total;
                *at = if total == 0 {
                    NEUTRAL
                } else {
                    first_present
                        .unwrap_or_else(|| merged.keys().next().copied().unwrap_or(NEUTRAL))
                };
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::FirstOnly { count, .. } => *count == 0,
            Self::Faithful(map) => map.is_empty(),
        }
    }

    /// Multiplicity once every update has been applied.
    #[must_use]
    pub fn total(&self) -> isize {
        match self {
            Self::FirstOnly { count, .. } => *count,
            Self::Faithful(map) => map.values().sum(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Timestamp, isize)> {
        match self {
            Self::FirstOnly { at, count } if *count != 0 => vec![(*at, *count)],
            Self::FirstOnly { .. } => Vec::new(),
            Self::Faithful(map) => map.iter().map(|(time, diff)| (*time, *diff)).collect(),
        }
    }

    /// Returns the cumulative multiplicity after each breakpoint.
    #[must_use]
    pub fn steps(&self) -> Steps {
        let mut running = 0;
        self.entries()
            .into_iter()
            .map(|(time, diff)| {
                running += diff;
                (time, running)
            })
            .collect()
    }

    /// Returns the earliest time at which the multiplicity is positive.
    #[must_use]
    pub fn first_presence(&self) -> Option<Timestamp> {
        self.steps()
            .into_iter()
            .find(|(_, value)| *value > 0)
            .map(|(time, _)| time)
    }

    /// Returns the maximal intervals during which the multiplicity is
    /// positive.
    #[must_use]
    pub fn intervals(&self) -> Vec<Interval> {
        let mut ret = Vec::new();
        let mut open: Option<Timestamp> = None;
        for (time, value) in self.steps() {
            match (open, value > 0) {
                (None, true) => open = Some(time),
                (Some(start), false) => {
                    ret.push(Interval {
                        start,
                        end: Some(time),
                    });
                    open = None;
                }
                _ => {}
            }
        }

        if let Some(start) = open {
            ret.push(Interval { start, end: None });
        }

        ret
    }
}

/// Returns the value of `steps` at `time`.
#[must_use]
pub fn value_at(steps: &[(Timestamp, isize)], time: Timestamp) -> isize {
    let reached = steps.partition_point(|(step, _)| step.less_equal(&time));
    reached.checked_sub(1).map_or(0, |index| steps[index].1)
}

/// Evaluates `fun` pointwise over the step functions in `inputs`, and
/// returns the resulting step function.  `fun` must map all-zero
/// inputs to 0.
pub fn combine_steps<F>(inputs: &[&[(Timestamp, isize)]], fun: F) -> Steps
where
    F: Fn(&[isize]) -> isize,
{
    let mut times = inputs
        .iter()
        .flat_map(|steps| steps.iter().map(|(time, _)| *time))
        .collect::<Vec<_>>();
    times.sort_unstable();
    times.dedup();

    let mut ret: Steps = Vec::new();
    let mut values = vec![0; inputs.len()];
    let mut previous = 0;
    for time in times {
        for (slot, steps) in values.iter_mut().zip(inputs.iter()) {
            *slot = value_at(steps, time);
        }

        let current = fun(&values);
        if current != previous {
            ret.push((time, current));
            previous = current;
        }
    }

    ret
}

/// Returns the diffs that turn step function `old` into `new`.
#[must_use]
pub fn steps_delta(
    old: &[(Timestamp, isize)],
    new: &[(Timestamp, isize)],
) -> Vec<(Timestamp, isize)> {
    let mut diffs: BTreeMap<Timestamp, isize> = BTreeMap::new();
    let mut add = |steps: &[(Timestamp, isize)], sign: isize| {
        let mut previous = 0;
        for (time, value) in steps.iter().copied() {
            *diffs.entry(time).or_insert(0) += sign * (value - previous);
            previous = value;
        }
    };

    add(old, -1);
    add(new, 1);
    diffs.into_iter().filter(|(_, diff)| *diff != 0).collect()
}

/// A `Memory` maps every tuple a node holds to its timeline; tuples
/// with an empty timeline are dropped.
#[derive(Clone, Debug)]
pub struct Memory {
    representation: TimelineRepresentation,
    tuples: FxHashMap<Tuple, Timeline>,
}

impl Memory {
    #[must_use]
    pub fn new(representation: TimelineRepresentation) -> Self {
        Self {
            representation,
            tuples: FxHashMap::default(),
        }
    }

    /// Applies all the diffs for `tuple` at once.
    pub fn apply(&mut self, tuple: &Tuple, diffs: &[(Timestamp, isize)]) {
        if diffs.is_empty() {
            return;
        }

        let representation = self.representation;
        let timeline = self
            .tuples
            .entry(tuple.clone())
            .or_insert_with(|| Timeline::new(representation));
        timeline.apply(diffs);
        if timeline.is_empty() {
            self.tuples.remove(tuple);
        }
    }

    /// Applies a batch of updates, grouped by tuple.
    pub fn apply_updates(&mut self, updates: &[Update]) {
        for (tuple, diffs) in group_by_tuple(updates) {
            self.apply(&tuple, &diffs);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    #[must_use]
    pub fn get(&self, tuple: &Tuple) -> Option<&Timeline> {
        self.tuples.get(tuple)
    }

    #[must_use]
    pub fn total(&self, tuple: &Tuple) -> isize {
        self.tuples.get(tuple).map_or(0, Timeline::total)
    }

    #[must_use]
    pub fn steps(&self, tuple: &Tuple) -> Steps {
        self.tuples.get(tuple).map_or_else(Vec::new, Timeline::steps)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Timeline)> {
        self.tuples.iter()
    }

    /// Returns the whole memory as a batch of updates.
    #[must_use]
    pub fn contents(&self) -> Vec<Update> {
        let mut ret = Vec::new();
        for (tuple, timeline) in self.tuples.iter() {
            for (time, diff) in timeline.entries() {
                ret.push((tuple.clone(), time, diff));
            }
        }

        ret
    }
}

/// Groups updates by tuple, preserving the relative order of diffs.
#[must_use]
pub fn group_by_tuple(updates: &[Update]) -> Vec<(Tuple, Vec<(Timestamp, isize)>)> {
    let mut index: FxHashMap<&Tuple, usize> = FxHashMap::default();
    let mut ret: Vec<(Tuple, Vec<(Timestamp, isize)>)> = Vec::new();
    for (tuple, time, diff) in updates.iter() {
        let slot = *index.entry(tuple).or_insert_with(|| {
            ret.push((tuple.clone(), Vec::new()));
            ret.len() - 1
        });
        ret[slot].1.push((*time, *diff));
    }

    ret
}

#[test]
fn test_faithful_intervals() {
    let mut timeline = Timeline::new(TimelineRepresentation::Faithful);
    timeline.apply(&[(0, 1), (3, -1), (5, 1)]);

    assert_eq!(timeline.total(), 1);
    assert_eq!(timeline.first_presence(), Some(0));
    assert_eq!(
        timeline.intervals(),
        vec![
            Interval {
                start: 0,
                end: Some(3)
            },
            Interval { start: 5, end: None }
        ]
    );

    timeline.apply(&[(5, -1), (3, 1), (0, -1)]);
    assert!(timeline.is_empty());
}

#[test]
fn test_first_only_compaction() {
    let mut timeline = Timeline::new(TimelineRepresentation::FirstOnly);
    timeline.apply(&[(2, 1)]);
    assert_eq!(timeline.entries(), vec![(2, 1)]);

    timeline.apply(&[(0, 1)]);
    assert_eq!(timeline.entries(), vec![(0, 2)]);

    // Moving a tuple's only support to a later time moves its
    // first appearance, regardless of the order within the batch.
    let mut moved = Timeline::new(TimelineRepresentation::FirstOnly);
    moved.apply(&[(0, 1)]);
    moved.apply(&[(1, 1), (0, -1)]);
    assert_eq!(moved.entries(), vec![(1, 1)]);
    assert_eq!(moved.intervals(), vec![Interval { start: 1, end: None }]);

    moved.apply(&[(1, -1)]);
    assert!(moved.is_empty());
}

#[test]
fn test_combine_steps() {
    let present = vec![(0, 1)];
    let blocked = vec![(2, 1), (4, 0)];
    let antijoin = combine_steps(&[&present, &blocked], |values| {
        if values[1] == 0 {
            values[0]
        } else {
            0
        }
    });

    assert_eq!(antijoin, vec![(0, 1), (2, 0), (4, 1)]);
    assert_eq!(value_at(&antijoin, 3), 0);
    assert_eq!(value_at(&antijoin, 10), 1);
}

#[test]
fn test_steps_delta() {
    let old = vec![(0, 1)];
    let new = vec![(0, 1), (2, 0)];
    assert_eq!(steps_delta(&old, &new), vec![(2, -1)]);
    assert_eq!(steps_delta(&new, &new), vec![]);
    assert_eq!(steps_delta(&[], &[(1, 2)]), vec![(1, 2)]);
}

#[test]
fn test_memory() {
    let mut memory = Memory::new(TimelineRepresentation::FirstOnly);
    memory.apply_updates(&[
        (Tuple::from([1]), 0, 1),
        (Tuple::from([2]), 0, 1),
        (Tuple::from([1]), 0, 1),
    ]);
    assert_eq!(memory.total(&Tuple::from([1])), 2);
    assert_eq!(memory.iter().count(), 2);

    memory.apply_updates(&[(Tuple::from([2]), 0, -1)]);
    assert_eq!(memory.iter().count(), 1);
    assert_eq!(memory.contents(), vec![(Tuple::from([1]), 0, 2)]);
}
