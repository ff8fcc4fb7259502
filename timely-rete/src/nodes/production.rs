//! The production node terminates a query.  It remembers the full
//! timeline of every result tuple, but only exposes the current
//! result set: a tuple is a match when its multiplicity, once every
//! update is applied, is positive.  Downstream, the production node
//! behaves like a set: it emits one insertion when a tuple becomes a
//! match and one deletion when it stops being one.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::config::TimelineRepresentation;
use crate::network::Message;
use crate::timeline::group_by_tuple;
use crate::timeline::Memory;
use crate::update::Interval;
use crate::update::Update;
use crate::update::NEUTRAL;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

/// Groups the current matches of a production node by their
/// projection through `mask`.  Indexers are only built on demand, but
/// are then maintained with every update.
#[derive(Clone, Debug)]
pub struct Indexer {
    mask: TupleMask,
    buckets: FxHashMap<Tuple, FxHashSet<Tuple>>,
}

impl Indexer {
    fn new<'a>(mask: TupleMask, tuples: impl Iterator<Item = &'a Tuple>) -> Self {
        let mut ret = Self {
            mask,
            buckets: FxHashMap::default(),
        };

        for tuple in tuples {
            ret.insert(tuple);
        }

        ret
    }

    fn insert(&mut self, tuple: &Tuple) {
        self.buckets
            .entry(self.mask.transform(tuple))
            .or_default()
            .insert(tuple.clone());
    }

    fn remove(&mut self, tuple: &Tuple) {
        let key = self.mask.transform(tuple);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(tuple);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    /// Returns the matches whose projection is `bound`.
    #[must_use]
    pub fn get(&self, bound: &Tuple) -> Option<&FxHashSet<Tuple>> {
        self.buckets.get(bound)
    }

    #[must_use]
    pub fn count(&self, bound: &Tuple) -> usize {
        self.buckets.get(bound).map_or(0, FxHashSet::len)
    }

    /// Number of distinct projections.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

pub struct ProductionNode {
    memory: Memory,
    present: FxHashSet<Tuple>,
    indexers: FxHashMap<TupleMask, Indexer>,
}

impl ProductionNode {
    #[must_use]
    pub fn new(representation: TimelineRepresentation) -> Self {
        Self {
            memory: Memory::new(representation),
            present: FxHashSet::default(),
            indexers: FxHashMap::default(),
        }
    }

    /// Returns the indexer for `mask`, building it from the current
    /// matches if needed.
    pub fn ensure_indexer(&mut self, mask: &TupleMask) -> &Indexer {
        let present = &self.present;
        self.indexers
            .entry(mask.clone())
            .or_insert_with(|| Indexer::new(mask.clone(), present.iter()))
    }

    /// Returns the intervals of logical time during which `tuple` is
    /// derivable.
    #[must_use]
    pub fn timeline(&self, tuple: &Tuple) -> Vec<Interval> {
        self.memory.get(tuple).map_or_else(Vec::new, |timeline| timeline.intervals())
    }
}

impl Node for ProductionNode {
    fn name(&self) -> &'static str {
        "production"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let updates = batch
            .into_iter()
            .map(|message| (message.tuple, cx.stamp(message.timestamp), message.diff))
            .collect::<Vec<_>>();

        for (tuple, diffs) in group_by_tuple(&updates) {
            self.memory.apply(&tuple, &diffs);
            let was_present = self.present.contains(&tuple);
            let is_present = self.memory.total(&tuple) > 0;

            match (was_present, is_present) {
                (false, true) => {
                    for indexer in self.indexers.values_mut() {
                        indexer.insert(&tuple);
                    }

                    self.present.insert(tuple.clone());
                    out.emit(tuple, NEUTRAL, 1);
                }
                (true, false) => {
                    for indexer in self.indexers.values_mut() {
                        indexer.remove(&tuple);
                    }

                    self.present.remove(&tuple);
                    out.emit(tuple, NEUTRAL, -1);
                }
                _ => {}
            }
        }
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        Some(self.present.iter().map(|tuple| (tuple.clone(), NEUTRAL, 1)).collect())
    }

    fn as_production_mut(&mut self) -> Option<&mut ProductionNode> {
        Some(self)
    }
}

#[cfg(test)]
use super::testing::{at, del, ins, Harness};
#[cfg(test)]
use crate::config::{EngineConfig, EnginePreset};
#[cfg(test)]
use crate::network::Slot;

#[test]
fn test_production_set_semantics() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = ProductionNode::new(TimelineRepresentation::FirstOnly);

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[1, 2]), ins(&[2, 2])]),
        vec![ins(&[1, 2]), ins(&[2, 2])]
    );
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[1, 2])]), vec![]);
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[1, 2])]), vec![del(&[1, 2])]);
    assert_eq!(node.contents(&harness.cx()).expect("stateful"), vec![ins(&[2, 2])]);
}

#[test]
fn test_production_indexer() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = ProductionNode::new(TimelineRepresentation::FirstOnly);
    harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[1, 3]), ins(&[2, 3])]);

    let by_first = TupleMask::new(vec![0], 2).expect("ok");
    let indexer = node.ensure_indexer(&by_first);
    assert_eq!(indexer.bucket_count(), 2);
    assert_eq!(indexer.count(&Tuple::from([1])), 2);
    assert_eq!(indexer.count(&Tuple::from([3])), 0);

    // Built indexers follow later updates.
    harness.feed(&mut node, Slot::Primary, &[del(&[2, 3]), ins(&[4, 4])]);
    let indexer = node.ensure_indexer(&by_first);
    assert_eq!(indexer.bucket_count(), 2);
    assert!(indexer.get(&Tuple::from([2])).is_none());
    assert_eq!(indexer.count(&Tuple::from([4])), 1);
}

#[test]
fn test_production_timeline() {
    let harness = Harness::new(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    let mut node = ProductionNode::new(TimelineRepresentation::Faithful);

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[at(&[1], 0, 1), at(&[1], 2, -1), at(&[1], 5, 1)]),
        vec![ins(&[1])]
    );
    assert_eq!(
        node.timeline(&Tuple::from([1])),
        vec![
            Interval {
                start: 0,
                end: Some(2)
            },
            Interval { start: 5, end: None }
        ]
    );
    assert!(node.timeline(&Tuple::from([2])).is_empty());
}
