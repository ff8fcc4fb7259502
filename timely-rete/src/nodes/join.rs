//! Two-input operators index both operands by their join key.  Joins
//! are bilinear, so their delta is `dP x S + P' x dS`, with `P'` the
//! primary memory after `dP`; every output is stamped at the join
//! (max) of the contributing timestamps.
//!
//! Antijoins are not linear in their secondary operand.  They
//! recompute the output step function of every primary tuple whose key
//! was touched, and emit the difference.
use super::split_slots;
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::config::TimelineRepresentation;
use crate::network::Message;
use crate::timeline::combine_steps;
use crate::timeline::steps_delta;
use crate::timeline::Memory;
use crate::timeline::Steps;
use crate::update::join_times;
use crate::update::Update;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

/// A memory partitioned by the projection of each tuple through `mask`.
struct KeyedMemory {
    mask: TupleMask,
    representation: TimelineRepresentation,
    buckets: FxHashMap<Tuple, Memory>,
}

impl KeyedMemory {
    fn new(mask: TupleMask, representation: TimelineRepresentation) -> Self {
        Self {
            mask,
            representation,
            buckets: FxHashMap::default(),
        }
    }

    fn key(&self, tuple: &Tuple) -> Tuple {
        self.mask.transform(tuple)
    }

    fn bucket(&self, key: &Tuple) -> Option<&Memory> {
        self.buckets.get(key)
    }

    fn apply(&mut self, updates: &[Update]) {
        let mut by_key: FxHashMap<Tuple, Vec<Update>> = FxHashMap::default();
        for update in updates {
            by_key.entry(self.key(&update.0)).or_default().push(update.clone());
        }

        let representation = self.representation;
        for (key, updates) in by_key {
            let bucket = self
                .buckets
                .entry(key.clone())
                .or_insert_with(|| Memory::new(representation));
            bucket.apply_updates(&updates);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

fn stamped(updates: Vec<Update>, cx: &NodeContext<'_>) -> Vec<Update> {
    updates
        .into_iter()
        .map(|(tuple, time, diff)| (tuple, cx.stamp(time), diff))
        .collect()
}

pub struct JoinNode {
    complement: TupleMask,
    primary: KeyedMemory,
    secondary: KeyedMemory,
}

impl JoinNode {
    #[must_use]
    pub fn new(
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
        representation: TimelineRepresentation,
    ) -> Self {
        Self {
            complement: secondary_mask.complement(),
            primary: KeyedMemory::new(primary_mask, representation),
            secondary: KeyedMemory::new(secondary_mask, representation),
        }
    }

    fn combine(&self, primary: &Tuple, secondary: &Tuple) -> Tuple {
        primary.concat(self.complement.transform(secondary).values())
    }
}

impl Node for JoinNode {
    fn name(&self) -> &'static str {
        "join"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let (primary, secondary) = split_slots(batch);
        let primary = stamped(primary, cx);
        let secondary = stamped(secondary, cx);

        for (tuple, time, diff) in primary.iter() {
            if let Some(bucket) = self.secondary.bucket(&self.primary.key(tuple)) {
                for (other, timeline) in bucket.iter() {
                    for (other_time, other_diff) in timeline.entries() {
                        out.emit(
                            self.combine(tuple, other),
                            join_times(*time, other_time),
                            diff * other_diff,
                        );
                    }
                }
            }
        }

        self.primary.apply(&primary);

        for (tuple, time, diff) in secondary.iter() {
            if let Some(bucket) = self.primary.bucket(&self.secondary.key(tuple)) {
                for (other, timeline) in bucket.iter() {
                    for (other_time, other_diff) in timeline.entries() {
                        out.emit(
                            self.combine(other, tuple),
                            join_times(*time, other_time),
                            diff * other_diff,
                        );
                    }
                }
            }
        }

        self.secondary.apply(&secondary);
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        let mut ret = Vec::new();
        for (key, primary) in self.primary.buckets.iter() {
            let secondary = match self.secondary.bucket(key) {
                Some(bucket) => bucket,
                None => continue,
            };

            for (left, left_timeline) in primary.iter() {
                for (right, right_timeline) in secondary.iter() {
                    let joined = self.combine(left, right);
                    for (left_time, left_diff) in left_timeline.entries() {
                        for (right_time, right_diff) in right_timeline.entries() {
                            ret.push((
                                joined.clone(),
                                join_times(left_time, right_time),
                                left_diff * right_diff,
                            ));
                        }
                    }
                }
            }
        }

        Some(ret)
    }
}

/// Primary tuples whose key has no secondary match: negation.
pub struct AntijoinNode {
    primary: KeyedMemory,
    secondary_mask: TupleMask,
    /// Total multiplicity of secondary tuples, per key.
    blockers: Memory,
}

impl AntijoinNode {
    #[must_use]
    pub fn new(
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
        representation: TimelineRepresentation,
    ) -> Self {
        Self {
            primary: KeyedMemory::new(primary_mask, representation),
            secondary_mask,
            blockers: Memory::new(representation),
        }
    }

    fn output_steps(&self, key: &Tuple, tuple: &Tuple) -> Steps {
        let present = self
            .primary
            .bucket(key)
            .map_or_else(Vec::new, |bucket| bucket.steps(tuple));
        let blocked = self.blockers.steps(key);

        combine_steps(&[&present, &blocked], |values| if values[1] > 0 { 0 } else { values[0] })
    }
}

impl Node for AntijoinNode {
    fn name(&self) -> &'static str {
        "antijoin"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let (primary, secondary) = split_slots(batch);
        let primary = stamped(primary, cx);
        let secondary = secondary
            .into_iter()
            .map(|(tuple, time, diff)| {
                (self.secondary_mask.transform(&tuple), cx.stamp(time), diff)
            })
            .collect::<Vec<_>>();

        let mut affected: FxHashMap<Tuple, FxHashSet<Tuple>> = FxHashMap::default();
        for (tuple, _, _) in primary.iter() {
            affected.entry(self.primary.key(tuple)).or_default().insert(tuple.clone());
        }

        for (key, _, _) in secondary.iter() {
            let tuples = affected.entry(key.clone()).or_default();
            if let Some(bucket) = self.primary.bucket(key) {
                tuples.extend(bucket.iter().map(|(tuple, _)| tuple.clone()));
            }
        }

        let mut old = Vec::new();
        for (key, tuples) in affected.iter() {
            for tuple in tuples {
                old.push(self.output_steps(key, tuple));
            }
        }

        self.primary.apply(&primary);
        self.blockers.apply_updates(&secondary);

        let mut old = old.into_iter();
        for (key, tuples) in affected.iter() {
            for tuple in tuples {
                let before = old.next().unwrap_or_default();
                let after = self.output_steps(key, tuple);
                for (time, diff) in steps_delta(&before, &after) {
                    out.emit(tuple.clone(), time, diff);
                }
            }
        }
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        let mut ret = Vec::new();
        for (key, bucket) in self.primary.buckets.iter() {
            for (tuple, _) in bucket.iter() {
                for (time, diff) in steps_delta(&[], &self.output_steps(key, tuple)) {
                    ret.push((tuple.clone(), time, diff));
                }
            }
        }

        Some(ret)
    }
}

#[cfg(test)]
use super::testing::{at, del, ins, Harness};
#[cfg(test)]
use crate::config::{EngineConfig, EnginePreset};
#[cfg(test)]
use crate::network::Slot;

#[cfg(test)]
fn edge_join(representation: TimelineRepresentation) -> JoinNode {
    // path(x, y, z) <- edge(x, y), edge(y, z)
    JoinNode::new(
        TupleMask::new(vec![1], 2).expect("ok"),
        TupleMask::new(vec![0], 2).expect("ok"),
        representation,
    )
}

#[test]
fn test_join_delta() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = edge_join(TimelineRepresentation::FirstOnly);

    assert_eq!(harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2])]), vec![]);
    assert_eq!(
        harness.feed(&mut node, Slot::Secondary, &[ins(&[2, 3]), ins(&[2, 4]), ins(&[5, 6])]),
        vec![ins(&[1, 2, 3]), ins(&[1, 2, 4])]
    );
    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[7, 2])]),
        vec![ins(&[7, 2, 3]), ins(&[7, 2, 4])]
    );
    assert_eq!(
        harness.feed(&mut node, Slot::Secondary, &[del(&[2, 3])]),
        vec![del(&[1, 2, 3]), del(&[7, 2, 3])]
    );

    let mut contents = node.contents(&harness.cx()).expect("stateful");
    contents.sort();
    assert_eq!(contents, vec![ins(&[1, 2, 4]), ins(&[7, 2, 4])]);
}

#[test]
fn test_join_same_batch_both_slots() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = edge_join(TimelineRepresentation::FirstOnly);

    let batch = vec![
        Message {
            slot: Slot::Primary,
            tuple: Tuple::from([1, 2]),
            timestamp: 0,
            diff: 1,
        },
        Message {
            slot: Slot::Secondary,
            tuple: Tuple::from([2, 3]),
            timestamp: 0,
            diff: 1,
        },
    ];
    let mut out = Emitter::default();
    node.update(batch, &harness.cx(), &mut out);
    assert_eq!(out.updates, vec![ins(&[1, 2, 3])]);
}

#[test]
fn test_join_timestamps() {
    let harness = Harness::new(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    let mut node = edge_join(TimelineRepresentation::Faithful);

    harness.feed(&mut node, Slot::Primary, &[at(&[1, 2], 3, 1)]);
    assert_eq!(
        harness.feed(&mut node, Slot::Secondary, &[at(&[2, 3], 1, 1)]),
        vec![at(&[1, 2, 3], 3, 1)]
    );
}

#[test]
fn test_antijoin() {
    let harness = Harness::new(EngineConfig::default());
    // lonely(x, y) <- edge(x, y), !edge(y, _)
    let mut node = AntijoinNode::new(
        TupleMask::new(vec![1], 2).expect("ok"),
        TupleMask::new(vec![0], 2).expect("ok"),
        TimelineRepresentation::FirstOnly,
    );

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[2, 3])]),
        vec![ins(&[1, 2]), ins(&[2, 3])]
    );
    assert_eq!(harness.feed(&mut node, Slot::Secondary, &[ins(&[2, 3])]), vec![del(&[1, 2])]);
    assert_eq!(harness.feed(&mut node, Slot::Secondary, &[ins(&[2, 4])]), vec![]);
    assert_eq!(harness.feed(&mut node, Slot::Secondary, &[del(&[2, 3])]), vec![]);
    assert_eq!(harness.feed(&mut node, Slot::Secondary, &[del(&[2, 4])]), vec![ins(&[1, 2])]);

    let mut contents = node.contents(&harness.cx()).expect("stateful");
    contents.sort();
    assert_eq!(contents, vec![ins(&[1, 2]), ins(&[2, 3])]);
}

#[test]
fn test_antijoin_timely() {
    let harness = Harness::new(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    let mut node = AntijoinNode::new(
        TupleMask::identity(1),
        TupleMask::identity(1),
        TimelineRepresentation::Faithful,
    );

    harness.feed(&mut node, Slot::Primary, &[at(&[1], 0, 1)]);
    assert_eq!(
        harness.feed(&mut node, Slot::Secondary, &[at(&[1], 2, 1)]),
        vec![at(&[1], 2, -1)]
    );
}
