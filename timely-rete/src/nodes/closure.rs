//! Transitive closure of a binary relation.  The node keeps the edge
//! relation and, for every source vertex, the set of vertices it
//! reaches, labelled with the logical time at which the pair is
//! derived: a direct edge is visible at its own time, and every
//! extra hop adds one.
//!
//! Insertions are maintained exactly.  Deletions are where the
//! evaluation strategies differ: the naive strategy recomputes the
//! sources that may have lost pairs and emits the exact difference,
//! while delete-and-rederive first retracts every pair of those
//! sources, and only re-emits the survivors in `rederive`, once the
//! retractions have propagated through the network.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::config::EngineConfig;
use crate::network::Message;
use crate::timeline::group_by_tuple;
use crate::timeline::Memory;
use crate::timeline::Timeline;
use crate::update::join_times;
use crate::update::Timestamp;
use crate::update::Update;
use rete_recipes::Tuple;
use rete_recipes::Value;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::BinaryHeap;

/// Target vertex -> time at which the pair becomes visible.
type Labels = BTreeMap<Value, Timestamp>;

fn pair(source: Value, target: Value) -> Tuple {
    Tuple::from_vec(vec![source, target])
}

/// Returns the time from which `timeline` stays present, if the edge
/// currently exists.
fn current_since(timeline: Option<&Timeline>) -> Option<Timestamp> {
    timeline?
        .intervals()
        .last()
        .filter(|interval| interval.end.is_none())
        .map(|interval| interval.start)
}

pub struct TransitiveClosureNode {
    timely: bool,
    delete_and_rederive: bool,
    edges: Memory,
    successors: FxHashMap<Value, Labels>,
    reach: FxHashMap<Value, Labels>,
    /// Sources that were over-deleted and await `rederive`.
    pending: BTreeSet<Value>,
}

impl TransitiveClosureNode {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            timely: config.is_timely(),
            delete_and_rederive: config.delete_and_rederive,
            edges: Memory::new(config.representation()),
            successors: FxHashMap::default(),
            reach: FxHashMap::default(),
            pending: BTreeSet::new(),
        }
    }

    /// Returns every vertex reachable from `source`, labelled with
    /// its earliest derivation time.
    fn closure_from(&self, source: Value) -> Labels {
        let mut labels = Labels::new();
        let mut heap = BinaryHeap::new();
        if let Some(direct) = self.successors.get(&source) {
            heap.extend(direct.iter().map(|(target, time)| Reverse((*time, *target))));
        }

        while let Some(Reverse((time, vertex))) = heap.pop() {
            if labels.contains_key(&vertex) {
                continue;
            }

            labels.insert(vertex, time);
            if let Some(next) = self.successors.get(&vertex) {
                for (target, edge_time) in next.iter() {
                    if !labels.contains_key(target) {
                        let hop = if self.timely { time + 1 } else { time };
                        heap.push(Reverse((join_times(hop, *edge_time), *target)));
                    }
                }
            }
        }

        labels
    }

    fn emit_labels(
        source: Value,
        labels: &Labels,
        diff: isize,
        cx: &NodeContext<'_>,
        out: &mut Emitter,
    ) {
        for (target, time) in labels.iter() {
            out.emit(pair(source, *target), cx.stamp(*time), diff);
        }
    }

    /// Recomputes `source` and emits the exact change.
    fn refresh(&mut self, source: Value, cx: &NodeContext<'_>, out: &mut Emitter) {
        let old = self.reach.remove(&source).unwrap_or_default();
        let new = self.closure_from(source);

        for (target, time) in old.iter() {
            if new.get(target) != Some(time) {
                out.emit(pair(source, *target), cx.stamp(*time), -1);
            }
        }

        for (target, time) in new.iter() {
            if old.get(target) != Some(time) {
                out.emit(pair(source, *target), cx.stamp(*time), 1);
            }
        }

        if !new.is_empty() {
            self.reach.insert(source, new);
        }
    }
}

impl Node for TransitiveClosureNode {
    fn name(&self) -> &'static str {
        "transitive-closure"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let updates = batch
            .into_iter()
            .map(|message| (message.tuple, cx.stamp(message.timestamp), message.diff))
            .collect::<Vec<Update>>();

        let mut tails = BTreeSet::new();
        let mut lost_support = false;
        for (tuple, diffs) in group_by_tuple(&updates) {
            let values = tuple.values();
            let (tail, head) = (values[0], values[1]);

            let before = current_since(self.edges.get(&tuple));
            self.edges.apply(&tuple, &diffs);
            let after = current_since(self.edges.get(&tuple));
            if before == after {
                continue;
            }

            tails.insert(tail);
            match after {
                Some(time) => {
                    self.successors.entry(tail).or_default().insert(head, time);
                }
                None => {
                    if let Some(heads) = self.successors.get_mut(&tail) {
                        heads.remove(&head);
                        if heads.is_empty() {
                            self.successors.remove(&tail);
                        }
                    }
                }
            }

            // An edge that disappears or shows up later can only
            // shrink (or delay) the closure.
            lost_support |= match (before, after) {
                (Some(_), None) => true,
                (Some(old), Some(new)) => new > old,
                _ => false,
            };
        }

        if tails.is_empty() {
            return;
        }

        let mut affected = tails.clone();
        for (source, labels) in self.reach.iter() {
            if tails.iter().any(|tail| labels.contains_key(tail)) {
                affected.insert(*source);
            }
        }

        if self.delete_and_rederive && lost_support {
            for source in affected {
                if let Some(old) = self.reach.remove(&source) {
                    Self::emit_labels(source, &old, -1, cx, out);
                }

                self.pending.insert(source);
            }

            out.request_rederive();
            return;
        }

        for source in affected {
            if !self.pending.contains(&source) {
                self.refresh(source, cx, out);
            }
        }
    }

    fn rederive(&mut self, cx: &NodeContext<'_>, out: &mut Emitter) {
        for source in std::mem::take(&mut self.pending) {
            let labels = self.closure_from(source);
            Self::emit_labels(source, &labels, 1, cx, out);
            if !labels.is_empty() {
                self.reach.insert(source, labels);
            }
        }
    }

    fn contents(&self, cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        let mut ret = Vec::new();
        for (source, labels) in self.reach.iter() {
            for (target, time) in labels.iter() {
                ret.push((pair(*source, *target), cx.stamp(*time), 1));
            }
        }

        Some(ret)
    }
}

#[cfg(test)]
use super::testing::{at, del, ins, Harness};
#[cfg(test)]
use crate::config::EnginePreset;
#[cfg(test)]
use crate::network::Slot;

#[test]
fn test_closure_naive() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = TransitiveClosureNode::new(&harness.config);

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[2, 3])]),
        vec![ins(&[1, 2]), ins(&[1, 3]), ins(&[2, 3])]
    );

    // (1, 3) survives through the new path.
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[ins(&[1, 3])]), vec![]);
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[2, 3])]), vec![del(&[2, 3])]);
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[1, 3])]), vec![del(&[1, 3])]);

    let mut contents = node.contents(&harness.cx()).expect("stateful");
    contents.sort();
    assert_eq!(contents, vec![ins(&[1, 2])]);
}

#[test]
fn test_closure_cycle() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = TransitiveClosureNode::new(&harness.config);

    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[2, 1])]);
    assert_eq!(out, vec![ins(&[1, 1]), ins(&[1, 2]), ins(&[2, 1]), ins(&[2, 2])]);

    let out = harness.feed(&mut node, Slot::Primary, &[del(&[2, 1])]);
    assert_eq!(out, vec![del(&[1, 1]), del(&[2, 1]), del(&[2, 2])]);
}

#[test]
fn test_closure_delete_and_rederive() {
    let harness = Harness::new(EngineConfig::preset(EnginePreset::DeleteAndRederive));
    let mut node = TransitiveClosureNode::new(&harness.config);

    harness.feed(
        &mut node,
        Slot::Primary,
        &[ins(&[1, 2]), ins(&[2, 3]), ins(&[1, 3]), ins(&[4, 1])],
    );

    // Every pair of an affected source is retracted first...
    let emitter = harness.feed_emitter(&mut node, Slot::Primary, &[del(&[2, 3])]);
    assert!(emitter.rederive);
    assert_eq!(
        emitter.updates,
        vec![
            del(&[1, 2]),
            del(&[1, 3]),
            del(&[2, 3]),
            del(&[4, 1]),
            del(&[4, 2]),
            del(&[4, 3]),
        ]
    );

    // ... then the survivors come back.
    let mut out = Emitter::default();
    node.rederive(&harness.cx(), &mut out);
    crate::update::consolidate(&mut out.updates);
    assert_eq!(
        out.updates,
        vec![ins(&[1, 2]), ins(&[1, 3]), ins(&[4, 1]), ins(&[4, 2]), ins(&[4, 3])]
    );
}

#[test]
fn test_closure_timely_labels() {
    let harness = Harness::new(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    let mut node = TransitiveClosureNode::new(&harness.config);

    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[2, 3]), ins(&[3, 4])]);
    assert_eq!(
        out,
        vec![
            at(&[1, 2], 0, 1),
            at(&[1, 3], 1, 1),
            at(&[1, 4], 2, 1),
            at(&[2, 3], 0, 1),
            at(&[2, 4], 1, 1),
            at(&[3, 4], 0, 1),
        ]
    );

    // A shortcut derives (1, 4) earlier.
    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[1, 4])]);
    assert_eq!(out, vec![at(&[1, 4], 0, 1), at(&[1, 4], 2, -1)]);
}
