//! Tuple-at-a-time operators keep no memory: their output for a batch
//! only depends on the batch, and their contents are a function of
//! their parents' contents.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::network::Message;
use crate::network::Slot;
use crate::update::Update;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rete_recipes::Value;

/// Multiset projection (a "trimmer"): duplicates keep their
/// multiplicity, and a `Distinct` downstream restores set semantics
/// when needed.
pub struct ProjectionNode {
    mask: TupleMask,
}

impl ProjectionNode {
    #[must_use]
    pub fn new(mask: TupleMask) -> Self {
        Self { mask }
    }
}

impl Node for ProjectionNode {
    fn name(&self) -> &'static str {
        "projection"
    }

    fn update(&mut self, batch: Vec<Message>, _cx: &NodeContext<'_>, out: &mut Emitter) {
        for message in batch {
            out.emit(self.mask.transform(&message.tuple), message.timestamp, message.diff);
        }
    }

    fn transform(&self, _slot: Slot, pulled: Vec<Update>, _cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
            .into_iter()
            .map(|(tuple, time, diff)| (self.mask.transform(&tuple), time, diff))
            .collect()
    }
}

enum Predicate {
    Constant { position: usize, value: Value },
    Equality { positions: Vec<usize> },
    Inequality { subject: usize, inequals: Vec<usize> },
}

/// Selection on the values of a single tuple.
pub struct FilterNode {
    predicate: Predicate,
}

impl FilterNode {
    #[must_use]
    pub fn constant(position: usize, value: Value) -> Self {
        Self {
            predicate: Predicate::Constant { position, value },
        }
    }

    #[must_use]
    pub fn equality(positions: Vec<usize>) -> Self {
        Self {
            predicate: Predicate::Equality { positions },
        }
    }

    #[must_use]
    pub fn inequality(subject: usize, inequals: Vec<usize>) -> Self {
        Self {
            predicate: Predicate::Inequality { subject, inequals },
        }
    }

    fn accepts(&self, tuple: &Tuple) -> bool {
        let values = tuple.values();
        match &self.predicate {
            Predicate::Constant { position, value } => values[*position] == *value,
            Predicate::Equality { positions } => match positions.split_first() {
                Some((first, rest)) => rest.iter().all(|x| values[*x] == values[*first]),
                None => true,
            },
            Predicate::Inequality { subject, inequals } => {
                inequals.iter().all(|x| values[*x] != values[*subject])
            }
        }
    }
}

impl Node for FilterNode {
    fn name(&self) -> &'static str {
        match self.predicate {
            Predicate::Constant { .. } => "constant-filter",
            Predicate::Equality { .. } => "equality-filter",
            Predicate::Inequality { .. } => "inequality-filter",
        }
    }

    fn update(&mut self, batch: Vec<Message>, _cx: &NodeContext<'_>, out: &mut Emitter) {
        for message in batch {
            if self.accepts(&message.tuple) {
                out.emit(message.tuple, message.timestamp, message.diff);
            }
        }
    }

    fn transform(&self, _slot: Slot, pulled: Vec<Update>, _cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
            .into_iter()
            .filter(|(tuple, _, _)| self.accepts(tuple))
            .collect()
    }
}

/// Multiset union of any number of parents, all on the primary slot.
pub struct UnionNode;

impl Node for UnionNode {
    fn name(&self) -> &'static str {
        "union"
    }

    fn update(&mut self, batch: Vec<Message>, _cx: &NodeContext<'_>, out: &mut Emitter) {
        out.extend(
            batch
                .into_iter()
                .map(|message| (message.tuple, message.timestamp, message.diff)),
        );
    }
}

#[cfg(test)]
use super::testing::{del, ins, Harness};
#[cfg(test)]
use crate::config::EngineConfig;

#[test]
fn test_projection_keeps_multiplicity() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = ProjectionNode::new(TupleMask::new(vec![0], 2).expect("ok"));

    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[1, 3]), ins(&[2, 3])]);
    assert_eq!(out, vec![(Tuple::from([1]), 0, 2), ins(&[2])]);
}

#[test]
fn test_filters() {
    let harness = Harness::new(EngineConfig::default());
    let batch = [ins(&[1, 1]), ins(&[1, 2]), del(&[2, 2])];

    let mut equal = FilterNode::equality(vec![0, 1]);
    assert_eq!(harness.feed(&mut equal, Slot::Primary, &batch), vec![ins(&[1, 1]), del(&[2, 2])]);

    let mut unequal = FilterNode::inequality(0, vec![1]);
    assert_eq!(harness.feed(&mut unequal, Slot::Primary, &batch), vec![ins(&[1, 2])]);

    let mut constant = FilterNode::constant(1, Value::new(2));
    assert_eq!(
        harness.feed(&mut constant, Slot::Primary, &batch),
        vec![ins(&[1, 2]), del(&[2, 2])]
    );
    assert_eq!(
        constant.transform(Slot::Primary, batch.to_vec(), &harness.cx()),
        vec![ins(&[1, 2]), del(&[2, 2])]
    );
}

#[test]
fn test_union() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = UnionNode;
    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[1]), ins(&[1]), del(&[2])]),
        vec![(Tuple::from([1]), 0, 2), del(&[2])]
    );
}
