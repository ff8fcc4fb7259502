//! Input nodes are the leaves of the network.  An enumerator holds the
//! extension of an input key (restricted to a seed), pulled once from
//! the backing model and then kept up to date by the boundary.  A
//! filter node holds nothing and asks the model about every tuple that
//! flows through it.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::network::Message;
use crate::network::Slot;
use crate::timeline::Memory;
use crate::update::Update;
use crate::update::NEUTRAL;
use crate::config::TimelineRepresentation;
use rete_recipes::InputKey;
use rete_recipes::Seed;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;

pub struct EnumeratorNode {
    seed: Seed,
    memory: Memory,
}

impl EnumeratorNode {
    /// Returns an enumerator that already holds `initial`.
    #[must_use]
    pub fn new(seed: Seed, initial: Vec<Tuple>, representation: TimelineRepresentation) -> Self {
        let mut memory = Memory::new(representation);
        let updates = initial.into_iter().map(|tuple| (tuple, NEUTRAL, 1)).collect::<Vec<_>>();
        memory.apply_updates(&updates);

        Self { seed, memory }
    }
}

impl Node for EnumeratorNode {
    fn name(&self) -> &'static str {
        "enumerator"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let mut updates = Vec::with_capacity(batch.len());
        for message in batch {
            // The model only notifies us about our own seed; anything
            // else is a routing bug upstream.
            debug_assert!(self.seed.matches(&message.tuple));
            updates.push((message.tuple, cx.stamp(message.timestamp), message.diff));
        }

        self.memory.apply_updates(&updates);
        out.extend(updates);
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        Some(self.memory.contents())
    }

    fn accepts_parents(&self) -> bool {
        false
    }
}

pub struct InputFilterNode {
    key: InputKey,
    mask: Option<TupleMask>,
}

impl InputFilterNode {
    #[must_use]
    pub fn new(key: InputKey, mask: Option<TupleMask>) -> Self {
        Self { key, mask }
    }

    fn accepts(&self, tuple: &Tuple, cx: &NodeContext<'_>) -> bool {
        match &self.mask {
            Some(mask) => cx.model.contains_tuple(&self.key, &mask.transform(tuple)),
            None => cx.model.contains_tuple(&self.key, tuple),
        }
    }
}

impl Node for InputFilterNode {
    fn name(&self) -> &'static str {
        "input-filter"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        for message in batch {
            if self.accepts(&message.tuple, cx) {
                out.emit(message.tuple, message.timestamp, message.diff);
            }
        }
    }

    fn transform(&self, _slot: Slot, pulled: Vec<Update>, cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
            .into_iter()
            .filter(|(tuple, _, _)| self.accepts(tuple, cx))
            .collect()
    }
}

#[cfg(test)]
use super::testing::{del, ins, Harness};

#[test]
fn test_enumerator() {
    use crate::config::EngineConfig;

    let harness = Harness::new(EngineConfig::default());
    let mut node = EnumeratorNode::new(
        Seed::unbound(1),
        vec![Tuple::from([1]), Tuple::from([2])],
        TimelineRepresentation::FirstOnly,
    );

    assert!(!node.accepts_parents());

    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[3]), del(&[1])]);
    assert_eq!(out, vec![del(&[1]), ins(&[3])]);

    let mut contents = node.contents(&harness.cx()).expect("stateful");
    contents.sort();
    assert_eq!(contents, vec![ins(&[2]), ins(&[3])]);
}

#[test]
fn test_input_filter() {
    use crate::config::EngineConfig;

    let harness = Harness::new(EngineConfig::default());
    let even = InputKey::stateless("Even", 1);
    harness
        .model
        .declare_stateless(even.clone(), |tuple: &Tuple| tuple.values()[0].get() % 2 == 0);

    let mut node = InputFilterNode::new(even, Some(TupleMask::new(vec![1], 2).expect("ok")));
    let out = harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[2, 3]), del(&[5, 4])]);
    assert_eq!(out, vec![ins(&[1, 2]), del(&[5, 4])]);

    assert!(node.contents(&harness.cx()).is_none());
    let pulled = node.transform(Slot::Primary, vec![ins(&[0, 0]), ins(&[0, 1])], &harness.cx());
    assert_eq!(pulled, vec![ins(&[0, 0])]);
}
