//! Listener plumbing hangs off a production node: one `MatcherNode`
//! per production converts result tuples back into the model's
//! representation, and every registered listener gets its own
//! `CallbackNode` below it.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::matcher::MatchUpdateListener;
use crate::network::Message;
use crate::network::Slot;
use crate::update::Direction;
use crate::update::Update;
use std::sync::Arc;

#[derive(Default)]
pub struct MatcherNode;

impl Node for MatcherNode {
    fn name(&self) -> &'static str {
        "matcher"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        for message in batch {
            out.emit(cx.model.unwrap_tuple(&message.tuple), message.timestamp, message.diff);
        }
    }

    fn transform(&self, _slot: Slot, pulled: Vec<Update>, cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
            .into_iter()
            .map(|(tuple, time, diff)| (cx.model.unwrap_tuple(&tuple), time, diff))
            .collect()
    }
}

/// Forwards every change to a listener.  Callbacks are queued, and
/// only fired once the container has released its lock.
pub struct CallbackNode {
    listener: Arc<dyn MatchUpdateListener>,
}

impl CallbackNode {
    #[must_use]
    pub fn new(listener: Arc<dyn MatchUpdateListener>) -> Self {
        Self { listener }
    }
}

impl Node for CallbackNode {
    fn name(&self) -> &'static str {
        "callback"
    }

    fn update(&mut self, batch: Vec<Message>, _cx: &NodeContext<'_>, out: &mut Emitter) {
        for message in batch {
            let direction = Direction::from_insertion(message.diff > 0);
            for _ in 0..message.diff.unsigned_abs() {
                out.notify(self.listener.clone(), direction, message.tuple.clone());
            }
        }
    }
}

#[cfg(test)]
use super::testing::{del, ins, Harness};
#[cfg(test)]
use crate::config::EngineConfig;
#[cfg(test)]
use rete_recipes::Tuple;
#[cfg(test)]
use std::sync::Mutex;

#[test]
fn test_callback_queues_notifications() {
    let harness = Harness::new(EngineConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut node = CallbackNode::new(Arc::new(move |direction: Direction, tuple: &Tuple| {
        sink.lock().expect("ok").push((direction, tuple.clone()));
    }));

    let emitter = harness.feed_emitter(&mut node, Slot::Primary, &[ins(&[1]), del(&[2])]);
    assert!(emitter.updates.is_empty());
    assert!(seen.lock().expect("ok").is_empty());

    for notification in emitter.notifications {
        notification.fire();
    }

    assert_eq!(
        *seen.lock().expect("ok"),
        vec![
            (Direction::Insert, Tuple::from([1])),
            (Direction::Delete, Tuple::from([2]))
        ]
    );
}

#[test]
fn test_matcher_node_passes_through() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = MatcherNode;
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[ins(&[3])]), vec![ins(&[3])]);
    assert!(node.contents(&harness.cx()).is_none());
}
