//! Nodes are the operators of the network.  Each node implements the
//! same narrow contract: given a consolidated batch of upstream
//! messages, update whatever state it keeps and emit the resulting
//! downstream delta.  Nodes never talk to each other directly; the
//! container routes their output to their children's mailboxes.
//!
//! Nodes that keep state answer `contents` from memory when a new
//! child needs to be synchronised.  Stateless nodes return `None`
//! there, and instead `transform` the contents pulled from their own
//! parents.
//!
//! Operators whose deletions cannot be subtracted algebraically
//! (transitive closure) over-delete when the network runs
//! delete-and-rederive, then ask for a `rederive` call once every
//! pending deletion in their container has been delivered.
use crate::config::EngineConfig;
use crate::matcher::MatchUpdateListener;
use crate::model::BackingModel;
use crate::network::Message;
use crate::network::Slot;
use crate::update::Direction;
use crate::update::Timestamp;
use crate::update::Update;
use crate::update::NEUTRAL;
use rete_recipes::Recipe;
use rete_recipes::Tuple;
use std::sync::Arc;

mod aggregate;
mod closure;
mod distinct;
mod eval;
mod input;
mod join;
mod production;
mod sink;
mod stateless;

pub use aggregate::ColumnAggregatorNode;
pub use closure::TransitiveClosureNode;
pub use distinct::DistinctNode;
pub use eval::EvaluatorNode;
pub use input::EnumeratorNode;
pub use input::InputFilterNode;
pub use join::AntijoinNode;
pub use join::JoinNode;
pub use production::Indexer;
pub use production::ProductionNode;
pub use sink::CallbackNode;
pub use sink::MatcherNode;
pub use stateless::FilterNode;
pub use stateless::ProjectionNode;
pub use stateless::UnionNode;

/// What a node may consult while it processes a batch.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub model: &'a dyn BackingModel,
    pub config: &'a EngineConfig,
}

impl<'a> NodeContext<'a> {
    /// Clamps `timestamp` to the neutral time outside timely
    /// evaluation.
    #[inline]
    #[must_use]
    pub fn stamp(&self, timestamp: Timestamp) -> Timestamp {
        if self.config.is_timely() {
            timestamp
        } else {
            NEUTRAL
        }
    }
}

/// A listener callback, queued while the container is locked and
/// fired once it is released.
pub struct Notification {
    listener: Arc<dyn MatchUpdateListener>,
    direction: Direction,
    tuple: Tuple,
}

impl Notification {
    pub fn fire(self) {
        self.listener.update(self.direction, &self.tuple);
    }
}

/// Collects everything a node produces while handling one batch.
#[derive(Default)]
pub struct Emitter {
    pub(crate) updates: Vec<Update>,
    pub(crate) notifications: Vec<Notification>,
    pub(crate) rederive: bool,
}

impl Emitter {
    #[inline]
    pub fn emit(&mut self, tuple: Tuple, timestamp: Timestamp, diff: isize) {
        if diff != 0 {
            self.updates.push((tuple, timestamp, diff));
        }
    }

    pub fn extend<I: IntoIterator<Item = Update>>(&mut self, updates: I) {
        self.updates.extend(updates.into_iter().filter(|(_, _, diff)| *diff != 0));
    }

    pub fn notify(
        &mut self,
        listener: Arc<dyn MatchUpdateListener>,
        direction: Direction,
        tuple: Tuple,
    ) {
        self.notifications.push(Notification {
            listener,
            direction,
            tuple,
        });
    }

    /// Schedules a `rederive` call after the current anti-monotone
    /// phase.
    pub fn request_rederive(&mut self) {
        self.rederive = true;
    }
}

pub trait Node: Send {
    fn name(&self) -> &'static str;

    /// Processes a consolidated batch of messages, and emits the
    /// resulting delta into `out`.
    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter);

    /// Returns everything the node currently outputs, for stateful
    /// nodes.
    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        None
    }

    /// Maps the contents of the parent on `slot` to this node's
    /// output.  Only called when `contents` returns `None`.
    fn transform(&self, _slot: Slot, pulled: Vec<Update>, _cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
    }

    /// Second half of delete-and-rederive: re-emits whatever survived
    /// the preceding over-deletion.
    fn rederive(&mut self, _cx: &NodeContext<'_>, _out: &mut Emitter) {}

    fn accepts_parents(&self) -> bool {
        true
    }

    fn as_production_mut(&mut self) -> Option<&mut ProductionNode> {
        None
    }
}

/// Returns a fresh node for every recipe kind except inputs, which
/// the input connector builds from the backing model's contents.
#[must_use]
pub fn node_for_recipe(recipe: &Recipe, config: &EngineConfig) -> Option<Box<dyn Node>> {
    let representation = config.representation();
    let node: Box<dyn Node> = match recipe {
        Recipe::Input { .. } => return None,
        Recipe::InputFilter { key, mask, .. } => {
            Box::new(InputFilterNode::new(key.clone(), mask.clone()))
        }
        Recipe::Projection { mask, .. } => Box::new(ProjectionNode::new(mask.clone())),
        Recipe::Distinct { .. } => Box::new(DistinctNode::new(representation)),
        Recipe::ConstantFilter {
            position, value, ..
        } => Box::new(FilterNode::constant(*position, *value)),
        Recipe::EqualityFilter { positions, .. } => {
            Box::new(FilterNode::equality(positions.clone()))
        }
        Recipe::InequalityFilter {
            subject, inequals, ..
        } => Box::new(FilterNode::inequality(*subject, inequals.clone())),
        Recipe::Join {
            primary_mask,
            secondary_mask,
            ..
        } => Box::new(JoinNode::new(
            primary_mask.clone(),
            secondary_mask.clone(),
            representation,
        )),
        Recipe::Antijoin {
            primary_mask,
            secondary_mask,
            ..
        } => Box::new(AntijoinNode::new(
            primary_mask.clone(),
            secondary_mask.clone(),
            representation,
        )),
        Recipe::Union { .. } => Box::new(UnionNode),
        Recipe::Count { group_mask, .. } => {
            Box::new(ColumnAggregatorNode::count(group_mask.clone(), config))
        }
        Recipe::Aggregate {
            group_mask,
            column,
            operator,
            ..
        } => Box::new(ColumnAggregatorNode::new(
            group_mask.clone(),
            *column,
            *operator,
            config,
        )),
        Recipe::Check { expression, .. } => Box::new(EvaluatorNode::check(expression.clone())),
        Recipe::Eval { expression, .. } => Box::new(EvaluatorNode::eval(expression.clone())),
        Recipe::TransitiveClosure { .. } => Box::new(TransitiveClosureNode::new(config)),
        Recipe::Production { .. } => Box::new(ProductionNode::new(representation)),
    };

    Some(node)
}

/// Splits a batch by slot, as `(tuple, time, diff)` updates.
#[must_use]
pub(crate) fn split_slots(batch: Vec<Message>) -> (Vec<Update>, Vec<Update>) {
    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for message in batch {
        let update = (message.tuple, message.timestamp, message.diff);
        match message.slot {
            Slot::Primary => primary.push(update),
            Slot::Secondary => secondary.push(update),
        }
    }

    (primary, secondary)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Drives single nodes without a network.
    use super::*;
    use crate::model::MemoryModel;

    pub(crate) struct Harness {
        pub model: MemoryModel,
        pub config: EngineConfig,
    }

    impl Harness {
        pub(crate) fn new(config: EngineConfig) -> Self {
            Self {
                model: MemoryModel::new(),
                config,
            }
        }

        pub(crate) fn cx(&self) -> NodeContext<'_> {
            NodeContext {
                model: &self.model,
                config: &self.config,
            }
        }

        /// Delivers `updates` on `slot`, and returns the consolidated
        /// output.
        pub(crate) fn feed(
            &self,
            node: &mut dyn Node,
            slot: Slot,
            updates: &[Update],
        ) -> Vec<Update> {
            self.feed_emitter(node, slot, updates).updates
        }

        pub(crate) fn feed_emitter(
            &self,
            node: &mut dyn Node,
            slot: Slot,
            updates: &[Update],
        ) -> Emitter {
            let batch = updates
                .iter()
                .map(|(tuple, timestamp, diff)| Message {
                    slot,
                    tuple: tuple.clone(),
                    timestamp: *timestamp,
                    diff: *diff,
                })
                .collect();
            let mut out = Emitter::default();
            node.update(batch, &self.cx(), &mut out);
            crate::update::consolidate(&mut out.updates);
            out
        }
    }

    /// Shorthand for a unit insertion at the neutral time.
    pub(crate) fn ins(raw: &[i64]) -> Update {
        (Tuple::from_vec(raw.iter().map(|x| (*x).into()).collect()), NEUTRAL, 1)
    }

    pub(crate) fn del(raw: &[i64]) -> Update {
        (Tuple::from_vec(raw.iter().map(|x| (*x).into()).collect()), NEUTRAL, -1)
    }

    pub(crate) fn at(raw: &[i64], timestamp: Timestamp, diff: isize) -> Update {
        (Tuple::from_vec(raw.iter().map(|x| (*x).into()).collect()), timestamp, diff)
    }
}
