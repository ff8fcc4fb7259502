use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::config::TimelineRepresentation;
use crate::network::Message;
use crate::timeline::combine_steps;
use crate::timeline::group_by_tuple;
use crate::timeline::steps_delta;
use crate::timeline::Memory;
use crate::timeline::Steps;
use crate::update::Timestamp;
use crate::update::Update;

/// Returns the indicator of positive multiplicity for a step function.
#[must_use]
pub(crate) fn presence(steps: &[(Timestamp, isize)]) -> Steps {
    combine_steps(&[steps], |values| isize::from(values[0] > 0))
}

/// The uniqueness enforcer: a tuple is output (once) whenever its
/// upstream multiplicity is positive.
pub struct DistinctNode {
    memory: Memory,
}

impl DistinctNode {
    #[must_use]
    pub fn new(representation: TimelineRepresentation) -> Self {
        Self {
            memory: Memory::new(representation),
        }
    }
}

impl Node for DistinctNode {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let updates = batch
            .into_iter()
            .map(|message| (message.tuple, cx.stamp(message.timestamp), message.diff))
            .collect::<Vec<_>>();

        for (tuple, diffs) in group_by_tuple(&updates) {
            let old = presence(&self.memory.steps(&tuple));
            self.memory.apply(&tuple, &diffs);
            let new = presence(&self.memory.steps(&tuple));

            for (time, diff) in steps_delta(&old, &new) {
                out.emit(tuple.clone(), time, diff);
            }
        }
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        let mut ret = Vec::new();
        for (tuple, timeline) in self.memory.iter() {
            for (time, diff) in steps_delta(&[], &presence(&timeline.steps())) {
                ret.push((tuple.clone(), time, diff));
            }
        }

        Some(ret)
    }
}

#[cfg(test)]
use super::testing::{at, del, ins, Harness};
#[cfg(test)]
use crate::network::Slot;

#[test]
fn test_distinct() {
    use crate::config::EngineConfig;

    let harness = Harness::new(EngineConfig::default());
    let mut node = DistinctNode::new(TimelineRepresentation::FirstOnly);

    assert_eq!(harness.feed(&mut node, Slot::Primary, &[ins(&[1]), ins(&[1])]), vec![ins(&[1])]);
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[1])]), vec![]);
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[1])]), vec![del(&[1])]);
}

#[test]
fn test_distinct_timely() {
    use crate::config::{EngineConfig, EnginePreset};

    let harness = Harness::new(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    let mut node = DistinctNode::new(TimelineRepresentation::Faithful);

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[at(&[1], 2, 1), at(&[1], 1, 1)]),
        vec![at(&[1], 1, 1)]
    );

    // Losing the earlier support delays the appearance to time 2.
    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[at(&[1], 1, -1)]),
        vec![at(&[1], 1, -1), at(&[1], 2, 1)]
    );

    let contents = node.contents(&harness.cx()).expect("stateful");
    assert_eq!(contents, vec![at(&[1], 2, 1)]);
}
