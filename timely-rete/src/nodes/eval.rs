//! Check and eval nodes run an expression on every tuple.  Like the
//! other tuple-at-a-time operators they keep no memory.  A tuple the
//! expression fails on is dropped, both when it is inserted and when
//! it is deleted, so the output stays consistent.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::network::Message;
use crate::network::Slot;
use crate::update::Timestamp;
use crate::update::Update;
use rete_recipes::Expression;
use rete_recipes::Tuple;
use tracing::warn;

enum Mode {
    /// Keeps the tuples the expression holds on.
    Check,
    /// Appends the value of the expression.
    Eval,
}

pub struct EvaluatorNode {
    expression: Expression,
    mode: Mode,
}

impl EvaluatorNode {
    #[must_use]
    pub fn check(expression: Expression) -> Self {
        Self {
            expression,
            mode: Mode::Check,
        }
    }

    #[must_use]
    pub fn eval(expression: Expression) -> Self {
        Self {
            expression,
            mode: Mode::Eval,
        }
    }

    fn apply(&self, tuple: Tuple, time: Timestamp, diff: isize) -> Option<Update> {
        let value = match self.expression.evaluate(&tuple) {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, ?tuple, expression = ?self.expression, "dropping tuple");
                return None;
            }
        };

        match self.mode {
            Mode::Check if value.get() != 0 => Some((tuple, time, diff)),
            Mode::Check => None,
            Mode::Eval => Some((tuple.concat(&[value]), time, diff)),
        }
    }
}

impl Node for EvaluatorNode {
    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Check => "check",
            Mode::Eval => "eval",
        }
    }

    fn update(&mut self, batch: Vec<Message>, _cx: &NodeContext<'_>, out: &mut Emitter) {
        out.extend(
            batch
                .into_iter()
                .filter_map(|message| self.apply(message.tuple, message.timestamp, message.diff)),
        );
    }

    fn transform(&self, _slot: Slot, pulled: Vec<Update>, _cx: &NodeContext<'_>) -> Vec<Update> {
        pulled
            .into_iter()
            .filter_map(|(tuple, time, diff)| self.apply(tuple, time, diff))
            .collect()
    }
}

#[cfg(test)]
use super::testing::{del, ins, Harness};
#[cfg(test)]
use crate::config::EngineConfig;
#[cfg(test)]
use rete_recipes::BinaryOp;

#[test]
fn test_check() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = EvaluatorNode::check(Expression::binary(
        BinaryOp::Lt,
        Expression::column(0),
        Expression::column(1),
    ));

    let batch = [ins(&[1, 2]), ins(&[2, 1]), del(&[3, 4])];
    assert_eq!(harness.feed(&mut node, Slot::Primary, &batch), vec![ins(&[1, 2]), del(&[3, 4])]);
    assert_eq!(
        node.transform(Slot::Primary, batch.to_vec(), &harness.cx()),
        vec![ins(&[1, 2]), del(&[3, 4])]
    );
}

#[test]
fn test_eval() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = EvaluatorNode::eval(Expression::binary(
        BinaryOp::Div,
        Expression::column(0),
        Expression::column(1),
    ));

    // [5, 0] has no quotient: neither its insertion nor its deletion
    // make it through.
    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[6, 3]), ins(&[5, 0]), del(&[7, 2])]),
        vec![ins(&[6, 3, 2]), del(&[7, 2, 3])]
    );
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[5, 0])]), vec![]);
}
