//! Column aggregators group their input by a mask, and output
//! `group ++ [result]` for every group with a result: the operator
//! applied to the multiset of values found in one column.  Counting is
//! the special case that ignores the column.
//!
//! Over time the result of a group is a step function; the node keeps
//! one bucket per timestamp at which some aggregand changed.  The two
//! architectures differ in what a bucket holds.  In the parallel one,
//! every bucket holds a full copy of the group's aggregands as of that
//! time, so any bucket can be evaluated on its own.  In the sequential
//! one, a bucket only holds the aggregands that changed at its time,
//! and the running accumulator is folded forward from the previous
//! bucket.  Both produce the same output.
use super::Emitter;
use super::Node;
use super::NodeContext;
use crate::config::AggregatorArchitecture;
use crate::config::EngineConfig;
use crate::config::TimelineRepresentation;
use crate::network::Message;
use crate::update::consolidate;
use crate::update::Timestamp;
use crate::update::Update;
use rete_recipes::AggregateOperator;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rete_recipes::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Aggregated value -> multiplicity, without zeros.
#[derive(Clone, Debug, Default)]
struct Accumulator {
    values: BTreeMap<Value, isize>,
}

impl Accumulator {
    fn add(&mut self, value: Value, diff: isize) {
        let entry = self.values.entry(value).or_insert(0);
        *entry += diff;
        if *entry == 0 {
            self.values.remove(&value);
        }
    }

    fn merge(&mut self, other: &Accumulator) {
        for (value, diff) in other.values.iter() {
            self.add(*value, *diff);
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sums wrap on overflow.
    fn aggregate(&self, operator: AggregateOperator) -> Option<Value> {
        let mut present = self.values.iter().filter(|(_, diff)| **diff > 0);
        match operator {
            AggregateOperator::Count => {
                let total = self.values.values().sum::<isize>();
                (total > 0).then(|| Value::from(total as i64))
            }
            AggregateOperator::Sum => present
                .map(|(value, diff)| value.get().wrapping_mul(*diff as i64))
                .reduce(i64::wrapping_add)
                .map(Value::new),
            AggregateOperator::Min => present.next().map(|(value, _)| *value),
            AggregateOperator::Max => present.next_back().map(|(value, _)| *value),
        }
    }
}

enum Buckets {
    Parallel(BTreeMap<Timestamp, Accumulator>),
    Sequential {
        changes: BTreeMap<Timestamp, Accumulator>,
        folded: BTreeMap<Timestamp, Accumulator>,
    },
}

impl Buckets {
    fn new(architecture: AggregatorArchitecture) -> Self {
        match architecture {
            AggregatorArchitecture::Parallel => Self::Parallel(BTreeMap::new()),
            AggregatorArchitecture::Sequential => Self::Sequential {
                changes: BTreeMap::new(),
                folded: BTreeMap::new(),
            },
        }
    }

    fn apply(&mut self, value: Value, time: Timestamp, diff: isize) {
        match self {
            Self::Parallel(buckets) => {
                if !buckets.contains_key(&time) {
                    let previous = buckets
                        .range(..time)
                        .next_back()
                        .map(|(_, accumulator)| accumulator.clone())
                        .unwrap_or_default();
                    buckets.insert(time, previous);
                }

                for (_, accumulator) in buckets.range_mut(time..) {
                    accumulator.add(value, diff);
                }
            }
            Self::Sequential { changes, folded } => {
                let bucket = changes.entry(time).or_default();
                bucket.add(value, diff);
                if bucket.is_empty() {
                    changes.remove(&time);
                }

                let mut running = folded
                    .range(..time)
                    .next_back()
                    .map(|(_, accumulator)| accumulator.clone())
                    .unwrap_or_default();
                let _stale = folded.split_off(&time);
                for (at, bucket) in changes.range(time..) {
                    running.merge(bucket);
                    folded.insert(*at, running.clone());
                }
            }
        }
    }

    /// Folds every bucket into the earliest one.
    fn compact(&mut self) {
        match self {
            Self::Parallel(buckets) => {
                let first = buckets.keys().next().copied();
                let last = buckets.values().next_back().cloned();
                buckets.clear();
                if let (Some(first), Some(last)) = (first, last) {
                    if !last.is_empty() {
                        buckets.insert(first, last);
                    }
                }
            }
            Self::Sequential { changes, folded } => {
                let first = changes.keys().next().copied();
                let mut merged = Accumulator::default();
                for (_, bucket) in std::mem::take(changes) {
                    merged.merge(&bucket);
                }

                folded.clear();
                if let Some(first) = first {
                    if !merged.is_empty() {
                        folded.insert(first, merged.clone());
                        changes.insert(first, merged);
                    }
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Parallel(buckets) => buckets.values().all(Accumulator::is_empty),
            Self::Sequential { changes, .. } => changes.is_empty(),
        }
    }

    /// Returns the result of the group as a step function.
    fn results(&self, operator: AggregateOperator) -> Vec<(Timestamp, Option<Value>)> {
        let accumulators = match self {
            Self::Parallel(buckets) => buckets,
            Self::Sequential { folded, .. } => folded,
        };

        accumulators
            .iter()
            .map(|(time, accumulator)| (*time, accumulator.aggregate(operator)))
            .collect()
    }
}

pub struct ColumnAggregatorNode {
    group_mask: TupleMask,
    /// `None` for counting.
    column: Option<usize>,
    operator: AggregateOperator,
    architecture: AggregatorArchitecture,
    representation: TimelineRepresentation,
    groups: FxHashMap<Tuple, Buckets>,
}

impl ColumnAggregatorNode {
    #[must_use]
    pub fn new(
        group_mask: TupleMask,
        column: usize,
        operator: AggregateOperator,
        config: &EngineConfig,
    ) -> Self {
        let column = (operator != AggregateOperator::Count).then_some(column);
        Self::build(group_mask, column, operator, config)
    }

    /// Counts the tuples of every group.
    #[must_use]
    pub fn count(group_mask: TupleMask, config: &EngineConfig) -> Self {
        Self::build(group_mask, None, AggregateOperator::Count, config)
    }

    fn build(
        group_mask: TupleMask,
        column: Option<usize>,
        operator: AggregateOperator,
        config: &EngineConfig,
    ) -> Self {
        Self {
            group_mask,
            column,
            operator,
            architecture: config.architecture(),
            representation: config.representation(),
            groups: FxHashMap::default(),
        }
    }

    fn aggregand(&self, tuple: &Tuple) -> Value {
        self.column
            .and_then(|column| tuple.get(column))
            .unwrap_or_default()
    }

    /// Returns the full output of `group`: one `group ++ [result]`
    /// tuple for each stretch of time with the same result.
    fn group_output(&self, group: &Tuple, buckets: Option<&Buckets>) -> Vec<Update> {
        let mut ret = Vec::new();
        let mut previous = None;
        let results = buckets.map_or_else(Vec::new, |buckets| buckets.results(self.operator));
        for (time, result) in results {
            if result == previous {
                continue;
            }

            if let Some(old) = previous {
                ret.push((group.concat(&[old]), time, -1));
            }

            if let Some(new) = result {
                ret.push((group.concat(&[new]), time, 1));
            }

            previous = result;
        }

        ret
    }
}

impl Node for ColumnAggregatorNode {
    fn name(&self) -> &'static str {
        self.operator.name()
    }

    fn update(&mut self, batch: Vec<Message>, cx: &NodeContext<'_>, out: &mut Emitter) {
        let mut by_group: BTreeMap<Tuple, Vec<Message>> = BTreeMap::new();
        for message in batch {
            by_group
                .entry(self.group_mask.transform(&message.tuple))
                .or_default()
                .push(message);
        }

        for (group, messages) in by_group {
            let mut delta = self
                .group_output(&group, self.groups.get(&group))
                .into_iter()
                .map(|(tuple, time, diff)| (tuple, time, -diff))
                .collect::<Vec<_>>();

            let aggregands = messages
                .iter()
                .map(|message| {
                    let time = cx.stamp(message.timestamp);
                    (self.aggregand(&message.tuple), time, message.diff)
                })
                .collect::<Vec<_>>();
            let architecture = self.architecture;
            let buckets = self
                .groups
                .entry(group.clone())
                .or_insert_with(|| Buckets::new(architecture));
            for (value, time, diff) in aggregands {
                buckets.apply(value, time, diff);
            }

            if self.representation == TimelineRepresentation::FirstOnly {
                buckets.compact();
            }

            if buckets.is_empty() {
                self.groups.remove(&group);
            }

            delta.extend(self.group_output(&group, self.groups.get(&group)));
            consolidate(&mut delta);
            out.extend(delta);
        }
    }

    fn contents(&self, _cx: &NodeContext<'_>) -> Option<Vec<Update>> {
        Some(
            self.groups
                .iter()
                .flat_map(|(group, buckets)| self.group_output(group, Some(buckets)))
                .collect(),
        )
    }
}

#[cfg(test)]
use super::testing::{at, del, ins, Harness};
#[cfg(test)]
use crate::config::EnginePreset;
#[cfg(test)]
use crate::network::Slot;

#[cfg(test)]
fn out_degree(config: &EngineConfig) -> ColumnAggregatorNode {
    ColumnAggregatorNode::count(TupleMask::new(vec![0], 2).expect("ok"), config)
}

#[cfg(test)]
fn by_source(operator: AggregateOperator, config: &EngineConfig) -> ColumnAggregatorNode {
    ColumnAggregatorNode::new(TupleMask::new(vec![0], 2).expect("ok"), 1, operator, config)
}

#[test]
fn test_count_timeless() {
    let harness = Harness::new(EngineConfig::default());
    let mut node = out_degree(&harness.config);

    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[ins(&[1, 2]), ins(&[1, 3]), ins(&[2, 3])]),
        vec![ins(&[1, 2]), ins(&[2, 1])]
    );
    assert_eq!(
        harness.feed(&mut node, Slot::Primary, &[del(&[1, 2])]),
        vec![ins(&[1, 1]), del(&[1, 2])]
    );
    assert_eq!(harness.feed(&mut node, Slot::Primary, &[del(&[2, 3])]), vec![del(&[2, 1])]);

    assert_eq!(node.contents(&harness.cx()).expect("stateful"), vec![ins(&[1, 1])]);
}

#[test]
fn test_sum_min_max_timeless() {
    let harness = Harness::new(EngineConfig::default());
    let batch = [ins(&[1, 4]), ins(&[1, -2]), ins(&[1, 7]), ins(&[2, 5])];

    let mut sum = by_source(AggregateOperator::Sum, &harness.config);
    assert_eq!(harness.feed(&mut sum, Slot::Primary, &batch), vec![ins(&[1, 9]), ins(&[2, 5])]);
    // Multiplicities weigh in.
    assert_eq!(
        harness.feed(&mut sum, Slot::Primary, &[ins(&[1, 4])]),
        vec![del(&[1, 9]), ins(&[1, 13])]
    );

    let mut min = by_source(AggregateOperator::Min, &harness.config);
    assert_eq!(harness.feed(&mut min, Slot::Primary, &batch), vec![ins(&[1, -2]), ins(&[2, 5])]);
    assert_eq!(
        harness.feed(&mut min, Slot::Primary, &[del(&[1, -2])]),
        vec![del(&[1, -2]), ins(&[1, 4])]
    );
    // The minimum is unchanged: nothing to emit.
    assert_eq!(harness.feed(&mut min, Slot::Primary, &[del(&[1, 7])]), vec![]);

    let mut max = by_source(AggregateOperator::Max, &harness.config);
    assert_eq!(harness.feed(&mut max, Slot::Primary, &batch), vec![ins(&[1, 7]), ins(&[2, 5])]);
    assert_eq!(harness.feed(&mut max, Slot::Primary, &[del(&[2, 5])]), vec![del(&[2, 5])]);
    assert_eq!(max.contents(&harness.cx()).expect("stateful"), vec![ins(&[1, 7])]);
}

#[test]
fn test_count_architectures_agree() {
    let batches = vec![
        vec![at(&[1, 2], 0, 1), at(&[1, 3], 2, 1)],
        vec![at(&[1, 4], 1, 1)],
        vec![at(&[1, 2], 0, -1), at(&[1, 2], 3, 1)],
        vec![at(&[1, 3], 2, -1)],
    ];

    for preset in &[EnginePreset::TimelyFaithfulParallel, EnginePreset::TimelyFaithfulSequential] {
        let harness = Harness::new(EngineConfig::preset(*preset));
        let mut node = out_degree(&harness.config);
        let mut outputs = Vec::new();
        for batch in batches.iter() {
            outputs.push(harness.feed(&mut node, Slot::Primary, batch));
        }

        assert_eq!(outputs[0], vec![at(&[1, 1], 0, 1), at(&[1, 1], 2, -1), at(&[1, 2], 2, 1)]);
        assert_eq!(
            outputs[1],
            vec![
                at(&[1, 1], 1, -1),
                at(&[1, 1], 2, 1),
                at(&[1, 2], 1, 1),
                at(&[1, 2], 2, -2),
                at(&[1, 3], 2, 1),
            ]
        );

        let mut contents = node.contents(&harness.cx()).expect("stateful");
        consolidate(&mut contents);
        assert_eq!(contents, vec![at(&[1, 1], 1, 1), at(&[1, 1], 3, -1), at(&[1, 2], 3, 1)]);
    }
}

#[test]
fn test_max_architectures_agree() {
    // Source 1 gains 5 at time 0, 9 at time 2 and loses 9 at time 3.
    let batches = vec![
        vec![at(&[1, 5], 0, 1), at(&[1, 9], 2, 1)],
        vec![at(&[1, 9], 3, -1)],
        vec![at(&[1, 7], 1, 1)],
    ];

    for preset in &[EnginePreset::TimelyFaithfulParallel, EnginePreset::TimelyFaithfulSequential] {
        let harness = Harness::new(EngineConfig::preset(*preset));
        let mut node = by_source(AggregateOperator::Max, &harness.config);
        let mut outputs = Vec::new();
        for batch in batches.iter() {
            outputs.push(harness.feed(&mut node, Slot::Primary, batch));
        }

        assert_eq!(outputs[0], vec![at(&[1, 5], 0, 1), at(&[1, 5], 2, -1), at(&[1, 9], 2, 1)]);
        assert_eq!(outputs[1], vec![at(&[1, 5], 3, 1), at(&[1, 9], 3, -1)]);
        // 7 shadows 5 from time 1 on, except while 9 is around.
        assert_eq!(
            outputs[2],
            vec![
                at(&[1, 5], 1, -1),
                at(&[1, 5], 2, 1),
                at(&[1, 5], 3, -1),
                at(&[1, 7], 1, 1),
                at(&[1, 7], 2, -1),
                at(&[1, 7], 3, 1),
            ]
        );
    }
}

#[test]
fn test_count_first_only_compacts() {
    let presets = [EnginePreset::TimelyFirstOnlyParallel, EnginePreset::TimelyFirstOnlySequential];
    for preset in &presets {
        let harness = Harness::new(EngineConfig::preset(*preset));
        let mut node = out_degree(&harness.config);

        assert_eq!(
            harness.feed(&mut node, Slot::Primary, &[at(&[1, 2], 1, 1)]),
            vec![at(&[1, 1], 1, 1)]
        );
        assert_eq!(
            harness.feed(&mut node, Slot::Primary, &[at(&[1, 3], 4, 1)]),
            vec![at(&[1, 1], 1, -1), at(&[1, 2], 1, 1)]
        );
    }
}

#[test]
fn test_sum_first_only_compacts() {
    let presets = [EnginePreset::TimelyFirstOnlyParallel, EnginePreset::TimelyFirstOnlySequential];
    for preset in &presets {
        let harness = Harness::new(EngineConfig::preset(*preset));
        let mut node = by_source(AggregateOperator::Sum, &harness.config);

        assert_eq!(
            harness.feed(&mut node, Slot::Primary, &[at(&[1, 2], 1, 1)]),
            vec![at(&[1, 2], 1, 1)]
        );
        assert_eq!(
            harness.feed(&mut node, Slot::Primary, &[at(&[1, 3], 4, 1)]),
            vec![at(&[1, 2], 1, -1), at(&[1, 5], 1, 1)]
        );
        assert_eq!(
            harness.feed(&mut node, Slot::Primary, &[at(&[1, 2], 1, -1), at(&[1, 3], 4, -1)]),
            vec![at(&[1, 5], 1, -1)]
        );
    }
}
