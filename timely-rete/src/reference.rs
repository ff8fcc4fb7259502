//! A from-scratch evaluation of recipe trees on differential dataflow.
//! The network maintains its productions incrementally; this module
//! recomputes them from the current state of the model, so tests can
//! check that the two agree after arbitrary edit sequences.  It is
//! only built for tests.
use crate::model::BackingModel;
use differential_dataflow::lattice::Lattice;
use differential_dataflow::operators::Count;
use differential_dataflow::operators::Iterate;
use differential_dataflow::operators::Join;
use differential_dataflow::operators::Reduce;
use differential_dataflow::operators::Threshold;
use differential_dataflow::Collection;
use rete_recipes::AggregateOperator;
use rete_recipes::Recipe;
use rete_recipes::RecipeRef;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rete_recipes::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use timely::dataflow::Scope;

/// Rows cross the dataflow as plain vectors of raw values.
type Row = Vec<i64>;

fn to_row(tuple: &Tuple) -> Row {
    tuple.values().iter().map(|value| value.get()).collect()
}

fn to_tuple(row: &[i64]) -> Tuple {
    Tuple::from_vec(row.iter().map(|raw| Value::new(*raw)).collect())
}

fn project(indices: &[usize], row: &[i64]) -> Row {
    indices.iter().map(|index| row[*index]).collect()
}

fn complement(mask: &TupleMask) -> Vec<usize> {
    mask.complement().indices().to_vec()
}

/// Recursively lowers `recipe` to a collection in `scope`.  Inputs
/// come from `injector`, called with the current extension of every
/// input recipe.
fn lower<G: Scope, Injector>(
    scope: &mut G,
    injector: &mut Injector,
    recipe: &Recipe,
    model: &Arc<dyn BackingModel>,
) -> Collection<G, Row>
where
    G::Timestamp: Lattice + Ord,
    Injector: FnMut(&mut G, Vec<Row>) -> Collection<G, Row>,
{
    match recipe {
        Recipe::Input { key, seed } => {
            let (mask, bound) = seed.to_mask();
            let rows = model
                .enumerate_tuples(key, &mask, &bound)
                .iter()
                .map(to_row)
                .collect();
            injector(scope, rows)
        }
        Recipe::InputFilter { parent, key, mask } => {
            let model = model.clone();
            let key = key.clone();
            let mask = mask.clone();
            lower(scope, injector, parent, &model).filter(move |row| {
                let tuple = to_tuple(row);
                let projected = mask
                    .as_ref()
                    .map_or_else(|| tuple.clone(), |mask| mask.transform(&tuple));
                model.contains_tuple(&key, &projected)
            })
        }
        Recipe::Projection { parent, mask } => {
            let indices = mask.indices().to_vec();
            lower(scope, injector, parent, model).map(move |row| project(&indices, &row))
        }
        Recipe::Distinct { parent } => lower(scope, injector, parent, model).distinct(),
        Recipe::ConstantFilter { parent, position, value } => {
            let (position, raw) = (*position, value.get());
            lower(scope, injector, parent, model).filter(move |row| row[position] == raw)
        }
        Recipe::EqualityFilter { parent, positions } => {
            let positions = positions.clone();
            lower(scope, injector, parent, model)
                .filter(move |row| positions.windows(2).all(|pair| row[pair[0]] == row[pair[1]]))
        }
        Recipe::InequalityFilter {
            parent,
            subject,
            inequals,
        } => {
            let (subject, inequals) = (*subject, inequals.clone());
            lower(scope, injector, parent, model)
                .filter(move |row| inequals.iter().all(|other| row[*other] != row[subject]))
        }
        Recipe::Join {
            primary,
            secondary,
            primary_mask,
            secondary_mask,
        } => {
            let left_key = primary_mask.indices().to_vec();
            let right_key = secondary_mask.indices().to_vec();
            let rest = complement(secondary_mask);
            let left = lower(scope, injector, primary, model)
                .map(move |row| (project(&left_key, &row), row));
            let right = lower(scope, injector, secondary, model)
                .map(move |row| (project(&right_key, &row), row));
            left.join_map(&right, move |_key, left, right| {
                let mut row = left.clone();
                row.extend(rest.iter().map(|index| right[*index]));
                row
            })
        }
        Recipe::Antijoin {
            primary,
            secondary,
            primary_mask,
            secondary_mask,
        } => {
            let left_key = primary_mask.indices().to_vec();
            let right_key = secondary_mask.indices().to_vec();
            let left = lower(scope, injector, primary, model)
                .map(move |row| (project(&left_key, &row), row));
            let keys = lower(scope, injector, secondary, model)
                .map(move |row| project(&right_key, &row))
                .distinct();
            left.antijoin(&keys).map(|(_key, row)| row)
        }
        Recipe::Union { parents } => {
            let mut result = injector(scope, Vec::new());
            for parent in parents {
                let next = lower(scope, injector, parent, model);
                result = result.concat(&next);
            }

            result
        }
        Recipe::Count { parent, group_mask } => {
            let indices = group_mask.indices().to_vec();
            lower(scope, injector, parent, model)
                .map(move |row| project(&indices, &row))
                .count()
                .map(|(mut group, count)| {
                    group.push(count as i64);
                    group
                })
        }
        Recipe::Aggregate {
            parent,
            group_mask,
            column,
            operator,
        } => {
            let indices = group_mask.indices().to_vec();
            let (column, operator) = (*column, *operator);
            lower(scope, injector, parent, model)
                .map(move |row| {
                    let value = if operator == AggregateOperator::Count { 0 } else { row[column] };
                    (project(&indices, &row), value)
                })
                .reduce(move |_group, values: &[(&i64, isize)], output: &mut Vec<(i64, isize)>| {
                    let mut present = values.iter().filter(|(_, diff)| *diff > 0);
                    let result = match operator {
                        AggregateOperator::Count => {
                            let total = values.iter().map(|(_, diff)| *diff as i64).sum::<i64>();
                            Some(total).filter(|total| *total > 0)
                        }
                        AggregateOperator::Sum => present
                            .map(|(value, diff)| value.wrapping_mul(*diff as i64))
                            .reduce(i64::wrapping_add),
                        AggregateOperator::Min => present.next().map(|(value, _)| **value),
                        AggregateOperator::Max => present.last().map(|(value, _)| **value),
                    };
                    if let Some(result) = result {
                        output.push((result, 1));
                    }
                })
                .map(|(mut group, result)| {
                    group.push(result);
                    group
                })
        }
        Recipe::Check { parent, expression } => {
            let expression = expression.clone();
            lower(scope, injector, parent, model)
                .filter(move |row| expression.holds(&to_tuple(row)) == Ok(true))
        }
        Recipe::Eval { parent, expression } => {
            let expression = expression.clone();
            lower(scope, injector, parent, model).flat_map(move |mut row| {
                let value = expression.evaluate(&to_tuple(&row)).ok()?;
                row.push(value.get());
                Some(row)
            })
        }
        Recipe::TransitiveClosure { parent } => {
            let edges = lower(scope, injector, parent, model)
                .distinct()
                .map(|row| (row[0], row[1]));
            edges
                .iterate(|reach| {
                    let edges = edges.enter(&reach.scope());
                    reach
                        .map(|(from, via)| (via, from))
                        .join_map(&edges, |_via, from, to| (*from, *to))
                        .concat(&edges)
                        .distinct()
                })
                .map(|(from, to)| vec![from, to])
        }
        Recipe::Production { parent, .. } => lower(scope, injector, parent, model).distinct(),
    }
}

/// Evaluates `root` against the current contents of `model`, and
/// returns the sorted tuples with positive multiplicity.
pub(crate) fn evaluate(root: &RecipeRef, model: Arc<dyn BackingModel>) -> Vec<Tuple> {
    use differential_dataflow::input::Input;

    let counts = Arc::new(Mutex::new(BTreeMap::<Row, isize>::new()));
    let sink = counts.clone();
    let root = root.clone();

    timely::execute::example(move |scope| {
        let result = lower(
            scope,
            &mut |scope, rows| scope.new_collection_from(rows).1,
            &root,
            &model,
        );

        result.inspect(move |(row, _time, diff)| {
            let mut counts = sink.lock().expect("ok");
            *counts.entry(row.clone()).or_insert(0) += diff;
        });
    });

    let counts = counts.lock().expect("ok");
    counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(row, _)| to_tuple(row))
        .collect()
}

use crate::compiler::PlanRegistry;
use crate::config::{EngineConfig, EnginePreset};
use crate::engine::ReteEngine;
use crate::model::MemoryModel;
use proptest::prelude::*;
use rete_recipes::{BinaryOp, CompiledQuery, Expression, InputKey, QueryId};

fn foo() -> InputKey {
    InputKey::enumerable("Foo", 1)
}

fn edge() -> InputKey {
    InputKey::enumerable("Edge", 2)
}

fn plans() -> Vec<CompiledQuery> {
    let params = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let by_source = TupleMask::new(vec![0], 2).expect("ok");
    let by_target = TupleMask::new(vec![1], 2).expect("ok");

    // Hop(x, z) <- Edge(x, y), Edge(y, z), x != z
    let hop = Recipe::inequality_filter(
        Recipe::projection(
            Recipe::join(
                Recipe::input(edge()),
                Recipe::input(edge()),
                by_target.clone(),
                by_source.clone(),
            ),
            TupleMask::new(vec![0, 2], 3).expect("ok"),
        ),
        0,
        vec![1],
    );
    // Sink(x) <- Foo(x), !Edge(x, _)
    let sink = Recipe::antijoin(
        Recipe::input(foo()),
        Recipe::input(edge()),
        TupleMask::identity(1),
        by_source.clone(),
    );
    // Degree(x, n) <- n = count Edge(x, _)
    let degree = Recipe::count(Recipe::input(edge()), by_source);
    // Total(y, s) <- s = sum x: Edge(x, y), and likewise min and max.
    let by_target_of =
        |operator| Recipe::aggregate(Recipe::input(edge()), by_target.clone(), 0, operator);
    let (total, lowest, highest) = (
        by_target_of(AggregateOperator::Sum),
        by_target_of(AggregateOperator::Min),
        by_target_of(AggregateOperator::Max),
    );
    // Up(x, y, d) <- Edge(x, y), x < y, d = y - x
    let up = Recipe::eval(
        Recipe::check(
            Recipe::input(edge()),
            Expression::binary(BinaryOp::Lt, Expression::column(0), Expression::column(1)),
        ),
        Expression::binary(BinaryOp::Sub, Expression::column(1), Expression::column(0)),
    );
    // Ratio(x, y, q) <- Edge(x, y), q = y / x
    let ratio = Recipe::eval(
        Recipe::input(edge()),
        Expression::binary(BinaryOp::Div, Expression::column(1), Expression::column(0)),
    );
    // Reach(x, y) <- Edge+(x, y), Foo(x)
    let reach = Recipe::join(
        Recipe::transitive_closure(Recipe::input(edge())),
        Recipe::input(foo()),
        TupleMask::new(vec![0], 2).expect("ok"),
        TupleMask::identity(1),
    );
    // Loop(x) <- Edge(x, x) | Foo(x), x = 0
    let looped = Recipe::union(vec![
        Recipe::projection(
            Recipe::equality_filter(Recipe::input(edge()), vec![0, 1]),
            TupleMask::new(vec![0], 2).expect("ok"),
        ),
        Recipe::constant_filter(Recipe::input(foo()), 0, Value::new(0)),
    ]);

    vec![
        CompiledQuery::new(QueryId::new("hop"), params(&["x", "z"]), hop).expect("ok"),
        CompiledQuery::new(QueryId::new("sink"), params(&["x"]), sink).expect("ok"),
        CompiledQuery::new(QueryId::new("degree"), params(&["x", "n"]), degree).expect("ok"),
        CompiledQuery::new(QueryId::new("reach"), params(&["x", "y"]), reach).expect("ok"),
        CompiledQuery::new(QueryId::new("loop"), params(&["x"]), looped).expect("ok"),
        CompiledQuery::new(QueryId::new("total"), params(&["y", "s"]), total).expect("ok"),
        CompiledQuery::new(QueryId::new("lowest"), params(&["y", "m"]), lowest).expect("ok"),
        CompiledQuery::new(QueryId::new("highest"), params(&["y", "m"]), highest).expect("ok"),
        CompiledQuery::new(QueryId::new("up"), params(&["x", "y", "d"]), up).expect("ok"),
        CompiledQuery::new(QueryId::new("ratio"), params(&["x", "y", "q"]), ratio).expect("ok"),
    ]
}

#[derive(Clone, Debug)]
enum Edit {
    Foo(bool, i64),
    Edge(bool, i64, i64),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<bool>(), 0..4i64).prop_map(|(insert, x)| Edit::Foo(insert, x)),
        (any::<bool>(), 0..4i64, 0..4i64).prop_map(|(insert, x, y)| Edit::Edge(insert, x, y)),
    ]
}

fn apply(model: &MemoryModel, edit: &Edit) {
    let (key, insert, tuple) = match edit {
        Edit::Foo(insert, x) => (foo(), *insert, Tuple::from([*x])),
        Edit::Edge(insert, x, y) => (edge(), *insert, Tuple::from([*x, *y])),
    };

    if insert {
        model.insert(&key, tuple);
    } else {
        model.remove(&key, &tuple);
    }
}

fn check_against_reference(preset: EnginePreset, threads: usize, before: &[Edit], after: &[Edit]) {
    let model = Arc::new(MemoryModel::new());
    for edit in before {
        apply(&model, edit);
    }

    let plans = plans();
    let registry = plans.iter().cloned().fold(PlanRegistry::new(), PlanRegistry::with);
    let config = EngineConfig::preset(preset).with_threads(threads);
    let engine = ReteEngine::new(model.clone(), registry, config).expect("ok");
    let ids = plans.iter().map(|plan| plan.id().clone()).collect::<Vec<_>>();
    let matchers = engine.build_matchers_coalesced(&ids).expect("ok");

    for edit in after {
        apply(&model, edit);
    }

    for (plan, matcher) in plans.iter().zip(matchers.iter()) {
        let expected = evaluate(plan.root(), model.clone());
        let bindings = vec![None; plan.arity()];
        assert_eq!(
            matcher.match_all_with(&bindings).expect("ok"),
            expected,
            "{} under {:?}",
            plan.id(),
            preset
        );
    }
}

#[test]
fn test_reference_happy_path() {
    let model = Arc::new(MemoryModel::new());
    for (from, to) in [(0, 1), (1, 2), (2, 2)] {
        model.insert(&edge(), Tuple::from([from, to]));
    }
    model.insert(&foo(), Tuple::from([0]));
    model.insert(&foo(), Tuple::from([2]));
    model.insert(&foo(), Tuple::from([3]));

    let plans = plans();
    let evaluated = |index: usize| evaluate(plans[index].root(), model.clone());
    assert_eq!(evaluated(0), vec![Tuple::from([0, 2]), Tuple::from([1, 2])]);
    assert_eq!(evaluated(1), vec![Tuple::from([3])]);
    assert_eq!(
        evaluated(2),
        vec![Tuple::from([0, 1]), Tuple::from([1, 1]), Tuple::from([2, 1])]
    );
    assert_eq!(
        evaluated(3),
        vec![Tuple::from([0, 1]), Tuple::from([0, 2]), Tuple::from([2, 2])]
    );
    assert_eq!(evaluated(4), vec![Tuple::from([0]), Tuple::from([2])]);
    assert_eq!(evaluated(5), vec![Tuple::from([1, 0]), Tuple::from([2, 3])]);
    assert_eq!(evaluated(6), vec![Tuple::from([1, 0]), Tuple::from([2, 1])]);
    assert_eq!(evaluated(7), vec![Tuple::from([1, 0]), Tuple::from([2, 2])]);
    assert_eq!(evaluated(8), vec![Tuple::from([0, 1, 1]), Tuple::from([1, 2, 1])]);
    // 0 has no ratio.
    assert_eq!(evaluated(9), vec![Tuple::from([1, 2, 2]), Tuple::from([2, 2, 1])]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_matches_reference(
        before in proptest::collection::vec(edit(), 0..12),
        after in proptest::collection::vec(edit(), 0..12),
        preset in proptest::sample::select(EnginePreset::ALL.to_vec()),
    ) {
        check_against_reference(preset, 0, &before, &after);
    }

    #[test]
    fn test_threaded_matches_reference(
        before in proptest::collection::vec(edit(), 0..8),
        after in proptest::collection::vec(edit(), 0..8),
    ) {
        check_against_reference(EnginePreset::DeleteAndRederive, 2, &before, &after);
    }
}
