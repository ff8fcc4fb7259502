use proptest::prelude::*;
use std::sync::Arc;
use std::sync::Mutex;
use timely_rete::CompiledQuery;
use timely_rete::Direction;
use timely_rete::EngineConfig;
use timely_rete::EnginePreset;
use timely_rete::InputKey;
use timely_rete::ListenerTag;
use timely_rete::MemoryModel;
use timely_rete::PatternMatcher;
use timely_rete::PlanRegistry;
use timely_rete::QueryId;
use timely_rete::Recipe;
use timely_rete::ReteEngine;
use timely_rete::Tuple;
use timely_rete::TupleMask;
use timely_rete::Value;

fn edge() -> InputKey {
    InputKey::enumerable("Edge", 2)
}

/// Path(x, y) <- Edge+(x, y)
/// Fork(x, y, z) <- Edge(x, y), Edge(x, z), y != z
fn registry() -> PlanRegistry {
    let params = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let by_source = TupleMask::new(vec![0], 2).expect("ok");
    let fork = Recipe::inequality_filter(
        Recipe::join(Recipe::input(edge()), Recipe::input(edge()), by_source.clone(), by_source),
        1,
        vec![2],
    );

    PlanRegistry::new()
        .with(
            CompiledQuery::new(
                QueryId::new("path"),
                params(&["x", "y"]),
                Recipe::transitive_closure(Recipe::input(edge())),
            )
            .expect("ok"),
        )
        .with(CompiledQuery::new(QueryId::new("fork"), params(&["x", "y", "z"]), fork).expect("ok"))
}

fn edits() -> impl Strategy<Value = Vec<(bool, i64, i64)>> {
    proptest::collection::vec((any::<bool>(), 0..5i64, 0..5i64), 0..24)
}

fn apply(model: &MemoryModel, edits: &[(bool, i64, i64)]) {
    for (insert, from, to) in edits {
        if *insert {
            model.insert(&edge(), Tuple::from([*from, *to]));
        } else {
            model.remove(&edge(), &Tuple::from([*from, *to]));
        }
    }
}

fn snapshot(matcher: &PatternMatcher) -> Vec<Tuple> {
    matcher.match_all_with(&vec![None; matcher.arity()]).expect("ok")
}

fn run(config: EngineConfig, edits: &[(bool, i64, i64)]) -> (Vec<Tuple>, Vec<Tuple>) {
    let model = Arc::new(MemoryModel::new());
    let engine = ReteEngine::new(model.clone(), registry(), config).expect("ok");
    let path = engine.access_matcher(&QueryId::new("path")).expect("ok");
    let fork = engine.access_matcher(&QueryId::new("fork")).expect("ok");

    apply(&model, edits);
    (snapshot(&path), snapshot(&fork))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every preset and thread count reaches the same fixpoint.
    #[test]
    fn test_quiescent_results_agree(edits in edits(), threads in 0..3usize) {
        let expected = run(EngineConfig::default(), &edits);
        for preset in EnginePreset::ALL {
            let config = EngineConfig::preset(preset).with_threads(threads);
            prop_assert_eq!(run(config, &edits), expected.clone());
        }
    }

    /// Inserting and then removing a batch of new edges leaves every
    /// result unchanged, and listeners see the changes cancel out.
    #[test]
    fn test_cancellation(
        base in edits(),
        extra in proptest::collection::vec((5..8i64, 0..8i64), 1..6),
    ) {
        for preset in EnginePreset::ALL {
            let model = Arc::new(MemoryModel::new());
            apply(&model, &base);

            let config = EngineConfig::preset(preset);
            let engine = ReteEngine::new(model.clone(), registry(), config).expect("ok");
            let path = engine.access_matcher(&QueryId::new("path")).expect("ok");
            let before = snapshot(&path);

            let net = Arc::new(Mutex::new(std::collections::BTreeMap::<Tuple, isize>::new()));
            let sink = net.clone();
            path.add_update_listener(
                Arc::new(move |direction: Direction, tuple: &Tuple| {
                    *sink.lock().expect("ok").entry(tuple.clone()).or_insert(0) += direction.diff();
                }),
                ListenerTag(0),
                false,
            )
            .expect("ok");

            for (from, to) in extra.iter() {
                model.insert(&edge(), Tuple::from([*from, *to]));
            }
            for (from, to) in extra.iter().rev() {
                model.remove(&edge(), &Tuple::from([*from, *to]));
            }

            prop_assert_eq!(snapshot(&path), before);
            engine.settle().expect("ok");
            prop_assert!(net.lock().expect("ok").values().all(|diff| *diff == 0));
        }
    }

    /// `count`, `has_match` and `match_all` agree on every binding of
    /// the source column, and `projection_size` counts distinct
    /// projections.
    #[test]
    fn test_lookups_agree(edits in edits(), threads in 0..2usize) {
        let model = Arc::new(MemoryModel::new());
        let config = EngineConfig::default().with_threads(threads);
        let engine = ReteEngine::new(model.clone(), registry(), config).expect("ok");
        let fork = engine.access_matcher(&QueryId::new("fork")).expect("ok");
        apply(&model, &edits);

        let all = snapshot(&fork);
        let mask = TupleMask::new(vec![0], 3).expect("ok");
        for x in 0..5i64 {
            let bound = Tuple::from([x]);
            let matches = fork.match_all(&mask, &bound).expect("ok");
            let expected = all.iter().filter(|tuple| tuple.values()[0] == Value::new(x)).count();
            prop_assert_eq!(matches.len(), expected);
            prop_assert_eq!(fork.count(&mask, &bound).expect("ok"), expected);
            prop_assert_eq!(fork.has_match(&mask, &bound).expect("ok"), expected > 0);
            prop_assert_eq!(fork.match_one(&mask, &bound).expect("ok"), matches.first().cloned());
        }

        let mut sources = all.iter().map(|tuple| tuple.values()[0]).collect::<Vec<_>>();
        sources.dedup();
        prop_assert_eq!(fork.projection_size(&mask).expect("ok"), sources.len());
    }
}
