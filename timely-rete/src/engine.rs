//! The engine owns one network at a time, and the registry of pattern
//! matchers built on it.  Its lifecycle is
//! `Uninitialized -> Ready -> (Reset -> Ready)* -> Disposed`; every
//! operation checks that the engine is `Ready` first.
use crate::compiler::HintConfigurator;
use crate::compiler::QueryCompiler;
use crate::compiler::QueryHints;
use crate::config::EngineConfig;
use crate::error::ReteError;
use crate::error::ReteResult;
use crate::matcher::PatternMatcher;
use crate::model::BackingModel;
use crate::network::Address;
use crate::network::Network;
use rete_recipes::CompiledQuery;
use rete_recipes::InputKey;
use rete_recipes::QueryId;
use rete_recipes::Recipe;
use rete_recipes::Seed;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use tracing::debug;
use tracing::info;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    /// Between the teardown and the re-initialisation of a reset.
    Reset,
    Disposed,
}

struct Runtime {
    state: EngineState,
    network: Option<Network>,
    matchers: FxHashMap<QueryId, PatternMatcher>,
    hints: HintConfigurator,
}

pub struct ReteEngine {
    model: Arc<dyn BackingModel>,
    config: EngineConfig,
    compiler: Mutex<Box<dyn QueryCompiler>>,
    runtime: Mutex<Runtime>,
}

impl ReteEngine {
    /// Creates an engine over `model`, and initialises its network.
    ///
    /// # Errors
    ///
    /// Returns `Err` when container workers fail to start.
    pub fn new(
        model: Arc<dyn BackingModel>,
        compiler: impl QueryCompiler + 'static,
        config: EngineConfig,
    ) -> ReteResult<Self> {
        let engine = Self {
            model,
            config,
            compiler: Mutex::new(Box::new(compiler)),
            runtime: Mutex::new(Runtime {
                state: EngineState::Uninitialized,
                network: None,
                matchers: FxHashMap::default(),
                hints: HintConfigurator::default(),
            }),
        };

        engine.initialize()?;
        Ok(engine)
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self) -> ReteResult<()> {
        let network = Network::new(self.config.clone(), self.model.clone())?;
        let mut runtime = self.runtime();
        runtime.network = Some(network);
        runtime.matchers.clear();
        runtime.hints = HintConfigurator::default();
        runtime.state = EngineState::Ready;

        info!(
            threads = self.config.threads,
            dred = self.config.delete_and_rederive,
            timely = ?self.config.timely,
            "rete engine initialized"
        );
        Ok(())
    }

    /// Kills the current network, and forgets every matcher.
    fn teardown(&self, next: EngineState) {
        let network = {
            let mut runtime = self.runtime();
            runtime.state = next;
            runtime.matchers.clear();
            runtime.network.take()
        };

        if let Some(network) = network {
            network.kill();
        }
    }

    /// Returns the live network, or `NotReady`.
    fn network(&self) -> ReteResult<Network> {
        let runtime = self.runtime();
        match (&runtime.network, runtime.state) {
            (Some(network), EngineState::Ready) => Ok(network.clone()),
            (_, state) => Err(ReteError::NotReady { state }),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.runtime().state
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn model(&self) -> &Arc<dyn BackingModel> {
        &self.model
    }

    fn compile(&self, query: &QueryId) -> ReteResult<CompiledQuery> {
        let compiled = self
            .compiler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compile(query)?;

        match &**compiled.root() {
            Recipe::Production { .. } => Ok(compiled),
            other => Err(ReteError::plan_defect(format!(
                "plan for {} is rooted at a {} recipe",
                query,
                other.kind()
            ))),
        }
    }

    /// Remembers the matcher for `compiled`, unless another thread
    /// beat us to it.
    fn register(
        &self,
        compiled: CompiledQuery,
        production: Address,
        network: &Network,
    ) -> PatternMatcher {
        let id = compiled.id().clone();
        self.runtime()
            .matchers
            .entry(id)
            .or_insert_with(|| {
                debug!(query = %compiled.id(), %production, "built pattern matcher");
                PatternMatcher::new(compiled, production, network.clone())
            })
            .clone()
    }

    /// Returns the matcher for `query`, building its nodes if needed.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready, or when `query`
    /// fails to compile or to provision.
    pub fn access_matcher(&self, query: &QueryId) -> ReteResult<PatternMatcher> {
        let network = self.network()?;
        if let Some(matcher) = self.runtime().matchers.get(query) {
            return Ok(matcher.clone());
        }

        let compiled = self.compile(query)?;
        let production = network.construct(|builder| builder.get_or_create(compiled.root()))?;
        Ok(self.register(compiled, production, &network))
    }

    /// Like `access_matcher`, after recording `hints` for `query`.
    ///
    /// # Errors
    ///
    /// See `access_matcher`.
    pub fn access_matcher_with_hints(
        &self,
        query: &QueryId,
        hints: QueryHints,
    ) -> ReteResult<PatternMatcher> {
        self.network()?;
        self.runtime().hints.record(query, hints);
        self.access_matcher(query)
    }

    /// Returns the hints recorded for `query`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready.
    pub fn hints(&self, query: &QueryId) -> ReteResult<Option<QueryHints>> {
        self.network()?;
        Ok(self.runtime().hints.get(query).cloned())
    }

    /// Returns the matcher for `query` if it has already been built.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready.
    pub fn peek_matcher(&self, query: &QueryId) -> ReteResult<Option<PatternMatcher>> {
        self.network()?;
        Ok(self.runtime().matchers.get(query).cloned())
    }

    /// Builds the matchers for all of `queries` in a single
    /// construction pass, and returns them in the same order.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready, or when any query
    /// fails to compile or to provision.  Nodes built before the
    /// failure are kept.
    pub fn build_matchers_coalesced(&self, queries: &[QueryId]) -> ReteResult<Vec<PatternMatcher>> {
        let network = self.network()?;
        let mut missing = Vec::new();
        for query in queries {
            if self.runtime().matchers.contains_key(query) {
                continue;
            }

            if !missing.iter().any(|compiled: &CompiledQuery| compiled.id() == query) {
                missing.push(self.compile(query)?);
            }
        }

        let productions = network.construct(|builder| {
            missing
                .iter()
                .map(|compiled| builder.get_or_create(compiled.root()))
                .collect::<ReteResult<Vec<_>>>()
        })?;

        for (compiled, production) in missing.into_iter().zip(productions) {
            self.register(compiled, production, &network);
        }

        let runtime = self.runtime();
        queries
            .iter()
            .map(|query| {
                runtime
                    .matchers
                    .get(query)
                    .cloned()
                    .ok_or_else(|| ReteError::UnknownQuery(query.clone()))
            })
            .collect()
    }

    /// Blocks until every update issued so far has propagated.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready.
    pub fn settle(&self) -> ReteResult<()> {
        self.network()?.inner().wait_for_termination();
        Ok(())
    }

    /// Propagates the updates that were buffered while the model
    /// was delaying them, and waits for the network to settle.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready.
    pub fn flush_updates(&self) -> ReteResult<()> {
        self.network()?.inner().flush();
        Ok(())
    }

    /// Stops following model changes for `(key, seed)`.  Returns
    /// whether there was such a live input.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready.
    pub fn disconnect_input(&self, key: &InputKey, seed: &Seed) -> ReteResult<bool> {
        self.network()?
            .construct(|builder| Ok(builder.disconnect_input(key, seed)))
    }

    /// Drops the network and every matcher, then starts over with an
    /// empty network.  Matchers obtained before the reset become stale.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the engine is not ready, or when the new
    /// network fails to start.
    pub fn reset(&self) -> ReteResult<()> {
        self.network()?;
        info!("resetting rete engine");
        self.teardown(EngineState::Reset);
        self.initialize()?;
        self.compiler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        Ok(())
    }

    /// Tears the engine down for good.  Later calls fail with
    /// `NotReady`; disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.state() == EngineState::Disposed {
            return;
        }

        self.teardown(EngineState::Disposed);
        info!("rete engine disposed");
    }
}

impl Drop for ReteEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
use crate::compiler::PlanRegistry;
#[cfg(test)]
use crate::config::EnginePreset;
#[cfg(test)]
use crate::matcher::ListenerTag;
#[cfg(test)]
use crate::model::MemoryModel;
#[cfg(test)]
use crate::update::{Direction, Interval};
#[cfg(test)]
use rete_recipes::{AggregateOperator, BinaryOp, Expression, RecipeRef, Tuple, TupleMask, Value};

#[cfg(test)]
fn foo() -> InputKey {
    InputKey::enumerable("Foo", 1)
}

#[cfg(test)]
fn edge() -> InputKey {
    InputKey::enumerable("Edge", 2)
}

/// Foo(x)
#[cfg(test)]
fn foo_query() -> CompiledQuery {
    CompiledQuery::new(QueryId::new("foo"), vec!["x".into()], Recipe::input(foo())).expect("ok")
}

/// Bar(x, y) <- Foo(x), Foo(y), x != y
#[cfg(test)]
fn bar_query() -> CompiledQuery {
    let body = Recipe::inequality_filter(
        Recipe::join(
            Recipe::input(foo()),
            Recipe::input(foo()),
            TupleMask::empty(1),
            TupleMask::empty(1),
        ),
        0,
        vec![1],
    );
    CompiledQuery::new(QueryId::new("bar"), vec!["x".into(), "y".into()], body).expect("ok")
}

/// Path(x, y) <- Edge+(x, y)
#[cfg(test)]
fn path_query() -> CompiledQuery {
    CompiledQuery::new(
        QueryId::new("path"),
        vec!["x".into(), "y".into()],
        Recipe::transitive_closure(Recipe::input(edge())),
    )
    .expect("ok")
}

/// Lonely(x) <- Foo(x), !Edge(x, _)
#[cfg(test)]
fn lonely_query() -> CompiledQuery {
    let body: RecipeRef = Recipe::antijoin(
        Recipe::input(foo()),
        Recipe::input(edge()),
        TupleMask::identity(1),
        TupleMask::new(vec![0], 2).expect("ok"),
    );
    CompiledQuery::new(QueryId::new("lonely"), vec!["x".into()], body).expect("ok")
}

/// Degree(x, n) <- n = count Edge(x, _)
#[cfg(test)]
fn degree_query() -> CompiledQuery {
    CompiledQuery::new(
        QueryId::new("degree"),
        vec!["x".into(), "n".into()],
        Recipe::count(Recipe::input(edge()), TupleMask::new(vec![0], 2).expect("ok")),
    )
    .expect("ok")
}

#[cfg(test)]
fn registry() -> PlanRegistry {
    PlanRegistry::new()
        .with(foo_query())
        .with(bar_query())
        .with(path_query())
        .with(lonely_query())
        .with(degree_query())
}

#[cfg(test)]
fn setup(config: EngineConfig) -> (Arc<MemoryModel>, ReteEngine) {
    let model = Arc::new(MemoryModel::new());
    model.insert(&foo(), Tuple::from([1]));
    model.insert(&foo(), Tuple::from([2]));
    let engine = ReteEngine::new(model.clone(), registry(), config).expect("ok");
    (model, engine)
}

#[cfg(test)]
fn all(matcher: &PatternMatcher) -> Vec<Tuple> {
    matcher
        .match_all(&TupleMask::empty(matcher.arity()), &Tuple::empty())
        .expect("ok")
}

#[cfg(test)]
fn tuples(raw: &[&[i64]]) -> Vec<Tuple> {
    raw.iter()
        .map(|values| Tuple::from_vec(values.iter().map(|x| Value::new(*x)).collect()))
        .collect()
}

#[test]
fn test_scenario_insert() {
    for preset in EnginePreset::ALL {
        let (model, engine) = setup(EngineConfig::preset(preset));
        let matcher = engine.access_matcher(&QueryId::new("foo")).expect("ok");
        assert_eq!(all(&matcher), tuples(&[&[1], &[2]]));

        model.insert(&foo(), Tuple::from([3]));
        assert_eq!(all(&matcher), tuples(&[&[1], &[2], &[3]]));
    }
}

#[test]
fn test_scenario_join_and_delete() {
    for preset in EnginePreset::ALL {
        let (model, engine) = setup(EngineConfig::preset(preset));
        let matcher = engine.access_matcher(&QueryId::new("bar")).expect("ok");
        assert_eq!(all(&matcher), tuples(&[&[1, 2], &[2, 1]]));

        model.remove(&foo(), &Tuple::from([2]));
        assert_eq!(all(&matcher), Vec::<Tuple>::new());
    }
}

#[test]
fn test_scenario_count() {
    let (_model, engine) = setup(EngineConfig::default());
    let matcher = engine.access_matcher(&QueryId::new("bar")).expect("ok");
    let mask = TupleMask::new(vec![0], 2).expect("ok");

    assert_eq!(matcher.count(&mask, &Tuple::from([1])).expect("ok"), 1);
    assert_eq!(matcher.count_with(&[Some(Value::new(1)), None]).expect("ok"), 1);
    assert!(matcher.has_match(&mask, &Tuple::from([2])).expect("ok"));
    assert!(!matcher.has_match(&mask, &Tuple::from([3])).expect("ok"));
    assert_eq!(matcher.projection_size(&mask).expect("ok"), 2);
    assert_eq!(
        matcher.match_one_with(&[None, Some(Value::new(1))]).expect("ok"),
        Some(Tuple::from([2, 1]))
    );
}

#[test]
fn test_scenario_listener_replay() {
    let (model, engine) = setup(EngineConfig::default());
    let matcher = engine.access_matcher(&QueryId::new("bar")).expect("ok");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    matcher
        .add_update_listener(
            Arc::new(move |direction: Direction, tuple: &Tuple| {
                sink.lock().expect("ok").push((direction, tuple.clone()));
            }),
            ListenerTag(1),
            true,
        )
        .expect("ok");

    let mut replayed = seen.lock().expect("ok").clone();
    replayed.sort();
    assert_eq!(
        replayed,
        vec![
            (Direction::Insert, Tuple::from([1, 2])),
            (Direction::Insert, Tuple::from([2, 1]))
        ]
    );

    model.remove(&foo(), &Tuple::from([2]));
    engine.settle().expect("ok");
    let mut deleted = seen.lock().expect("ok")[2..].to_vec();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![
            (Direction::Delete, Tuple::from([1, 2])),
            (Direction::Delete, Tuple::from([2, 1]))
        ]
    );

    // Once removed, the listener hears nothing more.
    assert!(matcher.remove_update_listener(ListenerTag(1)).expect("ok"));
    assert!(!matcher.remove_update_listener(ListenerTag(1)).expect("ok"));
    model.insert(&foo(), Tuple::from([2]));
    engine.settle().expect("ok");
    assert_eq!(seen.lock().expect("ok").len(), 4);
}

#[test]
fn test_listener_without_replay() {
    let (model, engine) = setup(EngineConfig::default());
    let matcher = engine.access_matcher(&QueryId::new("foo")).expect("ok");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    matcher
        .add_update_listener(
            Arc::new(move |direction: Direction, tuple: &Tuple| {
                sink.lock().expect("ok").push((direction, tuple.clone()));
            }),
            ListenerTag(7),
            false,
        )
        .expect("ok");
    assert!(seen.lock().expect("ok").is_empty());

    model.insert(&foo(), Tuple::from([5]));
    assert_eq!(*seen.lock().expect("ok"), vec![(Direction::Insert, Tuple::from([5]))]);
}

#[test]
fn test_transitive_closure_strategies_agree() {
    for preset in EnginePreset::ALL {
        let (model, engine) = setup(EngineConfig::preset(preset));
        for (from, to) in [(1, 2), (2, 3), (3, 4), (1, 3)] {
            model.insert(&edge(), Tuple::from([from, to]));
        }

        let matcher = engine.access_matcher(&QueryId::new("path")).expect("ok");
        assert_eq!(
            all(&matcher),
            tuples(&[&[1, 2], &[1, 3], &[1, 4], &[2, 3], &[2, 4], &[3, 4]])
        );

        model.remove(&edge(), &Tuple::from([2, 3]));
        assert_eq!(all(&matcher), tuples(&[&[1, 2], &[1, 3], &[1, 4], &[3, 4]]));

        model.insert(&edge(), Tuple::from([4, 1]));
        model.remove(&edge(), &Tuple::from([1, 3]));
        assert_eq!(all(&matcher), tuples(&[&[1, 2], &[3, 1], &[3, 2], &[3, 4], &[4, 1], &[4, 2]]));
    }
}

#[test]
fn test_negation_and_count() {
    for preset in EnginePreset::ALL {
        let (model, engine) = setup(EngineConfig::preset(preset));
        let lonely = engine.access_matcher(&QueryId::new("lonely")).expect("ok");
        let degree = engine.access_matcher(&QueryId::new("degree")).expect("ok");
        assert_eq!(all(&lonely), tuples(&[&[1], &[2]]));
        assert!(all(&degree).is_empty());

        model.insert(&edge(), Tuple::from([1, 5]));
        model.insert(&edge(), Tuple::from([1, 6]));
        assert_eq!(all(&lonely), tuples(&[&[2]]));
        assert_eq!(all(&degree), tuples(&[&[1, 2]]));

        model.remove(&edge(), &Tuple::from([1, 5]));
        model.remove(&edge(), &Tuple::from([1, 6]));
        assert_eq!(all(&lonely), tuples(&[&[1], &[2]]));
        assert!(all(&degree).is_empty());
    }
}

#[test]
fn test_shared_nodes_and_coalesced_build() {
    let (model, engine) = setup(EngineConfig::default());
    let matchers = engine
        .build_matchers_coalesced(&[QueryId::new("foo"), QueryId::new("bar"), QueryId::new("foo")])
        .expect("ok");
    assert_eq!(matchers.len(), 3);
    assert_eq!(matchers[0].id(), matchers[2].id());
    assert_eq!(model.coalesced_traversals(), 1);

    // Foo is read three times, but only subscribed once.
    assert_eq!(model.subscription_count(), 1);
    assert!(engine.peek_matcher(&QueryId::new("bar")).expect("ok").is_some());
    assert!(engine.peek_matcher(&QueryId::new("path")).expect("ok").is_none());
}

#[test]
fn test_delayed_updates_wait_for_flush() {
    let (model, engine) = setup(EngineConfig::default());
    let matcher = engine.access_matcher(&QueryId::new("foo")).expect("ok");

    model.with_delayed_updates(|| {
        model.insert(&foo(), Tuple::from([3]));
        model.remove(&foo(), &Tuple::from([1]));
        engine.settle().expect("ok");
        let pending = matcher.match_all_with(&[None]).expect("ok");
        assert_eq!(pending, tuples(&[&[1], &[2]]));

        engine.flush_updates().expect("ok");
        let flushed = matcher.match_all_with(&[None]).expect("ok");
        assert_eq!(flushed, tuples(&[&[2], &[3]]));
    });
}

#[test]
fn test_disconnect_input() {
    let (model, engine) = setup(EngineConfig::default());
    let matcher = engine.access_matcher(&QueryId::new("foo")).expect("ok");

    assert!(engine.disconnect_input(&foo(), &Seed::unbound(1)).expect("ok"));
    assert!(!engine.disconnect_input(&foo(), &Seed::unbound(1)).expect("ok"));
    assert_eq!(model.subscription_count(), 0);

    model.insert(&foo(), Tuple::from([3]));
    assert_eq!(all(&matcher), tuples(&[&[1], &[2]]));
}

#[test]
fn test_seeded_input() {
    let model = Arc::new(MemoryModel::new());
    for (from, to) in [(1, 2), (1, 3), (2, 3)] {
        model.insert(&edge(), Tuple::from([from, to]));
    }

    let seeded = Recipe::seeded_input(edge(), Seed::new(vec![Some(Value::new(1)), None]));
    let plan = CompiledQuery::new(QueryId::new("from-one"), vec!["x".into(), "y".into()], seeded)
        .expect("ok");
    let registry = PlanRegistry::new().with(plan);
    let engine = ReteEngine::new(model.clone(), registry, EngineConfig::default()).expect("ok");

    let matcher = engine.access_matcher(&QueryId::new("from-one")).expect("ok");
    assert_eq!(all(&matcher), tuples(&[&[1, 2], &[1, 3]]));
    model.insert(&edge(), Tuple::from([1, 4]));
    model.insert(&edge(), Tuple::from([4, 4]));
    assert_eq!(all(&matcher), tuples(&[&[1, 2], &[1, 3], &[1, 4]]));
}

#[test]
fn test_input_filter() {
    let model = Arc::new(MemoryModel::new());
    let even = InputKey::stateless("Even", 1);
    model.declare_stateless(even.clone(), |tuple: &Tuple| tuple.values()[0].get() % 2 == 0);
    for x in 1..=4 {
        model.insert(&foo(), Tuple::from([x]));
    }

    let body = Recipe::input_filter(Recipe::input(foo()), even.clone(), None);
    let plan = CompiledQuery::new(QueryId::new("even-foo"), vec!["x".into()], body).expect("ok");
    let bad =
        CompiledQuery::new(QueryId::new("bad"), vec!["x".into()], Recipe::input(even)).expect("ok");
    let engine = ReteEngine::new(
        model.clone(),
        PlanRegistry::new().with(plan).with(bad),
        EngineConfig::default(),
    )
    .expect("ok");

    let matcher = engine.access_matcher(&QueryId::new("even-foo")).expect("ok");
    assert_eq!(all(&matcher), tuples(&[&[2], &[4]]));
    model.insert(&foo(), Tuple::from([6]));
    model.insert(&foo(), Tuple::from([7]));
    assert_eq!(all(&matcher), tuples(&[&[2], &[4], &[6]]));

    assert!(matches!(
        engine.access_matcher(&QueryId::new("bad")),
        Err(ReteError::PlanDefect(_))
    ));
}

#[test]
fn test_timely_timeline() {
    let (model, engine) = setup(EngineConfig::preset(EnginePreset::TimelyFaithfulParallel));
    for (from, to) in [(1, 2), (2, 3)] {
        model.insert(&edge(), Tuple::from([from, to]));
    }

    let matcher = engine.access_matcher(&QueryId::new("path")).expect("ok");
    assert_eq!(
        matcher.timeline(&Tuple::from([1, 3])).expect("ok"),
        vec![Interval { start: 1, end: None }]
    );
    assert_eq!(
        matcher.timeline(&Tuple::from([1, 2])).expect("ok"),
        vec![Interval { start: 0, end: None }]
    );
    assert!(matcher.timeline(&Tuple::from([3, 1])).expect("ok").is_empty());
}

#[test]
fn test_threaded_engine() {
    let (model, engine) = setup(EngineConfig::default().with_threads(3));
    let bar = engine.access_matcher(&QueryId::new("bar")).expect("ok");
    let path = engine.access_matcher(&QueryId::new("path")).expect("ok");
    assert_eq!(all(&bar), tuples(&[&[1, 2], &[2, 1]]));

    for x in 3..10 {
        model.insert(&foo(), Tuple::from([x]));
        model.insert(&edge(), Tuple::from([x - 1, x]));
    }

    engine.settle().expect("ok");
    assert_eq!(bar.count_with(&[None, None]).expect("ok"), 9 * 8);
    assert_eq!(path.count_with(&[Some(Value::new(2)), None]).expect("ok"), 7);

    model.remove(&foo(), &Tuple::from([9]));
    assert_eq!(bar.count_with(&[None, None]).expect("ok"), 8 * 7);
}

#[test]
fn test_lifecycle() {
    let (model, engine) = setup(EngineConfig::default());
    assert_eq!(engine.state(), EngineState::Ready);
    let stale = engine.access_matcher(&QueryId::new("foo")).expect("ok");

    engine.reset().expect("ok");
    assert_eq!(engine.state(), EngineState::Ready);
    assert!(!stale.is_live());
    assert!(matches!(stale.match_all_with(&[None]), Err(ReteError::StaleMatcher(_))));
    assert!(engine.peek_matcher(&QueryId::new("foo")).expect("ok").is_none());
    assert_eq!(model.subscription_count(), 0);

    let fresh = engine.access_matcher(&QueryId::new("foo")).expect("ok");
    assert_eq!(all(&fresh), tuples(&[&[1], &[2]]));

    engine.dispose();
    engine.dispose();
    assert_eq!(engine.state(), EngineState::Disposed);
    assert_eq!(model.subscription_count(), 0);
    assert!(matches!(
        engine.access_matcher(&QueryId::new("foo")),
        Err(ReteError::NotReady {
            state: EngineState::Disposed
        })
    ));
    assert!(matches!(engine.settle(), Err(ReteError::NotReady { .. })));
    assert!(matches!(fresh.count_with(&[None]), Err(ReteError::StaleMatcher(_))));
}

#[test]
fn test_unknown_query() {
    let (_model, engine) = setup(EngineConfig::default());
    assert!(matches!(
        engine.access_matcher(&QueryId::new("nope")),
        Err(ReteError::UnknownQuery(_))
    ));
}

#[test]
fn test_hints_are_recorded() {
    let (_model, engine) = setup(EngineConfig::default());
    let hints: QueryHints = [("backend".to_string(), "incremental".to_string())]
        .into_iter()
        .collect();
    engine
        .access_matcher_with_hints(&QueryId::new("foo"), hints.clone())
        .expect("ok");
    assert_eq!(engine.hints(&QueryId::new("foo")).expect("ok"), Some(hints));
}

#[test]
fn test_delete_and_reinsert_in_one_batch() {
    let (model, engine) = setup(EngineConfig::preset(EnginePreset::DeleteAndRederive));
    for (from, to) in [(1, 2), (2, 3)] {
        model.insert(&edge(), Tuple::from([from, to]));
    }

    let lonely = engine.access_matcher(&QueryId::new("lonely")).expect("ok");
    let path = engine.access_matcher(&QueryId::new("path")).expect("ok");
    let before = (all(&lonely), all(&path));
    assert!(before.0.is_empty());
    assert_eq!(before.1, tuples(&[&[1, 2], &[1, 3], &[2, 3]]));

    model.with_delayed_updates(|| {
        model.remove(&edge(), &Tuple::from([1, 2]));
        model.remove(&edge(), &Tuple::from([2, 3]));
        model.insert(&edge(), Tuple::from([2, 3]));
        model.insert(&edge(), Tuple::from([1, 2]));
    });

    engine.flush_updates().expect("ok");
    assert_eq!((all(&lonely), all(&path)), before);
}

#[test]
fn test_listener_queries_from_worker() {
    for threads in [0, 2] {
        let (model, engine) = setup(EngineConfig::default().with_threads(threads));
        let matcher = engine.access_matcher(&QueryId::new("foo")).expect("ok");
        let bar = engine.access_matcher(&QueryId::new("bar")).expect("ok");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let counted = matcher.clone();
        matcher
            .add_update_listener(
                Arc::new(move |_direction: Direction, _tuple: &Tuple| {
                    let foos = counted.count_with(&[None]).expect("ok");
                    let bars = bar.count_with(&[None, None]).expect("ok");
                    sink.lock().expect("ok").push((foos, bars));
                }),
                ListenerTag(3),
                false,
            )
            .expect("ok");

        model.insert(&foo(), Tuple::from([3]));
        engine.settle().expect("ok");
        assert_eq!(*seen.lock().expect("ok"), vec![(3, 6)]);

        // The network is still usable afterwards.
        model.insert(&foo(), Tuple::from([4]));
        engine.settle().expect("ok");
        assert_eq!(*seen.lock().expect("ok"), vec![(3, 6), (4, 12)]);
        assert_eq!(all(&matcher), tuples(&[&[1], &[2], &[3], &[4]]));
    }
}

#[test]
fn test_first_only_timeline() {
    let model = Arc::new(MemoryModel::new());
    let pair = InputKey::enumerable("Pair", 2);
    for (from, to) in [(1, 2), (2, 3)] {
        model.insert(&edge(), Tuple::from([from, to]));
    }
    for (x, y) in [(1, 3), (5, 6)] {
        model.insert(&pair, Tuple::from([x, y]));
    }

    // Unreached(x, y) <- Pair(x, y), !Path(x, y)
    let body = Recipe::antijoin(
        Recipe::input(pair),
        Recipe::transitive_closure(Recipe::input(edge())),
        TupleMask::identity(2),
        TupleMask::identity(2),
    );
    let plan = CompiledQuery::new(QueryId::new("unreached"), vec!["x".into(), "y".into()], body)
        .expect("ok");

    let timelines = |preset| {
        let registry = PlanRegistry::new().with(plan.clone());
        let engine =
            ReteEngine::new(model.clone(), registry, EngineConfig::preset(preset)).expect("ok");
        let matcher = engine.access_matcher(&QueryId::new("unreached")).expect("ok");
        assert_eq!(all(&matcher), tuples(&[&[5, 6]]));
        (
            matcher.timeline(&Tuple::from([1, 3])).expect("ok"),
            matcher.timeline(&Tuple::from([5, 6])).expect("ok"),
        )
    };

    // Pair(1, 3) holds until Path(1, 3) is derived at time 1.  Only
    // the faithful representation remembers that.
    let (refuted, kept) = timelines(EnginePreset::TimelyFaithfulSequential);
    assert_eq!(refuted, vec![Interval { start: 0, end: Some(1) }]);
    assert_eq!(kept, vec![Interval { start: 0, end: None }]);

    // First-only timelines collapse to at most one open interval.
    let (refuted, kept) = timelines(EnginePreset::TimelyFirstOnlyParallel);
    assert!(refuted.is_empty());
    assert_eq!(kept, vec![Interval { start: 0, end: None }]);
}

#[test]
fn test_aggregates_and_expressions() {
    let by_source = TupleMask::new(vec![0], 2).expect("ok");
    let params = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let gap = Expression::binary(BinaryOp::Sub, Expression::column(1), Expression::column(0));
    let registry = PlanRegistry::new()
        .with(
            CompiledQuery::new(
                QueryId::new("heaviest"),
                params(&["x", "m"]),
                Recipe::aggregate(
                    Recipe::input(edge()),
                    by_source.clone(),
                    1,
                    AggregateOperator::Max,
                ),
            )
            .expect("ok"),
        )
        .with(
            CompiledQuery::new(
                QueryId::new("weight"),
                params(&["x", "s"]),
                Recipe::aggregate(Recipe::input(edge()), by_source, 1, AggregateOperator::Sum),
            )
            .expect("ok"),
        )
        // Gap(x, y, d) <- Edge(x, y), 1 < y - x, d = y - x
        .with(
            CompiledQuery::new(
                QueryId::new("gap"),
                params(&["x", "y", "d"]),
                Recipe::eval(
                    Recipe::check(
                        Recipe::input(edge()),
                        Expression::binary(BinaryOp::Lt, Expression::constant(1), gap.clone()),
                    ),
                    gap,
                ),
            )
            .expect("ok"),
        );

    for preset in EnginePreset::ALL {
        for threads in [0, 2] {
            let model = Arc::new(MemoryModel::new());
            for (from, to) in [(1, 2), (1, 5), (2, 3)] {
                model.insert(&edge(), Tuple::from([from, to]));
            }

            let config = EngineConfig::preset(preset).with_threads(threads);
            let engine = ReteEngine::new(model.clone(), registry.clone(), config).expect("ok");
            let heaviest = engine.access_matcher(&QueryId::new("heaviest")).expect("ok");
            let weight = engine.access_matcher(&QueryId::new("weight")).expect("ok");
            let gaps = engine.access_matcher(&QueryId::new("gap")).expect("ok");

            assert_eq!(all(&heaviest), tuples(&[&[1, 5], &[2, 3]]), "{:?}", preset);
            assert_eq!(all(&weight), tuples(&[&[1, 7], &[2, 3]]), "{:?}", preset);
            assert_eq!(all(&gaps), tuples(&[&[1, 5, 4]]), "{:?}", preset);

            model.remove(&edge(), &Tuple::from([1, 5]));
            assert_eq!(all(&heaviest), tuples(&[&[1, 2], &[2, 3]]), "{:?}", preset);
            assert_eq!(all(&weight), tuples(&[&[1, 2], &[2, 3]]), "{:?}", preset);
            assert!(all(&gaps).is_empty());

            model.insert(&edge(), Tuple::from([2, 9]));
            assert_eq!(all(&heaviest), tuples(&[&[1, 2], &[2, 9]]), "{:?}", preset);
            assert_eq!(all(&weight), tuples(&[&[1, 2], &[2, 12]]), "{:?}", preset);
            assert_eq!(all(&gaps), tuples(&[&[2, 9, 7]]), "{:?}", preset);
        }
    }
}
