//! The engine does not plan queries: it asks a `QueryCompiler` for the
//! recipe tree of each query it is asked to match.
use crate::error::ReteError;
use crate::error::ReteResult;
use rete_recipes::CompiledQuery;
use rete_recipes::QueryId;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub trait QueryCompiler: Send {
    /// Returns the plan for `query`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when `query` cannot be compiled.
    fn compile(&mut self, query: &QueryId) -> ReteResult<CompiledQuery>;

    /// Forgets every cached plan; called once the engine has rebuilt
    /// its network after a reset.
    fn reset(&mut self);
}

/// A compiler for hosts that plan queries ahead of time: it simply
/// hands out the plans registered with it.
#[derive(Clone, Debug, Default)]
pub struct PlanRegistry {
    plans: FxHashMap<QueryId, CompiledQuery>,
    resets: usize,
}

impl PlanRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plan`, replacing any plan with the same id.
    pub fn register(&mut self, plan: CompiledQuery) -> &mut Self {
        self.plans.insert(plan.id().clone(), plan);
        self
    }

    #[must_use]
    pub fn with(mut self, plan: CompiledQuery) -> Self {
        self.register(plan);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Number of `reset` calls so far.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl QueryCompiler for PlanRegistry {
    fn compile(&mut self, query: &QueryId) -> ReteResult<CompiledQuery> {
        self.plans
            .get(query)
            .cloned()
            .ok_or_else(|| ReteError::UnknownQuery(query.clone()))
    }

    fn reset(&mut self) {
        // Registered plans are the source of truth; there is no
        // derived cache to drop.
        self.resets += 1;
    }
}

/// Backend hints for one query, as free-form key/value pairs.
pub type QueryHints = BTreeMap<String, String>;

/// Remembers the hints each query was requested with.  Acting on them
/// is up to the host.
#[derive(Clone, Debug, Default)]
pub struct HintConfigurator {
    hints: FxHashMap<QueryId, QueryHints>,
}

impl HintConfigurator {
    /// Merges `hints` into those recorded for `query`; later values
    /// win.
    pub fn record(&mut self, query: &QueryId, hints: QueryHints) {
        self.hints.entry(query.clone()).or_default().extend(hints);
    }

    #[must_use]
    pub fn get(&self, query: &QueryId) -> Option<&QueryHints> {
        self.hints.get(query)
    }
}

#[cfg(test)]
use rete_recipes::{InputKey, Recipe};

#[test]
fn test_plan_registry() {
    let plan = CompiledQuery::new(
        QueryId::new("foo"),
        vec!["x".to_string()],
        Recipe::input(InputKey::enumerable("Foo", 1)),
    )
    .expect("ok");

    let mut registry = PlanRegistry::new().with(plan.clone());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.compile(&QueryId::new("foo")).expect("ok"), plan);
    assert!(matches!(
        registry.compile(&QueryId::new("bar")),
        Err(ReteError::UnknownQuery(_))
    ));

    registry.reset();
    assert_eq!(registry.resets(), 1);
}

#[test]
fn test_hint_configurator_merges() {
    let mut hints = HintConfigurator::default();
    let query = QueryId::new("foo");
    let first = [("backend".to_string(), "rete".to_string())];
    let second = [("backend".to_string(), "timely".to_string())];
    hints.record(&query, first.into_iter().collect());
    hints.record(&query, second.into_iter().collect());

    assert_eq!(hints.get(&query).expect("recorded")["backend"], "timely");
    assert!(hints.get(&QueryId::new("bar")).is_none());
}
