//! Pattern matchers are the query surface of a production node.
//! Every lookup first settles the network, so that it observes every
//! update issued before the call.
use crate::error::ReteError;
use crate::error::ReteResult;
use crate::network::Address;
use crate::network::Network;
use crate::nodes::ProductionNode;
use crate::update::Direction;
use crate::update::Interval;
use rete_recipes::CompiledQuery;
use rete_recipes::QueryId;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rete_recipes::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::debug;

/// Receives every change to the result set of a query, after the
/// change has been applied.
pub trait MatchUpdateListener: Send + Sync {
    fn update(&self, direction: Direction, tuple: &Tuple);
}

impl<F> MatchUpdateListener for F
where
    F: Fn(Direction, &Tuple) + Send + Sync,
{
    fn update(&self, direction: Direction, tuple: &Tuple) {
        self(direction, tuple);
    }
}

/// Host-chosen identity of a registered listener.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListenerTag(pub u64);

struct MatcherInner {
    query: CompiledQuery,
    production: Address,
    network: Network,
    listeners: Mutex<FxHashMap<ListenerTag, Address>>,
}

#[derive(Clone)]
pub struct PatternMatcher {
    inner: Arc<MatcherInner>,
}

impl std::fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatcher")
            .field("query", self.inner.query.id())
            .field("production", &self.inner.production)
            .finish()
    }
}

impl PatternMatcher {
    pub(crate) fn new(query: CompiledQuery, production: Address, network: Network) -> Self {
        Self {
            inner: Arc::new(MatcherInner {
                query,
                production,
                network,
                listeners: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &QueryId {
        self.inner.query.id()
    }

    #[must_use]
    pub fn query(&self) -> &CompiledQuery {
        &self.inner.query
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.inner.query.arity()
    }

    /// Whether the matcher still belongs to a live network.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.network.is_alive()
    }

    fn check_live(&self) -> ReteResult<&Network> {
        if self.is_live() {
            Ok(&self.inner.network)
        } else {
            Err(ReteError::StaleMatcher(self.id().clone()))
        }
    }

    fn check_mask(&self, mask: &TupleMask) -> ReteResult<()> {
        if mask.source_width() == self.arity() {
            Ok(())
        } else {
            Err(ReteError::plan_defect(format!(
                "mask over {} columns for {}, which has {}",
                mask.source_width(),
                self.id(),
                self.arity()
            )))
        }
    }

    /// Settles the network, then runs `body` on the production node.
    fn settled<R>(&self, body: impl FnOnce(&mut ProductionNode) -> R) -> ReteResult<R> {
        let network = self.check_live()?;
        let net = network.inner();
        net.settle_then(|| net.with_production(self.inner.production, body))
            .ok_or_else(|| ReteError::StaleMatcher(self.id().clone()))
    }

    fn unwrap_all(&self, mut tuples: Vec<Tuple>) -> Vec<Tuple> {
        let model = self.inner.network.inner().model();
        tuples.sort();
        tuples.iter().map(|tuple| model.unwrap_tuple(tuple)).collect()
    }

    /// Returns every match whose projection through `mask` is `bound`,
    /// sorted.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers and masks of the wrong width.
    pub fn match_all(&self, mask: &TupleMask, bound: &Tuple) -> ReteResult<Vec<Tuple>> {
        self.check_mask(mask)?;
        let tuples = self.settled(|production| {
            production
                .ensure_indexer(mask)
                .get(bound)
                .map_or_else(Vec::new, |bucket| bucket.iter().cloned().collect())
        })?;

        Ok(self.unwrap_all(tuples))
    }

    /// Returns the least match for `(mask, bound)`, if any.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers and masks of the wrong width.
    pub fn match_one(&self, mask: &TupleMask, bound: &Tuple) -> ReteResult<Option<Tuple>> {
        self.check_mask(mask)?;
        let tuple = self.settled(|production| {
            production
                .ensure_indexer(mask)
                .get(bound)
                .and_then(|bucket| bucket.iter().min().cloned())
        })?;

        Ok(tuple.map(|tuple| self.inner.network.inner().model().unwrap_tuple(&tuple)))
    }

    /// Counts the matches for `(mask, bound)` without materialising
    /// them.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers and masks of the wrong width.
    pub fn count(&self, mask: &TupleMask, bound: &Tuple) -> ReteResult<usize> {
        self.check_mask(mask)?;
        self.settled(|production| production.ensure_indexer(mask).count(bound))
    }

    /// # Errors
    ///
    /// Returns `Err` for stale matchers and masks of the wrong width.
    pub fn has_match(&self, mask: &TupleMask, bound: &Tuple) -> ReteResult<bool> {
        Ok(self.count(mask, bound)? > 0)
    }

    /// Returns the number of distinct projections of the matches
    /// through `mask`.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers and masks of the wrong width.
    pub fn projection_size(&self, mask: &TupleMask) -> ReteResult<usize> {
        self.check_mask(mask)?;
        self.settled(|production| production.ensure_indexer(mask).bucket_count())
    }

    fn bindings_mask(&self, bindings: &[Option<Value>]) -> ReteResult<(TupleMask, Tuple)> {
        if bindings.len() != self.arity() {
            return Err(ReteError::plan_defect(format!(
                "{} bindings for {}, which has {} parameters",
                bindings.len(),
                self.id(),
                self.arity()
            )));
        }

        Ok(TupleMask::from_bindings(bindings))
    }

    /// `match_all`, with the mask made of the `Some` positions.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers, or when the number of
    /// bindings differs from the arity of the query.
    pub fn match_all_with(&self, bindings: &[Option<Value>]) -> ReteResult<Vec<Tuple>> {
        let (mask, bound) = self.bindings_mask(bindings)?;
        self.match_all(&mask, &bound)
    }

    /// # Errors
    ///
    /// See `match_all_with`.
    pub fn match_one_with(&self, bindings: &[Option<Value>]) -> ReteResult<Option<Tuple>> {
        let (mask, bound) = self.bindings_mask(bindings)?;
        self.match_one(&mask, &bound)
    }

    /// # Errors
    ///
    /// See `match_all_with`.
    pub fn count_with(&self, bindings: &[Option<Value>]) -> ReteResult<usize> {
        let (mask, bound) = self.bindings_mask(bindings)?;
        self.count(&mask, &bound)
    }

    /// # Errors
    ///
    /// See `match_all_with`.
    pub fn has_match_with(&self, bindings: &[Option<Value>]) -> ReteResult<bool> {
        let (mask, bound) = self.bindings_mask(bindings)?;
        self.has_match(&mask, &bound)
    }

    /// Returns the intervals of logical time during which `tuple` was
    /// a match.  Outside timely evaluation, that's a single open
    /// interval from the neutral time for current matches.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers.
    pub fn timeline(&self, tuple: &Tuple) -> ReteResult<Vec<Interval>> {
        let tuple = self.inner.network.inner().model().wrap_tuple(tuple);
        self.settled(|production| production.timeline(&tuple))
    }

    /// Registers `listener` under `tag`, replacing any listener
    /// already registered with that tag.  With `fire_now`, the
    /// listener first receives one insertion for every current match.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers.
    pub fn add_update_listener(
        &self,
        listener: Arc<dyn MatchUpdateListener>,
        tag: ListenerTag,
        fire_now: bool,
    ) -> ReteResult<()> {
        let network = self.check_live()?;
        let previous = self.lock_listeners().remove(&tag);
        let production = self.inner.production;
        let callback = network.construct(|builder| {
            if let Some(previous) = previous {
                builder.detach_listener(previous);
            }

            Ok(builder.attach_listener(production, listener, fire_now))
        })?;

        debug!(query = %self.id(), ?tag, "listener added");
        self.lock_listeners().insert(tag, callback);
        Ok(())
    }

    /// Disconnects the listener registered under `tag`.  Returns
    /// whether there was one.
    ///
    /// # Errors
    ///
    /// Returns `Err` for stale matchers.
    pub fn remove_update_listener(&self, tag: ListenerTag) -> ReteResult<bool> {
        let network = self.check_live()?;
        let Some(callback) = self.lock_listeners().remove(&tag) else {
            return Ok(false);
        };

        network.construct(|builder| {
            builder.detach_listener(callback);
            Ok(())
        })?;

        debug!(query = %self.id(), ?tag, "listener removed");
        Ok(true)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, FxHashMap<ListenerTag, Address>> {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
