//! A backing model that keeps every relation in memory.  Enumerable
//! relations are sets of tuples; stateless relations are predicates.
use super::BackingModel;
use super::ModelListener;
use crate::error::ReteResult;
use rete_recipes::InputKey;
use rete_recipes::Seed;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

type Predicate = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

struct Subscription {
    key: InputKey,
    seed: Seed,
    listener: Arc<dyn ModelListener>,
}

#[derive(Default)]
struct ModelState {
    relations: FxHashMap<InputKey, FxHashSet<Tuple>>,
    predicates: FxHashMap<InputKey, Predicate>,
    subscriptions: Vec<Subscription>,
}

#[derive(Default)]
pub struct MemoryModel {
    state: Mutex<ModelState>,
    delay_depth: AtomicUsize,
    coalesced: AtomicUsize,
}

fn same_listener(left: &Arc<dyn ModelListener>, right: &Arc<dyn ModelListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(left).cast::<()>(), Arc::as_ptr(right).cast::<()>())
}

impl MemoryModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Defines the stateless relation `key` as the tuples accepted by
    /// `predicate`.
    pub fn declare_stateless<F>(&self, key: InputKey, predicate: F)
    where
        F: Fn(&Tuple) -> bool + Send + Sync + 'static,
    {
        self.state().predicates.insert(key, Arc::new(predicate));
    }

    /// Adds `tuple` to `key`, and notifies subscribers if it was
    /// absent.  Returns whether the relation changed.
    pub fn insert(&self, key: &InputKey, tuple: Tuple) -> bool {
        let listeners = {
            let mut state = self.state();
            let relation = state.relations.entry(key.clone()).or_default();
            if !relation.insert(tuple.clone()) {
                return false;
            }

            Self::listeners_for(&state, key, &tuple)
        };

        for listener in listeners {
            listener.update(key, &tuple, true);
        }

        true
    }

    /// Removes `tuple` from `key`, and notifies subscribers if it was
    /// present.  Returns whether the relation changed.
    pub fn remove(&self, key: &InputKey, tuple: &Tuple) -> bool {
        let listeners = {
            let mut state = self.state();
            let removed = state
                .relations
                .get_mut(key)
                .map_or(false, |relation| relation.remove(tuple));
            if !removed {
                return false;
            }

            Self::listeners_for(&state, key, tuple)
        };

        for listener in listeners {
            listener.update(key, tuple, false);
        }

        true
    }

    fn listeners_for(
        state: &ModelState,
        key: &InputKey,
        tuple: &Tuple,
    ) -> Vec<Arc<dyn ModelListener>> {
        state
            .subscriptions
            .iter()
            .filter(|subscription| subscription.key == *key && subscription.seed.matches(tuple))
            .map(|subscription| subscription.listener.clone())
            .collect()
    }

    /// Runs `body` as one batch: subscribers are still notified of
    /// every change, but are told to buffer them.
    pub fn with_delayed_updates<R>(&self, body: impl FnOnce() -> R) -> R {
        struct Restore<'a>(&'a AtomicUsize);

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }

        self.delay_depth.fetch_add(1, Ordering::SeqCst);
        let _restore = Restore(&self.delay_depth);
        body()
    }

    /// Returns the sorted contents of `key`.
    #[must_use]
    pub fn relation(&self, key: &InputKey) -> Vec<Tuple> {
        let mut ret = self
            .state()
            .relations
            .get(key)
            .map_or_else(Vec::new, |relation| relation.iter().cloned().collect());
        ret.sort();
        ret
    }

    /// Number of live subscriptions, over all keys.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Number of `coalesce_traversals` scopes entered so far.
    #[must_use]
    pub fn coalesced_traversals(&self) -> usize {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl BackingModel for MemoryModel {
    fn enumerate_tuples(&self, key: &InputKey, mask: &TupleMask, bound: &Tuple) -> Vec<Tuple> {
        let state = self.state();
        let mut ret = state.relations.get(key).map_or_else(Vec::new, |relation| {
            relation
                .iter()
                .filter(|tuple| mask.transform(tuple) == *bound)
                .cloned()
                .collect()
        });
        ret.sort();
        ret
    }

    fn contains_tuple(&self, key: &InputKey, tuple: &Tuple) -> bool {
        let predicate = {
            let state = self.state();
            match state.predicates.get(key) {
                Some(predicate) => predicate.clone(),
                None => {
                    return state
                        .relations
                        .get(key)
                        .map_or(false, |relation| relation.contains(tuple))
                }
            }
        };

        predicate(tuple)
    }

    fn add_update_listener(&self, key: &InputKey, seed: &Seed, listener: Arc<dyn ModelListener>) {
        self.state().subscriptions.push(Subscription {
            key: key.clone(),
            seed: seed.clone(),
            listener,
        });
    }

    fn remove_update_listener(
        &self,
        key: &InputKey,
        seed: &Seed,
        listener: &Arc<dyn ModelListener>,
    ) {
        let mut state = self.state();
        if let Some(index) = state.subscriptions.iter().position(|subscription| {
            subscription.key == *key
                && subscription.seed == *seed
                && same_listener(&subscription.listener, listener)
        }) {
            state.subscriptions.remove(index);
        }
    }

    fn are_updates_delayed(&self) -> bool {
        self.delay_depth.load(Ordering::SeqCst) > 0
    }

    fn coalesce_traversals(&self, callback: &mut dyn FnMut() -> ReteResult<()>) -> ReteResult<()> {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
        callback()
    }
}

#[cfg(test)]
struct Recorder(Mutex<Vec<(Tuple, bool)>>);

#[cfg(test)]
impl ModelListener for Recorder {
    fn update(&self, _key: &InputKey, tuple: &Tuple, is_insertion: bool) {
        self.0.lock().expect("ok").push((tuple.clone(), is_insertion));
    }
}

#[test]
fn test_memory_model_notifies_matching_seeds() {
    use rete_recipes::Value;

    let model = MemoryModel::new();
    let edge = InputKey::enumerable("Edge", 2);
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let listener: Arc<dyn ModelListener> = recorder.clone();
    let seed = Seed::new(vec![Some(Value::new(1)), None]);
    model.add_update_listener(&edge, &seed, listener.clone());

    assert!(model.insert(&edge, Tuple::from([1, 2])));
    assert!(!model.insert(&edge, Tuple::from([1, 2])));
    assert!(model.insert(&edge, Tuple::from([2, 3])));
    assert!(model.remove(&edge, &Tuple::from([1, 2])));
    assert!(!model.remove(&edge, &Tuple::from([1, 2])));

    assert_eq!(
        *recorder.0.lock().expect("ok"),
        vec![(Tuple::from([1, 2]), true), (Tuple::from([1, 2]), false)]
    );

    model.remove_update_listener(&edge, &seed, &listener);
    assert_eq!(model.subscription_count(), 0);
    assert_eq!(model.relation(&edge), vec![Tuple::from([2, 3])]);
}

#[test]
fn test_memory_model_enumerate_and_contains() {
    let model = MemoryModel::new();
    let edge = InputKey::enumerable("Edge", 2);
    let even = InputKey::stateless("Even", 1);
    model.declare_stateless(even.clone(), |tuple: &Tuple| tuple.values()[0].get() % 2 == 0);
    model.insert(&edge, Tuple::from([1, 2]));
    model.insert(&edge, Tuple::from([1, 3]));
    model.insert(&edge, Tuple::from([2, 3]));

    let mask = TupleMask::new(vec![0], 2).expect("ok");
    assert_eq!(
        model.enumerate_tuples(&edge, &mask, &Tuple::from([1])),
        vec![Tuple::from([1, 2]), Tuple::from([1, 3])]
    );
    assert!(model.contains_tuple(&edge, &Tuple::from([2, 3])));
    assert!(model.contains_tuple(&even, &Tuple::from([4])));
    assert!(!model.contains_tuple(&even, &Tuple::from([5])));
}

#[test]
fn test_memory_model_delays() {
    let model = MemoryModel::new();
    assert!(!model.are_updates_delayed());
    let inside =
        model.with_delayed_updates(|| model.with_delayed_updates(|| model.are_updates_delayed()));
    assert!(inside);
    assert!(!model.are_updates_delayed());

    let mut calls = 0;
    model
        .coalesce_traversals(&mut || {
            calls += 1;
            Ok(())
        })
        .expect("ok");
    assert_eq!(calls, 1);
    assert_eq!(model.coalesced_traversals(), 1);
}
