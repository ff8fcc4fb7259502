//! The backing model owns the base relations the network matches
//! against.  The engine only reads it (to enumerate the initial
//! contents of input nodes, and to test membership in stateless
//! relations), and subscribes to its change notifications.
use crate::error::ReteResult;
use rete_recipes::InputKey;
use rete_recipes::Seed;
use rete_recipes::Tuple;
use rete_recipes::TupleMask;
use std::sync::Arc;

mod memory;

pub use memory::MemoryModel;

/// Receives the changes to one `(key, seed)` subscription.
pub trait ModelListener: Send + Sync {
    fn update(&self, key: &InputKey, tuple: &Tuple, is_insertion: bool);
}

/// A teardown handle for an external subscription.  Disconnecting
/// twice is a no-op.
pub trait Disconnectable: Send + Sync {
    fn disconnect(&self);
}

pub trait BackingModel: Send + Sync {
    /// Returns the tuples of `key` whose projection through `mask` is
    /// `bound`.  Only called for enumerable keys.
    fn enumerate_tuples(&self, key: &InputKey, mask: &TupleMask, bound: &Tuple) -> Vec<Tuple>;

    fn contains_tuple(&self, key: &InputKey, tuple: &Tuple) -> bool;

    /// Subscribes `listener` to the changes of `key` that match
    /// `seed`.  Implementations must not hold internal locks while
    /// they invoke listeners.
    fn add_update_listener(&self, key: &InputKey, seed: &Seed, listener: Arc<dyn ModelListener>);

    fn remove_update_listener(
        &self,
        key: &InputKey,
        seed: &Seed,
        listener: &Arc<dyn ModelListener>,
    );

    /// Whether the model is in the middle of a batch whose
    /// notifications should be buffered rather than propagated.
    fn are_updates_delayed(&self) -> bool {
        false
    }

    /// Runs `callback` in a scope where the model may batch the
    /// traversals the callback triggers.
    ///
    /// # Errors
    ///
    /// Returns whatever `callback` returns.
    fn coalesce_traversals(&self, callback: &mut dyn FnMut() -> ReteResult<()>) -> ReteResult<()> {
        callback()
    }

    /// Converts a model tuple into the network's representation.
    fn wrap_tuple(&self, tuple: &Tuple) -> Tuple {
        tuple.clone()
    }

    /// Converts a network tuple back for listeners and match results.
    fn unwrap_tuple(&self, tuple: &Tuple) -> Tuple {
        tuple.clone()
    }
}
