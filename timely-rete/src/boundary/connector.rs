//! The input connector remembers, for every input key, the
//! enumerator node built for each seed, so that every query that
//! reads `(key, seed)` shares one node and one model subscription.
use super::BoundaryListener;
use super::InputSubscription;
use crate::error::ReteError;
use crate::error::ReteResult;
use crate::model::Disconnectable;
use crate::network::Address;
use crate::network::Builder;
use crate::nodes::EnumeratorNode;
use rete_recipes::InputKey;
use rete_recipes::Seed;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

struct Connection {
    address: Address,
    subscription: Arc<InputSubscription>,
}

#[derive(Default)]
pub(crate) struct InputConnector {
    inputs: FxHashMap<InputKey, FxHashMap<Seed, Connection>>,
}

impl InputConnector {
    #[must_use]
    pub(crate) fn lookup(&self, key: &InputKey, seed: &Seed) -> Option<Address> {
        Some(self.inputs.get(key)?.get(seed)?.address)
    }
}

impl Builder<'_> {
    /// Returns the enumerator for `(key, seed)`, creating it, filling
    /// it from the model and subscribing it on first use.
    ///
    /// # Errors
    ///
    /// Returns `ReteError::PlanDefect` when `key` is not enumerable or
    /// `seed` has the wrong arity.
    pub(crate) fn connect_input(&mut self, key: &InputKey, seed: &Seed) -> ReteResult<Address> {
        if let Some(address) = self.structure.connector.lookup(key, seed) {
            return Ok(address);
        }

        if !key.is_enumerable() {
            return Err(ReteError::plan_defect(format!(
                "input key {} is not enumerable; use an input filter",
                key
            )));
        }

        if seed.arity() != key.arity() {
            return Err(ReteError::plan_defect(format!(
                "seed of arity {} for input key {}",
                seed.arity(),
                key
            )));
        }

        let net = self.net;
        let model = net.model();
        let (mask, bound) = seed.to_mask();
        let initial = model
            .enumerate_tuples(key, &mask, &bound)
            .iter()
            .map(|tuple| model.wrap_tuple(tuple))
            .collect::<Vec<_>>();
        let count = initial.len();

        let node = EnumeratorNode::new(seed.clone(), initial, net.config().representation());
        let address = net.next_input_container().add_node(Box::new(node), net.config());

        let boundary = Arc::new(BoundaryListener::new(Arc::downgrade(net), address));
        let subscription = Arc::new(InputSubscription::subscribe(
            model.clone(),
            key.clone(),
            seed.clone(),
            boundary,
        ));
        net.register_disconnectable(subscription.clone());

        let seeds = self.structure.connector.inputs.entry(key.clone()).or_default();
        seeds.insert(
            seed.clone(),
            Connection {
                address,
                subscription,
            },
        );

        debug!(%key, %address, tuples = count, "connected input");
        Ok(address)
    }

    /// Severs the subscription of `(key, seed)`.  The enumerator keeps
    /// its contents, but stops following the model.  Returns whether
    /// there was a live subscription.
    pub(crate) fn disconnect_input(&mut self, key: &InputKey, seed: &Seed) -> bool {
        let inputs = &self.structure.connector.inputs;
        let Some(connection) = inputs.get(key).and_then(|seeds| seeds.get(seed)) else {
            return false;
        };

        if connection.subscription.is_severed() {
            return false;
        }

        connection.subscription.disconnect();
        debug!(%key, address = %connection.address, "disconnected input");
        true
    }
}
