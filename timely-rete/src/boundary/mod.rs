//! The boundary is where changes to the backing model enter the
//! network.  Every enumerator node is subscribed to its `(key, seed)`
//! through a `BoundaryListener`, and the subscription is registered as
//! a `Disconnectable` so that tearing the network down severs it.
use crate::model::BackingModel;
use crate::model::Disconnectable;
use crate::model::ModelListener;
use crate::network::Address;
use crate::network::NetworkInner;
use crate::network::Slot;
use crate::update::Direction;
use crate::update::NEUTRAL;
use rete_recipes::InputKey;
use rete_recipes::Seed;
use rete_recipes::Tuple;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use tracing::trace;

mod connector;

pub(crate) use connector::InputConnector;

/// Forwards model notifications to one enumerator node.
pub(crate) struct BoundaryListener {
    network: Weak<NetworkInner>,
    address: Address,
    connected: AtomicBool,
}

impl BoundaryListener {
    pub(crate) fn new(network: Weak<NetworkInner>, address: Address) -> Self {
        Self {
            network,
            address,
            connected: AtomicBool::new(true),
        }
    }
}

impl ModelListener for BoundaryListener {
    fn update(&self, key: &InputKey, tuple: &Tuple, is_insertion: bool) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }

        let Some(net) = self.network.upgrade() else {
            return;
        };

        if !net.is_alive() {
            return;
        }

        let tuple = net.model().wrap_tuple(tuple);
        let update = (tuple, NEUTRAL, Direction::from_insertion(is_insertion).diff());
        trace!(%key, tuple = %update.0, is_insertion, address = %self.address, "boundary update");

        // Workers drain on their own, and delayed updates stay in the
        // mailbox until the next flush.
        net.deliver(self.address, Slot::Primary, vec![update]);
        if net.config().threads == 0 && !net.model().are_updates_delayed() {
            net.wait_for_termination();
        }
    }
}

/// The teardown handle of one boundary subscription.
pub(crate) struct InputSubscription {
    model: Arc<dyn BackingModel>,
    key: InputKey,
    seed: Seed,
    boundary: Arc<BoundaryListener>,
    listener: Arc<dyn ModelListener>,
    severed: AtomicBool,
}

impl InputSubscription {
    /// Subscribes `boundary` to `(key, seed)` on `model`.
    pub(crate) fn subscribe(
        model: Arc<dyn BackingModel>,
        key: InputKey,
        seed: Seed,
        boundary: Arc<BoundaryListener>,
    ) -> Self {
        let listener: Arc<dyn ModelListener> = boundary.clone();
        model.add_update_listener(&key, &seed, listener.clone());
        Self {
            model,
            key,
            seed,
            boundary,
            listener,
            severed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_severed(&self) -> bool {
        self.severed.load(Ordering::Acquire)
    }
}

impl Disconnectable for InputSubscription {
    fn disconnect(&self) {
        if self.severed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.boundary.connected.store(false, Ordering::Release);
        self.model.remove_update_listener(&self.key, &self.seed, &self.listener);
        trace!(key = %self.key, address = %self.boundary.address, "input disconnected");
    }
}
