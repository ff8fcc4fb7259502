//! The network ties containers together.  It owns the construction
//! state (recipe map, input connector, delayed commands), the
//! structural lock that keeps topology changes apart from delivery,
//! and the termination barrier behind `settle`.
//!
//! With `threads == 0`, there is a single container and every drain
//! runs on the caller's thread.  Otherwise, each container has a
//! worker thread that drains it whenever an envelope arrives on its
//! inbox, and an in-flight counter tracks envelopes that have been
//! sent but not fully processed yet: the network is quiescent once it
//! reaches zero.
use crate::boundary::InputConnector;
use crate::config::EngineConfig;
use crate::error::ReteError;
use crate::error::ReteResult;
use crate::model::BackingModel;
use crate::model::Disconnectable;
use crate::nodes::NodeContext;
use crate::nodes::Notification;
use crate::nodes::ProductionNode;
use crate::update::Update;
use crossbeam_channel::RecvTimeoutError;
use std::cell::Cell;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::thread;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

mod address;
mod container;
mod mailbox;
mod provisioner;

pub use address::Address;
pub use address::Slot;
pub use mailbox::Message;

use address::ContainerId;
use address::NodeId;

pub(crate) use container::Container;
pub(crate) use container::Envelope;
pub(crate) use provisioner::Provisioner;

#[derive(Default)]
struct Counts {
    /// Envelopes sent but not yet drained.
    in_flight: usize,
    /// Drained envelopes whose listener callbacks are still running.
    firing: usize,
}

/// Tracks envelopes from `send` to the end of their callbacks.
#[derive(Default)]
struct Termination {
    counts: Mutex<Counts>,
    quiescent: Condvar,
}

impl Termination {
    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        self.lock().in_flight += 1;
    }

    /// Retires an envelope that was never drained.
    fn end(&self) {
        let mut counts = self.lock();
        counts.in_flight = counts.in_flight.saturating_sub(1);
        if counts.in_flight == 0 && counts.firing == 0 {
            self.quiescent.notify_all();
        }
    }

    /// Moves a drained envelope to the callback stage.
    fn drained(&self) {
        let mut counts = self.lock();
        counts.in_flight = counts.in_flight.saturating_sub(1);
        counts.firing += 1;
    }

    fn fired(&self) {
        let mut counts = self.lock();
        counts.firing = counts.firing.saturating_sub(1);
        if counts.in_flight == 0 && counts.firing == 0 {
            self.quiescent.notify_all();
        }
    }

    fn is_delivered(&self) -> bool {
        self.lock().in_flight == 0
    }

    fn wait(&self) {
        let mut counts = self.lock();
        while counts.in_flight > 0 || counts.firing > 0 {
            counts = self.quiescent.wait(counts).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn reset(&self) {
        *self.lock() = Counts::default();
        self.quiescent.notify_all();
    }
}

thread_local! {
    /// The network and container whose worker runs on this thread.
    static WORKER: Cell<Option<(usize, ContainerId)>> = const { Cell::new(None) };
}

/// How long a worker waiting on its own network sleeps between
/// checks of its inbox.
const WORKER_POLL: Duration = Duration::from_millis(1);

/// Work queued during construction, executed once the callback has
/// built every node.
pub(crate) enum DelayedCommand {
    /// Pull `parent`'s current contents into `child`'s mailbox.
    Synchronize {
        parent: Address,
        child: Address,
        slot: Slot,
    },
}

/// Everything construction mutates, behind one lock.
#[derive(Default)]
pub(crate) struct Structure {
    pub(crate) provisioner: Provisioner,
    pub(crate) connector: InputConnector,
    pub(crate) delayed: Vec<DelayedCommand>,
}

pub(crate) struct NetworkInner {
    config: EngineConfig,
    model: Arc<dyn BackingModel>,
    containers: Vec<Arc<Container>>,
    structural: RwLock<()>,
    termination: Termination,
    structure: Mutex<Structure>,
    disconnectables: Mutex<Vec<Arc<dyn Disconnectable>>>,
    next_container: AtomicUsize,
    alive: AtomicBool,
}

/// The construction-time view of the network, handed to the body of
/// `Network::construct`.
pub(crate) struct Builder<'a> {
    pub(crate) net: &'a Arc<NetworkInner>,
    pub(crate) structure: &'a mut Structure,
}

fn fire(notifications: Vec<Notification>) {
    for notification in notifications {
        notification.fire();
    }
}

impl NetworkInner {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn model(&self) -> &Arc<dyn BackingModel> {
        &self.model
    }

    pub(crate) fn context(&self) -> NodeContext<'_> {
        NodeContext {
            model: &*self.model,
            config: &self.config,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn is_threaded(&self) -> bool {
        self.config.threads > 0
    }

    pub(crate) fn container(&self, id: ContainerId) -> &Arc<Container> {
        &self.containers[id.0 as usize]
    }

    pub(crate) fn head(&self) -> &Arc<Container> {
        &self.containers[0]
    }

    /// Picks the container for the next input node.
    pub(crate) fn next_input_container(&self) -> &Arc<Container> {
        let index = self.next_container.fetch_add(1, Ordering::Relaxed) % self.containers.len();
        &self.containers[index]
    }

    pub(crate) fn register_disconnectable(&self, handle: Arc<dyn Disconnectable>) {
        self.disconnectables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Queues `envelope` on `target`'s inbox.
    fn send(&self, target: ContainerId, envelope: Envelope) {
        self.termination.begin();
        if self.container(target).sender().send(envelope).is_err() {
            warn!(container = target.0, "dropping envelope for a stopped container");
            self.termination.end();
        }
    }

    /// Hands `updates` to the node at `address`: directly in the
    /// single-threaded case, as an envelope otherwise.  Does not wait
    /// for the resulting propagation.
    pub(crate) fn deliver(&self, address: Address, slot: Slot, updates: Vec<Update>) {
        if updates.is_empty() || !self.is_alive() {
            return;
        }

        if self.is_threaded() {
            self.send(
                address.container(),
                Envelope::Deliver {
                    node: address.node(),
                    slot,
                    updates,
                },
            );
        } else {
            self.container(address.container())
                .lock()
                .post(address.node(), slot, updates);
        }
    }

    /// Drains every container on the caller's thread.
    fn drain_local(&self) {
        loop {
            let mut progressed = false;
            for container in self.containers.iter() {
                if !container.is_idle() {
                    progressed = true;
                    fire(container.drain(self));
                }
            }

            if !progressed {
                break;
            }
        }
    }

    /// The container whose worker is the current thread, if it belongs
    /// to this network.
    fn current_worker(&self) -> Option<ContainerId> {
        let this = self as *const Self as usize;
        WORKER
            .with(Cell::get)
            .and_then(|(network, id)| (network == this).then_some(id))
    }

    /// Waits for every envelope to drain and for every callback to
    /// return.  A listener running on one of our workers can't wait
    /// for itself: it keeps draining its own inbox until nothing is in
    /// flight, and ignores callbacks that are still running.
    fn await_workers(&self) {
        let Some(id) = self.current_worker() else {
            self.termination.wait();
            return;
        };

        let container = self.container(id).clone();
        while self.is_alive() && !self.termination.is_delivered() {
            match container.receiver().recv_timeout(WORKER_POLL) {
                Ok(Envelope::Deliver {
                    node,
                    slot,
                    updates,
                }) => self.process(&container, node, slot, updates),
                Ok(Envelope::Shutdown) => {
                    // The outer worker loop still has to see it.
                    let _ = container.sender().send(Envelope::Shutdown);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Blocks until every container is empty.  In single-threaded
    /// mode, this is where the draining happens, unless the model is
    /// holding updates back.
    pub(crate) fn wait_for_termination(&self) {
        if !self.is_alive() {
            return;
        }

        if self.is_threaded() {
            self.await_workers();
        } else if !self.model.are_updates_delayed() {
            self.drain_local();
        }
    }

    /// Like `wait_for_termination`, but also delivers whatever was
    /// posted while the model was holding updates back.
    pub(crate) fn flush(&self) {
        if !self.is_alive() {
            return;
        }

        if self.is_threaded() {
            self.await_workers();
        } else {
            self.drain_local();
        }
    }

    /// Runs `body` once every update issued so far has propagated.
    pub(crate) fn settle_then<R>(&self, body: impl FnOnce() -> R) -> R {
        self.wait_for_termination();
        body()
    }

    /// Returns everything the node at `address` currently outputs.
    /// Stateless nodes recursively pull their parents.
    pub(crate) fn pull(&self, address: Address) -> Vec<Update> {
        let cx = self.context();
        let container = self.container(address.container());
        let parents = {
            let state = container.lock();
            let Some(node) = state.node(address.node()) else {
                return Vec::new();
            };

            if let Some(contents) = node.contents(&cx) {
                return contents;
            }

            state.parents(address.node())
        };

        let mut ret = Vec::new();
        for (parent, slot) in parents {
            let pulled = self.pull(parent);
            let state = container.lock();
            if let Some(node) = state.node(address.node()) {
                ret.extend(node.transform(slot, pulled, &cx));
            }
        }

        ret
    }

    /// Runs `body` on the production node at `address`, if it is one.
    pub(crate) fn with_production<R>(
        &self,
        address: Address,
        body: impl FnOnce(&mut ProductionNode) -> R,
    ) -> Option<R> {
        let mut state = self.container(address.container()).lock();
        state
            .node_mut(address.node())
            .and_then(|node| node.as_production_mut())
            .map(body)
    }

    fn execute_delayed_commands(&self, structure: &mut Structure) {
        for command in std::mem::take(&mut structure.delayed) {
            match command {
                DelayedCommand::Synchronize { parent, child, slot } => {
                    let contents = self.pull(parent);
                    debug!(%parent, %child, tuples = contents.len(), "synchronizing new child");
                    self.deliver(child, slot, contents);
                }
            }
        }

        structure.provisioner.end_batch();
    }

    /// Posts one envelope's updates, drains `container` and fires the
    /// resulting callbacks outside the structural lock.
    fn process(&self, container: &Container, node: NodeId, slot: Slot, updates: Vec<Update>) {
        let notifications = {
            let _read = self.structural.read().unwrap_or_else(PoisonError::into_inner);
            container.lock().post(node, slot, updates);
            container.drain(self)
        };

        self.termination.drained();
        fire(notifications);
        self.termination.fired();
    }

    fn worker_loop(container: Arc<Container>, network: Weak<NetworkInner>) {
        info!(container = container.id().0, "container worker started");
        let id = (network.as_ptr() as usize, container.id());
        WORKER.with(|worker| worker.set(Some(id)));
        while let Ok(envelope) = container.receiver().recv() {
            let Envelope::Deliver { node, slot, updates } = envelope else {
                break;
            };

            let Some(net) = network.upgrade() else {
                break;
            };

            net.process(&container, node, slot, updates);
        }

        info!(container = container.id().0, "container worker stopped");
    }
}

/// A handle on a live network.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl Network {
    /// Builds an empty network, and starts one worker per container
    /// when `config.threads > 0`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when a worker thread fails to start.
    pub fn new(config: EngineConfig, model: Arc<dyn BackingModel>) -> ReteResult<Self> {
        let count = config.threads.max(1);
        let containers = (0..count)
            .map(|index| Arc::new(Container::new(ContainerId(index as u32))))
            .collect::<Vec<_>>();

        let inner = Arc::new(NetworkInner {
            config,
            model,
            containers,
            structural: RwLock::new(()),
            termination: Termination::default(),
            structure: Mutex::new(Structure::default()),
            disconnectables: Mutex::new(Vec::new()),
            next_container: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
        });

        let network = Self { inner };
        if network.inner.is_threaded() {
            for container in network.inner.containers.iter() {
                let worker = container.clone();
                let weak = Arc::downgrade(&network.inner);
                let spawned = thread::Builder::new()
                    .name(format!("rete-container-{}", container.id().0))
                    .spawn(move || NetworkInner::worker_loop(worker, weak));
                match spawned {
                    Ok(handle) => container.set_worker(handle),
                    Err(error) => {
                        network.kill();
                        return Err(error.into());
                    }
                }
            }
        }

        Ok(network)
    }

    pub(crate) fn inner(&self) -> &Arc<NetworkInner> {
        &self.inner
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// The construction wrapper: flushes pending messages, takes the
    /// structural lock, runs `body` in a coalesced model traversal,
    /// synchronises the new nodes, releases the lock and settles.
    /// Errors from `body` or the synchronisation are only returned
    /// after the lock is released; nothing is rolled back.
    pub(crate) fn construct<R>(
        &self,
        body: impl FnOnce(&mut Builder<'_>) -> ReteResult<R>,
    ) -> ReteResult<R> {
        let net = &self.inner;
        // Synchronising a child through a stateless parent is only
        // exact when no message is pending anywhere.
        net.flush();

        let result = {
            let _write = if net.is_threaded() {
                Some(net.structural.write().unwrap_or_else(PoisonError::into_inner))
            } else {
                None
            };

            let mut structure = net.structure.lock().unwrap_or_else(PoisonError::into_inner);
            let mut body = Some(body);
            let mut result = None;
            let outcome = net.model.coalesce_traversals(&mut || {
                if let Some(body) = body.take() {
                    let mut builder = Builder {
                        net,
                        structure: &mut structure,
                    };
                    result = Some(body(&mut builder)?);
                }

                Ok(())
            });

            net.execute_delayed_commands(&mut structure);
            outcome.and_then(|()| {
                result.ok_or_else(|| ReteError::plan_defect("construction body did not run"))
            })
        };

        net.wait_for_termination();
        result
    }

    /// Stops the network: severs every external subscription in
    /// registration order, stops the workers and drops every node.
    pub fn kill(&self) {
        let net = &self.inner;
        if !net.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        let handles = std::mem::take(
            &mut *net
                .disconnectables
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            handle.disconnect();
        }

        for container in net.containers.iter() {
            container.kill();
            let _ = container.sender().send(Envelope::Shutdown);
        }

        for container in net.containers.iter() {
            if let Some(handle) = container.take_worker() {
                if handle.thread().id() == thread::current().id() {
                    debug!(
                        container = container.id().0,
                        "network killed from its own worker; skip self-join"
                    );
                } else {
                    let _ = handle.join();
                }
            }
        }

        net.termination.reset();
        info!("network killed");
    }
}
