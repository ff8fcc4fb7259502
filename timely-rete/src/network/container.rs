//! A container owns an arena of nodes and their mailboxes, and drains
//! them until it has nothing left to deliver.  Messages for nodes
//! owned by another container travel as envelopes on that container's
//! inbox.
use super::address::Address;
use super::address::ContainerId;
use super::address::NodeId;
use super::address::Route;
use super::address::Slot;
use super::mailbox::mailbox_for;
use super::mailbox::Mailbox;
use super::mailbox::Phase;
use super::NetworkInner;
use crate::config::EngineConfig;
use crate::nodes::Emitter;
use crate::nodes::Node;
use crate::nodes::Notification;
use crate::update::consolidate;
use crate::update::Update;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread::JoinHandle;
use tracing::trace;

pub(crate) enum Envelope {
    /// Post `updates` to `node`'s mailbox on `slot`, then drain.
    Deliver {
        node: NodeId,
        slot: Slot,
        updates: Vec<Update>,
    },
    Shutdown,
}

pub(crate) struct NodeSlot {
    /// `None` once the node has been detached.
    node: Option<Box<dyn Node>>,
    mailbox: Box<dyn Mailbox>,
    parents: Vec<(Address, Slot)>,
    children: Vec<(Address, Slot)>,
}

#[derive(Default)]
pub(crate) struct ContainerState {
    nodes: Vec<NodeSlot>,
    /// Nodes with pending anti-monotone messages.
    anti: BTreeSet<NodeId>,
    /// Nodes with pending default messages.
    main: BTreeSet<NodeId>,
    /// Nodes waiting for a `rederive` call.
    rederive: BTreeSet<NodeId>,
    killed: bool,
}

impl ContainerState {
    fn schedule(&mut self, id: NodeId) {
        let Some(entry) = self.nodes.get(id.index()) else {
            return;
        };

        if entry.mailbox.has_messages(Phase::AntiMonotone) {
            self.anti.insert(id);
        }

        if entry.mailbox.has_messages(Phase::Default) {
            self.main.insert(id);
        }
    }

    pub(crate) fn post(&mut self, id: NodeId, slot: Slot, updates: Vec<Update>) {
        let Some(entry) = self.nodes.get_mut(id.index()) else {
            return;
        };

        if entry.node.is_none() {
            return;
        }

        for (tuple, timestamp, diff) in updates {
            entry.mailbox.post_diff(slot, tuple, timestamp, diff);
        }

        self.schedule(id);
    }

    fn is_idle(&self) -> bool {
        self.anti.is_empty() && self.main.is_empty() && self.rederive.is_empty()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&dyn Node> {
        self.nodes.get(id.index())?.node.as_deref()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Box<dyn Node>> {
        self.nodes.get_mut(id.index())?.node.as_mut()
    }

    pub(crate) fn parents(&self, id: NodeId) -> Vec<(Address, Slot)> {
        self.nodes
            .get(id.index())
            .map_or_else(Vec::new, |entry| entry.parents.clone())
    }

    pub(crate) fn add_parent(&mut self, id: NodeId, parent: Address, slot: Slot) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.parents.push((parent, slot));
        }
    }

    pub(crate) fn add_child(&mut self, id: NodeId, child: Address, slot: Slot) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.children.push((child, slot));
        }
    }

    pub(crate) fn remove_child(&mut self, id: NodeId, child: Address) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.children.retain(|(address, _)| *address != child);
        }
    }

    /// Drops the node at `id`; its address stays allocated but
    /// nothing is delivered to it anymore.
    pub(crate) fn detach(&mut self, id: NodeId) {
        if let Some(entry) = self.nodes.get_mut(id.index()) {
            entry.node = None;
            entry.mailbox.clear();
            entry.parents.clear();
            entry.children.clear();
        }

        self.anti.remove(&id);
        self.main.remove(&id);
        self.rederive.remove(&id);
    }
}

pub(crate) struct Container {
    id: ContainerId,
    state: Mutex<ContainerState>,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Container {
    pub(crate) fn new(id: ContainerId) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            id,
            state: Mutex::new(ContainerState::default()),
            sender,
            receiver,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sender(&self) -> &Sender<Envelope> {
        &self.sender
    }

    pub(crate) fn receiver(&self) -> &Receiver<Envelope> {
        &self.receiver
    }

    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Appends `node` to the arena, with a fresh mailbox.
    pub(crate) fn add_node(&self, node: Box<dyn Node>, config: &EngineConfig) -> Address {
        let mut state = self.lock();
        let id = NodeId(state.nodes.len() as u32);
        state.nodes.push(NodeSlot {
            node: Some(node),
            mailbox: mailbox_for(config),
            parents: Vec::new(),
            children: Vec::new(),
        });

        Address::new(self.id, id)
    }

    /// Delivers one batch to one node.  Returns `false` once nothing
    /// is left to deliver.
    fn step(&self, net: &NetworkInner, fired: &mut Vec<Notification>) -> bool {
        let mut outbound = Vec::new();
        {
            let mut state = self.lock();
            if state.killed {
                return false;
            }

            let (id, phase) = if let Some(id) = state.anti.pop_first() {
                (id, Some(Phase::AntiMonotone))
            } else if let Some(id) = state.main.pop_first() {
                (id, Some(Phase::Default))
            } else if let Some(id) = state.rederive.pop_first() {
                (id, None)
            } else {
                return false;
            };

            let cx = net.context();
            let mut out = Emitter::default();
            let Some(entry) = state.nodes.get_mut(id.index()) else {
                return true;
            };
            let Some(node) = entry.node.as_mut() else {
                return true;
            };

            match phase {
                Some(phase) => {
                    let batch = entry.mailbox.deliver(phase);
                    if batch.is_empty() {
                        return true;
                    }

                    trace!(
                        node = node.name(),
                        address = %Address::new(self.id, id),
                        batch = batch.len(),
                        ?phase,
                        "delivering"
                    );
                    node.update(batch, &cx, &mut out);
                }
                None => {
                    trace!(node = node.name(), address = %Address::new(self.id, id), "rederiving");
                    node.rederive(&cx, &mut out);
                }
            }

            let children = entry.children.clone();
            consolidate(&mut out.updates);
            if out.rederive {
                state.rederive.insert(id);
            }

            fired.append(&mut out.notifications);
            if !out.updates.is_empty() {
                for (child, slot) in children {
                    match child.route_from(self.id) {
                        Route::Local(local) => state.post(local, slot, out.updates.clone()),
                        Route::Remote(container, node) => outbound.push((
                            container,
                            Envelope::Deliver {
                                node,
                                slot,
                                updates: out.updates.clone(),
                            },
                        )),
                    }
                }
            }
        }

        for (container, envelope) in outbound {
            net.send(container, envelope);
        }

        true
    }

    /// Runs the drain loop until every mailbox in the container is
    /// empty, and returns the listener callbacks it queued.
    pub(crate) fn drain(&self, net: &NetworkInner) -> Vec<Notification> {
        let mut fired = Vec::new();
        while self.step(net, &mut fired) {}
        fired
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Drops every node, and refuses any further delivery.
    pub(crate) fn kill(&self) {
        let mut state = self.lock();
        state.killed = true;
        state.nodes.clear();
        state.anti.clear();
        state.main.clear();
        state.rederive.clear();
    }
}
