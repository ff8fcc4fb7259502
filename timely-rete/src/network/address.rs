//! Nodes live in per-container arenas.  An `Address` names a node
//! for the whole lifetime of the network, but only the container that
//! owns a node may dereference its address; everyone else can only use
//! it to route messages.

/// Index of a container in the network; container 0 is the head.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContainerId(pub(crate) u32);

/// Index of a node in its container's arena.  Parents are always
/// allocated before their children, so index order is a topological
/// order within a container.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address {
    container: ContainerId,
    node: NodeId,
}

impl Address {
    #[must_use]
    pub(crate) fn new(container: ContainerId, node: NodeId) -> Self {
        Self { container, node }
    }

    #[must_use]
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Returns how the container `from` reaches this address.
    #[must_use]
    pub fn route_from(&self, from: ContainerId) -> Route {
        if from == self.container {
            Route::Local(self.node)
        } else {
            Route::Remote(self.container, self.node)
        }
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.container.0, self.node.0)
    }
}

/// The result of resolving an address from a given container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    /// The node is in this container's arena.
    Local(NodeId),
    /// The node belongs to another container; messages must be queued.
    Remote(ContainerId, NodeId),
}

/// The input slot a message arrives on.  Most nodes have a single
/// slot; joins distinguish the primary and secondary operands.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Slot {
    Primary,
    Secondary,
}

#[test]
fn test_route() {
    let address = Address::new(ContainerId(1), NodeId(4));
    assert_eq!(address.route_from(ContainerId(1)), Route::Local(NodeId(4)));
    assert_eq!(address.route_from(ContainerId(0)), Route::Remote(ContainerId(1), NodeId(4)));
    assert_eq!(format!("{}", address), "1:4");
}
