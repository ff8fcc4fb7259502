//! The provisioner turns recipes into nodes.  Recipes are compared by
//! value, so two queries that share a subplan share its nodes; parents
//! are always provisioned before their children.
//!
//! A new child must start out with its parents' current contents.
//! Rather than copying them immediately, connections queue a
//! `Synchronize` command that runs once the whole batch of nodes is
//! built.  Parents built in the same batch are skipped: whatever they
//! hold is still in flight, and reaches the child through normal
//! propagation.
use super::Address;
use super::Builder;
use super::DelayedCommand;
use super::Slot;
use crate::error::ReteError;
use crate::error::ReteResult;
use crate::matcher::MatchUpdateListener;
use crate::nodes::node_for_recipe;
use crate::nodes::CallbackNode;
use crate::nodes::InputFilterNode;
use crate::nodes::MatcherNode;
use rete_recipes::InputKey;
use rete_recipes::Recipe;
use rete_recipes::RecipeRef;
use rete_recipes::TupleMask;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub(crate) struct Provisioner {
    recipes: FxHashMap<Recipe, Address>,
    /// Non-input nodes created since the last batch of delayed
    /// commands.
    fresh: FxHashSet<Address>,
    /// Production node -> the matcher node its listeners hang off.
    hubs: FxHashMap<Address, Address>,
}

impl Provisioner {
    #[must_use]
    pub(crate) fn lookup(&self, recipe: &Recipe) -> Option<Address> {
        self.recipes.get(recipe).copied()
    }

    pub(crate) fn end_batch(&mut self) {
        self.fresh.clear();
    }
}

fn slot_for(recipe: &Recipe, index: usize) -> Slot {
    match recipe {
        Recipe::Join { .. } | Recipe::Antijoin { .. } if index == 1 => Slot::Secondary,
        _ => Slot::Primary,
    }
}

impl Builder<'_> {
    /// Returns the node for `recipe`, creating it and its missing
    /// ancestors.
    ///
    /// # Errors
    ///
    /// Returns `ReteError::PlanDefect` for recipes that fail
    /// validation, or that need an enumerator for a stateless key.
    pub(crate) fn get_or_create(&mut self, recipe: &RecipeRef) -> ReteResult<Address> {
        if let Some(address) = self.structure.provisioner.lookup(recipe) {
            return Ok(address);
        }

        recipe.validate().map_err(|error| {
            ReteError::plan_defect(format!("invalid {} recipe: {}", recipe.kind(), error))
        })?;

        let address = match &**recipe {
            Recipe::Input { key, seed } => self.connect_input(key, seed)?,
            Recipe::InputFilter { parent, key, mask } => {
                let parent = self.get_or_create(parent)?;
                self.connect_input_filter(parent, key, mask.as_ref())
            }
            _ => {
                let mut parents = Vec::new();
                for parent in recipe.parents() {
                    parents.push(self.get_or_create(parent)?);
                }

                let net = self.net;
                let node = node_for_recipe(recipe, net.config()).ok_or_else(|| {
                    ReteError::plan_defect(format!("no node for {} recipe", recipe.kind()))
                })?;
                let address = net.head().add_node(node, net.config());
                self.structure.provisioner.fresh.insert(address);
                for (index, parent) in parents.into_iter().enumerate() {
                    self.connect(parent, address, slot_for(recipe, index), true);
                }

                debug!(kind = recipe.kind(), %address, "provisioned node");
                address
            }
        };

        self.structure.provisioner.recipes.insert((**recipe).clone(), address);
        Ok(address)
    }

    /// Builds a stateless filter on `key` below `parent`.
    pub(crate) fn connect_input_filter(
        &mut self,
        parent: Address,
        key: &InputKey,
        mask: Option<&TupleMask>,
    ) -> Address {
        let net = self.net;
        let node = InputFilterNode::new(key.clone(), mask.cloned());
        let address = net.head().add_node(Box::new(node), net.config());
        self.structure.provisioner.fresh.insert(address);
        self.connect(parent, address, Slot::Primary, true);

        debug!(%key, %address, "connected input filter");
        address
    }

    /// Adds the `parent -> child` edge on `slot`, and optionally queues
    /// the synchronisation of `child` with `parent`'s contents.
    ///
    /// # Panics
    ///
    /// Panics when `child` is an input node.
    pub(crate) fn connect(
        &mut self,
        parent: Address,
        child: Address,
        slot: Slot,
        synchronize: bool,
    ) {
        {
            let mut state = self.net.container(child.container()).lock();
            let accepts = state.node(child.node()).map_or(true, |node| node.accepts_parents());
            assert!(accepts, "input nodes can't have parents");
            state.add_parent(child.node(), parent, slot);
        }

        self.net
            .container(parent.container())
            .lock()
            .add_child(parent.node(), child, slot);

        if synchronize && !self.structure.provisioner.fresh.contains(&parent) {
            self.structure
                .delayed
                .push(DelayedCommand::Synchronize { parent, child, slot });
        }
    }

    /// Hangs a callback for `listener` below the production node at
    /// `production`.  With `fire_now`, the callback first receives
    /// the current matches.
    pub(crate) fn attach_listener(
        &mut self,
        production: Address,
        listener: Arc<dyn MatchUpdateListener>,
        fire_now: bool,
    ) -> Address {
        let net = self.net;
        let config = net.config();
        let existing = self.structure.provisioner.hubs.get(&production).copied();
        let hub = match existing {
            Some(hub) => hub,
            None => {
                let hub = net.head().add_node(Box::new(MatcherNode), config);
                self.connect(production, hub, Slot::Primary, false);
                self.structure.provisioner.hubs.insert(production, hub);
                hub
            }
        };

        let callback = net.head().add_node(Box::new(CallbackNode::new(listener)), config);
        self.connect(hub, callback, Slot::Primary, false);
        if fire_now {
            self.structure.delayed.push(DelayedCommand::Synchronize {
                parent: hub,
                child: callback,
                slot: Slot::Primary,
            });
        }

        debug!(%production, %callback, fire_now, "attached listener");
        callback
    }

    /// Unlinks the callback node at `callback` from its parents.
    pub(crate) fn detach_listener(&mut self, callback: Address) {
        let parents = {
            let mut state = self.net.container(callback.container()).lock();
            let parents = state.parents(callback.node());
            state.detach(callback.node());
            parents
        };

        for (parent, _) in parents {
            self.net
                .container(parent.container())
                .lock()
                .remove_child(parent.node(), callback);
        }

        debug!(%callback, "detached listener");
    }
}

#[cfg(test)]
use super::{Network, Structure};
#[cfg(test)]
use crate::config::EngineConfig;
#[cfg(test)]
use crate::model::MemoryModel;
#[cfg(test)]
use crate::nodes::{EnumeratorNode, UnionNode};
#[cfg(test)]
use rete_recipes::Seed;

#[test]
#[should_panic(expected = "input nodes can't have parents")]
fn test_input_nodes_reject_parents() {
    let network = Network::new(EngineConfig::default(), Arc::new(MemoryModel::new())).expect("ok");
    let net = network.inner();
    let config = net.config();
    let enumerator = EnumeratorNode::new(Seed::unbound(1), Vec::new(), config.representation());
    let input = net.head().add_node(Box::new(enumerator), config);
    let union = net.head().add_node(Box::new(UnionNode), config);

    let mut structure = Structure::default();
    let mut builder = Builder {
        net,
        structure: &mut structure,
    };
    builder.connect(union, input, Slot::Primary, false);
}
