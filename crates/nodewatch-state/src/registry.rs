//! NodeRegistry: the single source of truth for monitored nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use nodewatch_core::{NodeDescriptor, NodeType};

use crate::error::{RegistryError, RegistryResult};
use crate::health::NodeHealthState;

/// One registered node and its lock-protected health state.
struct NodeSlot {
    descriptor: NodeDescriptor,
    health: Mutex<NodeHealthState>,
}

impl NodeSlot {
    fn lock(&self) -> MutexGuard<'_, NodeHealthState> {
        // Transitions never leave the state half-updated, so a poisoned
        // lock still guards a consistent value.
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            descriptor: self.descriptor.clone(),
            health: self.lock().clone(),
        }
    }
}

/// Registry of the fixed node population.
///
/// Registration happens once at startup through `&mut self`; afterwards the
/// registry is shared behind an `Arc` and only health states change.
pub struct NodeRegistry {
    /// Slots in registration order.
    slots: Vec<NodeSlot>,
    /// address → slot index.
    index: HashMap<String, usize>,
    /// Escalated nodes, adjusted under the lock of the node that changed.
    escalated: AtomicUsize,
    started_at: DateTime<Utc>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            escalated: AtomicUsize::new(0),
            started_at: Utc::now(),
        }
    }

    /// Build a registry from descriptors, failing on the first duplicate.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = NodeDescriptor>,
    ) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add a node with a fresh health state.
    pub fn register(&mut self, descriptor: NodeDescriptor) -> RegistryResult<()> {
        if self.index.contains_key(&descriptor.address) {
            return Err(RegistryError::DuplicateNode(descriptor.address));
        }
        debug!(
            address = %descriptor.address,
            node_type = %descriptor.node_type,
            "node registered"
        );
        self.index.insert(descriptor.address.clone(), self.slots.len());
        self.slots.push(NodeSlot {
            descriptor,
            health: Mutex::new(NodeHealthState::new()),
        });
        Ok(())
    }

    fn slot(&self, address: &str) -> RegistryResult<&NodeSlot> {
        self.index
            .get(address)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| RegistryError::NodeNotFound(address.to_string()))
    }

    /// Copy of a node's current health state.
    pub fn get(&self, address: &str) -> RegistryResult<NodeHealthState> {
        Ok(self.slot(address)?.lock().clone())
    }

    pub fn descriptor(&self, address: &str) -> RegistryResult<&NodeDescriptor> {
        Ok(&self.slot(address)?.descriptor)
    }

    /// Explicit found / not-found lookup.
    pub fn find(&self, address: &str) -> Option<NodeSnapshot> {
        self.slot(address).ok().map(NodeSlot::snapshot)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    /// Run a state transition on one node while holding that node's lock.
    ///
    /// `f` must not block: it runs with the node's lock held.
    pub fn update<R>(
        &self,
        address: &str,
        f: impl FnOnce(&NodeDescriptor, &mut NodeHealthState) -> R,
    ) -> RegistryResult<R> {
        self.update_counted(address, f).map(|(result, _)| result)
    }

    /// Like [`update`](Self::update), also returning the escalated node
    /// count as of this transition. Concurrent transitions on different
    /// nodes each see a distinct count.
    pub fn update_counted<R>(
        &self,
        address: &str,
        f: impl FnOnce(&NodeDescriptor, &mut NodeHealthState) -> R,
    ) -> RegistryResult<(R, usize)> {
        let slot = self.slot(address)?;
        let mut health = slot.lock();
        let was_escalated = health.is_escalated();
        let result = f(&slot.descriptor, &mut health);
        let count = match (was_escalated, health.is_escalated()) {
            (false, true) => self.escalated.fetch_add(1, Ordering::SeqCst) + 1,
            (true, false) => self.escalated.fetch_sub(1, Ordering::SeqCst) - 1,
            _ => self.escalated.load(Ordering::SeqCst),
        };
        Ok((result, count))
    }

    /// Descriptors of one node type, in registration order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &NodeDescriptor> {
        self.slots
            .iter()
            .map(|s| &s.descriptor)
            .filter(move |d| d.node_type == node_type)
    }

    /// Number of nodes with an alert currently raised.
    pub fn escalated_count(&self) -> usize {
        self.escalated.load(Ordering::SeqCst)
    }

    /// Copy of every node's descriptor and health state.
    pub fn all_nodes(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            started_at: self.started_at,
            taken_at: Utc::now(),
            nodes: self.slots.iter().map(NodeSlot::snapshot).collect(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Immutable copy of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub descriptor: NodeDescriptor,
    pub health: NodeHealthState,
}

impl NodeSnapshot {
    /// Alerted and not yet recovered.
    pub fn in_error(&self) -> bool {
        self.health.is_escalated()
    }
}

/// Immutable copy of the whole registry, in registration order.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<NodeSnapshot>,
}

impl RegistrySnapshot {
    /// Nodes currently in error (alert raised, not yet cleared).
    pub fn error_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.in_error()).count()
    }

    /// Nodes sorted by type, then owner (or address).
    pub fn sorted(&self) -> Vec<&NodeSnapshot> {
        let mut nodes: Vec<&NodeSnapshot> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.descriptor.sort_key().cmp(&b.descriptor.sort_key()));
        nodes
    }
}
