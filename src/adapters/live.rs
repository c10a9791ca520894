use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::domain::models::{OwnerId, TenantId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEvent {
    pub event: String,
    pub payload: Value,
}

pub type LiveHandle = UnboundedSender<LiveEvent>;

/// Open live connections, one per (owner, tenant).
pub trait LiveConnectionRegistry: Send + Sync {
    /// Replaces any handle already registered for the same owner and tenant.
    fn register(&self, owner: &OwnerId, tenant: &TenantId, handle: LiveHandle);
    /// Fire and forget. Returns whether a live connection took the event.
    fn send(&self, owner: &OwnerId, tenant: &TenantId, event: &str, payload: Value) -> bool;
    fn remove(&self, owner: &OwnerId, tenant: &TenantId);
    /// Called when a client goes away. Drops the handle only if its channel
    /// is closed, so a newer registration for the same key survives.
    fn release(&self, owner: &OwnerId, tenant: &TenantId);
}

#[derive(Debug, Default)]
pub struct InMemoryConnectionRegistry {
    connections: Mutex<HashMap<(TenantId, OwnerId), LiveHandle>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh channel and returns its receiving end.
    pub fn subscribe(&self, owner: &OwnerId, tenant: &TenantId) -> UnboundedReceiver<LiveEvent> {
        let (sender, receiver) = unbounded_channel();
        self.register(owner, tenant, sender);
        receiver
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(TenantId, OwnerId), LiveHandle>> {
        // the map stays consistent even if a holder panicked
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LiveConnectionRegistry for InMemoryConnectionRegistry {
    fn register(&self, owner: &OwnerId, tenant: &TenantId, handle: LiveHandle) {
        let replaced = self
            .lock()
            .insert((tenant.clone(), owner.clone()), handle)
            .is_some();
        tracing::debug!(owner_id = %owner, tenant_id = %tenant, replaced, "live connection registered");
    }

    fn send(&self, owner: &OwnerId, tenant: &TenantId, event: &str, payload: Value) -> bool {
        let key = (tenant.clone(), owner.clone());
        let mut connections = self.lock();

        let Some(handle) = connections.get(&key) else {
            tracing::debug!(owner_id = %owner, tenant_id = %tenant, event, "no live connection");
            return false;
        };

        let live_event = LiveEvent {
            event: event.to_string(),
            payload,
        };

        if handle.send(live_event).is_err() {
            connections.remove(&key);
            tracing::debug!(owner_id = %owner, tenant_id = %tenant, "live connection gone, removed");
            return false;
        }

        true
    }

    fn remove(&self, owner: &OwnerId, tenant: &TenantId) {
        self.lock().remove(&(tenant.clone(), owner.clone()));
    }

    fn release(&self, owner: &OwnerId, tenant: &TenantId) {
        let key = (tenant.clone(), owner.clone());
        let mut connections = self.lock();

        if connections.get(&key).is_some_and(LiveHandle::is_closed) {
            connections.remove(&key);
            tracing::debug!(owner_id = %owner, tenant_id = %tenant, "live connection released");
        }
    }
}
