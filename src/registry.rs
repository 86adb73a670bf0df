use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{Equipment, EquipmentKind, SuspensionConstraint};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("equipment id already registered: {0}")]
    DuplicateId(String),
}

/// One registered appliance.
///
/// `priority` is assigned at registration and never changes; `suspended`,
/// `current_mode` and `prior_mode` are mutated only through the commit
/// operations below, while the registry lock is held.
struct EquipmentRecord {
    kind: EquipmentKind,
    handle: Arc<dyn Equipment>,
    constraint: Arc<dyn SuspensionConstraint>,
    priority: u8,
    current_mode: u32,
    prior_mode: u32,
    suspended: bool,
    /// Registration sequence number, used as the deterministic tie-break.
    seq: u64,
}

/// Independent copy of a record handed to the control loop.
///
/// Holds its own `Arc` clones so remote calls happen with no registry lock
/// held; a slow appliance cannot stall registration of unrelated ones.
#[derive(Clone)]
pub struct EquipmentSnapshot {
    pub id: String,
    pub kind: EquipmentKind,
    pub priority: u8,
    pub current_mode: u32,
    pub prior_mode: u32,
    pub suspended: bool,
    pub handle: Arc<dyn Equipment>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, EquipmentRecord>,
    next_seq: u64,
}

/// Thread-safe store of every appliance under the balancer's control.
///
/// All access is serialized by one mutex; queries return snapshots rather
/// than references, so callers never iterate the store while it is locked.
#[derive(Default)]
pub struct EquipmentRegistry {
    inner: Mutex<Inner>,
}

impl EquipmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record, active and in mode 0 until the first mode read.
    pub fn register(
        &self,
        id: impl Into<String>,
        kind: EquipmentKind,
        handle: Arc<dyn Equipment>,
        priority: u8,
        constraint: Arc<dyn SuspensionConstraint>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.insert(
            id,
            EquipmentRecord {
                kind,
                handle,
                constraint,
                priority,
                current_mode: 0,
                prior_mode: 0,
                suspended: false,
                seq,
            },
        );
        Ok(())
    }

    /// Remove a record. Absent ids are a no-op, not an error.
    pub fn unregister(&self, id: &str) -> bool {
        self.inner.lock().records.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<EquipmentSnapshot> {
        let inner = self.inner.lock();
        inner.records.get(id).map(|r| snapshot(id, r))
    }

    /// Ids of all registered equipment of one kind, in registration order.
    pub fn ids_of_kind(&self, kind: EquipmentKind) -> Vec<String> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .collect();
        entries.sort_by_key(|(_, r)| r.seq);
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Active equipment whose constraint permits interruption, least
    /// important first (priority descending, registration order on ties).
    pub fn suspendable_snapshot(&self) -> Vec<EquipmentSnapshot> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, r)| !r.suspended && r.constraint.allows_suspension())
            .collect();
        entries.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        entries.into_iter().map(|(id, r)| snapshot(id, r)).collect()
    }

    /// Everything currently suspended, in registration order. The control
    /// loop re-sorts by urgency before resuming.
    pub fn suspended_snapshot(&self) -> Vec<EquipmentSnapshot> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.records.iter().filter(|(_, r)| r.suspended).collect();
        entries.sort_by_key(|(_, r)| r.seq);
        entries.into_iter().map(|(id, r)| snapshot(id, r)).collect()
    }

    /// Every record, in registration order.
    pub fn all_snapshot(&self) -> Vec<EquipmentSnapshot> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.records.iter().collect();
        entries.sort_by_key(|(_, r)| r.seq);
        entries.into_iter().map(|(id, r)| snapshot(id, r)).collect()
    }

    /// Record a successful suspension. `observed_mode` is the mode read just
    /// before the suspend call; resume restores it. Returns false when the
    /// id was unregistered mid-tick or is already suspended.
    pub fn commit_suspension(&self, id: &str, observed_mode: u32) -> bool {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(id) {
            Some(r) if !r.suspended => {
                r.prior_mode = observed_mode;
                r.current_mode = observed_mode;
                r.suspended = true;
                true
            }
            _ => false,
        }
    }

    /// Record a successful resume and return the restored mode. Returns
    /// `None` when the id was unregistered mid-tick or is not suspended.
    pub fn commit_resume(&self, id: &str) -> Option<u32> {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(id) {
            Some(r) if r.suspended => {
                r.suspended = false;
                r.current_mode = r.prior_mode;
                Some(r.current_mode)
            }
            _ => None,
        }
    }

    /// Record a fresh mode reading taken by the control loop.
    pub fn update_mode(&self, id: &str, mode: u32) -> bool {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(id) {
            Some(r) => {
                r.current_mode = mode;
                true
            }
            None => false,
        }
    }
}

fn snapshot(id: &str, r: &EquipmentRecord) -> EquipmentSnapshot {
    EquipmentSnapshot {
        id: id.to_string(),
        kind: r.kind,
        priority: r.priority,
        current_mode: r.current_mode,
        prior_mode: r.prior_mode,
        suspended: r.suspended,
        handle: Arc::clone(&r.handle),
    }
}
