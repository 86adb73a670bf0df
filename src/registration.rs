use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PrioritiesConfig;
use crate::hardware::AdapterFactory;
use crate::registry::{EquipmentRegistry, RegistryError};

/// Entry point appliances use to announce themselves.
///
/// Builds the control handle through the adapter factory, assigns the
/// kind's priority, and hands the record to the registry. The registry's
/// unique-id invariant is surfaced as a `false` return, never violated.
pub struct RegistrationService {
    registry: Arc<EquipmentRegistry>,
    factory: Arc<dyn AdapterFactory>,
    priorities: PrioritiesConfig,
}

impl RegistrationService {
    pub fn new(
        registry: Arc<EquipmentRegistry>,
        factory: Arc<dyn AdapterFactory>,
        priorities: PrioritiesConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            priorities,
        }
    }

    /// Returns `Ok(true)` when the appliance is now registered, `Ok(false)`
    /// when the uid is already taken (the original record is untouched).
    pub async fn register(
        &self,
        uid: &str,
        control_address: &str,
        descriptor: &str,
    ) -> Result<bool> {
        let adapter = self.factory.build(uid, control_address, descriptor).await?;
        let priority = self.priorities.for_kind(adapter.kind);
        match self.registry.register(
            uid,
            adapter.kind,
            adapter.handle,
            priority,
            adapter.constraint,
        ) {
            Ok(()) => {
                info!(uid, kind = %adapter.kind, priority, "equipment registered");
                Ok(true)
            }
            Err(RegistryError::DuplicateId(_)) => {
                warn!(uid, "registration rejected, uid already present");
                Ok(false)
            }
        }
    }

    /// No-op when the uid is absent.
    pub fn unregister(&self, uid: &str) -> bool {
        let removed = self.registry.unregister(uid);
        if removed {
            info!(uid, "equipment unregistered");
        }
        removed
    }

    pub fn registered(&self, uid: &str) -> bool {
        self.registry.contains(uid)
    }
}
