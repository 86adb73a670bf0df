use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Equipment, EquipmentKind, SimulatedEquipment, SuspensionConstraint};

/// Everything the registry needs for one appliance, produced from a
/// registration request's adapter descriptor.
pub struct BuiltAdapter {
    pub kind: EquipmentKind,
    pub handle: Arc<dyn Equipment>,
    pub constraint: Arc<dyn SuspensionConstraint>,
}

/// Turns a `(uid, control_address, descriptor)` registration triple into a
/// ready control handle. Real transports (Modbus, HTTP, ...) would connect
/// here; the shipped implementation builds in-process simulated appliances.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn build(
        &self,
        uid: &str,
        control_address: &str,
        descriptor: &str,
    ) -> Result<BuiltAdapter>;
}

/// Factory for in-process appliance doubles. The descriptor is the
/// appliance kind (`heater`, `coffee_machine`, ...).
pub struct SimulatedAdapterFactory;

#[async_trait]
impl AdapterFactory for SimulatedAdapterFactory {
    async fn build(
        &self,
        uid: &str,
        control_address: &str,
        descriptor: &str,
    ) -> Result<BuiltAdapter> {
        let kind = EquipmentKind::from_str(descriptor)
            .map_err(|_| anyhow!("unknown adapter descriptor: {descriptor}"))?;
        debug!(uid, control_address, kind = %kind, "building simulated adapter");

        let equipment = Arc::new(SimulatedEquipment::for_kind(kind));
        let constraint = SimulatedEquipment::constraint(&equipment);
        Ok(BuiltAdapter {
            kind,
            handle: equipment,
            constraint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_known_kinds() {
        let factory = SimulatedAdapterFactory;
        let adapter = factory
            .build("heater-1", "sim://local", "heater")
            .await
            .unwrap();
        assert_eq!(adapter.kind, EquipmentKind::Heater);
        assert!(adapter.constraint.allows_suspension());
        assert_eq!(adapter.handle.current_mode().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn producers_get_a_vetoing_constraint() {
        let factory = SimulatedAdapterFactory;
        let adapter = factory
            .build("solar-1", "sim://local", "solar_panel")
            .await
            .unwrap();
        assert!(!adapter.constraint.allows_suspension());
    }

    #[tokio::test]
    async fn unknown_descriptor_is_rejected() {
        let factory = SimulatedAdapterFactory;
        assert!(factory
            .build("x-1", "sim://local", "dishwasher")
            .await
            .is_err());
    }
}
