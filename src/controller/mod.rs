pub mod balancing;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::Meter;
use crate::hardware::{AdapterFactory, SimulatedAdapterFactory};
use crate::registration::RegistrationService;
use crate::registry::EquipmentRegistry;

pub use balancing::{decide, run_tick, Action, BalancingSettings, SkippedEquipment, TickReport};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub registry: Arc<EquipmentRegistry>,
    pub registration: Arc<RegistrationService>,
    pub controller: Arc<BalancingController>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let registry = Arc::new(EquipmentRegistry::new());

        #[cfg(feature = "sim")]
        let meter: Arc<dyn Meter> = Arc::new(crate::domain::SimulatedMeter::new(
            cfg.meter.base_consumption_a,
            cfg.meter.base_production_a,
            cfg.meter.noise_a,
        ));
        #[cfg(not(feature = "sim"))]
        let meter: Arc<dyn Meter> = Arc::new(crate::domain::FixedMeter::new(0.0, 0.0));

        let factory: Arc<dyn AdapterFactory> = Arc::new(SimulatedAdapterFactory);
        let registration = Arc::new(RegistrationService::new(
            Arc::clone(&registry),
            factory,
            cfg.priorities.clone(),
        ));

        #[cfg(feature = "sim")]
        for entry in &cfg.simulation.equipment {
            match entry.split_once('=') {
                Some((uid, kind)) => {
                    if !registration.register(uid.trim(), "sim://local", kind.trim()).await? {
                        warn!(uid, "seed appliance skipped, uid already registered");
                    }
                }
                None => warn!(entry = %entry, "seed appliance entry is not uid=kind, skipped"),
            }
        }

        let controller = Arc::new(BalancingController::new(
            Arc::clone(&registry),
            meter,
            BalancingSettings::from(&cfg.controller),
        ));

        Ok(Self {
            cfg,
            registry,
            registration,
            controller,
        })
    }
}

pub fn spawn_controller_tasks(state: &AppState, shutdown: CancellationToken) {
    let controller = Arc::clone(&state.controller);
    let period = Duration::from_secs(state.cfg.controller.tick_seconds.max(1));
    tokio::spawn(async move {
        if let Err(e) = controller.run(period, shutdown).await {
            warn!(error = %e, "balancing loop stopped");
        }
    });
}

/// Drives one balancing pass per control period.
///
/// The loop is stateless between ticks apart from the published report;
/// everything it needs lives in the registry.
pub struct BalancingController {
    registry: Arc<EquipmentRegistry>,
    meter: Arc<dyn Meter>,
    settings: BalancingSettings,
    last_report: RwLock<Option<TickReport>>,
}

impl BalancingController {
    pub fn new(
        registry: Arc<EquipmentRegistry>,
        meter: Arc<dyn Meter>,
        settings: BalancingSettings,
    ) -> Self {
        Self {
            registry,
            meter,
            settings,
            last_report: RwLock::new(None),
        }
    }

    /// Run until cancelled. Each tick is awaited to completion before the
    /// next interval fire, so ticks never overlap; cancellation stops the
    /// schedule but lets an in-flight tick finish.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("balancing loop cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }
            self.tick().await?;
        }
    }

    /// One balancing pass. Errors here are contract violations and fatal;
    /// everything transient is absorbed inside the pass.
    pub async fn tick(&self) -> Result<TickReport> {
        let report = run_tick(&self.registry, self.meter.as_ref(), &self.settings).await?;
        info!(
            balance_a = report.balance_a,
            consumption_a = report.consumption_a,
            production_a = report.production_a,
            estimated = report.estimated,
            suspended = report.suspended.len(),
            resumed = report.resumed.len(),
            skipped = report.skipped.len(),
            unresolved_deficit_a = report.unresolved_deficit_a,
            generator_start_needed = report.generator_start_needed,
            "balancing tick"
        );
        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    pub async fn last_report(&self) -> Option<TickReport> {
        self.last_report.read().await.clone()
    }
}
