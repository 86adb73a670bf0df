use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::cmp::Reverse;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::domain::{Current, Meter, MeterError, Voltage};
use crate::registry::{EquipmentRegistry, EquipmentSnapshot};

/// Tuning knobs of the balancing pass, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct BalancingSettings {
    pub action_threshold_a: f64,
    pub generator_start_threshold_a: f64,
    pub reference_voltage: Voltage,
    pub verbose: bool,
}

impl From<&ControllerConfig> for BalancingSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            action_threshold_a: cfg.action_threshold_a,
            generator_start_threshold_a: cfg.generator_start_threshold_a,
            reference_voltage: Voltage::volts(cfg.reference_voltage_v),
            verbose: cfg.verbose,
        }
    }
}

/// Structured summary of one balancing pass.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub consumption_a: f64,
    pub production_a: f64,
    pub balance_a: f64,
    /// True when consumption was estimated from appliance ratings because
    /// no live meter reading was available.
    pub estimated: bool,
    pub suspended: Vec<String>,
    pub resumed: Vec<String>,
    pub skipped: Vec<SkippedEquipment>,
    /// Deficit left after exhausting every candidate, if above the dead band.
    pub unresolved_deficit_a: Option<f64>,
    /// Set when the residual deficit calls for starting the generator.
    /// Actually starting it is the generator adapter's business, not ours.
    pub generator_start_needed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEquipment {
    pub id: String,
    pub reason: String,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            consumption_a: 0.0,
            production_a: 0.0,
            balance_a: 0.0,
            estimated: false,
            suspended: Vec::new(),
            resumed: Vec::new(),
            skipped: Vec::new(),
            unresolved_deficit_a: None,
            generator_start_needed: false,
        }
    }
}

/// What a tick decided to do about the measured balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Hold,
    /// Balance above the dead band: shed the given Amperes.
    Shed(f64),
    /// Balance below the dead band: restore up to the given Amperes.
    Restore(f64),
}

/// Strict compares against the dead band; anything inside it holds.
pub fn decide(balance_a: f64, action_threshold_a: f64) -> Action {
    if balance_a > action_threshold_a {
        Action::Shed(balance_a)
    } else if balance_a < -action_threshold_a {
        Action::Restore(-balance_a)
    } else {
        Action::Hold
    }
}

/// One full balancing pass: sample, decide, act.
///
/// Per-equipment failures are logged and skipped; only contract violations
/// (negative watt or ampere readings) propagate as errors.
pub async fn run_tick(
    registry: &EquipmentRegistry,
    meter: &dyn Meter,
    settings: &BalancingSettings,
) -> Result<TickReport> {
    let mut report = TickReport::new(Utc::now());

    let (mut consumption, production) = match sample_meter(meter).await {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "meter read failed, degrading to estimation");
            (Current::ZERO, Current::ZERO)
        }
    };
    if consumption.as_amperes() < 0.0 || production.as_amperes() < 0.0 {
        bail!(
            "meter contract violation: negative reading ({} / {})",
            consumption,
            production
        );
    }

    // Both channels at exactly zero means no live meter; estimate from the
    // registered appliances' rated draw instead.
    if consumption.as_amperes() == 0.0 && production.as_amperes() == 0.0 {
        consumption = estimate_consumption(registry, settings, &mut report).await?;
        report.estimated = true;
    }

    let balance = consumption - production;
    report.consumption_a = consumption.as_amperes();
    report.production_a = production.as_amperes();
    report.balance_a = balance.as_amperes();

    match decide(balance.as_amperes(), settings.action_threshold_a) {
        Action::Hold => {
            debug!(balance_a = balance.as_amperes(), "balance inside dead band");
        }
        Action::Shed(deficit_a) => shed(registry, settings, deficit_a, &mut report).await?,
        Action::Restore(surplus_a) => restore(registry, settings, surplus_a, &mut report).await?,
    }

    Ok(report)
}

async fn sample_meter(meter: &dyn Meter) -> Result<(Current, Current), MeterError> {
    let consumption = meter.consumption().await?;
    let production = meter.production().await?;
    Ok((consumption, production))
}

/// Sum of `mode_consumption(current_mode) / reference_voltage` over every
/// active appliance. Per-equipment read failures are skipped.
async fn estimate_consumption(
    registry: &EquipmentRegistry,
    settings: &BalancingSettings,
    report: &mut TickReport,
) -> Result<Current> {
    let mut total = Current::ZERO;
    for snap in registry.all_snapshot() {
        if snap.suspended {
            continue;
        }
        let mode = match snap.handle.current_mode().await {
            Ok(mode) => mode,
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("mode read failed: {e}"));
                continue;
            }
        };
        registry.update_mode(&snap.id, mode);
        let watts = match snap.handle.mode_consumption(mode).await {
            Ok(watts) => watts,
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("consumption read failed: {e}"));
                continue;
            }
        };
        if watts.as_watts() < 0.0 {
            bail!("equipment {} contract violation: negative draw {}", snap.id, watts);
        }
        total = total + watts.at_voltage(settings.reference_voltage);
    }
    Ok(total)
}

/// Deficit branch: walk suspendable equipment least-important first and
/// suspend until the remaining deficit falls inside the dead band.
async fn shed(
    registry: &EquipmentRegistry,
    settings: &BalancingSettings,
    deficit_a: f64,
    report: &mut TickReport,
) -> Result<()> {
    let mut remaining = deficit_a;
    for snap in registry.suspendable_snapshot() {
        if remaining <= settings.action_threshold_a {
            break;
        }
        let mode = match snap.handle.current_mode().await {
            Ok(mode) => mode,
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("mode read failed: {e}"));
                continue;
            }
        };
        registry.update_mode(&snap.id, mode);
        let watts = match snap.handle.mode_consumption(mode).await {
            Ok(watts) => watts,
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("consumption read failed: {e}"));
                continue;
            }
        };
        if watts.as_watts() < 0.0 {
            bail!("equipment {} contract violation: negative draw {}", snap.id, watts);
        }
        let draw_a = watts.at_voltage(settings.reference_voltage).as_amperes();

        match snap.handle.suspend().await {
            Ok(true) => {
                if registry.commit_suspension(&snap.id, mode) {
                    remaining -= draw_a;
                    report.suspended.push(snap.id.clone());
                    if settings.verbose {
                        info!(id = %snap.id, draw_a, remaining_a = remaining, "suspended");
                    } else {
                        debug!(id = %snap.id, draw_a, remaining_a = remaining, "suspended");
                    }
                } else {
                    note_skip(report, settings, &snap.id, "unregistered during tick".into());
                }
            }
            Ok(false) => {
                note_skip(report, settings, &snap.id, "suspend not applicable".into());
            }
            Err(e) => {
                warn!(id = %snap.id, error = %e, "suspend failed");
                report.skipped.push(SkippedEquipment {
                    id: snap.id.clone(),
                    reason: format!("suspend failed: {e}"),
                });
            }
        }
    }

    if remaining > settings.action_threshold_a {
        report.unresolved_deficit_a = Some(remaining);
        if remaining > settings.generator_start_threshold_a {
            report.generator_start_needed = true;
            warn!(remaining_a = remaining, "deficit unresolved, generator start required");
        }
    }
    Ok(())
}

/// Surplus branch: resume suspended equipment most urgent first, skipping
/// anything whose restored draw would not fit in the remaining surplus.
async fn restore(
    registry: &EquipmentRegistry,
    settings: &BalancingSettings,
    surplus_a: f64,
    report: &mut TickReport,
) -> Result<()> {
    let mut candidates: Vec<(f64, EquipmentSnapshot)> = Vec::new();
    for snap in registry.suspended_snapshot() {
        match snap.handle.emergency().await {
            Ok(urgency) => candidates.push((urgency.clamp(0.0, 1.0), snap)),
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("urgency read failed: {e}"));
            }
        }
    }
    // Stable sort: equally urgent equipment keeps registration order.
    candidates.sort_by_key(|(urgency, _)| Reverse(OrderedFloat(*urgency)));

    let mut remaining = surplus_a;
    for (urgency, snap) in candidates {
        if remaining <= settings.action_threshold_a {
            break;
        }
        let watts = match snap.handle.mode_consumption(snap.prior_mode).await {
            Ok(watts) => watts,
            Err(e) => {
                note_skip(report, settings, &snap.id, format!("consumption read failed: {e}"));
                continue;
            }
        };
        if watts.as_watts() < 0.0 {
            bail!("equipment {} contract violation: negative draw {}", snap.id, watts);
        }
        let need_a = watts.at_voltage(settings.reference_voltage).as_amperes();
        if need_a > remaining {
            note_skip(
                report,
                settings,
                &snap.id,
                format!("needs {need_a:.2} A, only {remaining:.2} A of surplus left"),
            );
            continue;
        }

        match snap.handle.resume().await {
            Ok(true) => {
                if registry.commit_resume(&snap.id).is_some() {
                    remaining -= need_a;
                    report.resumed.push(snap.id.clone());
                    if settings.verbose {
                        info!(id = %snap.id, urgency, need_a, remaining_a = remaining, "resumed");
                    } else {
                        debug!(id = %snap.id, urgency, need_a, remaining_a = remaining, "resumed");
                    }
                } else {
                    note_skip(report, settings, &snap.id, "unregistered during tick".into());
                }
            }
            Ok(false) => {
                note_skip(report, settings, &snap.id, "resume not applicable".into());
            }
            Err(e) => {
                warn!(id = %snap.id, error = %e, "resume failed");
                report.skipped.push(SkippedEquipment {
                    id: snap.id.clone(),
                    reason: format!("resume failed: {e}"),
                });
            }
        }
    }
    Ok(())
}

fn note_skip(report: &mut TickReport, settings: &BalancingSettings, id: &str, reason: String) {
    if settings.verbose {
        info!(id, %reason, "skipped");
    } else {
        debug!(id, %reason, "skipped");
    }
    report.skipped.push(SkippedEquipment {
        id: id.to_string(),
        reason,
    });
}
