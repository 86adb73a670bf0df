use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::types::{EquipmentKind, Power};

/// Errors raised by an appliance control surface.
///
/// These are transient, per-equipment conditions. The control loop absorbs
/// them at the tick boundary; they never abort a tick.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("communication error: {0}")]
    Communication(String),
    #[error("equipment offline or unavailable")]
    Offline,
    #[error("unsupported mode {mode} (max {max})")]
    UnsupportedMode { mode: u32, max: u32 },
}

/// Control surface offered by every registered appliance.
///
/// Implementations usually proxy a remote device, so every method may block
/// or fail. Callers must not hold the registry lock across these calls.
#[async_trait]
pub trait Equipment: Send + Sync {
    /// Current operating-mode index, `0 <= mode <= max_mode()`.
    async fn current_mode(&self) -> Result<u32, ControlError>;

    /// Constant upper bound on the mode index, always `> 0`.
    async fn max_mode(&self) -> Result<u32, ControlError>;

    /// Steady-state draw of the given mode. Pure query, no side effect.
    async fn mode_consumption(&self, mode: u32) -> Result<Power, ControlError>;

    /// Ask the appliance to enter its reduced-power holding state.
    ///
    /// Returns `Ok(false)` when the request is not applicable (already
    /// suspended); an already-suspended appliance never errors.
    async fn suspend(&self) -> Result<bool, ControlError>;

    /// Leave the holding state. `Ok(false)` when not suspended.
    async fn resume(&self) -> Result<bool, ControlError>;

    /// Urgency to be resumed, in `[0, 1]`. Only meaningful while suspended;
    /// an active appliance reports 0.
    async fn emergency(&self) -> Result<f64, ControlError>;
}

/// Veto capability consulted before an appliance is considered for
/// suspension. The default permits interruption unconditionally.
pub trait SuspensionConstraint: Send + Sync {
    fn allows_suspension(&self) -> bool;
}

/// Default constraint: the appliance may always be interrupted.
pub struct Unconstrained;

impl SuspensionConstraint for Unconstrained {
    fn allows_suspension(&self) -> bool {
        true
    }
}

/// Producers and storage are never load-shedding candidates.
pub struct NeverSuspend;

impl SuspensionConstraint for NeverSuspend {
    fn allows_suspension(&self) -> bool {
        false
    }
}

// ============================================================================
// Simulated appliances
// ============================================================================

/// Static description of a simulated appliance model.
#[derive(Debug, Clone)]
pub struct ApplianceProfile {
    pub kind: EquipmentKind,
    /// Steady-state draw per mode index; index 0 is standby.
    pub mode_watts: Vec<f64>,
    pub initial_mode: u32,
    /// Whether the appliance tolerates interruption at all.
    pub interruptible: bool,
    /// Urgency reported right after suspension; grows while suspended.
    pub base_urgency: f64,
}

impl ApplianceProfile {
    pub fn for_kind(kind: EquipmentKind) -> Self {
        match kind {
            EquipmentKind::Heater => Self {
                kind,
                mode_watts: vec![0.0, 800.0, 2000.0],
                initial_mode: 1,
                interruptible: true,
                base_urgency: 0.4,
            },
            EquipmentKind::CoffeeMachine => Self {
                kind,
                mode_watts: vec![0.0, 1200.0],
                initial_mode: 0,
                interruptible: true,
                base_urgency: 0.2,
            },
            EquipmentKind::Kettle => Self {
                kind,
                mode_watts: vec![0.0, 2200.0],
                initial_mode: 0,
                interruptible: true,
                base_urgency: 0.1,
            },
            EquipmentKind::Fan => Self {
                kind,
                mode_watts: vec![0.0, 40.0, 80.0],
                initial_mode: 1,
                interruptible: true,
                base_urgency: 0.05,
            },
            // Producers expose the same surface but draw nothing and are
            // shielded from suspension by their constraint.
            EquipmentKind::Generator | EquipmentKind::SolarPanel | EquipmentKind::Battery => {
                Self {
                    kind,
                    mode_watts: vec![0.0, 0.0],
                    initial_mode: 1,
                    interruptible: false,
                    base_urgency: 0.0,
                }
            }
        }
    }
}

#[derive(Debug)]
struct SimulatedState {
    mode: u32,
    suspended: bool,
    suspended_at: Option<Instant>,
    resume_mode: u32,
    busy: bool,
}

/// In-process appliance double with a mode register and suspend latch.
///
/// No continuous physics: this stands in for the remote control surface,
/// not for the device's thermal or fluid behavior.
pub struct SimulatedEquipment {
    profile: ApplianceProfile,
    state: Mutex<SimulatedState>,
}

impl SimulatedEquipment {
    pub fn new(profile: ApplianceProfile) -> Self {
        let state = SimulatedState {
            mode: profile.initial_mode,
            suspended: false,
            suspended_at: None,
            resume_mode: profile.initial_mode,
            busy: false,
        };
        Self {
            profile,
            state: Mutex::new(state),
        }
    }

    pub fn for_kind(kind: EquipmentKind) -> Self {
        Self::new(ApplianceProfile::for_kind(kind))
    }

    pub fn kind(&self) -> EquipmentKind {
        self.profile.kind
    }

    /// Mark the appliance mid-cycle (e.g. brewing); `WhenIdle` then vetoes
    /// suspension until cleared.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn set_mode(&self, mode: u32) {
        let max = (self.profile.mode_watts.len() - 1) as u32;
        self.state.lock().mode = mode.min(max);
    }

    /// Constraint matching this appliance's profile.
    pub fn constraint(this: &Arc<Self>) -> Arc<dyn SuspensionConstraint> {
        if this.profile.interruptible {
            Arc::new(WhenIdle(Arc::clone(this)))
        } else {
            Arc::new(NeverSuspend)
        }
    }
}

#[async_trait]
impl Equipment for SimulatedEquipment {
    async fn current_mode(&self) -> Result<u32, ControlError> {
        Ok(self.state.lock().mode)
    }

    async fn max_mode(&self) -> Result<u32, ControlError> {
        Ok((self.profile.mode_watts.len() - 1) as u32)
    }

    async fn mode_consumption(&self, mode: u32) -> Result<Power, ControlError> {
        let max = (self.profile.mode_watts.len() - 1) as u32;
        if mode > max {
            return Err(ControlError::UnsupportedMode { mode, max });
        }
        Ok(Power::watts(self.profile.mode_watts[mode as usize]))
    }

    async fn suspend(&self) -> Result<bool, ControlError> {
        let mut st = self.state.lock();
        if st.suspended {
            return Ok(false);
        }
        st.suspended = true;
        st.suspended_at = Some(Instant::now());
        st.resume_mode = st.mode;
        st.mode = 0;
        Ok(true)
    }

    async fn resume(&self) -> Result<bool, ControlError> {
        let mut st = self.state.lock();
        if !st.suspended {
            return Ok(false);
        }
        st.suspended = false;
        st.suspended_at = None;
        st.mode = st.resume_mode;
        Ok(true)
    }

    async fn emergency(&self) -> Result<f64, ControlError> {
        let st = self.state.lock();
        if !st.suspended {
            return Ok(0.0);
        }
        // Urgency ramps while the appliance waits, saturating at 1.
        let waited = st
            .suspended_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        Ok((self.profile.base_urgency + waited / 600.0).min(1.0))
    }
}

/// Refuses interruption while the wrapped appliance reports itself busy.
pub struct WhenIdle(pub Arc<SimulatedEquipment>);

impl SuspensionConstraint for WhenIdle {
    fn allows_suspension(&self) -> bool {
        !self.0.state.lock().busy
    }
}

// ============================================================================
// Scripted test double
// ============================================================================

/// Programmable appliance double for controller tests.
///
/// Reads and commands succeed against a fixed watt table unless a failure
/// is armed, in which case the next matching call errors once.
pub struct ScriptedEquipment {
    mode_watts: Vec<f64>,
    state: Mutex<ScriptedState>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    mode: u32,
    suspended: bool,
    prior_mode: u32,
    urgency: f64,
    fail_next_suspend: bool,
    fail_next_resume: bool,
    fail_reads: bool,
    refuse_suspend: bool,
    suspend_calls: u32,
    resume_calls: u32,
}

impl ScriptedEquipment {
    pub fn new(mode_watts: Vec<f64>, initial_mode: u32) -> Self {
        Self {
            mode_watts,
            state: Mutex::new(ScriptedState {
                mode: initial_mode,
                ..Default::default()
            }),
        }
    }

    pub fn set_urgency(&self, urgency: f64) {
        self.state.lock().urgency = urgency;
    }

    pub fn fail_next_suspend(&self) {
        self.state.lock().fail_next_suspend = true;
    }

    pub fn fail_next_resume(&self) {
        self.state.lock().fail_next_resume = true;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make `suspend` return `Ok(false)` instead of latching.
    pub fn refuse_suspend(&self, refuse: bool) {
        self.state.lock().refuse_suspend = refuse;
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn mode(&self) -> u32 {
        self.state.lock().mode
    }

    pub fn suspend_calls(&self) -> u32 {
        self.state.lock().suspend_calls
    }

    pub fn resume_calls(&self) -> u32 {
        self.state.lock().resume_calls
    }
}

#[async_trait]
impl Equipment for ScriptedEquipment {
    async fn current_mode(&self) -> Result<u32, ControlError> {
        let st = self.state.lock();
        if st.fail_reads {
            return Err(ControlError::Offline);
        }
        Ok(st.mode)
    }

    async fn max_mode(&self) -> Result<u32, ControlError> {
        Ok((self.mode_watts.len() - 1) as u32)
    }

    async fn mode_consumption(&self, mode: u32) -> Result<Power, ControlError> {
        let st = self.state.lock();
        if st.fail_reads {
            return Err(ControlError::Offline);
        }
        let max = (self.mode_watts.len() - 1) as u32;
        if mode > max {
            return Err(ControlError::UnsupportedMode { mode, max });
        }
        Ok(Power::watts(self.mode_watts[mode as usize]))
    }

    async fn suspend(&self) -> Result<bool, ControlError> {
        let mut st = self.state.lock();
        st.suspend_calls += 1;
        if st.fail_next_suspend {
            st.fail_next_suspend = false;
            return Err(ControlError::Communication("suspend timed out".into()));
        }
        if st.refuse_suspend || st.suspended {
            return Ok(false);
        }
        st.prior_mode = st.mode;
        st.suspended = true;
        st.mode = 0;
        Ok(true)
    }

    async fn resume(&self) -> Result<bool, ControlError> {
        let mut st = self.state.lock();
        st.resume_calls += 1;
        if st.fail_next_resume {
            st.fail_next_resume = false;
            return Err(ControlError::Communication("resume timed out".into()));
        }
        if !st.suspended {
            return Ok(false);
        }
        st.suspended = false;
        st.mode = st.prior_mode;
        Ok(true)
    }

    async fn emergency(&self) -> Result<f64, ControlError> {
        let st = self.state.lock();
        if st.fail_reads {
            return Err(ControlError::Offline);
        }
        if !st.suspended {
            return Ok(0.0);
        }
        Ok(st.urgency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_suspend_resume_round_trip() {
        let heater = SimulatedEquipment::for_kind(EquipmentKind::Heater);
        assert_eq!(heater.current_mode().await.unwrap(), 1);

        assert!(heater.suspend().await.unwrap());
        assert_eq!(heater.current_mode().await.unwrap(), 0);

        // Second suspend is a no-op, not an error.
        assert!(!heater.suspend().await.unwrap());

        assert!(heater.resume().await.unwrap());
        assert_eq!(heater.current_mode().await.unwrap(), 1);
        assert!(!heater.resume().await.unwrap());
    }

    #[tokio::test]
    async fn simulated_resume_restores_the_interrupted_mode() {
        let heater = SimulatedEquipment::for_kind(EquipmentKind::Heater);
        heater.set_mode(2);

        heater.suspend().await.unwrap();
        assert_eq!(heater.current_mode().await.unwrap(), 0);

        heater.resume().await.unwrap();
        assert_eq!(heater.current_mode().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn simulated_emergency_only_while_suspended() {
        let heater = SimulatedEquipment::for_kind(EquipmentKind::Heater);
        assert_eq!(heater.emergency().await.unwrap(), 0.0);

        heater.suspend().await.unwrap();
        let urgency = heater.emergency().await.unwrap();
        assert!(urgency >= 0.4 && urgency <= 1.0);
    }

    #[tokio::test]
    async fn simulated_rejects_out_of_range_mode() {
        let fan = SimulatedEquipment::for_kind(EquipmentKind::Fan);
        assert!(fan.mode_consumption(2).await.is_ok());
        assert!(matches!(
            fan.mode_consumption(3).await,
            Err(ControlError::UnsupportedMode { mode: 3, max: 2 })
        ));
    }

    #[tokio::test]
    async fn busy_appliance_vetoes_suspension() {
        let machine = Arc::new(SimulatedEquipment::for_kind(EquipmentKind::CoffeeMachine));
        let constraint = SimulatedEquipment::constraint(&machine);
        assert!(constraint.allows_suspension());

        machine.set_busy(true);
        assert!(!constraint.allows_suspension());

        machine.set_busy(false);
        assert!(constraint.allows_suspension());
    }

    #[tokio::test]
    async fn producer_constraint_never_allows_suspension() {
        let solar = Arc::new(SimulatedEquipment::for_kind(EquipmentKind::SolarPanel));
        assert!(!SimulatedEquipment::constraint(&solar).allows_suspension());
    }

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let eq = ScriptedEquipment::new(vec![0.0, 1500.0], 1);
        eq.fail_next_suspend();

        assert!(eq.suspend().await.is_err());
        assert!(eq.suspend().await.unwrap());
        assert!(eq.is_suspended());
        assert_eq!(eq.suspend_calls(), 2);
    }
}
