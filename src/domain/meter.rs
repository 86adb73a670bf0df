use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use super::types::Current;

/// Errors raised by the house electric meter.
///
/// A failed read never aborts a tick; the control loop degrades to its
/// consumption-estimation fallback instead.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("communication error: {0}")]
    Communication(String),
    #[error("meter offline or unavailable")]
    Unavailable,
}

/// Instantaneous aggregate readings for the household, in Amperes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Meter: Send + Sync {
    async fn consumption(&self) -> Result<Current, MeterError>;
    async fn production(&self) -> Result<Current, MeterError>;
}

/// Meter double producing noisy readings around configured baselines.
pub struct SimulatedMeter {
    base_consumption_a: f64,
    base_production_a: f64,
    noise_a: f64,
}

impl SimulatedMeter {
    pub fn new(base_consumption_a: f64, base_production_a: f64, noise_a: f64) -> Self {
        Self {
            base_consumption_a,
            base_production_a,
            noise_a,
        }
    }

    fn jitter(&self, base: f64) -> f64 {
        if self.noise_a <= 0.0 {
            return base.max(0.0);
        }
        use rand::Rng;
        let noise = rand::thread_rng().gen_range(-self.noise_a..=self.noise_a);
        (base + noise).max(0.0)
    }
}

#[async_trait]
impl Meter for SimulatedMeter {
    async fn consumption(&self) -> Result<Current, MeterError> {
        Ok(Current::amperes(self.jitter(self.base_consumption_a)))
    }

    async fn production(&self) -> Result<Current, MeterError> {
        Ok(Current::amperes(self.jitter(self.base_production_a)))
    }
}

/// Settable meter for steering balancing scenarios in tests.
pub struct FixedMeter {
    state: Mutex<FixedReadings>,
}

#[derive(Debug, Clone, Copy)]
struct FixedReadings {
    consumption_a: f64,
    production_a: f64,
    failing: bool,
}

impl FixedMeter {
    pub fn new(consumption_a: f64, production_a: f64) -> Self {
        Self {
            state: Mutex::new(FixedReadings {
                consumption_a,
                production_a,
                failing: false,
            }),
        }
    }

    pub fn set(&self, consumption_a: f64, production_a: f64) {
        let mut st = self.state.lock();
        st.consumption_a = consumption_a;
        st.production_a = production_a;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

#[async_trait]
impl Meter for FixedMeter {
    async fn consumption(&self) -> Result<Current, MeterError> {
        let st = *self.state.lock();
        if st.failing {
            return Err(MeterError::Unavailable);
        }
        Ok(Current::amperes(st.consumption_a))
    }

    async fn production(&self) -> Result<Current, MeterError> {
        let st = *self.state.lock();
        if st.failing {
            return Err(MeterError::Unavailable);
        }
        Ok(Current::amperes(st.production_a))
    }
}
