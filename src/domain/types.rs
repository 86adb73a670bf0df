use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use strum::{Display, EnumString};

// ============================================================================
// Physical Unit Newtypes
// ============================================================================

/// Power in Watts (W)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Power(pub f64);

impl Power {
    pub fn watts(w: f64) -> Self {
        Self(w)
    }

    pub fn kilowatts(kw: f64) -> Self {
        Self(kw * 1000.0)
    }

    pub fn as_watts(&self) -> f64 {
        self.0
    }

    pub fn as_kilowatts(&self) -> f64 {
        self.0 / 1000.0
    }

    /// Current drawn when this power is delivered at the given voltage.
    pub fn at_voltage(&self, voltage: Voltage) -> Current {
        Current(self.0 / voltage.as_volts())
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.abs() >= 1000.0 {
            write!(f, "{:.2} kW", self.as_kilowatts())
        } else {
            write!(f, "{:.1} W", self.0)
        }
    }
}

impl Add for Power {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Power {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Current in Amperes (A)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Current(pub f64);

impl Current {
    pub const ZERO: Current = Current(0.0);

    pub fn amperes(a: f64) -> Self {
        Self(a)
    }

    pub fn as_amperes(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Current {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} A", self.0)
    }
}

impl Add for Current {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Current {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Voltage in Volts (V)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Voltage(pub f64);

impl Voltage {
    pub fn volts(v: f64) -> Self {
        Self(v)
    }

    pub fn as_volts(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Voltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} V", self.0)
    }
}

// ============================================================================
// Equipment Kinds
// ============================================================================

/// Appliance categories known to the balancer.
///
/// The kind determines the priority assigned at registration time and which
/// simulated profile the adapter factory builds.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Heater,
    CoffeeMachine,
    Kettle,
    Fan,
    Generator,
    SolarPanel,
    Battery,
}

impl EquipmentKind {
    /// Producers feed the house; they are never candidates for suspension.
    pub fn is_producer(&self) -> bool {
        matches!(
            self,
            EquipmentKind::Generator | EquipmentKind::SolarPanel | EquipmentKind::Battery
        )
    }
}
