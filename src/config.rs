use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::domain::EquipmentKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub controller: ControllerConfig,
    pub meter: MeterConfig,
    pub priorities: PrioritiesConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Control period in seconds; one balancing pass per tick.
    pub tick_seconds: u64,
    /// Dead band around zero balance, in Amperes.
    pub action_threshold_a: f64,
    /// Residual deficit beyond which generator start is requested, in Amperes.
    pub generator_start_threshold_a: f64,
    /// Mains voltage used to convert appliance watt ratings to Amperes.
    pub reference_voltage_v: f64,
    /// Log per-candidate decisions at info level instead of debug.
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    pub base_consumption_a: f64,
    pub base_production_a: f64,
    pub noise_a: f64,
}

/// Priority assigned per appliance kind at registration.
/// Lower values are more important; highest numeric priority sheds first.
#[derive(Debug, Clone, Deserialize)]
pub struct PrioritiesConfig {
    pub heater: u8,
    pub coffee_machine: u8,
    pub kettle: u8,
    pub fan: u8,
    pub generator: u8,
    pub solar_panel: u8,
    pub battery: u8,
}

impl PrioritiesConfig {
    pub fn for_kind(&self, kind: EquipmentKind) -> u8 {
        match kind {
            EquipmentKind::Heater => self.heater,
            EquipmentKind::CoffeeMachine => self.coffee_machine,
            EquipmentKind::Kettle => self.kettle,
            EquipmentKind::Fan => self.fan,
            EquipmentKind::Generator => self.generator,
            EquipmentKind::SolarPanel => self.solar_panel,
            EquipmentKind::Battery => self.battery,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Appliances registered at boot, as `uid=kind` pairs.
    pub equipment: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("HEB__").split("__"));
        Ok(figment.extract()?)
    }
}
