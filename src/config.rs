// src/config.rs - Runtime and per-tower alarm configuration

use crate::classify::{AlarmClass, ThresholdSet};
use crate::error::{Result, TowerError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main towerwatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Tick runtime configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Tower alarm definitions
    #[serde(default)]
    pub devices: Vec<DeviceAlarmConfig>,

    /// Indicator actuator configuration
    #[serde(default)]
    pub actuator: ActuatorConfig,

    /// Simulated live feed, for running without towers
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML configuration string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check engine settings and every device definition
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        validate_devices(&self.devices, &self.actuator)?;
        if let Some(sim) = &self.simulation {
            sim.validate()?;
        }
        Ok(())
    }

    /// Devices taking part in evaluation
    pub fn active_devices(&self) -> impl Iterator<Item = &DeviceAlarmConfig> {
        self.devices.iter().filter(|d| d.active)
    }
}

/// Validate a device list as a whole: each definition, unique ids, and an
/// address for every active device when the http actuator is selected.
pub fn validate_devices(devices: &[DeviceAlarmConfig], actuator: &ActuatorConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for device in devices {
        device.validate()?;
        if !seen.insert(device.device_id.as_str()) {
            return Err(TowerError::Config(format!(
                "Duplicate device id '{}'",
                device.device_id
            )));
        }
    }

    if actuator.kind == ActuatorKind::Http {
        if let Some(device) = devices.iter().find(|d| d.active && d.address.is_none()) {
            return Err(TowerError::Config(format!(
                "Device '{}' needs an address for the http actuator",
                device.device_id
            )));
        }
    }

    Ok(())
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Tick runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Evaluation period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Missed tick intervals tolerated before the watchdog re-arms the timer
    #[serde(default = "default_watchdog_factor")]
    pub watchdog_factor: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            watchdog_factor: default_watchdog_factor(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(TowerError::Config("engine.tick_ms must be positive".into()));
        }
        if self.watchdog_factor < 2 {
            return Err(TowerError::Config(
                "engine.watchdog_factor must be at least 2".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Silence after which the tick timer counts as stalled
    pub fn stall_after(&self) -> Duration {
        self.tick_interval() * self.watchdog_factor
    }
}

// ============================================================================
// DEVICE CONFIGURATION
// ============================================================================

/// Fixed measurement channels of a tower
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    North,
    East,
    South,
    West,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::North, Channel::East, Channel::South, Channel::West];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::North => "north",
            Channel::East => "east",
            Channel::South => "south",
            Channel::West => "west",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples required to confirm each alarm class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTimes {
    pub low_low: u32,
    pub low: u32,
    pub high: u32,
    pub high_high: u32,
}

impl AlarmTimes {
    /// Same window for every class
    pub fn uniform(samples: u32) -> Self {
        Self {
            low_low: samples,
            low: samples,
            high: samples,
            high_high: samples,
        }
    }

    pub fn required(&self, class: AlarmClass) -> usize {
        let samples = match class {
            AlarmClass::LowLow => self.low_low,
            AlarmClass::Low => self.low,
            AlarmClass::High => self.high,
            AlarmClass::HighHigh => self.high_high,
        };
        samples as usize
    }

    /// Sample buffer length: the longest window
    pub fn capacity(&self) -> usize {
        AlarmClass::ALL
            .into_iter()
            .map(|class| self.required(class))
            .max()
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        for class in AlarmClass::ALL {
            if self.required(class) == 0 {
                return Err(TowerError::Config(format!(
                    "alarm_times.{} must be positive",
                    class
                )));
            }
        }
        Ok(())
    }
}

/// Alarm definition of one tower
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAlarmConfig {
    /// Tower identifier as reported by the live feed
    pub device_id: String,

    /// Inactive towers are not evaluated at all
    #[serde(default = "default_true")]
    pub active: bool,

    pub thresholds: ThresholdSet,

    pub alarm_times: AlarmTimes,

    /// Host (and optional port) of the tower's local HTTP API
    #[serde(default)]
    pub address: Option<String>,
}

impl DeviceAlarmConfig {
    pub fn new(device_id: impl Into<String>, thresholds: ThresholdSet, alarm_times: AlarmTimes) -> Self {
        Self {
            device_id: device_id.into(),
            active: true,
            thresholds,
            alarm_times,
            address: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(TowerError::Config("Device id must not be empty".into()));
        }
        self.thresholds.validate().map_err(|e| {
            TowerError::Config(format!("Device '{}': {}", self.device_id, e))
        })?;
        self.alarm_times.validate().map_err(|e| {
            TowerError::Config(format!("Device '{}': {}", self.device_id, e))
        })?;
        Ok(())
    }

    /// Whether switching to `other` invalidates buffers and alarm state
    pub fn needs_reset(&self, other: &DeviceAlarmConfig) -> bool {
        self.thresholds != other.thresholds || self.alarm_times != other.alarm_times
    }
}

// ============================================================================
// ACTUATOR CONFIGURATION
// ============================================================================

/// Actuator backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Only log the desired indicator state
    #[default]
    Log,
    /// POST to the tower's local HTTP API
    Http,
}

/// Indicator actuator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub kind: ActuatorKind,

    /// Request path on the tower
    #[serde(default = "default_actuator_path")]
    pub path: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_actuator_timeout")]
    pub timeout_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            kind: ActuatorKind::default(),
            path: default_actuator_path(),
            timeout_ms: default_actuator_timeout(),
        }
    }
}

// ============================================================================
// SIMULATION CONFIGURATION
// ============================================================================

/// Simulated live feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Publish period in milliseconds
    #[serde(default = "default_sim_interval")]
    pub interval_ms: u64,

    /// Mean load per channel in Newtons
    #[serde(default = "default_base_force")]
    pub base_force: f64,

    /// Uniform noise amplitude in Newtons
    #[serde(default = "default_noise")]
    pub noise: f64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,

    /// Per-device mean load overrides
    #[serde(default)]
    pub overrides: HashMap<String, f64>,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(TowerError::Config(
                "simulation.interval_ms must be positive".into(),
            ));
        }
        if !self.base_force.is_finite() {
            return Err(TowerError::Config(format!(
                "simulation.base_force must be finite, got {}",
                self.base_force
            )));
        }
        if !self.noise.is_finite() || self.noise < 0.0 {
            return Err(TowerError::Config(format!(
                "simulation.noise must be a finite non-negative amplitude, got {}",
                self.noise
            )));
        }
        if let Some((device_id, force)) = self.overrides.iter().find(|(_, f)| !f.is_finite()) {
            return Err(TowerError::Config(format!(
                "simulation.overrides.{} must be finite, got {}",
                device_id, force
            )));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sim_interval(),
            base_force: default_base_force(),
            noise: default_noise(),
            seed: None,
            overrides: HashMap::new(),
        }
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_tick_ms() -> u64 { 1000 }
fn default_watchdog_factor() -> u32 { 2 }
fn default_true() -> bool { true }
fn default_actuator_path() -> String { "/api/light".to_string() }
fn default_actuator_timeout() -> u64 { 3000 }
fn default_sim_interval() -> u64 { 250 }
fn default_base_force() -> f64 { 1000.0 }
fn default_noise() -> f64 { 50.0 }
