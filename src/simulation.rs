// src/simulation.rs - Synthetic load feed for bench testing without towers
use crate::config::{Channel, Config, SimulationConfig};
use crate::readings::ReadingBus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

// ============================================================================
// LOAD GENERATOR
// ============================================================================

/// Noisy per-channel load generator
pub struct LoadGenerator {
    rng: StdRng,
    base_force: f64,
    noise: f64,
    overrides: HashMap<String, f64>,
}

impl LoadGenerator {
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            base_force: config.base_force,
            noise: config.noise,
            overrides: config.overrides.clone(),
        }
    }

    /// Mean load of a device
    pub fn base_for(&self, device_id: &str) -> f64 {
        self.overrides.get(device_id).copied().unwrap_or(self.base_force)
    }

    pub fn sample(&mut self, device_id: &str) -> f64 {
        let base = self.base_for(device_id);
        if self.noise > 0.0 {
            base + self.rng.gen_range(-self.noise..self.noise)
        } else {
            base
        }
    }

    /// One reading for every channel of a device
    pub fn frame(&mut self, device_id: &str) -> HashMap<Channel, f64> {
        Channel::ALL
            .iter()
            .map(|channel| (*channel, self.sample(device_id)))
            .collect()
    }
}

// ============================================================================
// FEED TASK
// ============================================================================

/// Publishes generated frames for every active device into a [`ReadingBus`]
pub struct SimulatedFeed {
    generator: LoadGenerator,
    devices: Vec<String>,
    bus: ReadingBus,
    period: Duration,
}

impl SimulatedFeed {
    pub fn new(config: &SimulationConfig, devices: Vec<String>, bus: ReadingBus) -> Self {
        Self {
            generator: LoadGenerator::new(config),
            devices,
            bus,
            period: Duration::from_millis(config.interval_ms),
        }
    }

    /// Feed for the devices of `config`, if a simulation section is present
    pub fn from_config(config: &Config, bus: ReadingBus) -> Option<Self> {
        let simulation = config.simulation.as_ref()?;
        let devices = config
            .active_devices()
            .map(|d| d.device_id.clone())
            .collect();
        Some(Self::new(simulation, devices, bus))
    }

    /// Publish one frame per device
    pub fn publish_once(&mut self) -> usize {
        let mut published = 0;
        for device_id in &self.devices {
            let frame = self.generator.frame(device_id);
            match self.bus.publish_frame(device_id, &frame) {
                Ok(()) => published += 1,
                Err(e) => warn!("Simulated frame for '{}' dropped: {}", device_id, e),
            }
        }
        debug!("Simulated {} frames", published);
        published
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        info!(
            "Simulating {} devices every {:?}",
            self.devices.len(),
            self.period
        );
        tokio::spawn(async move {
            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                self.publish_once();
            }
        })
    }
}
