//! TOWERWATCH - Threshold alarm evaluation for load-cell tower stations
//!
//! Every tick the latest reading of each tower channel (north, east, south,
//! west) is pushed into a per-channel sample window, classified against the
//! tower's four thresholds and confirmed once enough consecutive samples
//! breach the same boundary. Confirmed alarms drive one indicator per tower.
//!
//! # Examples
//!
//! ```rust
//! use towerwatch::{AlarmTimes, Channel, DeviceAlarmConfig, Evaluator, ThresholdSet};
//!
//! let thresholds = ThresholdSet::new(200.0, 400.0, 1600.0, 2000.0)?;
//! let device = DeviceAlarmConfig::new("tower-1", thresholds, AlarmTimes::uniform(3));
//! let mut evaluator = Evaluator::new(vec![device]);
//!
//! for _ in 0..3 {
//!     evaluator.set_reading("tower-1", Channel::North, 2500.0);
//!     evaluator.tick(chrono::Utc::now());
//! }
//! assert_eq!(evaluator.active_alarms().count(), 1);
//! # Ok::<(), towerwatch::TowerError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type and result alias
pub mod error;

/// YAML configuration with validation
pub mod config;

/// Fixed-length sample windows
pub mod buffer;

/// Threshold classification
pub mod classify;

/// Window confirmation of candidate alarms
pub mod confirm;

/// Alarm state machine and per-channel store
pub mod alarms;

// ============================================================================
// RUNTIME MODULES
// ============================================================================

/// Latest-value store for incoming readings
pub mod readings;

/// Indicator actuators and dispatch
pub mod actuator;

/// Synchronous tick evaluation
pub mod evaluator;

/// Timer-driven runtime with watchdog
pub mod engine;

/// Synthetic reading feed
pub mod simulation;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use actuator::{create_actuator, Actuator, ActuatorCommand, HttpActuator, LogActuator};
pub use alarms::{list_active_alarms, AlarmEvent, AlarmState, AlarmStore, Transition};
pub use buffer::SampleBuffer;
pub use classify::{classify, AlarmClass, ThresholdSet};
pub use config::{AlarmTimes, Channel, Config, DeviceAlarmConfig};
pub use confirm::{evaluate, Evaluation};
pub use engine::{Engine, EngineStats};
pub use error::{Result, TowerError};
pub use evaluator::{Evaluator, TickReport};
pub use readings::{ReadingBus, Readings};
pub use simulation::SimulatedFeed;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Values captured by the build script
pub mod build_info {
    pub const BUILD_TIMESTAMP: &str = env!("TOWERWATCH_BUILD_TIMESTAMP");
    pub const TARGET: &str = env!("TOWERWATCH_TARGET");
    pub const PROFILE: &str = env!("TOWERWATCH_PROFILE");

    pub fn summary() -> String {
        format!(
            "towerwatch {} ({} {}, built {})",
            crate::VERSION,
            TARGET,
            PROFILE,
            BUILD_TIMESTAMP
        )
    }
}

/// Install the default tracing subscriber, `towerwatch=info` unless
/// `RUST_LOG` says otherwise
pub fn init() -> Result<()> {
    let directive = "towerwatch=info"
        .parse()
        .map_err(|e| TowerError::Config(format!("Invalid log directive: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| TowerError::Config(format!("Failed to initialise logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_installs_subscriber_once() {
        let _ = init();
        assert!(matches!(init(), Err(TowerError::Config(_))));
    }
}
