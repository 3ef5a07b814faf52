use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum TowerError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Transport failure talking to a device
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The device rejected or failed an actuator command
    #[error("Actuator error on device '{device_id}': {reason}")]
    Actuator { device_id: String, reason: String },

    /// Reading that cannot be evaluated (NaN or infinite)
    #[error("Invalid reading for {device_id}/{channel}: {value}")]
    InvalidReading { device_id: String, channel: String, value: f64 },

    /// Requested device has no configuration
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Convenient alias over [`Result`] using [`TowerError`]
pub type Result<T> = std::result::Result<T, TowerError>;
