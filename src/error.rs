use thiserror::Error;

/// Fatal configuration errors, raised at startup only.
///
/// Everything that can go wrong at runtime (stale sources, malformed
/// samples, numerical degradation) is handled in place and reflected as
/// staleness/degradation flags instead of errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid vehicle specs: {0}")]
    InvalidVehicleSpecs(String),

    #[error("invalid vendor signal table: {0}")]
    InvalidSignalTable(String),

    #[error("invalid kalman config: {0}")]
    InvalidKalmanConfig(String),

    #[error("invalid aggregator config: {0}")]
    InvalidAggregatorConfig(String),

    #[error("invalid dyno config: {0}")]
    InvalidDynoConfig(String),
}
