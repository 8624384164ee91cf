//! Real-time telemetry acquisition and sensor fusion for in-vehicle
//! racing and tuning hardware.
//!
//! Heterogeneous sensor streams (vendor CAN traffic, single or dual
//! antenna GPS, IMU) are read by per-source threads, decoded into a
//! canonical signal vocabulary, fused by a phased GPS/IMU Kalman filter,
//! and published as one consistent [`types::TelemetrySnapshot`] plus
//! [`types::DerivedMetrics`] per fixed-rate aggregator tick.

pub mod aggregator;
pub mod can;
pub mod config;
pub mod error;
pub mod fusion;
pub mod gps;
pub mod health;
pub mod imu;
pub mod metrics;
pub mod smoothing;
pub mod sources;
pub mod types;

pub use aggregator::{Aggregator, AggregatorSettings, SnapshotSubscriber};
pub use error::ConfigError;
pub use types::{DerivedMetrics, TelemetrySnapshot};
