use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which physical CAN interface a frame arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanChannel {
    Can0,
    Can1,
}

/// A single raw CAN frame as delivered by the bus driver.
///
/// Immutable: created by the reader thread, consumed once by the decoder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CanFrame {
    /// 11-bit standard or 29-bit extended identifier.
    pub id: u32,
    pub data: [u8; 8],
    /// Data Length Code: number of valid bytes in `data`.
    pub dlc: u8,
    pub channel: CanChannel,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

/// GPS solution quality, ordered worst to best.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GpsSolution {
    None,
    Sbas,
    Dgps,
    RtkFloat,
    RtkFixed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub satellites: u8,
    pub hdop: f64,
    pub solution: GpsSolution,
    pub timestamp_ns: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImuSample {
    /// Body-frame specific force [m/s²].
    pub accel: (f64, f64, f64),
    /// Body-frame angular rate [rad/s].
    pub gyro: (f64, f64, f64),
    /// Optional magnetometer reading [µT].
    pub mag: Option<(f64, f64, f64)>,
    pub timestamp_ns: u64,
}

/// Identifies a telemetry source for the snapshot contribution mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceId {
    Can0 = 0,
    Can1 = 1,
    Gps = 2,
    GpsSecondary = 3,
    Imu = 4,
}

/// Bitset of sources that contributed fresh data this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMask(pub u8);

impl SourceMask {
    pub fn set(&mut self, source: SourceId) {
        self.0 |= 1 << source as u8;
    }

    pub fn contains(&self, source: SourceId) -> bool {
        self.0 & (1 << source as u8) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One consistent view of all telemetry as of a single aggregator tick.
///
/// Keys in `signals` are always canonical names (see `can::signals`);
/// vendor aliases are resolved once, at decode time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp_ns: u64,
    pub signals: HashMap<String, f64>,
    /// Sources that produced fresh data this tick.
    pub source_mask: SourceMask,
    /// Sources whose last reading is older than their staleness threshold.
    pub stale_mask: SourceMask,
}

impl TelemetrySnapshot {
    pub fn new(timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            signals: HashMap::new(),
            source_mask: SourceMask::default(),
            stale_mask: SourceMask::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.signals.get(name).copied()
    }
}

/// Wheel-slip classification bands (see `metrics::classify_slip`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlipClass {
    /// < 2 %: low traction use
    LowTractionUse,
    /// 2–5 %: optimal launch
    OptimalLaunch,
    /// 5–15 %: excessive
    Excessive,
    /// > 15 %: severe, reduce throttle
    Severe,
}

/// Metrics derived every tick from the snapshot and fused state.
///
/// Never persisted as authoritative state; always recomputable from inputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub wheel_slip_percent: Option<f64>,
    pub wheel_slip_class: Option<SlipClass>,
    pub horsepower: Option<f64>,
    pub torque_nm: Option<f64>,
    pub slip_angle_deg: Option<f64>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub adas_separation_m: Option<f64>,
    pub adas_ttc_s: Option<f64>,
}

/// Drivetrain layout, used to pick default loss fractions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrivetrainType {
    Rwd,
    Fwd,
    Awd,
}

/// Static vehicle parameters for the virtual dyno. Validated at startup.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VehicleSpecs {
    pub mass_kg: f64,
    pub frontal_area_m2: f64,
    pub drag_coefficient: f64,
    pub rolling_resistance_coef: f64,
    /// Fraction of crank power lost through the drivetrain, in [0, 0.3].
    pub drivetrain_loss_fraction: f64,
    pub drivetrain_type: DrivetrainType,
}

impl VehicleSpecs {
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;
        if self.mass_kg <= 0.0
            || self.frontal_area_m2 <= 0.0
            || self.drag_coefficient <= 0.0
            || self.rolling_resistance_coef <= 0.0
        {
            return Err(ConfigError::InvalidVehicleSpecs(
                "all physical parameters must be positive".into(),
            ));
        }
        if !(0.0..=0.3).contains(&self.drivetrain_loss_fraction) {
            return Err(ConfigError::InvalidVehicleSpecs(format!(
                "drivetrain_loss_fraction {} outside [0, 0.3]",
                self.drivetrain_loss_fraction
            )));
        }
        Ok(())
    }
}
