use std::time::Duration;

use crate::error::ConfigError;

// ─── Kalman fusion engine ────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct KalmanConfig {
    // ── Filter construction ──
    pub imu_dt: f64,
    pub gps_pos_noise_std: f64,
    pub accel_noise_std: f64,
    pub gyro_noise_std: f64,

    // ── Initialization ──
    /// Stationary window required before leaving `Initializing` [s].
    pub init_window_secs: f64,
    /// GPS speed below this counts as stationary [m/s].
    pub init_max_gps_speed: f64,
    /// Accel-magnitude variance below this counts as stationary [(m/s²)²].
    pub init_max_accel_variance: f64,

    // ── Dropout / reacquisition ──
    /// GPS silence before transitioning to dead reckoning [s].
    pub gps_dropout_secs: f64,
    /// Largest position correction allowed on the fix that ends a dropout [m].
    pub max_reacquire_jump_m: f64,

    // ── Solution-quality weighting ──
    /// Measurement std multipliers; ordering RtkFixed < RtkFloat < Dgps <
    /// Sbas < None is the contract, the numbers are tunable.
    pub weight_rtk_fixed: f64,
    pub weight_rtk_float: f64,
    pub weight_dgps: f64,
    pub weight_sbas: f64,
    pub weight_none: f64,

    // ── Mounting geometry [m] ──
    pub antenna_to_imu_offset: (f64, f64, f64),
    pub imu_to_reference_offset: (f64, f64, f64),
    /// Adds a default vertical antenna offset for roof-mounted antennas.
    pub roof_mount: bool,
    /// Instantiate a second filter tuned for absolute position accuracy,
    /// consumed only by the ADAS calculations.
    pub adas_mode: bool,
}

/// Default vertical offset applied when `roof_mount` is set [m].
pub const ROOF_MOUNT_VERTICAL_OFFSET_M: f64 = 1.35;

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            imu_dt: 0.01,
            gps_pos_noise_std: 2.5,
            accel_noise_std: 0.3,
            gyro_noise_std: 0.005,
            init_window_secs: 30.0,
            init_max_gps_speed: 0.3,
            init_max_accel_variance: 0.05,
            gps_dropout_secs: 2.0,
            max_reacquire_jump_m: 15.0,
            weight_rtk_fixed: 0.02,
            weight_rtk_float: 0.2,
            weight_dgps: 0.5,
            weight_sbas: 0.7,
            weight_none: 1.0,
            antenna_to_imu_offset: (0.0, 0.0, 0.0),
            imu_to_reference_offset: (0.0, 0.0, 0.0),
            roof_mount: false,
            adas_mode: false,
        }
    }
}

impl KalmanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.imu_dt <= 0.0 {
            return Err(ConfigError::InvalidKalmanConfig(
                "imu_dt must be positive".into(),
            ));
        }
        if self.init_window_secs <= 0.0 || self.gps_dropout_secs <= 0.0 {
            return Err(ConfigError::InvalidKalmanConfig(
                "init window and dropout threshold must be positive".into(),
            ));
        }
        let weights = [
            self.weight_rtk_fixed,
            self.weight_rtk_float,
            self.weight_dgps,
            self.weight_sbas,
            self.weight_none,
        ];
        if weights.iter().any(|w| *w <= 0.0) {
            return Err(ConfigError::InvalidKalmanConfig(
                "solution weights must be positive".into(),
            ));
        }
        if weights.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidKalmanConfig(
                "solution weights must be strictly increasing from RtkFixed to None".into(),
            ));
        }
        Ok(())
    }

    /// Antenna-to-IMU lever arm with the roof-mount default folded in.
    pub fn effective_antenna_offset(&self) -> (f64, f64, f64) {
        let (x, y, z) = self.antenna_to_imu_offset;
        if self.roof_mount {
            (x, y, z + ROOF_MOUNT_VERTICAL_OFFSET_M)
        } else {
            (x, y, z)
        }
    }
}

// ─── Dual-antenna attitude ───────────────────────────────────────────────────

/// How the antenna baseline is mounted on the vehicle. A baseline only
/// measures inclination in its own plane: a fore-aft mount observes pitch,
/// a lateral mount observes roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaselineOrientation {
    ForeAft,
    Lateral,
}

#[derive(Clone, Debug)]
pub struct AttitudeConfig {
    /// Fixed physical separation between the two antennas [m].
    pub antenna_separation_m: f64,
    /// Vertical component of the antenna baseline [m]. Roll/pitch are
    /// reported only when this is at least `min_vertical_baseline_m`.
    pub vertical_baseline_m: f64,
    pub min_vertical_baseline_m: f64,
    pub orientation: BaselineOrientation,
    pub min_satellites: u8,
}

impl Default for AttitudeConfig {
    fn default() -> Self {
        Self {
            antenna_separation_m: 1.0,
            vertical_baseline_m: 0.0,
            min_vertical_baseline_m: 0.01,
            orientation: BaselineOrientation::ForeAft,
            min_satellites: 5,
        }
    }
}

// ─── Virtual dyno ────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct DynoConfig {
    /// Savitzky–Golay window length (odd, >= order + 2).
    pub smoothing_window: usize,
    /// Savitzky–Golay polynomial order.
    pub smoothing_order: usize,
    /// Multiplies final output; refined from a real dyno reference run.
    pub calibration_factor: f64,
    /// Measured ambient air density [kg/m³]; standard is 1.225.
    pub air_density_kg_m3: f64,
    /// Apply SAE J1349-style correction to standard conditions.
    pub weather_correction: bool,
}

/// Dry air density at SAE J1349 standard conditions [kg/m³].
pub const STANDARD_AIR_DENSITY: f64 = 1.225;

impl Default for DynoConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 11,
            smoothing_order: 2,
            calibration_factor: 1.0,
            air_density_kg_m3: STANDARD_AIR_DENSITY,
            weather_correction: true,
        }
    }
}

impl DynoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_window % 2 == 0 || self.smoothing_window < self.smoothing_order + 2 {
            return Err(ConfigError::InvalidDynoConfig(format!(
                "smoothing window {} must be odd and exceed order {} by at least 2",
                self.smoothing_window, self.smoothing_order
            )));
        }
        if self.calibration_factor <= 0.0 || self.air_density_kg_m3 <= 0.0 {
            return Err(ConfigError::InvalidDynoConfig(
                "calibration factor and air density must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Fixed tick period; default 10 ms (100 Hz).
    pub tick_period: Duration,
    /// Per-source staleness thresholds.
    pub can_stale_after: Duration,
    pub gps_stale_after: Duration,
    pub imu_stale_after: Duration,
    /// Bounded queue depth between each reader thread and the aggregator.
    pub queue_depth: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(10),
            can_stale_after: Duration::from_millis(500),
            gps_stale_after: Duration::from_secs(2),
            imu_stale_after: Duration::from_millis(100),
            queue_depth: 256,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::InvalidAggregatorConfig(
                "tick period must be non-zero".into(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidAggregatorConfig(
                "queue depth must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
