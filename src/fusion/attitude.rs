use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AttitudeConfig, BaselineOrientation};
use crate::fusion::ekf::latlon_to_meters;
use crate::types::{GpsFix, GpsSolution};

/// Attitude solved from one paired dual-antenna epoch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AttitudeEstimate {
    /// True heading of the antenna baseline [deg, 0..360).
    pub heading_deg: f64,
    /// Heading minus course over ground, wrapped to (-180, 180]. `None`
    /// below walking speed where course is noise.
    pub slip_angle_deg: Option<f64>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    /// Measured baseline length this epoch [m].
    pub baseline_m: f64,
    pub timestamp_ns: u64,
}

/// Output of one attitude update. `Degraded` carries the last good
/// estimate so consumers can hold it while knowing its age.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum AttitudeResult {
    Valid(AttitudeEstimate),
    Degraded {
        last_good: Option<AttitudeEstimate>,
        age_ns: u64,
    },
}

/// Course over ground below this speed is unreliable for slip angle [m/s].
const SLIP_MIN_SPEED_MPS: f64 = 2.0;

/// Measured baseline may deviate from the configured separation by this
/// fraction before the epoch is rejected as a multipath artifact.
const BASELINE_TOLERANCE: f64 = 0.15;

/// Dual-antenna GPS attitude: heading from the baseline bearing, slip angle
/// against course over ground, roll/pitch when the install gives the
/// baseline a usable vertical component.
pub struct DualAntennaAttitude {
    config: AttitudeConfig,
    last_good: Option<AttitudeEstimate>,
}

impl DualAntennaAttitude {
    pub fn new(config: AttitudeConfig) -> Self {
        Self {
            config,
            last_good: None,
        }
    }

    pub fn last_good(&self) -> Option<AttitudeEstimate> {
        self.last_good
    }

    /// Solve attitude from a time-paired primary/secondary fix.
    pub fn update(&mut self, primary: &GpsFix, secondary: &GpsFix) -> AttitudeResult {
        let now_ns = primary.timestamp_ns.max(secondary.timestamp_ns);

        if !self.solution_usable(primary) || !self.solution_usable(secondary) {
            debug!(
                "attitude degraded: solutions {:?}/{:?}, sats {}/{}",
                primary.solution, secondary.solution, primary.satellites, secondary.satellites
            );
            return self.degraded(now_ns);
        }

        // Baseline vector in local ENU meters, primary as origin.
        let (east, north) = latlon_to_meters(secondary.lat, secondary.lon, primary.lat, primary.lon);
        let up = secondary.alt_m - primary.alt_m;
        let horizontal = (east * east + north * north).sqrt();
        let baseline = (horizontal * horizontal + up * up).sqrt();

        let expected = self.config.antenna_separation_m;
        if (baseline - expected).abs() > expected * BASELINE_TOLERANCE {
            warn!(
                "attitude epoch rejected: baseline {:.3} m vs expected {:.3} m",
                baseline, expected
            );
            return self.degraded(now_ns);
        }

        let heading_deg = {
            let h = east.atan2(north).to_degrees();
            if h < 0.0 {
                h + 360.0
            } else {
                h
            }
        };

        let slip_angle_deg = if primary.speed_mps >= SLIP_MIN_SPEED_MPS {
            Some(wrap_half_turn(heading_deg - primary.heading_deg))
        } else {
            None
        };

        // Inclination needs a deliberate vertical baseline; a level install
        // has nothing to measure against. The baseline only resolves the
        // angle in its own plane: fore-aft mounts observe pitch, lateral
        // mounts observe roll, and the other axis stays `None`.
        let (roll_deg, pitch_deg) =
            if self.config.vertical_baseline_m.abs() >= self.config.min_vertical_baseline_m {
                let inclination = up.atan2(horizontal).to_degrees();
                match self.config.orientation {
                    BaselineOrientation::ForeAft => (None, Some(inclination)),
                    BaselineOrientation::Lateral => (Some(inclination), None),
                }
            } else {
                (None, None)
            };

        let estimate = AttitudeEstimate {
            heading_deg,
            slip_angle_deg,
            roll_deg,
            pitch_deg,
            baseline_m: baseline,
            timestamp_ns: now_ns,
        };
        self.last_good = Some(estimate);
        AttitudeResult::Valid(estimate)
    }

    fn solution_usable(&self, fix: &GpsFix) -> bool {
        matches!(fix.solution, GpsSolution::RtkFixed | GpsSolution::RtkFloat)
            && fix.satellites >= self.config.min_satellites
    }

    fn degraded(&self, now_ns: u64) -> AttitudeResult {
        let age_ns = self
            .last_good
            .map(|e| now_ns.saturating_sub(e.timestamp_ns))
            .unwrap_or(u64::MAX);
        AttitudeResult::Degraded {
            last_good: self.last_good,
            age_ns,
        }
    }
}

/// Wrap an angle in degrees to (-180, 180].
pub fn wrap_half_turn(mut deg: f64) -> f64 {
    while deg > 180.0 {
        deg -= 360.0;
    }
    while deg <= -180.0 {
        deg += 360.0;
    }
    deg
}
