//! Derived physical metrics computed once per aggregator tick.
//!
//! Everything here is a pure function of the current snapshot and fused
//! state; nothing is authoritative across ticks beyond smoothing windows
//! and per-target ADAS history.

pub mod adas;
pub mod dyno;

use crate::can::canonical;
use crate::config::DynoConfig;
use crate::fusion::{AttitudeResult, KalmanState};
use crate::metrics::adas::{AdasTracker, VehiclePosition};
use crate::metrics::dyno::VirtualDyno;
use crate::types::{DerivedMetrics, SlipClass, TelemetrySnapshot, VehicleSpecs};

pub use adas::SeparationSolution;
pub use dyno::DynoPoint;

const MPH_TO_MPS: f64 = 0.44704;

/// Below this ground speed slip is undefined, not zero [m/s].
const SLIP_MIN_SPEED_MPS: f64 = 0.5;

/// `(driven - actual) / actual * 100`. `None` at or near a standstill,
/// never NaN or infinite.
pub fn wheel_slip_percent(driven_speed_mps: f64, actual_speed_mps: f64) -> Option<f64> {
    if actual_speed_mps < SLIP_MIN_SPEED_MPS {
        return None;
    }
    Some((driven_speed_mps - actual_speed_mps) / actual_speed_mps * 100.0)
}

pub fn classify_slip(slip_percent: f64) -> SlipClass {
    match slip_percent {
        s if s < 2.0 => SlipClass::LowTractionUse,
        s if s < 5.0 => SlipClass::OptimalLaunch,
        s if s < 15.0 => SlipClass::Excessive,
        _ => SlipClass::Severe,
    }
}

/// Per-tick metrics facade: wheel slip, virtual dyno, attitude-derived
/// angles, and ADAS separation against any registered targets.
pub struct MetricsEngine {
    dyno: VirtualDyno,
    adas: AdasTracker,
    targets: Vec<(u32, VehiclePosition)>,
}

impl MetricsEngine {
    pub fn new(specs: VehicleSpecs, dyno_config: DynoConfig, tick_period_s: f64) -> Self {
        Self {
            dyno: VirtualDyno::new(specs, dyno_config, tick_period_s),
            adas: AdasTracker::new(),
            targets: Vec::new(),
        }
    }

    /// Register or refresh a target vehicle position for ADAS tracking.
    /// Targets arrive from an external link; the engine only consumes them.
    pub fn report_target(&mut self, target_id: u32, position: VehiclePosition) {
        if let Some(slot) = self.targets.iter_mut().find(|(id, _)| *id == target_id) {
            slot.1 = position;
        } else {
            self.targets.push((target_id, position));
        }
    }

    pub fn compute(
        &mut self,
        snapshot: &TelemetrySnapshot,
        fused: &KalmanState,
        adas_fused: Option<&KalmanState>,
        attitude: Option<&AttitudeResult>,
    ) -> DerivedMetrics {
        let mut metrics = DerivedMetrics::default();

        // Ground truth speed: fused estimate, falling back to raw GPS.
        let actual_speed = match fused.phase {
            crate::fusion::FilterPhase::Running | crate::fusion::FilterPhase::DeadReckoning => {
                Some(fused.speed())
            }
            _ => snapshot.get(canonical::GPS_SPEED_MPS),
        };

        if let (Some(driven_mph), Some(actual)) =
            (snapshot.get(canonical::DRIVEN_WHEEL_SPEED_MPH), actual_speed)
        {
            metrics.wheel_slip_percent = wheel_slip_percent(driven_mph * MPH_TO_MPS, actual);
            metrics.wheel_slip_class = metrics.wheel_slip_percent.map(classify_slip);
        }

        if let Some(speed) = actual_speed {
            let rpm = snapshot.get(canonical::RPM);
            if let Some(point) = self.dyno.push(speed, rpm) {
                metrics.horsepower = Some(point.horsepower);
                metrics.torque_nm = point.torque_nm;
            }
        }

        if let Some(AttitudeResult::Valid(estimate)) = attitude {
            metrics.slip_angle_deg = estimate.slip_angle_deg;
            metrics.roll_deg = estimate.roll_deg;
            metrics.pitch_deg = estimate.pitch_deg;
        }

        // Nearest target drives the headline separation/TTC pair; all
        // targets stay independently tracked inside the AdasTracker. The
        // subject position comes from the position-accuracy-tuned filter
        // when one is running, never the smoothness-tuned primary.
        if !self.targets.is_empty() {
            let subject_state = adas_fused.unwrap_or(fused);
            let subject = VehiclePosition {
                lat: subject_state.position.0,
                lon: subject_state.position.1,
                alt_m: subject_state.position.2,
                timestamp_ns: snapshot.timestamp_ns,
            };
            let mut nearest: Option<SeparationSolution> = None;
            let targets = std::mem::take(&mut self.targets);
            for (id, target) in &targets {
                let sol = self.adas.update(*id, &subject, target);
                let closer = nearest
                    .map(|n| sol.separation_m < n.separation_m)
                    .unwrap_or(true);
                if closer {
                    nearest = Some(sol);
                }
            }
            self.targets = targets;
            if let Some(sol) = nearest {
                metrics.adas_separation_m = Some(sol.separation_m);
                metrics.adas_ttc_s = sol.ttc_s;
            }
        }

        metrics
    }

    /// Drop ADAS targets not refreshed since `cutoff_ns`.
    pub fn prune_targets(&mut self, cutoff_ns: u64) {
        self.targets.retain(|(_, p)| p.timestamp_ns >= cutoff_ns);
        self.adas.prune(cutoff_ns);
    }
}
