use serde::{Deserialize, Serialize};

use crate::config::{DynoConfig, STANDARD_AIR_DENSITY};
use crate::smoothing::SavGolFilter;
use crate::types::VehicleSpecs;

const GRAVITY_MPS2: f64 = 9.80665;
/// One mechanical horsepower is 550 ft·lb/s.
const WATTS_PER_HP: f64 = 745.699_872;
const LBFT_TO_NM: f64 = 1.355_818;

/// One dyno output sample.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DynoPoint {
    /// Crank-equivalent horsepower after drivetrain loss, weather
    /// correction, and calibration.
    pub horsepower: f64,
    /// Crank torque [N·m]; `None` without a live RPM reading.
    pub torque_nm: Option<f64>,
    pub accel_mps2: f64,
}

/// Inertial virtual dyno.
///
/// Power is inferred from the vehicle's longitudinal dynamics: the force
/// needed to accelerate the known mass plus aero drag plus rolling
/// resistance, times speed. Speed is Savitzky–Golay smoothed before
/// differentiation; differentiating the raw trace amplifies GPS and CAN
/// quantization noise into garbage acceleration.
pub struct VirtualDyno {
    specs: VehicleSpecs,
    config: DynoConfig,
    sample_period_s: f64,
    speed_filter: SavGolFilter,
}

impl VirtualDyno {
    pub fn new(specs: VehicleSpecs, config: DynoConfig, sample_period_s: f64) -> Self {
        let speed_filter = SavGolFilter::new(config.smoothing_window, config.smoothing_order);
        Self {
            specs,
            config,
            sample_period_s,
            speed_filter,
        }
    }

    /// Feed one speed sample at the fixed tick rate. Returns a point once
    /// the smoothing window has warmed up, and only while the vehicle is
    /// under positive load (coasting and braking are not a dyno pull).
    pub fn push(&mut self, speed_mps: f64, rpm: Option<f64>) -> Option<DynoPoint> {
        let point = self.speed_filter.push(speed_mps)?;
        let speed = point.value.max(0.0);
        let accel = point.derivative_per_sample / self.sample_period_s;
        if accel <= 0.0 {
            return None;
        }

        let drag = 0.5
            * self.config.air_density_kg_m3
            * self.specs.drag_coefficient
            * self.specs.frontal_area_m2
            * speed
            * speed;
        let rolling = self.specs.rolling_resistance_coef * self.specs.mass_kg * GRAVITY_MPS2;
        let force_n = self.specs.mass_kg * accel + drag + rolling;

        let wheel_watts = force_n * speed;
        let crank_watts = wheel_watts / (1.0 - self.specs.drivetrain_loss_fraction);
        let mut hp = crank_watts / WATTS_PER_HP;

        if self.config.weather_correction {
            // J1349-style rescale to standard air density.
            hp *= STANDARD_AIR_DENSITY / self.config.air_density_kg_m3;
        }
        hp *= self.config.calibration_factor;

        let torque_nm = rpm
            .filter(|r| *r > 100.0)
            .map(|r| torque_lbft(hp, r) * LBFT_TO_NM);

        Some(DynoPoint {
            horsepower: hp,
            torque_nm,
            accel_mps2: accel,
        })
    }

    pub fn reset(&mut self) {
        self.speed_filter.reset();
    }
}

/// `torque = HP * 5252 / rpm`. The HP and torque curves cross at
/// 5252 RPM by construction.
pub fn torque_lbft(horsepower: f64, rpm: f64) -> f64 {
    horsepower * 5252.0 / rpm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DrivetrainType;
    use approx::assert_relative_eq;

    fn specs() -> VehicleSpecs {
        VehicleSpecs {
            mass_kg: 1500.0,
            frontal_area_m2: 2.2,
            drag_coefficient: 0.32,
            rolling_resistance_coef: 0.015,
            drivetrain_loss_fraction: 0.15,
            drivetrain_type: DrivetrainType::Rwd,
        }
    }

    /// Constant-acceleration pull through the dyno; returns the last point.
    fn run_pull(dyno: &mut VirtualDyno, accel: f64, ticks: usize) -> Option<DynoPoint> {
        let mut last = None;
        for i in 0..ticks {
            let speed = 20.0 + accel * i as f64 * 0.01;
            if let Some(p) = dyno.push(speed, Some(5252.0)) {
                last = Some(p);
            }
        }
        last
    }

    #[test]
    fn test_known_pull_produces_plausible_power() {
        let mut dyno = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let point = run_pull(&mut dyno, 3.0, 100).expect("dyno point");
        assert_relative_eq!(point.accel_mps2, 3.0, epsilon = 0.05);

        // Hand computation at ~23 m/s, a = 3 m/s² lands near 180 crank HP.
        assert!(
            point.horsepower > 150.0 && point.horsepower < 250.0,
            "hp {}",
            point.horsepower
        );
    }

    #[test]
    fn test_calibration_factor_one_is_noop() {
        let mut base = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let explicit = DynoConfig {
            calibration_factor: 1.0,
            ..DynoConfig::default()
        };
        let mut calibrated = VirtualDyno::new(specs(), explicit, 0.01);
        let a = run_pull(&mut base, 2.5, 60).expect("point");
        let b = run_pull(&mut calibrated, 2.5, 60).expect("point");
        assert_relative_eq!(a.horsepower, b.horsepower, epsilon = 1e-12);
    }

    #[test]
    fn test_calibration_factor_scales_output() {
        let doubled = DynoConfig {
            calibration_factor: 2.0,
            ..DynoConfig::default()
        };
        let mut base = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let mut scaled = VirtualDyno::new(specs(), doubled, 0.01);
        let a = run_pull(&mut base, 2.5, 60).expect("point");
        let b = run_pull(&mut scaled, 2.5, 60).expect("point");
        assert_relative_eq!(b.horsepower, 2.0 * a.horsepower, epsilon = 1e-9);
    }

    #[test]
    fn test_hp_torque_curves_intersect_at_5252() {
        // torque(lb·ft) equals hp exactly at 5252 RPM, for any hp.
        for hp in [50.0, 173.4, 612.0] {
            assert_relative_eq!(torque_lbft(hp, 5252.0), hp, epsilon = 1e-9);
        }

        let mut dyno = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let point = run_pull(&mut dyno, 3.0, 100).expect("point");
        let torque = point.torque_nm.expect("torque");
        assert_relative_eq!(torque, point.horsepower * LBFT_TO_NM, epsilon = 1e-6);
    }

    #[test]
    fn test_coasting_produces_no_point() {
        let mut dyno = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let mut produced = false;
        for i in 0..60 {
            // Decelerating trace.
            let speed = 30.0 - i as f64 * 0.05;
            produced |= dyno.push(speed, None).is_some();
        }
        assert!(!produced);
    }

    #[test]
    fn test_weather_correction_rescales_to_standard() {
        // Thin air: same measured pull corrects upward.
        let thin = DynoConfig {
            air_density_kg_m3: 1.0,
            ..DynoConfig::default()
        };
        let mut standard = VirtualDyno::new(specs(), DynoConfig::default(), 0.01);
        let mut corrected = VirtualDyno::new(specs(), thin, 0.01);
        let a = run_pull(&mut standard, 2.5, 60).expect("point");
        let b = run_pull(&mut corrected, 2.5, 60).expect("point");
        assert!(b.horsepower > a.horsepower);
    }
}
