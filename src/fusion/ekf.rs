use log::{debug, info, warn};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use ndarray::{arr1, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::KalmanConfig;
use crate::imu::{mean_bias, StationaryDetector};
use crate::types::{GpsFix, GpsSolution, ImuSample};

const G: f64 = 9.81; // Earth gravity (m/s²)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// State dimension: position (3) + velocity (3) + quaternion (4).
const DIM: usize = 10;

/// First GPS speed that allows yaw alignment from course-over-ground [m/s].
const HEADING_ALIGN_MIN_SPEED: f64 = 3.0;

/// Samples in the stationary-variance window (~1 s at 100 Hz).
const STATIONARY_WINDOW: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPhase {
    Uninitialized,
    Initializing,
    Running,
    DeadReckoning,
}

/// Read-only projection of the filter, copied out every call.
/// The internal state is never shared across threads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KalmanState {
    /// Geodetic position (lat deg, lon deg, alt m).
    pub position: (f64, f64, f64),
    /// ENU velocity [m/s].
    pub velocity: (f64, f64, f64),
    /// Attitude (roll, pitch, yaw) [rad].
    pub attitude: (f64, f64, f64),
    pub covariance_trace: f64,
    /// Trace growth per second; nonzero growth while dead reckoning tells
    /// consumers how fast position uncertainty is inflating.
    pub covariance_growth_rate: f64,
    pub phase: FilterPhase,
    pub gps_updates: u64,
    pub imu_updates: u64,
}

impl KalmanState {
    pub fn speed(&self) -> f64 {
        let (vx, vy, vz) = self.velocity;
        (vx * vx + vy * vy + vz * vz).sqrt()
    }
}

/// GPS/IMU fusion filter with explicit lifecycle phases.
///
/// `Uninitialized → Initializing → Running ⇄ DeadReckoning`. State layout
/// and covariance handling follow the quaternion-INS pattern: positions and
/// velocities in a local ENU frame anchored at the first GPS fix, attitude
/// as a unit quaternion, Joseph-form measurement updates, symmetrization
/// after every covariance write.
struct InsFilter {
    config: KalmanConfig,
    state: Array1<f64>,
    covariance: Array2<f64>,
    process_noise_unit: Array2<f64>,

    origin: Option<(f64, f64, f64)>,
    gravity_bias: (f64, f64, f64),
    gyro_bias: (f64, f64, f64),
    heading_initialized: bool,

    phase: FilterPhase,
    init_window_start_ns: Option<u64>,
    init_samples: Vec<ImuSample>,
    stationary: StationaryDetector,
    last_gps_speed: f64,

    last_event_ns: Option<u64>,
    last_imu_ns: Option<u64>,
    last_gps_ns: Option<u64>,

    prev_trace: f64,
    growth_rate: f64,

    gps_updates: u64,
    imu_updates: u64,
}

impl InsFilter {
    fn new(config: KalmanConfig) -> Self {
        let mut state = Array1::<f64>::zeros(DIM);
        state[6] = 1.0; // identity quaternion

        let mut covariance = Array2::<f64>::zeros((DIM, DIM));
        let diag = [100.0, 100.0, 100.0, 10.0, 10.0, 10.0, 1.0, 1.0, 1.0, 1.0];
        for (i, &v) in diag.iter().enumerate() {
            covariance[[i, i]] = v;
        }

        // Per-second process noise; scaled by dt in predict.
        let accel_var = config.accel_noise_std * config.accel_noise_std;
        let gyro_var = config.gyro_noise_std * config.gyro_noise_std;
        let mut q = Array2::<f64>::zeros((DIM, DIM));
        for i in 0..3 {
            q[[i, i]] = 0.25 * accel_var;
        }
        for i in 3..6 {
            q[[i, i]] = accel_var;
        }
        for i in 6..10 {
            q[[i, i]] = gyro_var;
        }

        Self {
            config,
            state,
            covariance,
            process_noise_unit: q,
            origin: None,
            gravity_bias: (0.0, 0.0, G),
            gyro_bias: (0.0, 0.0, 0.0),
            heading_initialized: false,
            phase: FilterPhase::Uninitialized,
            init_window_start_ns: None,
            init_samples: Vec::with_capacity(4096),
            stationary: StationaryDetector::new(STATIONARY_WINDOW),
            last_gps_speed: 0.0,
            last_event_ns: None,
            last_imu_ns: None,
            last_gps_ns: None,
            prev_trace: 0.0,
            growth_rate: 0.0,
            gps_updates: 0,
            imu_updates: 0,
        }
    }

    fn reset(&mut self) {
        warn!("kalman filter reset to Uninitialized");
        *self = Self::new(self.config.clone());
    }

    // ── Ordering ─────────────────────────────────────────────────────────

    /// Timestamps must be non-decreasing across consecutive predict/update
    /// calls; out-of-order samples are discarded, never integrated.
    fn accept_timestamp(&mut self, timestamp_ns: u64) -> bool {
        if let Some(last) = self.last_event_ns {
            if timestamp_ns < last {
                warn!(
                    "discarding out-of-order sample: {} ns < {} ns",
                    timestamp_ns, last
                );
                return false;
            }
        }
        self.last_event_ns = Some(timestamp_ns);
        true
    }

    // ── Initialization ───────────────────────────────────────────────────

    fn feed_init(&mut self, imu: &ImuSample) {
        if self.phase == FilterPhase::Uninitialized {
            self.phase = FilterPhase::Initializing;
            self.init_window_start_ns = Some(imu.timestamp_ns);
            info!("kalman init window started");
        }

        self.stationary.push(imu);
        self.init_samples.push(*imu);

        let moving = self.last_gps_speed > self.config.init_max_gps_speed
            || self
                .stationary
                .variance()
                .map(|v| v > self.config.init_max_accel_variance)
                .unwrap_or(false);

        if moving {
            // The full window must be stationary; motion restarts it.
            debug!("motion during init window, restarting stationary timer");
            self.init_window_start_ns = Some(imu.timestamp_ns);
            self.init_samples.clear();
            self.stationary.reset();
            return;
        }

        let start = match self.init_window_start_ns {
            Some(s) => s,
            None => return,
        };
        let elapsed_s = (imu.timestamp_ns.saturating_sub(start)) as f64 * 1e-9;
        if elapsed_s >= self.config.init_window_secs {
            self.complete_initialization();
        }
    }

    fn complete_initialization(&mut self) {
        let (gravity, gyro) = mean_bias(&self.init_samples);
        self.gyro_bias = gyro;

        // Gravity-aligned initial attitude: roll/pitch from the mean accel
        // direction, yaw left at zero until GPS course aligns it.
        let (ax, ay, az) = gravity;
        let roll = ay.atan2(az);
        let pitch = (-ax).atan2((ay * ay + az * az).sqrt());
        let q = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        self.set_quaternion(q);

        // The stationary mean captures gravity plus accel bias together;
        // predict subtracts it wholesale from the body-frame reading.
        self.gravity_bias = gravity;

        for i in 3..6 {
            self.state[i] = 0.0;
        }
        self.init_samples.clear();
        self.init_samples.shrink_to_fit();
        self.phase = FilterPhase::Running;
        info!(
            "kalman initialized: gyro bias ({:.4}, {:.4}, {:.4}) rad/s, roll {:.2}° pitch {:.2}°",
            gyro.0,
            gyro.1,
            gyro.2,
            roll.to_degrees(),
            pitch.to_degrees()
        );
    }

    // ── Predict ──────────────────────────────────────────────────────────

    fn predict(&mut self, imu: &ImuSample) {
        let dt = match self.last_imu_ns {
            Some(last) => ((imu.timestamp_ns.saturating_sub(last)) as f64 * 1e-9).clamp(1e-4, 0.1),
            None => self.config.imu_dt,
        };
        self.last_imu_ns = Some(imu.timestamp_ns);

        // Gyro integration with bias correction.
        let w = Vector3::new(
            imu.gyro.0 - self.gyro_bias.0,
            imu.gyro.1 - self.gyro_bias.1,
            imu.gyro.2 - self.gyro_bias.2,
        );
        let q = self.quaternion();
        let q_new = if w.norm() > 1e-8 {
            let dq = UnitQuaternion::from_scaled_axis(w * dt);
            q * dq
        } else {
            q
        };
        self.set_quaternion(q_new);

        // Specific force: subtract the calibrated gravity-inclusive bias in
        // the body frame, rotate the remainder into the navigation frame.
        let f_body = Vector3::new(
            imu.accel.0 - self.gravity_bias.0,
            imu.accel.1 - self.gravity_bias.1,
            imu.accel.2 - self.gravity_bias.2,
        );
        let a_nav = q_new * f_body;

        for i in 0..3 {
            self.state[3 + i] += a_nav[i] * dt;
        }
        for i in 0..3 {
            self.state[i] += self.state[3 + i] * dt;
        }

        // F: position driven by velocity; covariance grows monotonically
        // between updates.
        let mut f = Array2::<f64>::eye(DIM);
        f[[0, 3]] = dt;
        f[[1, 4]] = dt;
        f[[2, 5]] = dt;

        let fp = f.dot(&self.covariance);
        self.covariance = fp.dot(&f.t()) + &(&self.process_noise_unit * dt);
        self.symmetrize();

        let trace = self.trace();
        self.growth_rate = if dt > 0.0 { (trace - self.prev_trace) / dt } else { 0.0 };
        self.prev_trace = trace;
        self.imu_updates += 1;

        if !trace.is_finite() {
            self.reset();
            return;
        }

        // Dropout detection against the IMU clock.
        if self.phase == FilterPhase::Running {
            if let Some(gps_ns) = self.last_gps_ns {
                let gap_s = imu.timestamp_ns.saturating_sub(gps_ns) as f64 * 1e-9;
                if gap_s > self.config.gps_dropout_secs {
                    warn!(
                        "GPS silent for {:.1} s, entering dead reckoning (cov growth {:.3}/s)",
                        gap_s, self.growth_rate
                    );
                    self.phase = FilterPhase::DeadReckoning;
                }
            }
        }
    }

    // ── GPS update ───────────────────────────────────────────────────────

    fn solution_weight(&self, solution: GpsSolution) -> f64 {
        match solution {
            GpsSolution::RtkFixed => self.config.weight_rtk_fixed,
            GpsSolution::RtkFloat => self.config.weight_rtk_float,
            GpsSolution::Dgps => self.config.weight_dgps,
            GpsSolution::Sbas => self.config.weight_sbas,
            GpsSolution::None => self.config.weight_none,
        }
    }

    fn update_gps(&mut self, fix: &GpsFix) {
        self.last_gps_speed = fix.speed_mps;

        let recovering = self.phase == FilterPhase::DeadReckoning;
        self.last_gps_ns = Some(fix.timestamp_ns);

        let origin = match self.origin {
            Some(o) => o,
            None => {
                // Cold start: first fix anchors the local frame.
                self.origin = Some((fix.lat, fix.lon, fix.alt_m));
                for i in 0..3 {
                    self.state[i] = 0.0;
                }
                self.gps_updates += 1;
                info!("local frame origin set at ({:.6}, {:.6})", fix.lat, fix.lon);
                return;
            }
        };

        // Yaw alignment from the first confidently moving fix.
        if !self.heading_initialized && fix.speed_mps > HEADING_ALIGN_MIN_SPEED {
            let yaw = (90.0 - fix.heading_deg).to_radians();
            let q = self.quaternion();
            let (roll, pitch, _) = q.euler_angles();
            self.set_quaternion(UnitQuaternion::from_euler_angles(roll, pitch, yaw));
            self.heading_initialized = true;
            info!("heading aligned to GPS course {:.1}°", fix.heading_deg);
        }

        // Antenna measurement moved to the reference point via lever arms.
        let (ox, oy, oz) = origin;
        let (mut mx, my_m) = latlon_to_meters(fix.lat, fix.lon, ox, oy);
        let mut my = my_m;
        let mut mz = fix.alt_m - oz;
        let lever = self.total_lever_arm();
        let lever_nav = self.quaternion() * lever;
        mx -= lever_nav.x;
        my -= lever_nav.y;
        mz -= lever_nav.z;

        let mut innovation = arr1(&[
            mx - self.state[0],
            my - self.state[1],
            mz - self.state[2],
        ]);

        // Reacquisition after dead reckoning may pull harder than a routine
        // fix, but never beyond the configured jump bound.
        let max_jump = if recovering {
            self.config.max_reacquire_jump_m
        } else {
            self.config.max_reacquire_jump_m * 0.25
        };
        let innov_norm = innovation.iter().map(|v| v * v).sum::<f64>().sqrt();
        if innov_norm > max_jump && innov_norm > 1e-9 {
            let scale = max_jump / innov_norm;
            innovation.mapv_inplace(|v| v * scale);
        }

        // Measurement noise from HDOP and solution quality. Ordering
        // RtkFixed < RtkFloat < DGPS < SBAS < None is the contract.
        let std = (fix.hdop.max(0.5)) * self.config.gps_pos_noise_std * self.solution_weight(fix.solution);
        let var = (std * std).max(1e-4);

        let mut h = Array2::<f64>::zeros((3, DIM));
        for i in 0..3 {
            h[[i, i]] = 1.0;
        }
        let mut r = Array2::<f64>::eye(3);
        for i in 0..3 {
            r[[i, i]] = var;
        }
        if !self.kalman_correct(&h, &innovation, &r) {
            return;
        }

        // Velocity correction from speed over ground + course.
        if fix.speed_mps.is_finite() {
            let bearing = fix.heading_deg.to_radians();
            let v_meas = arr1(&[
                fix.speed_mps * bearing.sin() - self.state[3],
                fix.speed_mps * bearing.cos() - self.state[4],
                0.0 - self.state[5],
            ]);
            let mut hv = Array2::<f64>::zeros((3, DIM));
            hv[[0, 3]] = 1.0;
            hv[[1, 4]] = 1.0;
            hv[[2, 5]] = 1.0;
            let mut rv = Array2::<f64>::eye(3);
            let vel_var = (var * 0.5).max(1e-4);
            for i in 0..3 {
                rv[[i, i]] = vel_var;
            }
            if !self.kalman_correct(&hv, &v_meas, &rv) {
                return;
            }
        }

        self.gps_updates += 1;
        self.prev_trace = self.trace();

        if recovering {
            info!("GPS reacquired, leaving dead reckoning");
        }
        if matches!(self.phase, FilterPhase::DeadReckoning) {
            self.phase = FilterPhase::Running;
        }
    }

    /// Joseph-form measurement update. Returns false after a reset caused
    /// by a singular innovation covariance.
    fn kalman_correct(&mut self, h: &Array2<f64>, innovation: &Array1<f64>, r: &Array2<f64>) -> bool {
        let h_t = h.t();
        let s = h.dot(&self.covariance).dot(&h_t) + r;

        let s_mat = Matrix3::new(
            s[[0, 0]], s[[0, 1]], s[[0, 2]],
            s[[1, 0]], s[[1, 1]], s[[1, 2]],
            s[[2, 0]], s[[2, 1]], s[[2, 2]],
        );
        let Some(inv) = s_mat.try_inverse() else {
            // Numerical failure is recovered by re-initializing, never by
            // panicking or propagating NaNs.
            self.reset();
            return false;
        };
        let mut s_inv = Array2::<f64>::zeros((3, 3));
        for row in 0..3 {
            for col in 0..3 {
                s_inv[[row, col]] = inv[(row, col)];
            }
        }

        let k = self.covariance.dot(&h_t).dot(&s_inv);
        let dx = k.dot(innovation);
        for i in 0..DIM {
            self.state[i] += dx[i];
        }
        self.normalize_quaternion();

        let i_mat = Array2::<f64>::eye(DIM);
        let i_minus_kh = &i_mat - &k.dot(h);
        let term1 = i_minus_kh.dot(&self.covariance).dot(&i_minus_kh.t());
        let term2 = k.dot(r).dot(&k.t());
        self.covariance = term1 + term2;
        self.symmetrize();

        if !self.trace().is_finite() {
            self.reset();
            return false;
        }
        true
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn total_lever_arm(&self) -> Vector3<f64> {
        let (ax, ay, az) = self.config.effective_antenna_offset();
        let (rx, ry, rz) = self.config.imu_to_reference_offset;
        Vector3::new(ax + rx, ay + ry, az + rz)
    }

    fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(Quaternion::new(
            self.state[6],
            self.state[7],
            self.state[8],
            self.state[9],
        ))
    }

    fn set_quaternion(&mut self, q: UnitQuaternion<f64>) {
        self.state[6] = q.w;
        self.state[7] = q.i;
        self.state[8] = q.j;
        self.state[9] = q.k;
    }

    fn normalize_quaternion(&mut self) {
        let norm = (self.state[6] * self.state[6]
            + self.state[7] * self.state[7]
            + self.state[8] * self.state[8]
            + self.state[9] * self.state[9])
            .sqrt();
        if norm > 1e-9 {
            for i in 6..10 {
                self.state[i] /= norm;
            }
        } else {
            self.state[6] = 1.0;
            for i in 7..10 {
                self.state[i] = 0.0;
            }
        }
    }

    fn symmetrize(&mut self) {
        let p_t = self.covariance.t().to_owned();
        self.covariance = (&self.covariance + &p_t) / 2.0;
    }

    fn trace(&self) -> f64 {
        (0..DIM).map(|i| self.covariance[[i, i]]).sum()
    }

    fn snapshot(&self) -> KalmanState {
        let position = match self.origin {
            Some((olat, olon, oalt)) => {
                let (lat, lon) = meters_to_latlon(self.state[0], self.state[1], olat, olon);
                (lat, lon, oalt + self.state[2])
            }
            None => (0.0, 0.0, 0.0),
        };
        let (roll, pitch, yaw) = self.quaternion().euler_angles();
        KalmanState {
            position,
            velocity: (self.state[3], self.state[4], self.state[5]),
            attitude: (roll, pitch, yaw),
            covariance_trace: self.trace(),
            covariance_growth_rate: self.growth_rate,
            phase: self.phase,
            gps_updates: self.gps_updates,
            imu_updates: self.imu_updates,
        }
    }

    fn step(&mut self, gps: Option<&GpsFix>, imu: Option<&ImuSample>) {
        // Feed the older sample first so the engine clock stays monotonic.
        let gps_first = match (gps, imu) {
            (Some(g), Some(i)) => g.timestamp_ns <= i.timestamp_ns,
            _ => true,
        };

        let apply_gps = |this: &mut Self, fix: &GpsFix| {
            if !this.accept_timestamp(fix.timestamp_ns) {
                return;
            }
            match this.phase {
                FilterPhase::Uninitialized | FilterPhase::Initializing => {
                    this.last_gps_speed = fix.speed_mps;
                    this.last_gps_ns = Some(fix.timestamp_ns);
                    if this.origin.is_none() {
                        this.origin = Some((fix.lat, fix.lon, fix.alt_m));
                        info!("local frame origin set at ({:.6}, {:.6})", fix.lat, fix.lon);
                    }
                }
                FilterPhase::Running | FilterPhase::DeadReckoning => this.update_gps(fix),
            }
        };
        let apply_imu = |this: &mut Self, sample: &ImuSample| {
            if !this.accept_timestamp(sample.timestamp_ns) {
                return;
            }
            match this.phase {
                FilterPhase::Uninitialized | FilterPhase::Initializing => this.feed_init(sample),
                FilterPhase::Running | FilterPhase::DeadReckoning => this.predict(sample),
            }
        };

        if gps_first {
            if let Some(fix) = gps {
                apply_gps(self, fix);
            }
            if let Some(sample) = imu {
                apply_imu(self, sample);
            }
        } else {
            if let Some(sample) = imu {
                apply_imu(self, sample);
            }
            if let Some(fix) = gps {
                apply_gps(self, fix);
            }
        }
    }
}

/// Public fusion engine: one smoothing-tuned primary filter, plus an
/// optional second filter tuned for absolute position accuracy when
/// `adas_mode` is set. The two never share mutable state.
pub struct KalmanEngine {
    primary: InsFilter,
    adas: Option<InsFilter>,
}

impl KalmanEngine {
    pub fn new(config: KalmanConfig) -> Self {
        let adas = if config.adas_mode {
            let mut adas_config = config.clone();
            // Position accuracy over smoothness: trust GPS position harder,
            // model less inertial confidence.
            adas_config.gps_pos_noise_std = (config.gps_pos_noise_std * 0.5).max(0.5);
            adas_config.accel_noise_std = config.accel_noise_std * 2.0;
            Some(InsFilter::new(adas_config))
        } else {
            None
        };
        Self {
            primary: InsFilter::new(config),
            adas,
        }
    }

    /// Feed whatever arrived this tick; returns the primary state.
    pub fn update(&mut self, gps: Option<&GpsFix>, imu: Option<&ImuSample>) -> KalmanState {
        self.primary.step(gps, imu);
        if let Some(adas) = self.adas.as_mut() {
            adas.step(gps, imu);
        }
        self.primary.snapshot()
    }

    pub fn state(&self) -> KalmanState {
        self.primary.snapshot()
    }

    /// Position-accuracy-tuned state for ADAS separation math. `None`
    /// unless the engine was built with `adas_mode`.
    pub fn adas_state(&self) -> Option<KalmanState> {
        self.adas.as_ref().map(|f| f.snapshot())
    }
}

/// Convert lat/lon to local ENU meters relative to origin.
pub fn latlon_to_meters(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    let x = EARTH_RADIUS_M * d_lon * origin_lat.to_radians().cos();
    let y = EARTH_RADIUS_M * d_lat;
    (x, y)
}

/// Inverse of `latlon_to_meters`.
pub fn meters_to_latlon(x: f64, y: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = y / EARTH_RADIUS_M;
    let d_lon = x / (EARTH_RADIUS_M * origin_lat.to_radians().cos());
    (origin_lat + d_lat.to_degrees(), origin_lon + d_lon.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsSolution;

    const NS: u64 = 1_000_000_000;

    fn quiet_imu(t_ns: u64) -> ImuSample {
        ImuSample {
            accel: (0.0, 0.0, G),
            gyro: (0.0, 0.0, 0.0),
            mag: None,
            timestamp_ns: t_ns,
        }
    }

    fn fix(t_ns: u64, lat: f64, lon: f64, speed: f64) -> GpsFix {
        GpsFix {
            lat,
            lon,
            alt_m: 100.0,
            speed_mps: speed,
            heading_deg: 90.0,
            satellites: 12,
            hdop: 0.8,
            solution: GpsSolution::RtkFixed,
            timestamp_ns: t_ns,
        }
    }

    fn fast_config() -> KalmanConfig {
        let mut cfg = KalmanConfig::default();
        cfg.init_window_secs = 2.0;
        cfg
    }

    /// Run a stationary stream (100 Hz IMU, 1 Hz GPS) through initialization.
    fn initialize(engine: &mut KalmanEngine, seconds: u64) -> u64 {
        let mut t = NS;
        for i in 0..(seconds * 100) {
            let gps = if i % 100 == 0 {
                Some(fix(t, 40.0, -105.0, 0.0))
            } else {
                None
            };
            engine.update(gps.as_ref(), Some(&quiet_imu(t)));
            t += NS / 100;
        }
        t
    }

    #[test]
    fn test_stationary_stream_reaches_running() {
        let mut engine = KalmanEngine::new(fast_config());
        assert_eq!(engine.state().phase, FilterPhase::Uninitialized);
        initialize(&mut engine, 4);
        let state = engine.state();
        assert_eq!(state.phase, FilterPhase::Running);
        assert!(state.speed() < 0.1, "stationary speed was {}", state.speed());
    }

    #[test]
    fn test_motion_restarts_init_window() {
        let mut engine = KalmanEngine::new(fast_config());
        let mut t = NS;
        // 1.5 s stationary, then a moving GPS fix mid-window.
        for _ in 0..150 {
            engine.update(None, Some(&quiet_imu(t)));
            t += NS / 100;
        }
        // Moving fix plus one IMU sample restarts the stationary window.
        engine.update(Some(&fix(t, 40.0, -105.0, 5.0)), Some(&quiet_imu(t)));
        t += NS / 100;
        engine.update(Some(&fix(t, 40.0, -105.0, 0.0)), None);
        // 1 s more of stationary data: window restarted, still initializing.
        for _ in 0..100 {
            engine.update(None, Some(&quiet_imu(t)));
            t += NS / 100;
        }
        assert_eq!(engine.state().phase, FilterPhase::Initializing);
    }

    #[test]
    fn test_dropout_and_reacquire() {
        let mut engine = KalmanEngine::new(fast_config());
        let mut t = initialize(&mut engine, 4);
        assert_eq!(engine.state().phase, FilterPhase::Running);

        // 3 s with no GPS: past the 2 s dropout threshold.
        for _ in 0..300 {
            engine.update(None, Some(&quiet_imu(t)));
            t += NS / 100;
        }
        assert_eq!(engine.state().phase, FilterPhase::DeadReckoning);
        assert!(engine.state().covariance_growth_rate > 0.0);

        let before = engine.state().position;
        // Reacquire with a fix ~50 m east of the origin: correction must be
        // bounded by max_reacquire_jump_m, no teleport.
        let offset_lon = -105.0 + 50.0 / (EARTH_RADIUS_M * 40.0_f64.to_radians().cos()) * 180.0
            / std::f64::consts::PI;
        engine.update(Some(&fix(t, 40.0, offset_lon, 0.0)), None);
        assert_eq!(engine.state().phase, FilterPhase::Running);

        let after = engine.state().position;
        let (dx, dy) = latlon_to_meters(after.0, after.1, before.0, before.1);
        let jump = (dx * dx + dy * dy).sqrt();
        assert!(
            jump <= KalmanConfig::default().max_reacquire_jump_m + 1.0,
            "reacquire jump {} m exceeds bound",
            jump
        );
    }

    #[test]
    fn test_out_of_order_sample_discarded() {
        let mut engine = KalmanEngine::new(fast_config());
        let t = initialize(&mut engine, 4);
        let before = engine.state().imu_updates;
        // Sample from 2 s in the past must be rejected.
        engine.update(None, Some(&quiet_imu(t - 2 * NS)));
        assert_eq!(engine.state().imu_updates, before);
    }

    #[test]
    fn test_adas_filter_independent() {
        let mut cfg = fast_config();
        cfg.adas_mode = true;
        let mut engine = KalmanEngine::new(cfg);
        initialize(&mut engine, 4);
        let adas = engine.adas_state().expect("adas filter present");
        assert_eq!(adas.phase, FilterPhase::Running);
    }

    #[test]
    fn test_latlon_roundtrip() {
        let (x, y) = latlon_to_meters(40.001, -104.999, 40.0, -105.0);
        let (lat, lon) = meters_to_latlon(x, y, 40.0, -105.0);
        assert!((lat - 40.001).abs() < 1e-9);
        assert!((lon + 104.999).abs() < 1e-9);
    }
}
