use std::collections::VecDeque;

use log::warn;

use crate::types::ImuSample;

/// Physical plausibility limits; anything beyond these is sensor garbage.
const MAX_ACCEL_MPS2: f64 = 16.0 * 9.81;
const MAX_GYRO_RADS: f64 = 35.0;

/// Validate one IMU sample. Out-of-range samples are discarded and logged;
/// the stream continues.
pub fn validate(sample: &ImuSample) -> bool {
    let (ax, ay, az) = sample.accel;
    let (gx, gy, gz) = sample.gyro;
    let accel_mag = (ax * ax + ay * ay + az * az).sqrt();
    let gyro_mag = (gx * gx + gy * gy + gz * gz).sqrt();

    if !accel_mag.is_finite() || !gyro_mag.is_finite() {
        warn!("discarding IMU sample with non-finite values");
        return false;
    }
    if accel_mag > MAX_ACCEL_MPS2 {
        warn!("discarding IMU sample: |accel| {:.1} m/s² out of range", accel_mag);
        return false;
    }
    if gyro_mag > MAX_GYRO_RADS {
        warn!("discarding IMU sample: |gyro| {:.2} rad/s out of range", gyro_mag);
        return false;
    }
    true
}

/// Rolling window over accel magnitudes used for the stationary check
/// during Kalman initialization.
pub struct StationaryDetector {
    window: VecDeque<f64>,
    window_size: usize,
}

impl StationaryDetector {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn push(&mut self, sample: &ImuSample) {
        let (ax, ay, az) = sample.accel;
        self.window.push_back((ax * ax + ay * ay + az * az).sqrt());
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.window.len() >= self.window_size
    }

    /// Variance of accel magnitude over the window. `None` until the window
    /// has filled once.
    pub fn variance(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let var = self.window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some(var)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Mean accel and gyro over a sample set, used for bias estimation while
/// stationary.
pub fn mean_bias(samples: &[ImuSample]) -> ((f64, f64, f64), (f64, f64, f64)) {
    if samples.is_empty() {
        return ((0.0, 0.0, 9.81), (0.0, 0.0, 0.0));
    }
    let n = samples.len() as f64;
    let mut asum = (0.0, 0.0, 0.0);
    let mut gsum = (0.0, 0.0, 0.0);
    for s in samples {
        asum.0 += s.accel.0;
        asum.1 += s.accel.1;
        asum.2 += s.accel.2;
        gsum.0 += s.gyro.0;
        gsum.1 += s.gyro.1;
        gsum.2 += s.gyro.2;
    }
    (
        (asum.0 / n, asum.1 / n, asum.2 / n),
        (gsum.0 / n, gsum.1 / n, gsum.2 / n),
    )
}
