use std::collections::VecDeque;

use nalgebra::DMatrix;

/// Streaming Savitzky–Golay filter.
///
/// Fits a least-squares polynomial over a sliding window and evaluates the
/// fit, and its first derivative, at the newest sample. The weight vectors
/// depend only on window length and order, so they are computed once at
/// construction. Smoothing before differentiation keeps dv/dt usable on
/// noisy speed traces; raw finite differences amplify quantization noise.
pub struct SavGolFilter {
    window: VecDeque<f64>,
    window_size: usize,
    value_weights: Vec<f64>,
    deriv_weights: Vec<f64>,
}

/// Smoothed output for the newest sample in the window.
#[derive(Clone, Copy, Debug)]
pub struct SmoothedPoint {
    pub value: f64,
    /// First derivative in units per sample; divide by the sample period
    /// for a per-second rate.
    pub derivative_per_sample: f64,
}

impl SavGolFilter {
    /// `window_size` must be odd and at least `order + 2`; `DynoConfig`
    /// validation enforces this before construction.
    pub fn new(window_size: usize, order: usize) -> Self {
        let (value_weights, deriv_weights) = compute_weights(window_size, order);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            value_weights,
            deriv_weights,
        }
    }

    /// Push one sample. Returns the smoothed point once the window has
    /// filled, `None` while it is still warming up.
    pub fn push(&mut self, sample: f64) -> Option<SmoothedPoint> {
        self.window.push_back(sample);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.window.len() < self.window_size {
            return None;
        }

        let mut value = 0.0;
        let mut derivative = 0.0;
        for (i, v) in self.window.iter().enumerate() {
            value += v * self.value_weights[i];
            derivative += v * self.deriv_weights[i];
        }
        Some(SmoothedPoint {
            value,
            derivative_per_sample: derivative,
        })
    }

    pub fn is_full(&self) -> bool {
        self.window.len() >= self.window_size
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Weight vectors for the fit value and first derivative at the last window
/// position, unit sample spacing.
fn compute_weights(window_size: usize, order: usize) -> (Vec<f64>, Vec<f64>) {
    let n = window_size;
    let terms = order + 1;

    // Vandermonde over x = 0..n-1.
    let a = DMatrix::from_fn(n, terms, |row, col| (row as f64).powi(col as i32));
    let ata = a.transpose() * &a;
    let Some(ata_inv) = ata.try_inverse() else {
        // Unreachable for a valid window/order pair; degrade to a plain
        // moving average with zero derivative.
        let w = 1.0 / n as f64;
        return (vec![w; n], vec![0.0; n]);
    };
    // Projection of the samples onto the polynomial coefficients.
    let coeff_map = ata_inv * a.transpose();

    let x_last = (n - 1) as f64;
    let mut value_weights = vec![0.0; n];
    let mut deriv_weights = vec![0.0; n];
    for col in 0..n {
        let mut v = 0.0;
        let mut d = 0.0;
        for k in 0..terms {
            let c = coeff_map[(k, col)];
            v += c * x_last.powi(k as i32);
            if k >= 1 {
                d += c * k as f64 * x_last.powi(k as i32 - 1);
            }
        }
        value_weights[col] = v;
        deriv_weights[col] = d;
    }
    (value_weights, deriv_weights)
}
