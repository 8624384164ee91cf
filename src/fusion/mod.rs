pub mod attitude;
pub mod ekf;

pub use attitude::{AttitudeEstimate, AttitudeResult, DualAntennaAttitude};
pub use ekf::{FilterPhase, KalmanEngine, KalmanState};
