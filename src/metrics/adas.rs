use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::fusion::ekf::latlon_to_meters;

/// Geodetic position of a vehicle at one instant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub timestamp_ns: u64,
}

/// Separation solution for one target.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SeparationSolution {
    pub target_id: u32,
    pub separation_m: f64,
    /// Positive when the gap is opening, negative when closing [m/s].
    /// `None` until the target has two epochs.
    pub range_rate_mps: Option<f64>,
    /// Time to collision [s]; `None` when not closing.
    pub ttc_s: Option<f64>,
}

struct TargetTrack {
    last_separation_m: f64,
    last_timestamp_ns: u64,
}

/// Tracks separation and closing time against multiple target vehicles.
///
/// Each target is tracked independently by an opaque ID; the separation is
/// computed on a local tangent plane anchored at the subject vehicle, which
/// is accurate to millimeters at inter-vehicle ranges.
pub struct AdasTracker {
    tracks: HashMap<u32, TargetTrack>,
}

impl AdasTracker {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
        }
    }

    /// Update one target from a time-aligned subject/target position pair.
    pub fn update(
        &mut self,
        target_id: u32,
        subject: &VehiclePosition,
        target: &VehiclePosition,
    ) -> SeparationSolution {
        let (east, north) = latlon_to_meters(target.lat, target.lon, subject.lat, subject.lon);
        let up = target.alt_m - subject.alt_m;
        let separation_m = (east * east + north * north + up * up).sqrt();
        let now_ns = subject.timestamp_ns.max(target.timestamp_ns);

        let range_rate_mps = match self.tracks.get(&target_id) {
            Some(track) if now_ns > track.last_timestamp_ns => {
                let dt_s = (now_ns - track.last_timestamp_ns) as f64 * 1e-9;
                Some((separation_m - track.last_separation_m) / dt_s)
            }
            _ => None,
        };

        // TTC only exists while actually closing.
        let ttc_s = range_rate_mps.and_then(|rate| {
            let closing = -rate;
            if closing > 0.0 {
                Some(separation_m / closing)
            } else {
                None
            }
        });

        self.tracks.insert(
            target_id,
            TargetTrack {
                last_separation_m: separation_m,
                last_timestamp_ns: now_ns,
            },
        );

        SeparationSolution {
            target_id,
            separation_m,
            range_rate_mps,
            ttc_s,
        }
    }

    /// Drop targets that have not been updated since `cutoff_ns`.
    pub fn prune(&mut self, cutoff_ns: u64) {
        let before = self.tracks.len();
        self.tracks.retain(|_, t| t.last_timestamp_ns >= cutoff_ns);
        let dropped = before - self.tracks.len();
        if dropped > 0 {
            debug!("pruned {} stale ADAS targets", dropped);
        }
    }

    pub fn target_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for AdasTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NS: u64 = 1_000_000_000;
    const METERS_PER_DEG_LAT: f64 = 6_371_000.0 * std::f64::consts::PI / 180.0;

    fn pos(lat: f64, lon: f64, t_ns: u64) -> VehiclePosition {
        VehiclePosition {
            lat,
            lon,
            alt_m: 100.0,
            timestamp_ns: t_ns,
        }
    }

    fn north_of(base: &VehiclePosition, meters: f64, t_ns: u64) -> VehiclePosition {
        pos(base.lat + meters / METERS_PER_DEG_LAT, base.lon, t_ns)
    }

    #[test]
    fn test_separation_distance() {
        let mut tracker = AdasTracker::new();
        let subject = pos(40.0, -105.0, NS);
        let target = north_of(&subject, 50.0, NS);
        let sol = tracker.update(1, &subject, &target);
        assert_relative_eq!(sol.separation_m, 50.0, epsilon = 0.01);
        assert!(sol.range_rate_mps.is_none());
        assert!(sol.ttc_s.is_none());
    }

    #[test]
    fn test_closing_target_has_ttc() {
        let mut tracker = AdasTracker::new();
        let subject = pos(40.0, -105.0, NS);
        tracker.update(1, &subject, &north_of(&subject, 50.0, NS));

        // One second later the target is 10 m nearer: closing at 10 m/s.
        let subject2 = pos(40.0, -105.0, 2 * NS);
        let sol = tracker.update(1, &subject2, &north_of(&subject2, 40.0, 2 * NS));
        let rate = sol.range_rate_mps.expect("range rate");
        assert_relative_eq!(rate, -10.0, epsilon = 0.1);
        assert_relative_eq!(sol.ttc_s.expect("ttc"), 4.0, epsilon = 0.05);
    }

    #[test]
    fn test_opening_target_has_no_ttc() {
        let mut tracker = AdasTracker::new();
        let subject = pos(40.0, -105.0, NS);
        tracker.update(1, &subject, &north_of(&subject, 50.0, NS));

        let subject2 = pos(40.0, -105.0, 2 * NS);
        let sol = tracker.update(1, &subject2, &north_of(&subject2, 60.0, 2 * NS));
        assert!(sol.range_rate_mps.expect("rate") > 0.0);
        assert!(sol.ttc_s.is_none());
    }

    #[test]
    fn test_targets_tracked_independently() {
        let mut tracker = AdasTracker::new();
        let subject = pos(40.0, -105.0, NS);
        tracker.update(1, &subject, &north_of(&subject, 50.0, NS));
        tracker.update(2, &subject, &north_of(&subject, 100.0, NS));
        assert_eq!(tracker.target_count(), 2);

        // Target 1 closes; target 2's history must not bleed in.
        let subject2 = pos(40.0, -105.0, 2 * NS);
        let sol1 = tracker.update(1, &subject2, &north_of(&subject2, 45.0, 2 * NS));
        let sol2 = tracker.update(2, &subject2, &north_of(&subject2, 100.0, 2 * NS));
        assert!(sol1.ttc_s.is_some());
        assert!(sol2.ttc_s.is_none());
    }

    #[test]
    fn test_prune_drops_stale_targets() {
        let mut tracker = AdasTracker::new();
        let subject = pos(40.0, -105.0, NS);
        tracker.update(1, &subject, &north_of(&subject, 50.0, NS));
        let late = pos(40.0, -105.0, 10 * NS);
        tracker.update(2, &late, &north_of(&late, 50.0, 10 * NS));

        tracker.prune(5 * NS);
        assert_eq!(tracker.target_count(), 1);
    }
}
