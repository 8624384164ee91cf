use std::collections::VecDeque;

use log::info;
use serde::{Deserialize, Serialize};

/// Supported ECU vendors. `Unknown` decodes only generic OBD-II PIDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VendorId {
    Holley,
    Aem,
    Unknown,
}

/// CAN IDs that form each vendor's broadcast fingerprint.
const HOLLEY_FINGERPRINT: &[u32] = &[0x180, 0x181, 0x182];
const AEM_FINGERPRINT: &[u32] = &[0x01F0_A000, 0x01F0_A003, 0x01F0_A004, 0x01F0_A005];

/// Fraction of a fingerprint that must be present in the observed window.
const MATCH_FRACTION: f64 = 0.6;
/// A vendor must beat the runner-up by this many matched IDs.
const MATCH_MARGIN: usize = 2;

/// Detects the active ECU vendor from a rolling window of observed CAN IDs.
///
/// Pure scoring over the window: no per-vendor state, no dynamic dispatch.
/// Ambiguity keeps the detector in `Unknown` rather than guessing.
pub struct VendorDetector {
    window: VecDeque<u32>,
    window_size: usize,
    current: VendorId,
}

impl VendorDetector {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            current: VendorId::Unknown,
        }
    }

    pub fn current(&self) -> VendorId {
        self.current
    }

    /// Record one observed CAN ID and re-score. Returns the new vendor when
    /// the detection changes.
    pub fn observe(&mut self, can_id: u32) -> Option<VendorId> {
        if !self.window.contains(&can_id) {
            self.window.push_back(can_id);
            if self.window.len() > self.window_size {
                self.window.pop_front();
            }
        }

        let detected = self.score();
        if detected != self.current {
            info!("vendor detection changed: {:?} -> {:?}", self.current, detected);
            self.current = detected;
            Some(detected)
        } else {
            None
        }
    }

    fn matches(&self, fingerprint: &[u32]) -> usize {
        fingerprint
            .iter()
            .filter(|id| self.window.contains(id))
            .count()
    }

    fn score(&self) -> VendorId {
        let candidates = [
            (VendorId::Holley, HOLLEY_FINGERPRINT),
            (VendorId::Aem, AEM_FINGERPRINT),
        ];

        let mut scored: Vec<(VendorId, usize, usize)> = candidates
            .iter()
            .map(|(v, fp)| (*v, self.matches(fp), fp.len()))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let (best, best_hits, fp_len) = scored[0];
        let runner_up_hits = scored[1].1;

        let threshold = (fp_len as f64 * MATCH_FRACTION).ceil() as usize;
        if best_hits >= threshold && best_hits >= runner_up_hits + MATCH_MARGIN {
            best
        } else {
            VendorId::Unknown
        }
    }
}
