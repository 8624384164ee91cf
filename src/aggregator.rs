use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{info, warn};

use crate::can::{self, canonical, VendorDetector};
use crate::config::{AggregatorConfig, AttitudeConfig, DynoConfig, KalmanConfig};
use crate::fusion::{AttitudeResult, DualAntennaAttitude, KalmanEngine, KalmanState};
use crate::gps::pair_fixes;
use crate::health::{HealthBoard, SourceHealth};
use crate::imu;
use crate::metrics::MetricsEngine;
use crate::sources::{Reading, SourceHandle};
use crate::types::{
    DerivedMetrics, GpsFix, SourceId, SourceMask, TelemetrySnapshot, VehicleSpecs,
};

/// Antenna fixes farther apart in time than this are not a valid pair.
const ATTITUDE_PAIR_MAX_SKEW_NS: u64 = 200_000_000;

/// CAN-ID observations per vendor re-scoring window.
const VENDOR_WINDOW: usize = 64;

const MAX_SOURCE_RESTARTS: u32 = 60;

/// Passive per-tick consumer. The aggregator has no knowledge of how many
/// subscribers exist; a slow subscriber delays the tick, so implementations
/// must stay cheap and hand real work to their own thread.
pub trait SnapshotSubscriber: Send {
    fn on_snapshot(&mut self, snapshot: &TelemetrySnapshot, metrics: &DerivedMetrics);
}

/// Fixed-rate orchestration loop.
///
/// Owns the single mutable Kalman engine and publishes immutable snapshot
/// copies; no other thread ever touches fusion state. Each tick drains the
/// reader queues without blocking, merges fresh readings over the retained
/// signal map, runs fusion and derived metrics, and fans the result out to
/// subscribers.
pub struct Aggregator {
    config: AggregatorConfig,
    handles: Vec<SourceHandle>,
    subscribers: Vec<Box<dyn SnapshotSubscriber>>,

    vendor: VendorDetector,
    kalman: KalmanEngine,
    attitude: DualAntennaAttitude,
    metrics: MetricsEngine,
    health: HealthBoard,

    /// Last known value of every canonical signal; stale sources retain
    /// their previous values in the snapshot.
    signals: HashMap<String, f64>,
    latest_gps: Option<GpsFix>,
    latest_gps_secondary: Option<GpsFix>,
    last_attitude: Option<AttitudeResult>,
    clock_ns: u64,
    ticks: u64,
    overruns: u64,

    shutdown: Arc<AtomicBool>,
}

pub struct AggregatorSettings {
    pub aggregator: AggregatorConfig,
    pub kalman: KalmanConfig,
    pub attitude: AttitudeConfig,
    pub dyno: DynoConfig,
    pub vehicle: VehicleSpecs,
}

impl Aggregator {
    pub fn new(
        settings: AggregatorSettings,
        handles: Vec<SourceHandle>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, crate::error::ConfigError> {
        can::signals::validate_tables()?;
        settings.aggregator.validate()?;
        settings.kalman.validate()?;
        settings.dyno.validate()?;
        settings.vehicle.validate()?;

        let cfg = &settings.aggregator;
        let health = HealthBoard::new(vec![
            SourceHealth::new(SourceId::Can0, cfg.can_stale_after, MAX_SOURCE_RESTARTS),
            SourceHealth::new(SourceId::Can1, cfg.can_stale_after, MAX_SOURCE_RESTARTS),
            SourceHealth::new(SourceId::Gps, cfg.gps_stale_after, MAX_SOURCE_RESTARTS),
            SourceHealth::new(SourceId::GpsSecondary, cfg.gps_stale_after, MAX_SOURCE_RESTARTS),
            SourceHealth::new(SourceId::Imu, cfg.imu_stale_after, MAX_SOURCE_RESTARTS),
        ]);
        let tick_s = cfg.tick_period.as_secs_f64();

        Ok(Self {
            config: settings.aggregator,
            handles,
            subscribers: Vec::new(),
            vendor: VendorDetector::new(VENDOR_WINDOW),
            kalman: KalmanEngine::new(settings.kalman),
            attitude: DualAntennaAttitude::new(settings.attitude),
            metrics: MetricsEngine::new(settings.vehicle, settings.dyno, tick_s),
            health,
            signals: HashMap::new(),
            latest_gps: None,
            latest_gps_secondary: None,
            last_attitude: None,
            clock_ns: 0,
            ticks: 0,
            overruns: 0,
            shutdown,
        })
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn SnapshotSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn metrics_engine(&mut self) -> &mut MetricsEngine {
        &mut self.metrics
    }

    pub fn fused_state(&self) -> KalmanState {
        self.kalman.state()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns
    }

    /// Run the fixed-period loop until shutdown, then drain one final tick
    /// and join every reader thread.
    pub fn run(mut self) {
        info!(
            "aggregator running at {:.0} Hz",
            1.0 / self.config.tick_period.as_secs_f64()
        );
        let period = self.config.tick_period;
        let mut next_tick = Instant::now() + period;

        while !self.shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();

            if elapsed > period {
                // Skip the next slot rather than queueing a backlog.
                self.overruns += 1;
                warn!(
                    "tick {} overran its budget: {:?} > {:?}, skipping one slot",
                    self.ticks, elapsed, period
                );
                next_tick += period;
            }

            next_tick += period;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                next_tick = now;
            }
        }

        // Final drain so the last hardware readings are published.
        self.tick();
        info!(
            "aggregator stopped after {} ticks ({} overruns)",
            self.ticks, self.overruns
        );
        for handle in self.handles.drain(..) {
            handle.join();
        }
    }

    /// One full acquisition/fusion/publish cycle.
    pub fn tick(&mut self) {
        let prev_clock_ns = self.clock_ns;
        let mut fresh = SourceMask::default();
        let mut gps_this_tick: Option<GpsFix> = None;
        let mut imu_batch = Vec::new();

        let readings: Vec<(SourceId, Vec<Reading>)> = self
            .handles
            .iter()
            .map(|h| (h.source, h.drain()))
            .collect();
        for (handle_source, batch) in readings {
            for reading in batch {
                self.clock_ns = self.clock_ns.max(reading.timestamp_ns());
                match reading {
                    Reading::Can(frame) => {
                        // Any frame counts as liveness; whether it decodes
                        // to something we care about is a separate question.
                        let source = match frame.channel {
                            crate::types::CanChannel::Can0 => SourceId::Can0,
                            crate::types::CanChannel::Can1 => SourceId::Can1,
                        };
                        fresh.set(source);
                        self.health.record(source, frame.timestamp_ns);

                        self.vendor.observe(frame.id);
                        for (name, value) in can::decode(&frame, self.vendor.current()) {
                            self.signals.insert(name.to_string(), value);
                        }
                    }
                    Reading::Gps(fix) => {
                        // Primary and secondary antennas arrive on separate
                        // handles; the handle's source id tells them apart.
                        if handle_source == SourceId::GpsSecondary {
                            fresh.set(SourceId::GpsSecondary);
                            self.health.record(SourceId::GpsSecondary, fix.timestamp_ns);
                            self.latest_gps_secondary = Some(fix);
                        } else {
                            fresh.set(SourceId::Gps);
                            self.health.record(SourceId::Gps, fix.timestamp_ns);
                            self.latest_gps = Some(fix);
                            gps_this_tick = Some(fix);
                            self.signals
                                .insert(canonical::GPS_SPEED_MPS.to_string(), fix.speed_mps);
                            self.signals
                                .insert(canonical::GPS_HEADING_DEG.to_string(), fix.heading_deg);
                            self.signals
                                .insert(canonical::GPS_ALTITUDE_M.to_string(), fix.alt_m);
                        }
                    }
                    Reading::Imu(sample) => {
                        if imu::validate(&sample) {
                            fresh.set(SourceId::Imu);
                            self.health.record(SourceId::Imu, sample.timestamp_ns);
                            self.signals
                                .insert(canonical::ACCEL_LONG_MPS2.to_string(), sample.accel.0);
                            self.signals
                                .insert(canonical::ACCEL_LAT_MPS2.to_string(), sample.accel.1);
                            self.signals
                                .insert(canonical::YAW_RATE_RADS.to_string(), sample.gyro.2);
                            imu_batch.push(sample);
                        }
                    }
                }
            }
        }

        // Fusion: IMU samples in arrival order, the newest GPS fix slotted
        // in at its timestamp so the engine clock stays monotonic.
        match gps_this_tick {
            None => {
                for sample in &imu_batch {
                    self.kalman.update(None, Some(sample));
                }
            }
            Some(fix) => {
                let mut fix_sent = false;
                for sample in &imu_batch {
                    if !fix_sent && fix.timestamp_ns <= sample.timestamp_ns {
                        self.kalman.update(Some(&fix), Some(sample));
                        fix_sent = true;
                    } else {
                        self.kalman.update(None, Some(sample));
                    }
                }
                if !fix_sent {
                    self.kalman.update(Some(&fix), None);
                }
            }
        }

        // Dual-antenna attitude when both fixes pair up this tick.
        if let (Some(primary), Some(secondary)) = (self.latest_gps, self.latest_gps_secondary) {
            if fresh.contains(SourceId::GpsSecondary)
                && pair_fixes(&primary, &secondary, ATTITUDE_PAIR_MAX_SKEW_NS).is_some()
            {
                self.last_attitude = Some(self.attitude.update(&primary, &secondary));
            }
        }

        // Snapshot time advances with the newest reading, but never by less
        // than one tick period, so idle ticks still move forward.
        self.ticks += 1;
        self.clock_ns = self
            .clock_ns
            .max(prev_clock_ns + self.config.tick_period.as_nanos() as u64);

        let mut snapshot = TelemetrySnapshot::new(self.clock_ns);
        snapshot.signals = self.signals.clone();
        snapshot.source_mask = fresh;
        snapshot.stale_mask = self.health.stale_mask(self.clock_ns);

        let fused = self.kalman.state();
        let adas_fused = self.kalman.adas_state();
        let metrics =
            self.metrics
                .compute(&snapshot, &fused, adas_fused.as_ref(), self.last_attitude.as_ref());

        for subscriber in &mut self.subscribers {
            subscriber.on_snapshot(&snapshot, &metrics);
        }
    }
}
