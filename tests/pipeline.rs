//! End-to-end pipeline tests: scripted hardware readers feeding a real
//! aggregator, observed through a capturing subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use racefusion::aggregator::{Aggregator, AggregatorSettings, SnapshotSubscriber};
use racefusion::config::{AggregatorConfig, AttitudeConfig, DynoConfig, KalmanConfig};
use racefusion::sources::{spawn_reader, Reading, SourceReader};
use racefusion::types::{
    CanChannel, CanFrame, DerivedMetrics, DrivetrainType, GpsFix, GpsSolution, ImuSample, SlipClass,
    SourceId, TelemetrySnapshot, VehicleSpecs,
};

const NS: u64 = 1_000_000_000;
const MPH_TO_MPS: f64 = 0.44704;

/// Replays a fixed script of readings, pausing `delay` before each one.
struct ScriptedReader {
    source: SourceId,
    script: Vec<(Duration, Reading)>,
}

impl SourceReader for ScriptedReader {
    fn source(&self) -> SourceId {
        self.source
    }

    fn read(&mut self) -> anyhow::Result<Option<Reading>> {
        if self.script.is_empty() {
            thread::sleep(Duration::from_millis(5));
            return Ok(None);
        }
        let (delay, reading) = self.script.remove(0);
        thread::sleep(delay);
        Ok(Some(reading))
    }
}

#[derive(Clone, Default)]
struct Capture {
    published: Arc<Mutex<Vec<(TelemetrySnapshot, DerivedMetrics)>>>,
}

impl SnapshotSubscriber for Capture {
    fn on_snapshot(&mut self, snapshot: &TelemetrySnapshot, metrics: &DerivedMetrics) {
        self.published
            .lock()
            .unwrap()
            .push((snapshot.clone(), metrics.clone()));
    }
}

fn settings() -> AggregatorSettings {
    AggregatorSettings {
        aggregator: AggregatorConfig::default(),
        kalman: KalmanConfig::default(),
        attitude: AttitudeConfig::default(),
        dyno: DynoConfig::default(),
        vehicle: VehicleSpecs {
            mass_kg: 1500.0,
            frontal_area_m2: 2.2,
            drag_coefficient: 0.32,
            rolling_resistance_coef: 0.015,
            drivetrain_loss_fraction: 0.15,
            drivetrain_type: DrivetrainType::Rwd,
        },
    }
}

fn can_frame(id: u32, data: [u8; 8], t_ns: u64) -> Reading {
    Reading::Can(CanFrame {
        id,
        data,
        dlc: 8,
        channel: CanChannel::Can0,
        timestamp_ns: t_ns,
    })
}

fn gps_fix(speed_mps: f64, t_ns: u64) -> Reading {
    Reading::Gps(GpsFix {
        lat: 40.0,
        lon: -105.0,
        alt_m: 1600.0,
        speed_mps,
        heading_deg: 0.0,
        satellites: 12,
        hdop: 0.8,
        solution: GpsSolution::RtkFixed,
        timestamp_ns: t_ns,
    })
}

fn imu_sample(t_ns: u64) -> Reading {
    Reading::Imu(ImuSample {
        accel: (0.0, 0.0, 9.81),
        gyro: (0.0, 0.0, 0.0),
        mag: None,
        timestamp_ns: t_ns,
    })
}

/// Drive `tick` until the capture holds at least `count` publications.
fn run_ticks(aggregator: &mut Aggregator, capture: &Capture, count: usize) {
    for _ in 0..200 {
        aggregator.tick();
        if capture.published.lock().unwrap().len() >= count {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("aggregator never published {} snapshots", count);
}

#[test]
fn holley_frame_decodes_to_canonical_signals() {
    let shutdown = Arc::new(AtomicBool::new(false));
    // Fingerprint traffic first so vendor detection locks before the
    // frame under test arrives.
    let script = vec![
        (Duration::ZERO, can_frame(0x181, [0; 8], NS)),
        (Duration::ZERO, can_frame(0x182, [0; 8], NS + 1000)),
        (
            Duration::ZERO,
            can_frame(
                0x180,
                [0x45, 0x0E, 0x2D, 0x00, 0x00, 0x00, 0x00, 0x00],
                NS + 2000,
            ),
        ),
    ];
    let handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Can0,
            script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();

    let capture = Capture::default();
    let mut aggregator = Aggregator::new(settings(), vec![handle], shutdown.clone()).unwrap();
    aggregator.subscribe(Box::new(capture.clone()));

    // Wait for the reader to queue everything, then process one tick.
    thread::sleep(Duration::from_millis(50));
    run_ticks(&mut aggregator, &capture, 1);

    let published = capture.published.lock().unwrap();
    let (snapshot, _) = published.last().unwrap();
    assert_eq!(snapshot.get("rpm"), Some(3500.0));
    assert_eq!(snapshot.get("tps"), Some(45.0));
    assert!(snapshot.source_mask.contains(SourceId::Can0));

    drop(published);
    shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn launch_slip_classified_from_can_and_gps() {
    let shutdown = Arc::new(AtomicBool::new(false));

    // 62 mph driven wheel speed, 0.01 mph/bit little-endian on 0x182.
    let raw: u16 = 6200;
    let bytes = raw.to_le_bytes();
    let can_script = vec![
        (Duration::ZERO, can_frame(0x180, [0; 8], NS)),
        (
            Duration::ZERO,
            can_frame(
                0x182,
                [bytes[0], bytes[1], 0, 0, 0, 0, 0, 0],
                NS + 1000,
            ),
        ),
    ];
    let gps_script = vec![(Duration::ZERO, gps_fix(60.0 * MPH_TO_MPS, NS + 2000))];

    let can_handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Can0,
            script: can_script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();
    let gps_handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Gps,
            script: gps_script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();

    let capture = Capture::default();
    let mut aggregator =
        Aggregator::new(settings(), vec![can_handle, gps_handle], shutdown.clone()).unwrap();
    aggregator.subscribe(Box::new(capture.clone()));

    thread::sleep(Duration::from_millis(50));
    run_ticks(&mut aggregator, &capture, 1);

    let published = capture.published.lock().unwrap();
    let (_, metrics) = published.last().unwrap();
    let slip = metrics.wheel_slip_percent.expect("slip computed");
    assert!((slip - 10.0 / 3.0).abs() < 0.05, "slip {}", slip);
    assert_eq!(metrics.wheel_slip_class, Some(SlipClass::OptimalLaunch));

    drop(published);
    shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn silent_source_flagged_stale_while_others_publish() {
    let shutdown = Arc::new(AtomicBool::new(false));

    // GPS produces exactly one fix; the IMU keeps streaming for 3 s of
    // sample time, which carries the aggregator clock past the 2 s GPS
    // staleness threshold.
    let gps_script = vec![(Duration::ZERO, gps_fix(0.0, NS))];
    let imu_script: Vec<(Duration, Reading)> = (0..30)
        .map(|i| {
            (
                Duration::from_millis(2),
                imu_sample(NS + (i + 1) * NS / 10),
            )
        })
        .collect();

    let gps_handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Gps,
            script: gps_script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();
    let imu_handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Imu,
            script: imu_script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();

    let capture = Capture::default();
    let mut aggregator =
        Aggregator::new(settings(), vec![gps_handle, imu_handle], shutdown.clone()).unwrap();
    aggregator.subscribe(Box::new(capture.clone()));

    // Enough ticks for the whole IMU script to flow through.
    run_ticks(&mut aggregator, &capture, 12);
    thread::sleep(Duration::from_millis(120));
    run_ticks(&mut aggregator, &capture, 14);

    let published = capture.published.lock().unwrap();
    let (snapshot, _) = published.last().unwrap();

    // Still publishing, GPS retained but flagged stale, IMU fresh enough
    // to keep contributing.
    assert!(snapshot.get("gps_speed_mps").is_some());
    assert!(snapshot.stale_mask.contains(SourceId::Gps));
    assert!(!snapshot.stale_mask.contains(SourceId::Imu));

    drop(published);
    shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn undecodable_can_traffic_keeps_source_fresh() {
    let shutdown = Arc::new(AtomicBool::new(false));

    // One decodable OBD response, then nothing but unknown IDs for 3 s of
    // bus time. Staleness means no frames at all, not frames we cannot
    // decode, so the source must stay live throughout.
    let mut script = vec![(
        Duration::ZERO,
        can_frame(0x7E8, [0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x00, 0x00, 0x00], NS),
    )];
    script.extend((1..=30).map(|i| {
        (
            Duration::from_millis(2),
            can_frame(0x500, [0; 8], NS + i * NS / 10),
        )
    }));

    let handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Can0,
            script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();

    let capture = Capture::default();
    let mut aggregator = Aggregator::new(settings(), vec![handle], shutdown.clone()).unwrap();
    aggregator.subscribe(Box::new(capture.clone()));

    run_ticks(&mut aggregator, &capture, 12);
    thread::sleep(Duration::from_millis(120));
    run_ticks(&mut aggregator, &capture, 14);

    let published = capture.published.lock().unwrap();
    let (snapshot, _) = published.last().unwrap();
    assert_eq!(snapshot.get("rpm"), Some(1726.0));
    assert!(
        !snapshot.stale_mask.contains(SourceId::Can0),
        "live bus flagged stale at snapshot t={}",
        snapshot.timestamp_ns
    );

    drop(published);
    shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn snapshot_timestamps_are_monotonic() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let imu_script: Vec<(Duration, Reading)> = (0..20)
        .map(|i| (Duration::from_millis(1), imu_sample(NS + i * NS / 100)))
        .collect();
    let handle = spawn_reader(
        Box::new(ScriptedReader {
            source: SourceId::Imu,
            script: imu_script,
        }),
        64,
        shutdown.clone(),
    )
    .unwrap();

    let capture = Capture::default();
    let mut aggregator = Aggregator::new(settings(), vec![handle], shutdown.clone()).unwrap();
    aggregator.subscribe(Box::new(capture.clone()));
    run_ticks(&mut aggregator, &capture, 10);

    let published = capture.published.lock().unwrap();
    let stamps: Vec<u64> = published.iter().map(|(s, _)| s.timestamp_ns).collect();
    assert!(
        stamps.windows(2).all(|w| w[0] < w[1]),
        "timestamps not strictly increasing: {:?}",
        stamps
    );

    drop(published);
    shutdown.store(true, Ordering::Relaxed);
}
