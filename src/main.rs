use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};

use racefusion::aggregator::{Aggregator, AggregatorSettings, SnapshotSubscriber};
use racefusion::config::{AggregatorConfig, AttitudeConfig, DynoConfig, KalmanConfig};
use racefusion::gps::NmeaParser;
use racefusion::sources::{spawn_reader, Reading, SourceReader};
use racefusion::types::{
    CanChannel, CanFrame, DerivedMetrics, DrivetrainType, ImuSample, SourceId, TelemetrySnapshot,
    VehicleSpecs,
};

#[derive(Parser, Debug)]
#[command(name = "racefusion")]
#[command(about = "Telemetry fusion engine demo with simulated vehicle sources", long_about = None)]
struct Args {
    /// Run duration in seconds (0 = until killed)
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Stationary window before the fusion filter goes live [s]
    #[arg(long, default_value = "5")]
    init_window_secs: f64,

    /// Run a second position-accuracy-tuned filter for ADAS output
    #[arg(long)]
    adas: bool,

    /// Directory for JSONL session logs
    #[arg(long, default_value = "sessions")]
    output_dir: PathBuf,
}

// ─── Simulated hardware ──────────────────────────────────────────────────────
//
// A scripted acceleration run: stationary through the init window, then a
// steady pull to highway speed. All three sources derive their readings
// from the same sample clock so the streams stay mutually consistent.

#[derive(Clone, Copy)]
struct Scenario {
    init_secs: f64,
    accel_mps2: f64,
    top_speed_mps: f64,
}

impl Scenario {
    fn speed_at(&self, t_s: f64) -> f64 {
        if t_s < self.init_secs {
            0.0
        } else {
            (self.accel_mps2 * (t_s - self.init_secs)).min(self.top_speed_mps)
        }
    }

    fn rpm_at(&self, t_s: f64) -> f64 {
        900.0 + self.speed_at(t_s) * 150.0
    }
}

struct SimClock {
    start: std::time::Instant,
    period: Duration,
    next_sample: u64,
}

impl SimClock {
    fn new(hz: u64) -> Self {
        Self {
            start: std::time::Instant::now(),
            period: Duration::from_nanos(1_000_000_000 / hz),
            next_sample: 0,
        }
    }

    /// Sleep until the next sample slot; returns its timestamp [ns].
    fn tick(&mut self) -> u64 {
        let due = self.period * self.next_sample as u32;
        let elapsed = self.start.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }
        let t_ns = due.as_nanos() as u64;
        self.next_sample += 1;
        t_ns
    }
}

struct SimImuReader {
    scenario: Scenario,
    clock: SimClock,
}

impl SourceReader for SimImuReader {
    fn source(&self) -> SourceId {
        SourceId::Imu
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        let t_ns = self.clock.tick();
        let t_s = t_ns as f64 * 1e-9;
        let pulling =
            t_s >= self.scenario.init_secs && self.scenario.speed_at(t_s) < self.scenario.top_speed_mps;
        let accel_x = if pulling { self.scenario.accel_mps2 } else { 0.0 };
        Ok(Some(Reading::Imu(ImuSample {
            accel: (accel_x, 0.0, 9.81),
            gyro: (0.0, 0.0, 0.0),
            mag: None,
            timestamp_ns: t_ns,
        })))
    }
}

/// Emits NMEA sentences and runs them through the real parser, so the demo
/// exercises the same path live hardware does.
struct SimGpsReader {
    scenario: Scenario,
    clock: SimClock,
    parser: NmeaParser,
    lat: f64,
}

const MPS_TO_KNOTS: f64 = 1.943_844;

impl SourceReader for SimGpsReader {
    fn source(&self) -> SourceId {
        SourceId::Gps
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        let t_ns = self.clock.tick();
        let t_s = t_ns as f64 * 1e-9;
        let speed = self.scenario.speed_at(t_s);
        // Heading due north: latitude integrates speed at 10 Hz.
        self.lat += speed * 0.1 / 111_320.0;

        let lat_nmea = to_nmea_coord(self.lat);
        let rmc = with_checksum(&format!(
            "GPRMC,120000,A,{},N,10500.000,W,{:.1},000.0,230826,,",
            lat_nmea,
            speed * MPS_TO_KNOTS
        ));
        let gga = with_checksum(&format!(
            "GPGGA,120000,{},N,10500.000,W,4,12,0.8,1600.0,M,46.9,M,,",
            lat_nmea
        ));

        self.parser.parse_sentence(&rmc, t_ns);
        Ok(self.parser.parse_sentence(&gga, t_ns).map(Reading::Gps))
    }
}

fn to_nmea_coord(lat: f64) -> String {
    let degrees = lat.trunc();
    let minutes = (lat - degrees) * 60.0;
    format!("{:02.0}{:07.4}", degrees, minutes)
}

fn with_checksum(body: &str) -> String {
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}", body, sum)
}

/// Broadcasts Holley-style frames: RPM/TPS on 0x180, driven wheel speed
/// with a little launch slip on 0x182.
struct SimCanReader {
    scenario: Scenario,
    clock: SimClock,
    toggle: bool,
}

impl SourceReader for SimCanReader {
    fn source(&self) -> SourceId {
        SourceId::Can0
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        let t_ns = self.clock.tick();
        let t_s = t_ns as f64 * 1e-9;
        self.toggle = !self.toggle;

        let frame = if self.toggle {
            let rpm = self.scenario.rpm_at(t_s);
            let rpm_raw = (((rpm - 50.0) / 50.0).round() as i64).clamp(0, 255) as u8;
            let tps = if self.scenario.speed_at(t_s) > 0.0 { 85 } else { 5 };
            CanFrame {
                id: 0x180,
                data: [rpm_raw, 0x0E, tps, 0x00, 0x04, 0x92, 0x00, 0x00],
                dlc: 8,
                channel: CanChannel::Can0,
                timestamp_ns: t_ns,
            }
        } else {
            // Driven wheels run ~3 % over ground speed during the pull.
            let speed_mph = self.scenario.speed_at(t_s) * 2.236_94 * 1.03;
            let raw = ((speed_mph / 0.01).round() as i64).clamp(0, u16::MAX as i64) as u16;
            let bytes = raw.to_le_bytes();
            CanFrame {
                id: 0x182,
                data: [bytes[0], bytes[1], 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
                dlc: 8,
                channel: CanChannel::Can0,
                timestamp_ns: t_ns,
            }
        };
        Ok(Some(Reading::Can(frame)))
    }
}

// ─── JSONL session log ───────────────────────────────────────────────────────

struct JsonlLogger {
    writer: BufWriter<File>,
    lines: u64,
}

impl JsonlLogger {
    fn create(dir: &PathBuf) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output dir {}", dir.display()))?;
        let path = dir.join(format!(
            "telemetry_{}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let file = File::create(&path)
            .with_context(|| format!("creating session log {}", path.display()))?;
        info!("session log: {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            lines: 0,
        })
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        info!("session log closed ({} lines)", self.lines);
    }
}

#[derive(serde::Serialize)]
struct SessionLine<'a> {
    snapshot: &'a TelemetrySnapshot,
    metrics: &'a DerivedMetrics,
}

impl SnapshotSubscriber for JsonlLogger {
    fn on_snapshot(&mut self, snapshot: &TelemetrySnapshot, metrics: &DerivedMetrics) {
        let line = SessionLine { snapshot, metrics };
        match serde_json::to_string(&line) {
            Ok(json) => {
                if writeln!(self.writer, "{}", json).is_err() {
                    warn!("session log write failed, dropping line");
                }
                self.lines += 1;
            }
            Err(err) => warn!("session log serialization failed: {}", err),
        }
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!(
        "racefusion demo starting: {} s run, {} s init window, adas={}",
        args.duration, args.init_window_secs, args.adas
    );

    let scenario = Scenario {
        init_secs: args.init_window_secs + 1.0,
        accel_mps2: 3.0,
        top_speed_mps: 40.0,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let queue_depth = AggregatorConfig::default().queue_depth;

    let handles = vec![
        spawn_reader(
            Box::new(SimImuReader {
                scenario,
                clock: SimClock::new(100),
            }),
            queue_depth,
            shutdown.clone(),
        )?,
        spawn_reader(
            Box::new(SimGpsReader {
                scenario,
                clock: SimClock::new(10),
                parser: NmeaParser::new(),
                lat: 40.0,
            }),
            queue_depth,
            shutdown.clone(),
        )?,
        spawn_reader(
            Box::new(SimCanReader {
                scenario,
                clock: SimClock::new(40),
                toggle: false,
            }),
            queue_depth,
            shutdown.clone(),
        )?,
    ];

    let settings = AggregatorSettings {
        aggregator: AggregatorConfig::default(),
        kalman: KalmanConfig {
            init_window_secs: args.init_window_secs,
            adas_mode: args.adas,
            ..KalmanConfig::default()
        },
        attitude: AttitudeConfig::default(),
        dyno: DynoConfig::default(),
        vehicle: VehicleSpecs {
            mass_kg: 1450.0,
            frontal_area_m2: 2.1,
            drag_coefficient: 0.33,
            rolling_resistance_coef: 0.015,
            drivetrain_loss_fraction: 0.15,
            drivetrain_type: DrivetrainType::Rwd,
        },
    };

    let mut aggregator = Aggregator::new(settings, handles, shutdown.clone())?;
    aggregator.subscribe(Box::new(JsonlLogger::create(&args.output_dir)?));

    if args.duration > 0 {
        let flag = shutdown.clone();
        let secs = args.duration;
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            info!("duration reached, shutting down");
            flag.store(true, Ordering::Relaxed);
        });
    }

    aggregator.run();
    Ok(())
}
