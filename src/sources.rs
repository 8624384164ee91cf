use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::types::{CanFrame, GpsFix, ImuSample, SourceId};

/// One completed, timestamped reading from any source.
#[derive(Clone, Copy, Debug)]
pub enum Reading {
    Can(CanFrame),
    Gps(GpsFix),
    Imu(ImuSample),
}

impl Reading {
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Reading::Can(f) => f.timestamp_ns,
            Reading::Gps(f) => f.timestamp_ns,
            Reading::Imu(s) => s.timestamp_ns,
        }
    }
}

/// Blocking hardware reader, one per physical input.
///
/// `read` must return within a bounded interval even when no data arrives
/// (poll timeout on the underlying descriptor) so the thread can observe
/// shutdown. `Ok(None)` means the timeout elapsed quietly; `Err` means the
/// transport failed and the harness will back off and retry.
pub trait SourceReader: Send {
    fn source(&self) -> SourceId;
    fn read(&mut self) -> anyhow::Result<Option<Reading>>;
}

const BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A running reader thread and the queue it fills.
pub struct SourceHandle {
    pub source: SourceId,
    receiver: Receiver<Reading>,
    thread: Option<JoinHandle<()>>,
}

impl SourceHandle {
    /// Non-blocking drain: every reading queued since the last call, in
    /// arrival order.
    pub fn drain(&self) -> Vec<Reading> {
        let mut out = Vec::new();
        while let Ok(reading) = self.receiver.try_recv() {
            out.push(reading);
        }
        out
    }

    /// Join the reader thread. Call only after the shared shutdown flag is
    /// set; the thread exits at its next poll timeout.
    pub fn join(mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("{:?} reader thread panicked", self.source);
            }
        }
    }
}

/// Spawn a reader thread feeding a bounded drop-oldest queue.
///
/// On overflow the oldest queued reading is discarded so memory stays
/// bounded and the aggregator always sees the freshest data under
/// sustained overload.
pub fn spawn_reader(
    mut reader: Box<dyn SourceReader>,
    queue_depth: usize,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<SourceHandle> {
    let source = reader.source();
    let (tx, rx) = bounded::<Reading>(queue_depth);
    let drop_rx = rx.clone();

    let thread = thread::Builder::new()
        .name(format!("{:?}-reader", source).to_lowercase())
        .spawn(move || {
            info!("{:?} reader started", source);
            let mut backoff = BACKOFF_INITIAL;
            while !shutdown.load(Ordering::Relaxed) {
                match reader.read() {
                    Ok(Some(reading)) => {
                        backoff = BACKOFF_INITIAL;
                        push_drop_oldest(&tx, &drop_rx, reading, source);
                    }
                    Ok(None) => {
                        backoff = BACKOFF_INITIAL;
                    }
                    Err(err) => {
                        warn!(
                            "{:?} read failed: {:#}; retrying in {:?}",
                            source, err, backoff
                        );
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
            info!("{:?} reader stopped", source);
        })?;

    Ok(SourceHandle {
        source,
        receiver: rx,
        thread: Some(thread),
    })
}

fn push_drop_oldest(tx: &Sender<Reading>, rx: &Receiver<Reading>, reading: Reading, source: SourceId) {
    match tx.try_send(reading) {
        Ok(()) => {}
        Err(TrySendError::Full(reading)) => {
            // Evict the oldest entry, then retry once. A second failure
            // means the consumer raced us to refill; drop the new reading.
            let _ = rx.try_recv();
            if tx.try_send(reading).is_err() {
                debug!("{:?} queue overflow, reading dropped", source);
            }
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
