use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const DELTA_CHANNEL_CAPACITY: usize = 512;

/// Point-in-time view of the aggregator counters. Copies are safe to share;
/// only the consumer task ever mutates the live counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfSnapshot {
    pub conns: i64,
    pub bytes_per_sec: u64,
    pub bytes_total: u64,
}

impl PerfSnapshot {
    pub fn merge(&mut self, other: &PerfSnapshot) {
        self.conns += other.conns;
        self.bytes_per_sec += other.bytes_per_sec;
        self.bytes_total += other.bytes_total;
    }
}

impl fmt::Display for PerfSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conns\t{}/s\ttotal {}",
            self.conns,
            fmt_bytes(self.bytes_per_sec),
            fmt_bytes(self.bytes_total)
        )
    }
}

fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Cheap, clonable producer side handed to every bomber.
#[derive(Clone)]
pub struct PerfHandle {
    bytes_tx: mpsc::Sender<u64>,
    conns_tx: mpsc::Sender<i64>,
    enabled: Arc<AtomicBool>,
}

impl PerfHandle {
    /// Reports bytes written on the hot path. When reporting is disabled the
    /// send is skipped entirely; the channel send itself costs measurable
    /// throughput under saturation.
    pub async fn record_bytes(&self, n: usize) {
        if self.enabled.load(Ordering::Relaxed) {
            let _ = self.bytes_tx.send(n as u64).await;
        }
    }

    pub async fn connected(&self) {
        let _ = self.conns_tx.send(1).await;
    }

    pub async fn disconnected(&self) {
        let _ = self.conns_tx.send(-1).await;
    }
}

/// Single-consumer throughput aggregator. All counters are owned by one
/// drainer task fed through channels, so bombers never contend on a lock.
pub struct PerfAggregator {
    handle: PerfHandle,
    snapshot_rx: watch::Receiver<PerfSnapshot>,
    consumer: JoinHandle<()>,
}

impl PerfAggregator {
    #[must_use]
    pub fn spawn(enabled: bool) -> Self {
        let (bytes_tx, mut bytes_rx) = mpsc::channel::<u64>(DELTA_CHANNEL_CAPACITY);
        let (conns_tx, mut conns_rx) = mpsc::channel::<i64>(DELTA_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(PerfSnapshot::default());
        let enabled = Arc::new(AtomicBool::new(enabled));

        let consumer = tokio::spawn(async move {
            let mut snapshot = PerfSnapshot::default();
            let mut bytes_this_second: u64 = 0;
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    maybe_bytes = bytes_rx.recv() => {
                        let Some(bytes) = maybe_bytes else { break };
                        bytes_this_second += bytes;
                        snapshot.bytes_total += bytes;
                    }
                    maybe_delta = conns_rx.recv() => {
                        let Some(delta) = maybe_delta else { break };
                        snapshot.conns += delta;
                        let _ = snapshot_tx.send(snapshot);
                    }
                    _ = interval.tick() => {
                        snapshot.bytes_per_sec = bytes_this_second;
                        bytes_this_second = 0;
                        let _ = snapshot_tx.send(snapshot);
                    }
                }
            }
        });

        Self {
            handle: PerfHandle {
                bytes_tx,
                conns_tx,
                enabled,
            },
            snapshot_rx,
            consumer,
        }
    }

    #[must_use]
    pub fn handle(&self) -> PerfHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> PerfSnapshot {
        *self.snapshot_rx.borrow()
    }

    /// Runtime toggle for byte reporting; connection deltas always flow so
    /// the active-connection count stays correct.
    pub fn set_enabled(&self, on: bool) {
        self.handle.enabled.store(on, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.handle.enabled.load(Ordering::Relaxed)
    }
}

impl Drop for PerfAggregator {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}
