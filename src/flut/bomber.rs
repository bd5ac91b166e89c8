use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::shutdown::ShutdownReceiver;

use super::commands::offset_cmd;
use super::perf::PerfHandle;
use super::task::OffsetSpec;

pub const BACKOFF_MIN: Duration = Duration::from_millis(100);
pub const BACKOFF_MAX: Duration = Duration::from_secs(10);

#[must_use]
pub fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(BACKOFF_MAX)
}

/// Writes `buffer` to `address` over one TCP connection, forever, as fast as
/// possible. Dial and write failures are transient: the connection is
/// reopened with exponential backoff and the loop never surfaces an error.
/// Only cancellation ends it. The cancel signal is observed once per full
/// buffer write, so cancellation latency is bounded by one write.
pub async fn bomb_address(
    buffer: Arc<Vec<u8>>,
    address: String,
    dyn_offset: Option<OffsetSpec>,
    perf: PerfHandle,
    mut cancel: ShutdownReceiver,
) {
    let mut backoff = BACKOFF_MIN;
    loop {
        if *cancel.borrow() {
            return;
        }
        let mut stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!("Dial {} failed, retrying in {:?}: {}", address, backoff, err);
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = cancel.changed() => {}
                }
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = BACKOFF_MIN;
        perf.connected().await;

        loop {
            if *cancel.borrow() {
                let _ = stream.shutdown().await;
                perf.disconnected().await;
                return;
            }
            if let Some(offset) = dyn_offset.as_ref() {
                let next = offset.sample(&mut rand::thread_rng());
                if let Err(err) = stream.write_all(&offset_cmd(next)).await {
                    debug!("Write to {} failed, reconnecting: {}", address, err);
                    perf.disconnected().await;
                    break;
                }
            }
            match stream.write_all(&buffer).await {
                Ok(()) => perf.record_bytes(buffer.len()).await,
                Err(err) => {
                    debug!("Write to {} failed, reconnecting: {}", address, err);
                    perf.disconnected().await;
                    break;
                }
            }
        }
    }
}
