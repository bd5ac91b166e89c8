use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{info, warn};

use crate::error::{AppError, AppResult, RpcError};
use crate::flut::{self, FlutRunner, PerfAggregator};
use crate::shutdown::ShutdownReceiver;

use super::protocol::{AckMessage, WireMessage, WorkerStatus, read_message, send_message};
use super::wire::task_from_wire;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long the die ack gets to flush before the connection is torn down.
const DIE_GRACE: Duration = Duration::from_millis(100);

enum SessionEnd {
    /// The controller told us to die.
    Died,
    /// The connection dropped; the worker should redial.
    Disconnected,
    /// Local shutdown signal.
    Shutdown,
}

/// Runs a worker against the controller at `controller_addr`, redialing on
/// connection loss until it is told to die or shut down locally.
pub async fn run_worker(controller_addr: &str, mut shutdown_rx: ShutdownReceiver) -> AppResult<()> {
    let perf = PerfAggregator::spawn(false);
    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }
        info!("Greeting Rán at {}", controller_addr);
        match worker_session(controller_addr, &perf, &mut shutdown_rx).await {
            Ok(SessionEnd::Died) => {
                info!("Rán told us to die, stopping");
                return Ok(());
            }
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Ok(SessionEnd::Disconnected) => warn!("Lost connection to Rán, reconnecting"),
            Err(err) => warn!("Session against Rán failed: {}", err),
        }
        tokio::select! {
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn worker_session(
    controller_addr: &str,
    perf: &PerfAggregator,
    shutdown_rx: &mut ShutdownReceiver,
) -> AppResult<SessionEnd> {
    let stream = TcpStream::connect(controller_addr).await.map_err(|err| {
        AppError::rpc(RpcError::Connection {
            addr: controller_addr.to_owned(),
            source: err,
        })
    })?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    info!("Awaiting task from Rán");

    // The active flood, if any. Whatever ends the session, the bomber pool
    // must be stopped explicitly or it keeps flooding unsupervised.
    let mut runner: Option<FlutRunner> = None;
    let end = serve(&mut reader, &mut write_half, &mut runner, perf, shutdown_rx).await;
    if let Some(active) = runner.take() {
        active.stop().await;
    }
    end
}

async fn serve(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    runner: &mut Option<FlutRunner>,
    perf: &PerfAggregator,
    shutdown_rx: &mut ShutdownReceiver,
) -> AppResult<SessionEnd> {
    loop {
        let message = tokio::select! {
            message = read_message(reader) => message,
            changed = shutdown_rx.changed() => {
                // A dropped sender counts as shutdown too.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(SessionEnd::Shutdown);
                }
                continue;
            }
        };
        let message = match message {
            Ok(message) => message,
            Err(RpcError::ConnectionClosed) => return Ok(SessionEnd::Disconnected),
            Err(err) => return Err(err.into()),
        };
        match message {
            WireMessage::Flut(wire) => {
                // A new task always supersedes the running one, even if it
                // later turns out not to be flutable.
                if let Some(active) = runner.take() {
                    active.stop().await;
                }
                match task_from_wire(*wire) {
                    Ok(task) => {
                        info!("Rán gave us /w o r k/!\n{}", task);
                        *runner = flut::start_flut(&task, perf.handle());
                        send_message(writer, &WireMessage::Ack(AckMessage { ok: true })).await?;
                    }
                    Err(err) => {
                        warn!("Rejecting task: {}", err);
                        send_message(writer, &WireMessage::Ack(AckMessage { ok: false })).await?;
                    }
                }
            }
            WireMessage::Status(request) => {
                perf.set_enabled(request.metrics);
                // A driver that bailed out early (unreachable canvas, empty
                // command set) is not a running flood.
                if runner.as_ref().is_some_and(FlutRunner::is_finished) {
                    *runner = None;
                }
                let status = WorkerStatus {
                    ok: true,
                    fluting: runner.is_some(),
                    perf: perf.snapshot(),
                };
                send_message(writer, &WireMessage::StatusReply(status)).await?;
            }
            WireMessage::Stop => {
                if let Some(active) = runner.take() {
                    info!("Stopping task");
                    active.stop().await;
                }
                send_message(writer, &WireMessage::Ack(AckMessage { ok: true })).await?;
            }
            WireMessage::Die => {
                send_message(writer, &WireMessage::Ack(AckMessage { ok: true })).await?;
                tokio::time::sleep(DIE_GRACE).await;
                return Ok(SessionEnd::Died);
            }
            WireMessage::Ack(_) | WireMessage::StatusReply(_) => {
                warn!("Unexpected reply message from Rán, ignoring it");
            }
        }
    }
}
