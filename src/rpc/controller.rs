use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, RpcError};
use crate::flut::{FlutTask, PerfSnapshot};
use crate::repl::{self, Fluter};
use crate::shutdown::{self, ShutdownReceiver};

use super::protocol::{StatusRequest, WireMessage, WorkerStatus, read_message, send_message};
use super::wire::build_wire_task;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Fleet metrics are printed every this many polls (5 s at the poll rate).
const PRINT_EVERY_POLLS: u32 = 50;
const CALL_TIMEOUT: Duration = Duration::from_secs(2);
/// Die is fire-and-forget; this is how long the replies get to flush.
const DIE_GRACE: Duration = Duration::from_millis(100);

struct WorkerConn {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

async fn call(conn: &mut WorkerConn, message: &WireMessage) -> Result<WireMessage, RpcError> {
    // The timeout spans the send too; a peer with a full receive buffer must
    // not stall the round either.
    let exchange = async {
        send_message(&mut conn.writer, message).await?;
        read_message(&mut conn.reader).await
    };
    match tokio::time::timeout(CALL_TIMEOUT, exchange).await {
        Ok(reply) => reply,
        Err(_elapsed) => Err(RpcError::CallTimeout),
    }
}

/// Sends `message` and interprets the reply as an ack. `Ok(false)` means the
/// worker answered but declined.
async fn expect_ack(conn: &mut WorkerConn, message: &WireMessage) -> Result<bool, RpcError> {
    match call(conn, message).await? {
        WireMessage::Ack(ack) => Ok(ack.ok),
        _ => Err(RpcError::UnexpectedReply { expected: "ack" }),
    }
}

async fn expect_status(
    conn: &mut WorkerConn,
    request: StatusRequest,
) -> Result<WorkerStatus, RpcError> {
    match call(conn, &WireMessage::Status(request)).await? {
        WireMessage::StatusReply(status) => Ok(status),
        _ => Err(RpcError::UnexpectedReply {
            expected: "status reply",
        }),
    }
}

struct ControllerState {
    workers: Vec<WorkerConn>,
    task: FlutTask,
    metrics: bool,
    fleet: PerfSnapshot,
}

/// The fleet controller: accepts workers, pushes the active task to each of
/// them, polls their status and evicts the unresponsive. It runs no local
/// flood itself.
///
/// Locking: `state` is only ever held across in-memory work. Roster-wide
/// RPC rounds (poll, broadcast, die) take the connections out of the state,
/// run the calls with the lock released and merge the survivors back in;
/// `rounds` serializes those rounds against each other so a broadcast never
/// races a poll for the same connections. Admission takes the same guard, so
/// the task it pushes to a late joiner is never mid-replacement; with the
/// calls inside a round running in parallel, the wait is one call timeout at
/// worst.
#[derive(Clone)]
pub struct Controller {
    state: Arc<Mutex<ControllerState>>,
    rounds: Arc<Mutex<()>>,
}

impl Controller {
    #[must_use]
    pub fn new(task: FlutTask, metrics: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                workers: Vec::new(),
                task,
                metrics,
                fleet: PerfSnapshot::default(),
            })),
            rounds: Arc::new(Mutex::new(())),
        }
    }

    /// Takes the roster out of the state for an RPC round. Callers must hold
    /// the `rounds` guard and give the survivors back via `merge_roster`.
    async fn take_roster(&self) -> Vec<WorkerConn> {
        std::mem::take(&mut self.state.lock().await.workers)
    }

    async fn merge_roster(&self, mut kept: Vec<WorkerConn>, before: usize) {
        if kept.len() != before {
            info!("{} workers connected", kept.len());
        }
        self.state.lock().await.workers.append(&mut kept);
    }

    /// Aggregated fleet performance, as of the last completed poll round.
    pub async fn fleet_status(&self) -> PerfSnapshot {
        self.state.lock().await.fleet
    }

    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    pub(super) async fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let mut conn = WorkerConn {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        // Serializes with broadcasts, so the task pushed here cannot be
        // outdated by an apply running at the same moment.
        let _round = self.rounds.lock().await;
        let push = {
            let state = self.state.lock().await;
            info!(
                "New worker connected: {} ({} total)",
                conn.addr,
                state.workers.len() + 1
            );
            state
                .task
                .img
                .is_some()
                .then(|| WireMessage::Flut(Box::new(build_wire_task(&state.task))))
        };
        // Late joiners get the active task right away. A failed push is not
        // fatal here, the status poll will evict a dead connection.
        if let Some(push) = push {
            match expect_ack(&mut conn, &push).await {
                Ok(true) => debug!("Worker {} accepted active task", conn.addr),
                Ok(false) => warn!("Worker {} rejected active task", conn.addr),
                Err(err) => warn!("Task push to {} failed: {}", conn.addr, err),
            }
        }
        self.state.lock().await.workers.push(conn);
    }

    /// One status round over the whole roster, all workers in parallel so a
    /// hung peer costs the round one call timeout, not one per peer. Workers
    /// that fail the poll or answer not-ok are removed, with a single log
    /// line per roster change.
    pub(super) async fn poll_once(&self) {
        let _round = self.rounds.lock().await;
        let request = StatusRequest {
            metrics: self.state.lock().await.metrics,
        };
        let polled = self.take_roster().await;
        let before = polled.len();
        let mut round = JoinSet::new();
        for mut conn in polled {
            round.spawn(async move {
                match expect_status(&mut conn, request).await {
                    Ok(status) if status.ok => Some((conn, status.perf)),
                    Ok(_) => {
                        info!("Worker {} reported not-ok, dropping it", conn.addr);
                        None
                    }
                    Err(err) => {
                        info!("Worker {} unreachable ({}), dropping it", conn.addr, err);
                        None
                    }
                }
            });
        }
        let mut kept = Vec::with_capacity(before);
        let mut fleet = PerfSnapshot::default();
        while let Some(result) = round.join_next().await {
            if let Ok(Some((conn, perf))) = result {
                fleet.merge(&perf);
                kept.push(conn);
            }
        }
        self.merge_roster(kept, before).await;
        self.state.lock().await.fleet = fleet;
    }

    async fn print_metrics(&self) {
        let state = self.state.lock().await;
        if state.metrics {
            info!("Fleet: {}", state.fleet);
        }
    }

    /// Tells every worker to die and gives the replies a short grace period.
    /// No reply is awaited, a vanished worker should not stall shutdown.
    pub async fn shutdown_fleet(&self) {
        let _round = self.rounds.lock().await;
        let mut workers = self.take_roster().await;
        for conn in &mut workers {
            if let Err(err) = send_message(&mut conn.writer, &WireMessage::Die).await {
                debug!("Die to {} failed: {}", conn.addr, err);
            }
        }
        if !workers.is_empty() {
            info!("Sent die to {} workers", workers.len());
        }
        drop(workers);
        tokio::time::sleep(DIE_GRACE).await;
    }
}

#[async_trait]
impl Fluter for Controller {
    async fn current_task(&self) -> FlutTask {
        self.state.lock().await.task.clone()
    }

    async fn apply_task(&self, task: FlutTask) {
        let _round = self.rounds.lock().await;
        let wire = {
            let mut state = self.state.lock().await;
            state.task = task;
            build_wire_task(&state.task)
        };
        let broadcast = self.take_roster().await;
        let before = broadcast.len();
        let mut round = JoinSet::new();
        for mut conn in broadcast {
            let push = WireMessage::Flut(Box::new(wire.clone()));
            round.spawn(async move {
                match expect_ack(&mut conn, &push).await {
                    Ok(true) => Some(conn),
                    Ok(false) => {
                        warn!("Worker {} rejected task", conn.addr);
                        Some(conn)
                    }
                    Err(err) => {
                        info!("Worker {} unreachable ({}), dropping it", conn.addr, err);
                        None
                    }
                }
            });
        }
        let mut kept = Vec::with_capacity(before);
        while let Some(result) = round.join_next().await {
            if let Ok(Some(conn)) = result {
                kept.push(conn);
            }
        }
        self.merge_roster(kept, before).await;
    }

    async fn stop_task(&self) {
        let _round = self.rounds.lock().await;
        self.state.lock().await.task.paused = true;
        let broadcast = self.take_roster().await;
        let before = broadcast.len();
        let mut round = JoinSet::new();
        for mut conn in broadcast {
            round.spawn(async move {
                match expect_ack(&mut conn, &WireMessage::Stop).await {
                    Ok(_) => Some(conn),
                    Err(err) => {
                        info!("Worker {} unreachable ({}), dropping it", conn.addr, err);
                        None
                    }
                }
            });
        }
        let mut kept = Vec::with_capacity(before);
        while let Some(result) = round.join_next().await {
            if let Ok(Some(conn)) = result {
                kept.push(conn);
            }
        }
        self.merge_roster(kept, before).await;
    }

    async fn toggle_metrics(&self) {
        let mut state = self.state.lock().await;
        state.metrics = !state.metrics;
        info!(
            "Fleet metrics reporting {}",
            if state.metrics { "on" } else { "off" }
        );
    }
}

/// Runs the controller until shutdown: accept loop, status poller and the
/// interactive REPL, then a best-effort die broadcast to the fleet.
pub async fn run_controller(
    listen_addr: &str,
    task: FlutTask,
    metrics: bool,
    mut shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let listener = TcpListener::bind(listen_addr).await.map_err(|err| {
        AppError::rpc(RpcError::Bind {
            addr: listen_addr.to_owned(),
            source: err,
        })
    })?;
    info!("Rán listening on {}", listen_addr);
    let controller = Controller::new(task, metrics);

    let acceptor = {
        let controller = controller.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => controller.admit(stream, addr).await,
                    Err(err) => {
                        warn!("Accept failed: {}", err);
                        break;
                    }
                }
            }
        })
    };

    let poller = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut polls: u32 = 0;
            loop {
                interval.tick().await;
                controller.poll_once().await;
                polls = polls.wrapping_add(1);
                if polls % PRINT_EVERY_POLLS == 0 {
                    controller.print_metrics().await;
                }
            }
        })
    };

    let repl_driver = tokio::spawn(repl::run_repl(
        Arc::new(controller.clone()) as Arc<dyn Fluter>,
        shutdown_rx.clone(),
    ));

    shutdown::wait(&mut shutdown_rx).await;
    acceptor.abort();
    poller.abort();
    repl_driver.abort();
    controller.shutdown_fleet().await;
    Ok(())
}
