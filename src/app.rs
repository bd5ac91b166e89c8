//! Single-machine run modes: the local flood with its REPL, and the canvas
//! fetcher.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::args::FlutArgs;
use crate::canvas;
use crate::error::{AppError, AppResult, ValidationError};
use crate::flut::{self, FlutRunner, FlutTask, OffsetSpec, PerfAggregator, Point};
use crate::repl::{self, Fluter};
use crate::shutdown::{self, ShutdownReceiver};

const METRICS_PRINT_INTERVAL: Duration = Duration::from_secs(5);
/// Edge length of generated stripe-pattern images.
const STRIPE_SIZE: u32 = 400;

struct LocalState {
    task: FlutTask,
    runner: Option<FlutRunner>,
}

/// Drives the flood on this machine. Task and runner live under one lock so
/// a REPL command can never observe a task without its matching pool.
struct LocalFluter {
    state: Mutex<LocalState>,
    perf: PerfAggregator,
}

impl LocalFluter {
    fn new(task: FlutTask, metrics: bool) -> Self {
        Self {
            state: Mutex::new(LocalState { task, runner: None }),
            perf: PerfAggregator::spawn(metrics),
        }
    }

    async fn apply(&self, task: FlutTask) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.runner.take() {
            active.stop().await;
        }
        state.runner = flut::start_flut(&task, self.perf.handle());
        state.task = task;
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.runner.take() {
            active.stop().await;
        }
    }
}

#[async_trait]
impl Fluter for LocalFluter {
    async fn current_task(&self) -> FlutTask {
        self.state.lock().await.task.clone()
    }

    async fn apply_task(&self, task: FlutTask) {
        self.apply(task).await;
    }

    async fn stop_task(&self) {
        let mut state = self.state.lock().await;
        state.task.paused = true;
        if let Some(active) = state.runner.take() {
            info!("Stopping task");
            active.stop().await;
        }
    }

    async fn toggle_metrics(&self) {
        let on = !self.perf.is_enabled();
        self.perf.set_enabled(on);
        info!("Metrics reporting {}", if on { "on" } else { "off" });
    }
}

/// Builds the initial task from CLI arguments.
///
/// # Errors
///
/// Fails when the image source is missing or unreadable.
pub fn build_task(args: &FlutArgs) -> AppResult<FlutTask> {
    let img = load_source(args)?;
    let origin = Point::new(args.xoffset, args.yoffset);
    let offset = if args.offset_rand {
        OffsetSpec::random(origin, None)
    } else {
        OffsetSpec::fixed(origin)
    };
    Ok(FlutTask {
        address: args.host.clone(),
        max_conns: args.connections,
        img,
        offset,
        order: args.order,
        rgb_split: args.rgbsplit,
        paused: false,
    })
}

fn load_source(args: &FlutArgs) -> AppResult<Option<Arc<RgbaImage>>> {
    if let Some(path) = &args.image {
        return Ok(Some(Arc::new(canvas::read_image(path)?)));
    }
    if let Some(name) = &args.stripes {
        let colors = canvas::palette(name)?;
        return Ok(Some(Arc::new(canvas::stripe_pattern(
            &colors,
            STRIPE_SIZE,
            STRIPE_SIZE,
        ))));
    }
    Ok(None)
}

/// Floods from this machine until shutdown, with the REPL on stdin and an
/// optional periodic metrics report.
pub async fn run_local(args: &FlutArgs, mut shutdown_rx: ShutdownReceiver) -> AppResult<()> {
    let task = build_task(args)?;
    if task.img.is_none() {
        return Err(AppError::validation(ValidationError::MissingImage));
    }
    info!("Fluting:\n{}", task);

    let fluter = Arc::new(LocalFluter::new(task.clone(), args.metrics));
    fluter.apply(task).await;

    let repl_driver = tokio::spawn(repl::run_repl(
        Arc::clone(&fluter) as Arc<dyn Fluter>,
        shutdown_rx.clone(),
    ));

    let reporter = {
        let fluter = Arc::clone(&fluter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_PRINT_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if fluter.perf.is_enabled() {
                    info!("{}", fluter.perf.snapshot());
                }
            }
        })
    };

    shutdown::wait(&mut shutdown_rx).await;
    repl_driver.abort();
    reporter.abort();
    fluter.shutdown().await;
    Ok(())
}

/// Downloads the current server canvas into an image file.
pub async fn run_fetch(
    args: &FlutArgs,
    out_path: &str,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    info!("Fetching canvas state from {}", args.host);
    let img = flut::fetch_image(None, &args.host, args.connections, shutdown_rx).await?;
    canvas::write_image(out_path, &img)?;
    info!("Wrote {}x{} canvas to {}", img.width(), img.height(), out_path);
    Ok(())
}
