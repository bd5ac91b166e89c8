use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use tracing::info;

use crate::app;
use crate::args::FlutArgs;
use crate::config;
use crate::error::{AppError, AppResult, ValidationError};
use crate::logger;
use crate::rpc;
use crate::shutdown;

/// What one invocation does, decided up front from the validated arguments.
enum RunPlan {
    Controller { listen: String, args: FlutArgs },
    Worker { controller: String, args: FlutArgs },
    Fetch { out_path: String, args: FlutArgs },
    Local { args: FlutArgs },
}

/// Process entry point: parses and validates the configuration, builds the
/// runtime and drives the selected mode to completion.
///
/// # Errors
///
/// Returns all startup errors (bad flags, bad config, bad image) and any
/// fatal runtime error of the selected mode.
pub fn run() -> AppResult<()> {
    let matches = match FlutArgs::command().try_get_matches_from(std::env::args_os()) {
        Ok(matches) => matches,
        // Covers help/version as well as usage errors; clap renders the
        // message itself and picks the right exit code.
        Err(err) => err.exit(),
    };
    let mut args = FlutArgs::from_arg_matches(&matches)?;
    logger::init_logging(args.verbose);
    if let Some(file_config) = config::load_config(args.config.as_deref())? {
        config::apply_config(&mut args, &matches, &file_config)?;
    }
    let plan = build_plan(args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(plan))
}

fn build_plan(args: FlutArgs) -> AppResult<RunPlan> {
    if args.connections == 0 {
        return Err(AppError::validation(ValidationError::ZeroConnections));
    }
    if args.host.trim().is_empty() {
        return Err(AppError::validation(ValidationError::MissingAddress));
    }
    if args.ran.is_some() && args.hevring.is_some() {
        return Err(AppError::validation(
            ValidationError::ControllerWorkerConflict,
        ));
    }
    Ok(if let Some(controller) = args.hevring.clone() {
        RunPlan::Worker { controller, args }
    } else if let Some(listen) = args.ran.clone() {
        RunPlan::Controller { listen, args }
    } else if let Some(out_path) = args.fetch.clone() {
        RunPlan::Fetch { out_path, args }
    } else {
        RunPlan::Local { args }
    })
}

async fn execute(plan: RunPlan) -> AppResult<()> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    shutdown::spawn_signal_handler(shutdown_tx.clone());

    let args = match &plan {
        RunPlan::Controller { args, .. }
        | RunPlan::Worker { args, .. }
        | RunPlan::Fetch { args, .. }
        | RunPlan::Local { args } => args,
    };
    if args.runtime > Duration::ZERO {
        let deadline = args.runtime;
        let deadline_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            info!("Runtime of {:?} elapsed, shutting down", deadline);
            let _ = deadline_tx.send(true);
        });
    }

    match plan {
        RunPlan::Controller { listen, args } => {
            // The controller may start with an empty task and feed the fleet
            // later through the REPL.
            let task = app::build_task(&args)?;
            rpc::run_controller(&listen, task, args.metrics, shutdown_rx).await
        }
        RunPlan::Worker { controller, .. } => rpc::run_worker(&controller, shutdown_rx).await,
        RunPlan::Fetch { out_path, args } => app::run_fetch(&args, &out_path, shutdown_rx).await,
        RunPlan::Local { args } => app::run_local(&args, shutdown_rx).await,
    }
}
