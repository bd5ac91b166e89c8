//! Interactive task control on stdin. The same command set drives a local
//! flood and a controller-managed fleet through the [`Fluter`] trait.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::canvas;
use crate::flut::{FlutTask, OffsetSpec, Point, RenderOrder};
use crate::shutdown::ShutdownReceiver;

const HELP: &str = "Commands:
  start                      resume drawing
  stop                       pause drawing
  offset <x> <y> | rand      set the draw offset (of)
  connections <n>            set the connection count (c)
  address <host:port>        set the target server (a)
  order <ltr|rtl|ttb|btt|shuffle>  set the draw order (o)
  rgbsplit                   toggle the rgb-split effect
  img <path>                 load a new image (i)
  metrics                    toggle performance reporting
  help                       print this help";

/// Something that holds an active flood task and can swap it for a new one.
/// Implemented by the local runner and by the fleet controller, so the REPL
/// does not care whether a command lands on one machine or many.
#[async_trait]
pub trait Fluter: Send + Sync {
    async fn current_task(&self) -> FlutTask;
    async fn apply_task(&self, task: FlutTask);
    async fn stop_task(&self);
    async fn toggle_metrics(&self);
}

/// What a parsed REPL line asks for.
enum Command {
    /// Replace the task with this modified copy.
    Apply(FlutTask),
    Stop,
    ToggleMetrics,
    Help,
    Nothing,
}

/// Reads commands from stdin until EOF or shutdown.
pub async fn run_repl(fluter: Arc<dyn Fluter>, mut shutdown_rx: ShutdownReceiver) {
    println!("REPL is active.\n{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        };
        let input = match line {
            Ok(Some(input)) => input,
            // EOF (e.g. piped stdin) just retires the REPL; the flood
            // itself keeps running.
            Ok(None) => return,
            Err(err) => {
                warn!("REPL input error: {}", err);
                return;
            }
        };
        let task = fluter.current_task().await;
        match parse_command(&input, task) {
            Command::Apply(task) => {
                println!("{task}");
                fluter.apply_task(task).await;
            }
            Command::Stop => fluter.stop_task().await,
            Command::ToggleMetrics => fluter.toggle_metrics().await,
            Command::Help => println!("{HELP}"),
            Command::Nothing => {}
        }
    }
}

/// Applies one REPL line to a copy of the current task.
fn parse_command(input: &str, mut task: FlutTask) -> Command {
    let mut parts = input.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Command::Nothing;
    };
    let args: Vec<&str> = parts.collect();
    match cmd.to_ascii_lowercase().as_str() {
        "start" => {
            task.paused = false;
            Command::Apply(task)
        }
        "stop" => Command::Stop,
        "offset" | "of" => match args.as_slice() {
            ["rand"] => {
                task.offset = OffsetSpec::random(task.offset.origin, task.offset.mask.clone());
                Command::Apply(task)
            }
            [x, y] => match (x.parse::<i32>(), y.parse::<i32>()) {
                (Ok(x), Ok(y)) => {
                    task.offset = OffsetSpec::fixed(Point::new(x, y));
                    Command::Apply(task)
                }
                _ => {
                    println!("offset wants two integers or 'rand'");
                    Command::Nothing
                }
            },
            _ => {
                println!("offset wants two integers or 'rand'");
                Command::Nothing
            }
        },
        "connections" | "c" => match args.first().map(|raw| raw.parse::<usize>()) {
            Some(Ok(conns)) if conns > 0 => {
                task.max_conns = conns;
                Command::Apply(task)
            }
            _ => {
                println!("connections wants a positive integer");
                Command::Nothing
            }
        },
        "address" | "a" => match args.first() {
            Some(addr) => {
                task.address = (*addr).to_owned();
                Command::Apply(task)
            }
            None => {
                println!("address wants a host:port");
                Command::Nothing
            }
        },
        "order" | "o" => match args.first() {
            Some(raw) => {
                // Unknown orders fall back to shuffle; the parse cannot fail.
                let Ok(order) = raw.parse::<RenderOrder>();
                task.order = order;
                Command::Apply(task)
            }
            None => {
                println!("order wants one of ltr, rtl, ttb, btt, shuffle");
                Command::Nothing
            }
        },
        "rgbsplit" => {
            task.rgb_split = !task.rgb_split;
            Command::Apply(task)
        }
        "img" | "i" => match args.first() {
            Some(path) => match canvas::read_image(path) {
                Ok(img) => {
                    task.img = Some(Arc::new(img));
                    Command::Apply(task)
                }
                Err(err) => {
                    println!("{err}");
                    Command::Nothing
                }
            },
            None => {
                println!("img wants a file path");
                Command::Nothing
            }
        },
        "metrics" => Command::ToggleMetrics,
        "help" => Command::Help,
        _ => {
            println!("Unknown command '{cmd}'.\n{HELP}");
            Command::Nothing
        }
    }
}
