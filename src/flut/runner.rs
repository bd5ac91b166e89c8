use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, warn};

use crate::canvas::color_filter;
use crate::shutdown::{self, ShutdownReceiver};

use super::commands::{CommandSet, Point, generate_commands};
use super::fetch::canvas_size;
use super::perf::PerfHandle;
use super::task::FlutTask;

/// Dial stagger between bomber spawns, to avoid toppling the server with a
/// burst of simultaneous connects.
const SPAWN_STAGGER: Duration = Duration::from_millis(50);

/// The rgb-split effect: three color-filtered ghost passes around the main
/// image, each remapping white to one primary.
const RGB_SPLIT_PASSES: [([u8; 4], Point); 3] = [
    ([0xff, 0, 0, 0xff], Point::new(-10, -10)),
    ([0, 0xff, 0, 0xff], Point::new(10, 0)),
    ([0, 0, 0xff, 0xff], Point::new(-10, 10)),
];

/// Generates the full command set for a task: effect passes first, then the
/// main image pass.
#[must_use]
pub fn task_commands(task: &FlutTask, img: &RgbaImage) -> CommandSet {
    let mut cmds = CommandSet::default();
    if task.rgb_split {
        let white = Rgba([0xff, 0xff, 0xff, 0xff]);
        for (color, shift) in RGB_SPLIT_PASSES {
            let filtered = color_filter(img, white, Rgba(color));
            cmds.extend(generate_commands(
                &filtered,
                task.offset.origin.add(shift),
                task.order,
            ));
        }
    }
    cmds.extend(generate_commands(img, task.offset.origin, task.order));
    cmds
}

/// Handle to a running bomber pool. Stopping fires the pool's cancellation
/// signal and waits until every bomber has actually exited.
pub struct FlutRunner {
    cancel: shutdown::ShutdownSender,
    driver: JoinHandle<()>,
}

impl FlutRunner {
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        let _ = self.driver.await;
    }

    /// True once the driver has exited, whether through `stop`, a failed
    /// startup (unreachable canvas, empty command set) or a finished pool.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }
}

/// Starts the bomber pool for `task` and returns without waiting for it.
/// Non-flutable tasks (no image, paused, ...) start nothing.
#[must_use]
pub fn start_flut(task: &FlutTask, perf: PerfHandle) -> Option<FlutRunner> {
    if !task.is_flutable() {
        return None;
    }
    let task = task.clone();
    let (cancel_tx, cancel_rx) = shutdown::channel();
    let driver = tokio::spawn(drive_flut(task, perf, cancel_rx));
    Some(FlutRunner {
        cancel: cancel_tx,
        driver,
    })
}

async fn drive_flut(mut task: FlutTask, perf: PerfHandle, cancel: ShutdownReceiver) {
    let Some(img) = task.img.clone() else { return };

    // A random offset needs the canvas bounds before sampling can be capped.
    if task.offset.random {
        match canvas_size(&task.address).await {
            Ok((w, h)) => {
                task.offset.set_max(Point::new(
                    w as i32 - img.width() as i32,
                    h as i32 - img.height() as i32,
                ));
            }
            Err(err) => {
                error!("Canvas size query failed, flut not started: {}", err);
                return;
            }
        }
    }

    let cmds = task_commands(&task, &img);
    if cmds.is_empty() {
        warn!("Task produced no commands (fully transparent image?)");
        return;
    }

    // With a random offset every connection redraws the whole image at its
    // own sampled position, so the commands are not split per connection.
    let chunks = if task.offset.random {
        cmds.chunk(1)
    } else {
        cmds.chunk(task.max_conns)
    };
    let buffers: Vec<Arc<Vec<u8>>> = chunks.into_iter().map(Arc::new).collect();
    let dyn_offset = task.offset.random.then(|| task.offset.clone());

    let mut pool = JoinSet::new();
    for i in 0..task.max_conns {
        let buffer = buffers
            .get(i)
            .or_else(|| buffers.first())
            .cloned()
            .unwrap_or_default();
        if buffer.is_empty() {
            continue;
        }
        tokio::time::sleep(SPAWN_STAGGER).await;
        pool.spawn(super::bomber::bomb_address(
            buffer,
            task.address.clone(),
            dyn_offset.clone(),
            perf.clone(),
            cancel.clone(),
        ));
    }
    while pool.join_next().await.is_some() {}
}
