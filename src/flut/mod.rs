//! Pixelflut core: command generation, flood tasks, per-connection bombing,
//! canvas fetch-back, and throughput accounting.
mod bomber;
mod commands;
mod fetch;
mod perf;
mod runner;
mod task;

#[cfg(test)]
mod tests;

pub use bomber::{BACKOFF_MAX, BACKOFF_MIN, bomb_address, next_backoff};
pub use commands::{
    CommandSet, Point, Rect, RenderOrder, fetch_commands, generate_commands, offset_cmd,
};
pub use fetch::{canvas_size, fetch_image, parse_pixel_line, parse_size_line};
pub use perf::{PerfAggregator, PerfHandle, PerfSnapshot};
pub use runner::{FlutRunner, start_flut, task_commands};
pub use task::{FlutTask, OffsetSpec};
