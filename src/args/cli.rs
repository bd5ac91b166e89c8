use std::time::Duration;

use clap::Parser;

use crate::flut::RenderOrder;

use super::parsers::parse_duration_arg;

/// A pixelflut client that fills the canvas as fast as the pipe allows.
#[derive(Parser, Debug, Clone)]
#[command(name = "pxflood", version, about)]
pub struct FlutArgs {
    /// Image file to draw (PNG, JPEG or GIF)
    #[arg(short, long, value_name = "FILE")]
    pub image: Option<String>,

    /// Draw a built-in striped flag instead of an image file
    /// (lgbti, nonbinary, trans)
    #[arg(long, value_name = "PALETTE", conflicts_with = "image")]
    pub stripes: Option<String>,

    /// Horizontal draw offset in canvas pixels
    #[arg(short = 'x', long = "xoffset", default_value_t = 0, allow_hyphen_values = true)]
    pub xoffset: i32,

    /// Vertical draw offset in canvas pixels
    #[arg(short = 'y', long = "yoffset", default_value_t = 0, allow_hyphen_values = true)]
    pub yoffset: i32,

    /// Number of parallel connections
    #[arg(short, long, default_value_t = 4)]
    pub connections: usize,

    /// Target pixelflut server as host:port
    #[arg(long, env = "PXFLOOD_HOST", default_value = "127.0.0.1:1234")]
    pub host: String,

    /// How long to run before exiting (500ms, 30s, 5m, 2h); 0s means forever
    #[arg(long, value_parser = parse_duration_arg, default_value = "0s")]
    pub runtime: Duration,

    /// Pixel draw order: ltr, rtl, ttb, btt or shuffle
    #[arg(short, long, default_value = "ltr")]
    pub order: RenderOrder,

    /// Prepend red/green/blue ghost passes shifted around the image
    #[arg(long)]
    pub rgbsplit: bool,

    /// Draw at a fresh random offset before every buffer write
    #[arg(long = "offset-rand")]
    pub offset_rand: bool,

    /// Fetch the current canvas into this file instead of flooding
    #[arg(long, value_name = "FILE")]
    pub fetch: Option<String>,

    /// Print performance metrics while running
    #[arg(long)]
    pub metrics: bool,

    /// Run as fleet controller (Rán), listening for workers on this address
    #[arg(long, value_name = "ADDR")]
    pub ran: Option<String>,

    /// Run as worker (Hevring) for the controller at this address
    #[arg(long, value_name = "ADDR")]
    pub hevring: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to a TOML config file (default: ./pxflood.toml if present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,
}
