use std::fmt;
use std::str::FromStr;

use image::{Rgba, RgbaImage};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Traversal order for emitting per-pixel commands. Only affects the visual
/// fill progression at the server, never which pixels get sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOrder {
    #[default]
    LeftToRight,
    TopToBottom,
    RightToLeft,
    BottomToTop,
    Shuffle,
}

impl RenderOrder {
    #[must_use]
    pub const fn is_vertical(self) -> bool {
        matches!(self, RenderOrder::TopToBottom | RenderOrder::BottomToTop)
    }

    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(self, RenderOrder::RightToLeft | RenderOrder::BottomToTop)
    }
}

impl FromStr for RenderOrder {
    type Err = std::convert::Infallible;

    /// Anything that is not a known direction means "shuffle".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "ltr" | "l" | "→" => RenderOrder::LeftToRight,
            "rtl" | "r" | "←" => RenderOrder::RightToLeft,
            "ttb" | "t" | "↓" => RenderOrder::TopToBottom,
            "btt" | "b" | "↑" => RenderOrder::BottomToTop,
            _ => RenderOrder::Shuffle,
        })
    }
}

impl fmt::Display for RenderOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            RenderOrder::LeftToRight => "→",
            RenderOrder::TopToBottom => "↓",
            RenderOrder::RightToLeft => "←",
            RenderOrder::BottomToTop => "↑",
            RenderOrder::Shuffle => "random",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub const fn add(self, other: Point) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Pixel rectangle in absolute canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    #[must_use]
    pub const fn area(&self) -> usize {
        (self.w as usize) * (self.h as usize)
    }
}

/// An ordered sequence of wire commands destined for one pixelflut server.
#[derive(Clone, Debug, Default)]
pub struct CommandSet {
    cmds: Vec<Vec<u8>>,
}

impl CommandSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    #[must_use]
    pub fn commands(&self) -> &[Vec<u8>] {
        &self.cmds
    }

    pub fn extend(&mut self, other: CommandSet) {
        self.cmds.extend(other.cmds);
    }

    /// Reorders the commands randomly, in place.
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    pub fn shuffle_with<R: Rng>(&mut self, rng: &mut R) {
        self.cmds.shuffle(rng);
    }

    /// Splits the set into `n` equally sized chunks, flattening each chunk so
    /// that all of its commands form a single contiguous buffer. Any remainder
    /// commands beyond `n * (len / n)` are dropped; callers needing exact
    /// coverage must pick `n` as a divisor of `len`. `n == 0` is a programming
    /// error and panics on the division.
    #[must_use]
    pub fn chunk(&self, n: usize) -> Vec<Vec<u8>> {
        let chunk_len = self.cmds.len() / n;
        let mut chunks = Vec::with_capacity(n);
        for i in 0..n {
            let offset = i * chunk_len;
            let mut buffer = Vec::new();
            for cmd in self.cmds.iter().skip(offset).take(chunk_len) {
                buffer.extend_from_slice(cmd);
            }
            chunks.push(buffer);
        }
        chunks
    }
}

impl FromIterator<Vec<u8>> for CommandSet {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self {
            cmds: iter.into_iter().collect(),
        }
    }
}

/// Converts an image into set-pixel commands, traversing the pixel rectangle
/// in the given order and applying `offset` to the emitted coordinates.
///
/// Fully transparent pixels produce no command; pixels whose absolute
/// coordinates would be negative (possible with effect offsets) are skipped.
/// Opaque pixels use the compact 6-digit color form, everything else sends
/// an 8-digit RGBA color.
#[must_use]
pub fn generate_commands(img: &RgbaImage, offset: Point, order: RenderOrder) -> CommandSet {
    let (w, h) = img.dimensions();
    let mut cmds = Vec::with_capacity((w as usize) * (h as usize));

    let (outer_len, inner_len) = if order.is_vertical() { (h, w) } else { (w, h) };
    let outer = axis_indices(outer_len, order.is_reverse());
    let inner = axis_indices(inner_len, order.is_reverse());

    for &i1 in &outer {
        for &i2 in &inner {
            let (x, y) = if order.is_vertical() { (i2, i1) } else { (i1, i2) };
            let px = img.get_pixel(x, y);
            if px[3] == 0 {
                continue;
            }
            let cx = i64::from(x) + i64::from(offset.x);
            let cy = i64::from(y) + i64::from(offset.y);
            if cx < 0 || cy < 0 {
                continue;
            }
            cmds.push(px_cmd(cx, cy, px));
        }
    }

    let mut set = CommandSet { cmds };
    if order == RenderOrder::Shuffle {
        set.shuffle();
    }
    set
}

fn axis_indices(len: u32, reverse: bool) -> Vec<u32> {
    let mut indices: Vec<u32> = (0..len).collect();
    if reverse {
        indices.reverse();
    }
    indices
}

fn px_cmd(x: i64, y: i64, px: &Rgba<u8>) -> Vec<u8> {
    let [r, g, b, a] = px.0;
    if a == 0xff {
        format!("PX {} {} {:02x}{:02x}{:02x}\n", x, y, r, g, b).into_bytes()
    } else {
        format!("PX {} {} {:02x}{:02x}{:02x}{:02x}\n", x, y, r, g, b, a).into_bytes()
    }
}

/// Read-request commands for every pixel inside `bounds`, column by column.
#[must_use]
pub fn fetch_commands(bounds: Rect) -> CommandSet {
    let mut cmds = Vec::with_capacity(bounds.area());
    for x in bounds.x..bounds.x.saturating_add(bounds.w) {
        for y in bounds.y..bounds.y.saturating_add(bounds.h) {
            cmds.push(format!("PX {} {}\n", x, y).into_bytes());
        }
    }
    CommandSet { cmds }
}

/// Positional offset applied by the server to all subsequent commands on the
/// connection. Non-standard extension; servers without support treat the line
/// as a no-op and the client cannot detect either way.
#[must_use]
pub fn offset_cmd(p: Point) -> Vec<u8> {
    format!("OFFSET {} {}\n", p.x, p.y).into_bytes()
}
