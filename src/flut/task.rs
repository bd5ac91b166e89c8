use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use rand::Rng;

use super::commands::{Point, RenderOrder};

/// Rejection-sampling budget for mask-restricted random offsets.
pub(crate) const MASK_SAMPLE_ATTEMPTS: usize = 1000;

/// Where a task draws: a fixed top-left point, or a fresh random point per
/// buffer write, bounded by `[0, canvas - image)` and optionally restricted
/// to opaque pixels of a mask image.
#[derive(Clone, Debug, Default)]
pub struct OffsetSpec {
    pub origin: Point,
    pub random: bool,
    pub mask: Option<Arc<RgbaImage>>,
    max: Point,
}

impl OffsetSpec {
    #[must_use]
    pub fn fixed(origin: Point) -> Self {
        Self {
            origin,
            random: false,
            mask: None,
            max: Point::default(),
        }
    }

    #[must_use]
    pub fn random(origin: Point, mask: Option<Arc<RgbaImage>>) -> Self {
        Self {
            origin,
            random: true,
            mask,
            max: Point::default(),
        }
    }

    /// Upper bound (exclusive) for sampled offsets, derived from canvas size
    /// minus image size once the canvas dimensions are known.
    pub fn set_max(&mut self, max: Point) {
        self.max = max;
    }

    /// Samples the next offset. Mask-restricted sampling gives up after
    /// [`MASK_SAMPLE_ATTEMPTS`] rejections and falls back to the fixed
    /// origin, which may lie outside the mask.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Point {
        if !self.random || self.max.x <= 0 || self.max.y <= 0 {
            return self.origin;
        }
        for _ in 0..MASK_SAMPLE_ATTEMPTS {
            let p = Point::new(rng.gen_range(0..self.max.x), rng.gen_range(0..self.max.y));
            match self.mask.as_deref() {
                None => return p,
                Some(mask) => {
                    let (mx, my) = (p.x as u32, p.y as u32);
                    if mx < mask.width() && my < mask.height() && mask.get_pixel(mx, my)[3] != 0 {
                        return p;
                    }
                }
            }
        }
        self.origin
    }
}

impl fmt::Display for OffsetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.random {
            write!(f, "rand")
        } else {
            write!(f, "{}", self.origin)
        }
    }
}

/// Declarative description of one flood. Value object: task changes produce a
/// new task that fully replaces (and cancels) the previous run; fields of a
/// task held by running connections are never mutated in place.
#[derive(Clone, Debug, Default)]
pub struct FlutTask {
    pub address: String,
    pub max_conns: usize,
    pub img: Option<Arc<RgbaImage>>,
    pub offset: OffsetSpec,
    pub order: RenderOrder,
    pub rgb_split: bool,
    pub paused: bool,
}

impl FlutTask {
    /// A task can run iff it has an image, at least one connection, a target
    /// address, and is not paused.
    #[must_use]
    pub fn is_flutable(&self) -> bool {
        self.img.is_some() && self.max_conns > 0 && !self.address.is_empty() && !self.paused
    }
}

impl fmt::Display for FlutTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let img = match self.img.as_deref() {
            Some(img) => format!("{}x{}", img.width(), img.height()),
            None => "nil".to_owned(),
        };
        write!(
            f,
            "\t{} conns @ {}\n\timg {}\toffset {}\n\torder {}\trgbsplit {}\tpaused {}",
            self.max_conns, self.address, img, self.offset, self.order, self.rgb_split, self.paused
        )
    }
}
