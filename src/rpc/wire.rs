use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::flut::{FlutTask, OffsetSpec, Point, RenderOrder};

/// Serializable form of a [`FlutTask`]. Images travel as base64 raw RGBA so
/// workers never touch the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct WireTask {
    pub(super) address: String,
    pub(super) max_conns: usize,
    pub(super) order: RenderOrder,
    pub(super) rgb_split: bool,
    pub(super) paused: bool,
    pub(super) offset: WireOffset,
    pub(super) img: Option<WireImage>,
    pub(super) mask: Option<WireImage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(super) struct WireOffset {
    pub(super) x: i32,
    pub(super) y: i32,
    pub(super) random: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct WireImage {
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) rgba_b64: String,
}

pub(super) fn build_wire_task(task: &FlutTask) -> WireTask {
    WireTask {
        address: task.address.clone(),
        max_conns: task.max_conns,
        order: task.order,
        rgb_split: task.rgb_split,
        paused: task.paused,
        offset: WireOffset {
            x: task.offset.origin.x,
            y: task.offset.origin.y,
            random: task.offset.random,
        },
        img: task.img.as_deref().map(encode_image),
        mask: task.offset.mask.as_deref().map(encode_image),
    }
}

pub(super) fn task_from_wire(wire: WireTask) -> Result<FlutTask, RpcError> {
    let img = wire
        .img
        .as_ref()
        .map(decode_image)
        .transpose()?
        .map(Arc::new);
    let mask = wire
        .mask
        .as_ref()
        .map(decode_image)
        .transpose()?
        .map(Arc::new);
    let origin = Point::new(wire.offset.x, wire.offset.y);
    let offset = if wire.offset.random {
        OffsetSpec::random(origin, mask)
    } else {
        OffsetSpec::fixed(origin)
    };
    Ok(FlutTask {
        address: wire.address,
        max_conns: wire.max_conns,
        img,
        offset,
        order: wire.order,
        rgb_split: wire.rgb_split,
        paused: wire.paused,
    })
}

fn encode_image(img: &RgbaImage) -> WireImage {
    WireImage {
        width: img.width(),
        height: img.height(),
        rgba_b64: BASE64.encode(img.as_raw()),
    }
}

fn decode_image(wire: &WireImage) -> Result<RgbaImage, RpcError> {
    let raw = BASE64
        .decode(&wire.rgba_b64)
        .map_err(|err| RpcError::InvalidImagePayload {
            reason: err.to_string(),
        })?;
    RgbaImage::from_raw(wire.width, wire.height, raw).ok_or_else(|| {
        RpcError::InvalidImagePayload {
            reason: format!(
                "pixel buffer does not match {}x{} RGBA",
                wire.width, wire.height
            ),
        }
    })
}
