use image::{Rgba, RgbaImage};

use crate::error::{AppError, AppResult, ValidationError};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Replaces every `from` pixel with `to` and blanks everything else to
/// transparent, so the result only draws the remapped pixels.
#[must_use]
pub fn color_filter(img: &RgbaImage, from: Rgba<u8>, to: Rgba<u8>) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(img.width(), img.height(), TRANSPARENT);
    for (x, y, px) in img.enumerate_pixels() {
        if *px == from {
            out.put_pixel(x, y, to);
        }
    }
    out
}

/// Built-in flag palettes for the stripe pattern source.
///
/// # Errors
///
/// Returns a validation error for unknown palette names.
pub fn palette(name: &str) -> AppResult<Vec<Rgba<u8>>> {
    let colors: &[[u8; 4]] = match name {
        "lgbti" => &[
            [0xe4, 0x03, 0x03, 0xff],
            [0xff, 0x8c, 0x00, 0xff],
            [0xff, 0xed, 0x00, 0xff],
            [0x00, 0x80, 0x26, 0xff],
            [0x00, 0x4d, 0xff, 0xff],
            [0x75, 0x07, 0x87, 0xff],
        ],
        "nonbinary" => &[
            [0x9c, 0x5c, 0xd4, 0xff],
            [0xfc, 0xfc, 0xfc, 0xff],
            [0xfc, 0xf4, 0x34, 0xff],
            [0x2c, 0x2c, 0x2c, 0xff],
        ],
        "trans" => &[
            [0x5b, 0xde, 0xfa, 0xff],
            [0xf5, 0xa9, 0xb8, 0xff],
            [0xff, 0xff, 0xff, 0xff],
            [0xf5, 0xa9, 0xb8, 0xff],
            [0x5b, 0xde, 0xfa, 0xff],
        ],
        _ => {
            return Err(AppError::validation(ValidationError::UnknownPalette {
                name: name.to_owned(),
            }));
        }
    };
    Ok(colors.iter().map(|&c| Rgba(c)).collect())
}

/// Renders a horizontally striped image cycling through `colors`.
#[must_use]
pub fn stripe_pattern(colors: &[Rgba<u8>], width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, TRANSPARENT);
    if colors.is_empty() {
        return img;
    }
    let n = colors.len() as u32;
    let px_per_stripe = (height / n).max(1);
    for (_, y, px) in img.enumerate_pixels_mut() {
        let stripe = (y / px_per_stripe) as usize % colors.len();
        *px = colors[stripe];
    }
    img
}
