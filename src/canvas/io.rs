use image::RgbaImage;

use crate::error::{AppError, AppResult, ValidationError};

/// Decodes an image file (PNG/JPEG/GIF) into a non-premultiplied RGBA buffer.
///
/// # Errors
///
/// Returns a validation error when the file cannot be opened or decoded;
/// image problems are operator mistakes, not runtime failures.
pub fn read_image(path: &str) -> AppResult<RgbaImage> {
    let img = image::open(path).map_err(|err| {
        AppError::validation(ValidationError::ImageDecode {
            path: path.to_owned(),
            source: err,
        })
    })?;
    Ok(img.to_rgba8())
}

/// Encodes `img` to `path`; the format is derived from the file extension.
///
/// # Errors
///
/// Returns an error when encoding or writing fails.
pub fn write_image(path: &str, img: &RgbaImage) -> AppResult<()> {
    img.save(path)?;
    Ok(())
}
