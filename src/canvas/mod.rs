//! In-memory RGBA canvas helpers: the image-file boundary and the pixel
//! effects used as command sources.
mod effects;
mod io;


pub use effects::{color_filter, palette, stripe_pattern};
pub use io::{read_image, write_image};
