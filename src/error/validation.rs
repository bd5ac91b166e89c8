use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No image source (set --image or --stripes).")]
    MissingImage,
    #[error("Cannot decode image {path}: {source}")]
    ImageDecode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("Connection count must be >= 1.")]
    ZeroConnections,
    #[error("Target address must not be empty.")]
    MissingAddress,
    #[error("--ran and --hevring are mutually exclusive.")]
    ControllerWorkerConflict,
    #[error("Unknown stripe palette: {name}")]
    UnknownPalette { name: String },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration format: {value}")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration number {value}: {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Config file {path} not found.")]
    ConfigNotFound { path: String },
}
