use thiserror::Error;

use super::{NetError, ProtocolError, RpcError, ValidationError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
    #[error("Image error: {source}")]
    Image {
        #[from]
        source: image::ImageError,
    },
    #[error("Validation error: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },
    #[error("Network error: {source}")]
    Net {
        #[from]
        source: NetError,
    },
    #[error("Protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },
    #[error("RPC error: {source}")]
    Rpc {
        #[from]
        source: RpcError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(source: impl Into<ValidationError>) -> Self {
        AppError::Validation {
            source: source.into(),
        }
    }

    pub fn net(source: impl Into<NetError>) -> Self {
        AppError::Net {
            source: source.into(),
        }
    }

    pub fn rpc(source: impl Into<RpcError>) -> Self {
        AppError::Rpc {
            source: source.into(),
        }
    }
}
