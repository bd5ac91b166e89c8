use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Connection error to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    Closed,
}

/// Pixel-response desync is fatal for the affected connection: once a line is
/// truncated there is no safe way to resynchronize mid-stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed pixel response: {line:?}")]
    MalformedPixelResponse { line: String },
    #[error("Malformed size response: {line:?}")]
    MalformedSizeResponse { line: String },
}
