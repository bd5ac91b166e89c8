use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    MessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    InvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Unexpected reply: expected {expected}.")]
    UnexpectedReply { expected: &'static str },
    #[error("Call timed out waiting for worker reply.")]
    CallTimeout,
    #[error("Invalid image payload: {reason}")]
    InvalidImagePayload { reason: String },
}
