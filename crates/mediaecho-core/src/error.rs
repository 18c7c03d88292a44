use thiserror::Error;

/// Protocol violations in the 28-byte framing.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame header truncated: got {got} of 28 bytes")]
    ShortHeader { got: usize },
    #[error("declared frame length {declared} outside [1, {max}]")]
    LengthOutOfBounds { declared: u32, max: usize },
    #[error("declared frame length {declared} is shorter than the header")]
    LengthBelowHeader { declared: u32 },
    #[error("truncated frame: read {read} of {declared} bytes")]
    Truncated { read: usize, declared: u32 },
    #[error("payload of {len} bytes does not fit a frame of at most {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("unknown payload type {0}")]
    UnknownPayloadType(u8),
    #[error("configuration payload is not UTF-8: {0}")]
    InvalidConfig(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("connection closed abruptly: {0}")]
    Aborted(String),
    #[error("stream I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Reading one frame off an incoming stream.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("configuration not supported: {0}")]
    Unsupported(String),
    #[error("configuration is not valid JSON: {0}")]
    InvalidConfig(#[from] serde_json::Error),
    #[error("codec is not configured")]
    NotConfigured,
    #[error("codec is closed")]
    Closed,
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("sequence numbers exhausted")]
    SequenceExhausted,
}

/// Session-level failures. Any of these triggers teardown.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session stopped")]
    Stopped,
    #[error("pipeline task failed: {0}")]
    Task(String),
}
