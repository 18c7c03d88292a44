/// MediaEcho core: frame-per-stream video echo over a multi-stream transport.
///
/// Provides:
/// - 28-byte frame header codec with frame-marking bits
/// - Send pipeline: one unidirectional stream per frame, RTO-bounded, aborted on deadline
/// - Receive pipeline: bounded, read-fully framing with RTT sampling
/// - Reorder buffer restoring sequence order on the receive path
/// - Smoothed RTT estimator and end-of-session statistics
/// - Encode/decode stages over pluggable codecs
/// - In-process loopback transport with delay, jitter and loss

pub mod codec;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod reorder;
pub mod rtt;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;

// Re-export key types for convenience.
pub use codec::{
    DecodedFrame, EncodeOptions, EncodedOutput, PassthroughDecoder, PassthroughEncoder, RawFrame,
    VideoDecoder, VideoEncoder,
};
pub use config::SessionConfig;
pub use error::{CodecError, FrameError, ReceiveError, SessionError, TransportError};
pub use logging::{NullLogger, SessionEvent, SessionLog, SessionLogger, TracingLogger};
pub use protocol::{
    FrameHeader, HEADER_LEN, MAX_FRAME_BYTES, Marking, WireConfig, deserialize_frame,
    serialize_chunk,
};
pub use reorder::ReorderBuffer;
pub use rtt::{RttEstimate, RttEstimator, SessionClock};
pub use session::{Session, SessionState};
pub use stats::SessionStats;
pub use transport::{LoopbackTransport, NetemConfig, SendStream, Transport};
