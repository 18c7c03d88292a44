use std::sync::Arc;
use std::time::Duration;

use crate::logging::{SessionLogger, TracingLogger};
use crate::protocol::MAX_FRAME_BYTES;

/// Knobs for one echo session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Receiver bound on a frame's declared length, header included.
    pub max_frame_bytes: usize,
    /// RTT assumed before the first sample arrives.
    pub default_rtt: Duration,
    /// Floor for the per-frame send deadline.
    pub min_rto: Duration,
    /// Deadline multiplier for keyframes, base-layer and config frames.
    pub non_discardable_rto_factor: f64,
    /// Encoder outputs allowed in flight before input frames are dropped.
    pub max_pending_encodes: usize,
    /// Capacity of the channels between pipeline stages.
    pub channel_capacity: usize,
    /// How long the decoder waits on a missing sequence number before
    /// skipping past it. `None` waits forever.
    pub reorder_gap_timeout: Option<Duration>,
    pub logger: Arc<dyn SessionLogger>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            default_rtt: Duration::from_millis(100),
            min_rto: Duration::from_millis(100),
            non_discardable_rto_factor: 4.0,
            max_pending_encodes: 30,
            channel_capacity: 256,
            reorder_gap_timeout: None,
            logger: Arc::new(TracingLogger),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("default_rtt", &self.default_rtt)
            .field("min_rto", &self.min_rto)
            .field("non_discardable_rto_factor", &self.non_discardable_rto_factor)
            .field("max_pending_encodes", &self.max_pending_encodes)
            .field("channel_capacity", &self.channel_capacity)
            .field("reorder_gap_timeout", &self.reorder_gap_timeout)
            .finish_non_exhaustive()
    }
}
