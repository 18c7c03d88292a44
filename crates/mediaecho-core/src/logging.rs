/// Session logging seam.
///
/// Pipeline stages report typed events; the logger decides where they go
/// (tracing, a test collector, nowhere).

use std::fmt;

/// Structured log entry for a session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub component: &'static str,
    pub ssrc: u32,
    pub event: SessionEvent,
}

/// Events that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport signalled ready
    ConnectionReady,
    /// Transport closed, normally or not
    ConnectionClosed { abrupt: bool, reason: String },
    /// All four pipeline tasks are running
    PipelinesStarted,
    EncoderConfigured { config: String },
    DecoderConfigured { config: String },
    /// Send: frame written and stream closed within its deadline
    FrameSent { seq: u32, len: u32, rto_ms: f64 },
    /// Send: deadline fired, stream aborted
    SendAborted {
        seq: u32,
        len: u32,
        keyframe: bool,
        non_discardable: bool,
        base_layer: bool,
        payload_type: u8,
        temporal_layer_id: u8,
        rto_ms: f64,
    },
    /// Send: stream open/write/close failed
    SendFailed { seq: u32, message: String },
    /// Receive: complete frame read off a stream
    FrameReceived { stream: u64, seq: u32, len: u32, rtt_ms: f64 },
    /// Receive: frame discarded for violating the framing
    ProtocolViolation { stream: u64, message: String },
    /// Encode: input frame dropped because too many outputs are pending
    FrameDropped { frame: u64, pending: usize },
    /// Decode: gave up waiting for missing sequence numbers
    GapSkipped { from: u64, to: u32 },
    /// Receive: transport will offer no more streams
    IncomingStreamsDone,
    Stopped,
    Error { message: String },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionReady => write!(f, "connection ready"),
            Self::ConnectionClosed { abrupt: false, .. } => write!(f, "connection closed normally"),
            Self::ConnectionClosed { abrupt: true, reason } => {
                write!(f, "connection closed abruptly: {}", reason)
            }
            Self::PipelinesStarted => write!(f, "pipelines started"),
            Self::EncoderConfigured { config } => write!(f, "encoder configured: {}", config),
            Self::DecoderConfigured { config } => write!(f, "decoder configured: {}", config),
            Self::FrameSent { seq, len, rto_ms } => {
                write!(f, "frame_sent seq={} len={} rto_ms={:.1}", seq, len, rto_ms)
            }
            Self::SendAborted {
                seq,
                len,
                keyframe,
                non_discardable,
                base_layer,
                payload_type,
                temporal_layer_id,
                rto_ms,
            } => write!(
                f,
                "send_aborted seq={} len={} i={} d={} b={} pt={} tid={} rto_ms={:.1}",
                seq,
                len,
                *keyframe as u8,
                !*non_discardable as u8,
                *base_layer as u8,
                payload_type,
                temporal_layer_id,
                rto_ms
            ),
            Self::SendFailed { seq, message } => write!(f, "send_failed seq={}: {}", seq, message),
            Self::FrameReceived {
                stream,
                seq,
                len,
                rtt_ms,
            } => write!(
                f,
                "frame_received stream={} seq={} len={} rtt_ms={:.3}",
                stream, seq, len, rtt_ms
            ),
            Self::ProtocolViolation { stream, message } => {
                write!(f, "protocol_violation stream={}: {}", stream, message)
            }
            Self::FrameDropped { frame, pending } => {
                write!(f, "frame_dropped frame={} pending={}", frame, pending)
            }
            Self::GapSkipped { from, to } => write!(f, "gap_skipped from={} to={}", from, to),
            Self::IncomingStreamsDone => write!(f, "done accepting unidirectional streams"),
            Self::Stopped => write!(f, "stopped: encoder and decoder closed"),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Trait for session logging.
pub trait SessionLogger: Send + Sync {
    fn log(&self, entry: SessionLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn log(&self, entry: SessionLog) {
        let ssrc = format!("{:08x}", entry.ssrc);
        match &entry.event {
            SessionEvent::Error { .. } | SessionEvent::ConnectionClosed { abrupt: true, .. } => {
                tracing::error!(component = entry.component, ssrc = %ssrc, "{}", entry.event);
            }
            SessionEvent::ProtocolViolation { .. }
            | SessionEvent::SendFailed { .. }
            | SessionEvent::GapSkipped { .. } => {
                tracing::warn!(component = entry.component, ssrc = %ssrc, "{}", entry.event);
            }
            // Per-frame spam
            SessionEvent::FrameSent { .. }
            | SessionEvent::FrameReceived { .. }
            | SessionEvent::FrameDropped { .. }
            | SessionEvent::SendAborted { .. } => {
                tracing::debug!(component = entry.component, ssrc = %ssrc, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, ssrc = %ssrc, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl SessionLogger for NullLogger {
    fn log(&self, _entry: SessionLog) {}
}
