//! Encode/decode capabilities.
//!
//! Submission is synchronous; results come back asynchronously on the
//! channel handed out when the codec is created. Outputs carry no sequence
//! numbers: the stages that own the codecs label them.

pub mod passthrough;

use bytes::Bytes;
use tokio::sync::mpsc;

use mediaecho_types::{Chunk, DecoderConfig, EncoderConfig, MediaKind, Support};

use crate::error::CodecError;

pub use passthrough::{PassthroughDecoder, PassthroughEncoder};

/// Uncompressed input frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    pub keyframe: bool,
}

/// One asynchronous encoder result.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub kind: MediaKind,
    pub timestamp: u64,
    pub data: Bytes,
    /// `None` when the encoder runs without temporal scalability.
    pub temporal_layer_id: Option<u8>,
    /// Set when the encoder (re)negotiated its decoder configuration.
    pub decoder_config: Option<DecoderConfig>,
}

/// One asynchronous decoder result.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub timestamp: u64,
    pub data: Bytes,
}

pub type EncoderOutputs = mpsc::UnboundedReceiver<Result<EncodedOutput, CodecError>>;
pub type DecoderOutputs = mpsc::UnboundedReceiver<Result<DecodedFrame, CodecError>>;

pub trait VideoEncoder: Send + 'static {
    fn is_config_supported(&self, config: &EncoderConfig) -> Support<EncoderConfig>;
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), CodecError>;
    fn encode(&mut self, frame: RawFrame, options: EncodeOptions) -> Result<(), CodecError>;
    /// Submissions not yet turned into outputs.
    fn encode_queue_size(&self) -> usize;
    /// Idempotent.
    fn close(&mut self);
    fn is_closed(&self) -> bool;
}

pub trait VideoDecoder: Send + 'static {
    fn is_config_supported(&self, config: &DecoderConfig) -> Support<DecoderConfig>;
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), CodecError>;
    fn decode(&mut self, chunk: Chunk) -> Result<(), CodecError>;
    fn decode_queue_size(&self) -> usize;
    /// Idempotent.
    fn close(&mut self);
    fn is_closed(&self) -> bool;
}
