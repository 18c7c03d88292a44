//! Shared data types: chunks, codec configuration and session reports.

pub mod chunk;
pub mod config;
pub mod report;

pub use chunk::{Chunk, ChunkBody, MediaKind, PayloadType};
pub use config::{
    BitrateMode, DecoderConfig, EncoderConfig, HardwareAcceleration, LatencyMode,
    ScalabilityMode, Support,
};
pub use report::{BandwidthReport, RttReport, SessionCounters, SessionReport, Summary};
