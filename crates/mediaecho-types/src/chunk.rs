use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payload type carried in the second header byte.
///
/// `Config` frames carry a JSON decoder configuration; the others carry
/// encoded media for the named codec. Serializes as its wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PayloadType {
    Config = 0,
    H264 = 1,
    H265 = 2,
    Vp8 = 3,
    Vp9 = 4,
    Av1 = 5,
}

impl PayloadType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Config),
            1 => Some(Self::H264),
            2 => Some(Self::H265),
            3 => Some(Self::Vp8),
            4 => Some(Self::Vp9),
            5 => Some(Self::Av1),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a codec string (`"vp8"`, `"vp09.00.10.08"`, `"avc1.42002A"`, ...)
    /// to its payload type.
    pub fn for_codec(codec: &str) -> Option<Self> {
        let codec = codec.to_ascii_lowercase();
        if codec.starts_with("avc1") || codec.starts_with("avc3") {
            Some(Self::H264)
        } else if codec.starts_with("hev1") || codec.starts_with("hvc1") {
            Some(Self::H265)
        } else if codec == "vp8" {
            Some(Self::Vp8)
        } else if codec.starts_with("vp09") || codec == "vp9" {
            Some(Self::Vp9)
        } else if codec.starts_with("av01") {
            Some(Self::Av1)
        } else {
            None
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(pt: PayloadType) -> u8 {
        pt.as_u8()
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("unknown payload type {}", value))
    }
}

/// Whether a media chunk can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Key,
    Delta,
}

/// The two payload shapes a chunk can have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBody {
    /// JSON-encoded decoder configuration.
    Config(String),
    /// Encoded media bytes.
    Media { kind: MediaKind, data: Bytes },
}

/// In-memory unit passed between pipeline stages.
///
/// A chunk is moved from stage to stage; no two stages hold the same chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u32,
    pub timestamp: u64,
    pub temporal_layer_id: u8,
    pub keyframe_index: u32,
    pub deltaframe_index: u32,
    pub payload_type: PayloadType,
    pub ssrc: u32,
    /// Sender clock in microseconds, truncated to 32 bits. Zero until serialized.
    pub send_time: u32,
    pub body: ChunkBody,
}

impl Chunk {
    /// A configuration chunk. Timestamp and temporal layer are always zero.
    pub fn config(seq: u32, ssrc: u32, json: String) -> Self {
        Self {
            seq,
            timestamp: 0,
            temporal_layer_id: 0,
            keyframe_index: 0,
            deltaframe_index: 0,
            payload_type: PayloadType::Config,
            ssrc,
            send_time: 0,
            body: ChunkBody::Config(json),
        }
    }

    pub fn media(
        seq: u32,
        ssrc: u32,
        payload_type: PayloadType,
        kind: MediaKind,
        timestamp: u64,
        data: Bytes,
    ) -> Self {
        Self {
            seq,
            timestamp,
            temporal_layer_id: 0,
            keyframe_index: 0,
            deltaframe_index: 0,
            payload_type,
            ssrc,
            send_time: 0,
            body: ChunkBody::Media { kind, data },
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.body, ChunkBody::Config(_))
    }

    pub fn is_key(&self) -> bool {
        matches!(
            self.body,
            ChunkBody::Media {
                kind: MediaKind::Key,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_type_from_codec_string() {
        assert_eq!(PayloadType::for_codec("avc1.42002A"), Some(PayloadType::H264));
        assert_eq!(PayloadType::for_codec("hev1.1.6.L93.B0"), Some(PayloadType::H265));
        assert_eq!(PayloadType::for_codec("vp8"), Some(PayloadType::Vp8));
        assert_eq!(PayloadType::for_codec("vp09.00.10.08"), Some(PayloadType::Vp9));
        assert_eq!(
            PayloadType::for_codec("av01.0.08M.08.0.110.09"),
            Some(PayloadType::Av1)
        );
        assert_eq!(PayloadType::for_codec("theora"), None);
    }

    #[test]
    fn payload_type_byte_mapping() {
        for v in 0..=5u8 {
            assert_eq!(PayloadType::from_u8(v).unwrap().as_u8(), v);
        }
        assert!(PayloadType::from_u8(6).is_none());
    }

    #[test]
    fn config_chunk_is_zeroed() {
        let c = Chunk::config(7, 42, "{}".into());
        assert!(c.is_config());
        assert!(!c.is_key());
        assert_eq!(c.timestamp, 0);
    }
}
