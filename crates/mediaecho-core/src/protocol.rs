/// Wire frame format: one frame per unidirectional stream.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    length (header + payload)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |1 1 0 0 0 0 0 0|      PT       |S|E|I|D|B| TID |      LID      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 send time (us, truncated to 32 bits)          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        sequence number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     timestamp (64 bits) ...                   |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          payload ...                          |
/// ```
///
/// All integers big-endian. S and E are always set (one frame per stream).
/// I = keyframe, D = discardable, B = base layer, LID is always 0.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use mediaecho_types::{Chunk, ChunkBody, MediaKind, PayloadType};

use crate::error::FrameError;

/// Header size in bytes.
pub const HEADER_LEN: usize = 28;

/// Largest frame a receiver accepts, header included.
pub const MAX_FRAME_BYTES: usize = 200_000;

const MARKER: u8 = 0xC0;
const FLAG_START: u8 = 0x80;
const FLAG_END: u8 = 0x40;
const FLAG_KEY: u8 = 0x20;
const FLAG_DISCARDABLE: u8 = 0x10;
const FLAG_BASE: u8 = 0x08;
const TID_MASK: u8 = 0x07;

/// Frame marking bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marking {
    pub keyframe: bool,
    pub non_discardable: bool,
    pub base_layer: bool,
    pub temporal_layer_id: u8,
    pub spatial_layer_id: u8,
}

impl Marking {
    /// Marking for a chunk about to be sent with payload type `pt`.
    pub fn for_chunk(chunk: &Chunk, pt: PayloadType) -> Self {
        let temporal_layer_id = if chunk.is_config() {
            0
        } else {
            chunk.temporal_layer_id & TID_MASK
        };
        let spatial_layer_id = 0;
        let keyframe = chunk.is_key();
        let base_layer = spatial_layer_id == 0 && temporal_layer_id == 0;
        Self {
            keyframe,
            non_discardable: keyframe || base_layer || pt == PayloadType::Config,
            base_layer,
            temporal_layer_id,
            spatial_layer_id,
        }
    }

    fn to_byte(self) -> u8 {
        let mut b = FLAG_START | FLAG_END | (self.temporal_layer_id & TID_MASK);
        if self.keyframe {
            b |= FLAG_KEY;
        }
        if !self.non_discardable {
            b |= FLAG_DISCARDABLE;
        }
        if self.base_layer {
            b |= FLAG_BASE;
        }
        b
    }

    fn from_bytes(flags: u8, lid: u8) -> Self {
        Self {
            keyframe: flags & FLAG_KEY != 0,
            non_discardable: flags & FLAG_DISCARDABLE == 0,
            base_layer: flags & FLAG_BASE != 0,
            temporal_layer_id: flags & TID_MASK,
            spatial_layer_id: lid,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub payload_type: u8,
    pub marking: Marking,
    pub send_time: u32,
    pub seq: u32,
    pub timestamp: u64,
    pub ssrc: u32,
}

impl FrameHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(self.length);
        buf.put_u8(MARKER);
        buf.put_u8(self.payload_type);
        buf.put_u8(self.marking.to_byte());
        buf.put_u8(self.marking.spatial_layer_id);
        buf.put_u32(self.send_time);
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Decode a header from the first 28 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::ShortHeader { got: data.len() });
        }
        let mut buf = &data[..HEADER_LEN];
        let length = buf.get_u32();
        let _marker = buf.get_u8();
        let payload_type = buf.get_u8();
        let flags = buf.get_u8();
        let lid = buf.get_u8();
        let send_time = buf.get_u32();
        let seq = buf.get_u32();
        let timestamp = buf.get_u64();
        let ssrc = buf.get_u32();
        Ok(Self {
            length,
            payload_type,
            marking: Marking::from_bytes(flags, lid),
            send_time,
            seq,
            timestamp,
            ssrc,
        })
    }

    /// Check the declared length against `[1, max_frame_bytes]` and the header size.
    /// Returns the length as `usize`.
    pub fn validate_length(&self, max_frame_bytes: usize) -> Result<usize, FrameError> {
        let declared = self.length as usize;
        if declared < 1 || declared > max_frame_bytes {
            return Err(FrameError::LengthOutOfBounds {
                declared: self.length,
                max: max_frame_bytes,
            });
        }
        if declared < HEADER_LEN {
            return Err(FrameError::LengthBelowHeader {
                declared: self.length,
            });
        }
        Ok(declared)
    }
}

/// Session-wide values stamped onto every outgoing frame.
#[derive(Debug, Clone, Copy)]
pub struct WireConfig {
    pub payload_type: PayloadType,
    pub ssrc: u32,
    pub max_frame_bytes: usize,
}

/// Serialize `chunk` into a wire frame stamped with `send_time`.
///
/// Config chunks always go out with payload type 0 and zero timestamp and
/// temporal layer. Payloads that would not fit the receiver's frame bound
/// are rejected.
pub fn serialize_chunk(
    chunk: &Chunk,
    wire: &WireConfig,
    send_time: u32,
) -> Result<(FrameHeader, Bytes), FrameError> {
    let (pt, timestamp, payload): (PayloadType, u64, &[u8]) = match &chunk.body {
        ChunkBody::Config(json) => (PayloadType::Config, 0, json.as_bytes()),
        ChunkBody::Media { data, .. } => (wire.payload_type, chunk.timestamp, data.as_ref()),
    };

    let total = HEADER_LEN + payload.len();
    let max = wire.max_frame_bytes.min(u32::MAX as usize);
    if total > max {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let header = FrameHeader {
        length: total as u32,
        payload_type: pt.as_u8(),
        marking: Marking::for_chunk(chunk, pt),
        send_time,
        seq: chunk.seq,
        timestamp,
        ssrc: wire.ssrc,
    };

    let mut buf = BytesMut::with_capacity(total);
    header.write_to(&mut buf);
    buf.put_slice(payload);
    Ok((header, buf.freeze()))
}

/// Parse a complete frame back into a chunk.
///
/// Keyframe and delta-frame indices are sender-local and come back as zero.
pub fn deserialize_frame(frame: Bytes) -> Result<Chunk, FrameError> {
    let header = FrameHeader::decode(&frame)?;
    if header.length as usize != frame.len() {
        return Err(FrameError::Truncated {
            read: frame.len(),
            declared: header.length,
        });
    }
    let payload = frame.slice(HEADER_LEN..);

    let pt = PayloadType::from_u8(header.payload_type)
        .ok_or(FrameError::UnknownPayloadType(header.payload_type))?;

    let body = match pt {
        PayloadType::Config => ChunkBody::Config(String::from_utf8(payload.to_vec())?),
        _ => ChunkBody::Media {
            kind: if header.marking.keyframe {
                MediaKind::Key
            } else {
                MediaKind::Delta
            },
            data: payload,
        },
    };

    Ok(Chunk {
        seq: header.seq,
        timestamp: header.timestamp,
        temporal_layer_id: header.marking.temporal_layer_id,
        keyframe_index: 0,
        deltaframe_index: 0,
        payload_type: pt,
        ssrc: header.ssrc,
        send_time: header.send_time,
        body,
    })
}
