//! Codec that does not compress: the "encoded" bytes are the raw frame
//! bytes. Behaves like a real codec at the interface: configuration
//! probing, keyframe requirements, temporal layering and asynchronous
//! outputs.

use tokio::sync::mpsc;

use mediaecho_types::{
    Chunk, ChunkBody, DecoderConfig, EncoderConfig, MediaKind, PayloadType, ScalabilityMode,
    Support,
};

use super::{
    DecodedFrame, DecoderOutputs, EncodeOptions, EncodedOutput, EncoderOutputs, RawFrame,
    VideoDecoder, VideoEncoder,
};
use crate::error::CodecError;

pub struct PassthroughEncoder {
    config: Option<EncoderConfig>,
    outputs: mpsc::UnboundedSender<Result<EncodedOutput, CodecError>>,
    announce_config: bool,
    frames_since_key: u64,
    closed: bool,
}

impl PassthroughEncoder {
    pub fn new() -> (Self, EncoderOutputs) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                config: None,
                outputs: tx,
                announce_config: false,
                frames_since_key: 0,
                closed: false,
            },
            rx,
        )
    }
}

impl VideoEncoder for PassthroughEncoder {
    fn is_config_supported(&self, config: &EncoderConfig) -> Support<EncoderConfig> {
        let supported = PayloadType::for_codec(&config.codec) == Some(config.payload_type)
            && config.width > 0
            && config.height > 0
            && config.framerate > 0.0
            && config.key_interval > 0;
        Support {
            supported,
            config: config.clone(),
        }
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        if !self.is_config_supported(config).supported {
            return Err(CodecError::Unsupported(config.codec.clone()));
        }
        self.config = Some(config.clone());
        self.announce_config = true;
        self.frames_since_key = 0;
        Ok(())
    }

    fn encode(&mut self, frame: RawFrame, options: EncodeOptions) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        let config = self.config.as_ref().ok_or(CodecError::NotConfigured)?;

        let kind = if options.keyframe {
            self.frames_since_key = 0;
            MediaKind::Key
        } else {
            MediaKind::Delta
        };
        let temporal_layer_id = match config.scalability() {
            ScalabilityMode::L1T1 => None,
            mode => Some(mode.temporal_layer_for(self.frames_since_key)),
        };
        self.frames_since_key += 1;

        let decoder_config = if std::mem::take(&mut self.announce_config) {
            Some(DecoderConfig {
                codec: config.codec.clone(),
                coded_width: Some(config.width),
                coded_height: Some(config.height),
                hardware_acceleration: config.hardware_acceleration,
                description: None,
            })
        } else {
            None
        };

        self.outputs
            .send(Ok(EncodedOutput {
                kind,
                timestamp: frame.timestamp,
                data: frame.data,
                temporal_layer_id,
                decoder_config,
            }))
            .map_err(|_| CodecError::Closed)
    }

    fn encode_queue_size(&self) -> usize {
        0
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct PassthroughDecoder {
    config: Option<DecoderConfig>,
    outputs: mpsc::UnboundedSender<Result<DecodedFrame, CodecError>>,
    awaiting_key: bool,
    closed: bool,
}

impl PassthroughDecoder {
    pub fn new() -> (Self, DecoderOutputs) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                config: None,
                outputs: tx,
                awaiting_key: true,
                closed: false,
            },
            rx,
        )
    }
}

impl VideoDecoder for PassthroughDecoder {
    fn is_config_supported(&self, config: &DecoderConfig) -> Support<DecoderConfig> {
        Support {
            supported: PayloadType::for_codec(&config.codec).is_some(),
            config: config.clone(),
        }
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        if !self.is_config_supported(config).supported {
            return Err(CodecError::Unsupported(config.codec.clone()));
        }
        self.config = Some(config.clone());
        self.awaiting_key = true;
        Ok(())
    }

    fn decode(&mut self, chunk: Chunk) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::Closed);
        }
        if self.config.is_none() {
            return Err(CodecError::NotConfigured);
        }
        let ChunkBody::Media { kind, data } = chunk.body else {
            return Err(CodecError::Decode("configuration chunk submitted for decode".into()));
        };
        if self.awaiting_key && kind != MediaKind::Key {
            return Err(CodecError::Decode(
                "a key frame is required after configure".into(),
            ));
        }
        self.awaiting_key = false;

        self.outputs
            .send(Ok(DecodedFrame {
                timestamp: chunk.timestamp,
                data,
            }))
            .map_err(|_| CodecError::Closed)
    }

    fn decode_queue_size(&self) -> usize {
        0
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn raw(ts: u64) -> RawFrame {
        RawFrame {
            timestamp: ts,
            width: 4,
            height: 2,
            data: Bytes::from(vec![ts as u8; 8]),
        }
    }

    #[test]
    fn encoder_announces_config_once_and_layers_frames() {
        let (mut enc, mut out) = PassthroughEncoder::new();
        let mut cfg = EncoderConfig::new("vp8", 4, 2, 1).unwrap();
        cfg.scalability_mode = Some(ScalabilityMode::L1T2);
        enc.configure(&cfg).unwrap();

        enc.encode(raw(0), EncodeOptions { keyframe: true }).unwrap();
        enc.encode(raw(1), EncodeOptions::default()).unwrap();

        let first = out.try_recv().unwrap().unwrap();
        assert_eq!(first.kind, MediaKind::Key);
        assert_eq!(first.temporal_layer_id, Some(0));
        assert_eq!(first.decoder_config.unwrap().coded_width, Some(4));

        let second = out.try_recv().unwrap().unwrap();
        assert_eq!(second.kind, MediaKind::Delta);
        assert_eq!(second.temporal_layer_id, Some(1));
        assert!(second.decoder_config.is_none());
    }

    #[test]
    fn encoder_rejects_bad_config_and_unconfigured_use() {
        let (mut enc, _out) = PassthroughEncoder::new();
        assert!(matches!(
            enc.encode(raw(0), EncodeOptions::default()),
            Err(CodecError::NotConfigured)
        ));
        let mut cfg = EncoderConfig::new("vp8", 4, 2, 1).unwrap();
        cfg.width = 0;
        assert!(!enc.is_config_supported(&cfg).supported);
        assert!(matches!(enc.configure(&cfg), Err(CodecError::Unsupported(_))));
        enc.close();
        enc.close();
        assert!(enc.is_closed());
    }

    #[test]
    fn decoder_requires_key_after_configure() {
        let (mut dec, mut out) = PassthroughDecoder::new();
        let delta = Chunk::media(1, 1, PayloadType::Vp8, MediaKind::Delta, 5, Bytes::from_static(b"d"));
        assert!(matches!(dec.decode(delta.clone()), Err(CodecError::NotConfigured)));

        dec.configure(&DecoderConfig {
            codec: "vp8".into(),
            coded_width: None,
            coded_height: None,
            hardware_acceleration: Default::default(),
            description: None,
        })
        .unwrap();
        assert!(matches!(dec.decode(delta.clone()), Err(CodecError::Decode(_))));

        let key = Chunk::media(0, 1, PayloadType::Vp8, MediaKind::Key, 4, Bytes::from_static(b"k"));
        dec.decode(key).unwrap();
        dec.decode(delta).unwrap();
        assert_eq!(out.try_recv().unwrap().unwrap().timestamp, 4);
        assert_eq!(out.try_recv().unwrap().unwrap().timestamp, 5);
    }
}
