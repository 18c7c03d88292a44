/// Encode stage: raw frames in, sequenced chunks out.
///
/// ```text
/// [frames] --submit--> [VideoEncoder] --outputs--> [EncodeStage] --> [chunks]
///   drop when too       keyframe every              config chunk
///   many pending        key_interval frames         before media
/// ```
///
/// Every emitted chunk, config or media, takes the next sequence number
/// starting at 0, so the receiver's reorder buffer sees no holes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mediaecho_types::{Chunk, EncoderConfig, MediaKind};

use crate::codec::{EncodeOptions, EncodedOutput, EncoderOutputs, RawFrame, VideoEncoder};
use crate::config::SessionConfig;
use crate::error::{CodecError, SessionError};
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::stats::SessionStats;

const COMPONENT: &str = "encode";

pub struct EncodeStage<E> {
    encoder: E,
    outputs: EncoderOutputs,
    config: EncoderConfig,
    stats: Arc<SessionStats>,
    logger: Arc<dyn SessionLogger>,
    max_pending: usize,
    frame_counter: u64,
    /// Next sequence number; `None` once `u32::MAX` has been used.
    seq: Option<u32>,
    keyframe_index: u32,
    deltaframe_index: u32,
    pending_outputs: usize,
}

impl<E: VideoEncoder> EncodeStage<E> {
    pub fn new(
        encoder: E,
        outputs: EncoderOutputs,
        config: EncoderConfig,
        session: &SessionConfig,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            encoder,
            outputs,
            config,
            stats,
            logger: session.logger.clone(),
            max_pending: session.max_pending_encodes,
            frame_counter: 0,
            seq: Some(0),
            keyframe_index: 0,
            deltaframe_index: 0,
            pending_outputs: 0,
        }
    }

    fn log(&self, event: SessionEvent) {
        self.logger.log(SessionLog {
            component: COMPONENT,
            ssrc: self.config.ssrc,
            event,
        });
    }

    /// Check encoder support and apply the session's configuration.
    pub fn configure(&mut self) -> Result<(), CodecError> {
        let support = self.encoder.is_config_supported(&self.config);
        if !support.supported {
            return Err(CodecError::Unsupported(serde_json::to_string(&support.config)?));
        }
        self.encoder.configure(&support.config)?;
        self.log(SessionEvent::EncoderConfigured {
            config: serde_json::to_string(&support.config)?,
        });
        Ok(())
    }

    /// Submit one raw frame. Returns `false` if the frame was dropped
    /// because too many outputs are outstanding.
    pub fn submit(&mut self, frame: RawFrame) -> Result<bool, CodecError> {
        if self.pending_outputs > self.max_pending {
            self.stats.frame_dropped();
            self.log(SessionEvent::FrameDropped {
                frame: frame.timestamp,
                pending: self.pending_outputs,
            });
            return Ok(false);
        }
        if self.encoder.is_closed() {
            return Err(CodecError::Closed);
        }

        self.pending_outputs += 1;
        let keyframe = self.frame_counter % u64::from(self.config.key_interval.max(1)) == 0;
        self.frame_counter += 1;

        let queue_depth = self.encoder.encode_queue_size();
        let before = Instant::now();
        self.encoder.encode(frame, EncodeOptions { keyframe })?;
        self.stats.record_encode(queue_depth, before.elapsed());
        Ok(true)
    }

    fn next_seq(&mut self) -> Result<u32, CodecError> {
        let seq = self.seq.ok_or(CodecError::SequenceExhausted)?;
        self.seq = seq.checked_add(1);
        Ok(seq)
    }

    /// Label one encoder output. Yields a config chunk first when the
    /// output carries a new decoder configuration.
    pub fn on_output(&mut self, output: EncodedOutput) -> Result<Vec<Chunk>, CodecError> {
        self.pending_outputs = self.pending_outputs.saturating_sub(1);
        let mut chunks = Vec::with_capacity(2);

        if let Some(decoder_config) = &output.decoder_config {
            let json = serde_json::to_string(decoder_config)?;
            let seq = self.next_seq()?;
            let mut chunk = Chunk::config(seq, self.config.ssrc, json);
            chunk.keyframe_index = self.keyframe_index;
            chunk.deltaframe_index = self.deltaframe_index;
            chunks.push(chunk);
        }

        match output.kind {
            MediaKind::Key => {
                self.keyframe_index += 1;
                self.deltaframe_index = 0;
            }
            MediaKind::Delta => self.deltaframe_index += 1,
        }

        let seq = self.next_seq()?;
        let mut chunk = Chunk::media(
            seq,
            self.config.ssrc,
            self.config.payload_type,
            output.kind,
            output.timestamp,
            output.data,
        );
        chunk.temporal_layer_id = output.temporal_layer_id.unwrap_or(0);
        chunk.keyframe_index = self.keyframe_index;
        chunk.deltaframe_index = self.deltaframe_index;
        chunks.push(chunk);
        Ok(chunks)
    }

    pub fn pending_outputs(&self) -> usize {
        self.pending_outputs
    }

    /// Drive the stage until input ends and every pending output has been
    /// forwarded, or until cancelled. The encoder is closed either way.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<RawFrame>,
        chunks: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let result = self.pump(&mut input, &chunks, &cancel).await;
        self.encoder.close();
        result
    }

    async fn pump(
        &mut self,
        input: &mut mpsc::Receiver<RawFrame>,
        chunks: &mpsc::Sender<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut input_open = true;
        loop {
            if !input_open && self.pending_outputs == 0 {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                output = self.outputs.recv() => {
                    let Some(output) = output else {
                        return Ok(());
                    };
                    for chunk in self.on_output(output?)? {
                        if chunks.send(chunk).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                frame = input.recv(), if input_open => match frame {
                    Some(frame) => {
                        self.submit(frame)?;
                    }
                    None => input_open = false,
                },
            }
        }
    }
}
