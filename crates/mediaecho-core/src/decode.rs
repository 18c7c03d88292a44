/// Decode stage: chunks in arrival order in, decoder submissions in
/// sequence order out.
///
/// Config chunks (re)configure the decoder in sequence with the media they
/// precede. A missing sequence number holds everything behind it; with a
/// gap timeout configured the stage eventually skips past it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mediaecho_types::{Chunk, ChunkBody, DecoderConfig};

use crate::codec::VideoDecoder;
use crate::config::SessionConfig;
use crate::error::{CodecError, SessionError};
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::reorder::ReorderBuffer;
use crate::stats::SessionStats;

const COMPONENT: &str = "decode";

pub struct DecodeStage<D> {
    decoder: D,
    reorder: ReorderBuffer<Chunk>,
    ssrc: u32,
    stats: Arc<SessionStats>,
    logger: Arc<dyn SessionLogger>,
    gap_timeout: Option<Duration>,
}

impl<D: VideoDecoder> DecodeStage<D> {
    pub fn new(decoder: D, ssrc: u32, session: &SessionConfig, stats: Arc<SessionStats>) -> Self {
        Self {
            decoder,
            reorder: ReorderBuffer::new(0),
            ssrc,
            stats,
            logger: session.logger.clone(),
            gap_timeout: session.reorder_gap_timeout,
        }
    }

    fn log(&self, event: SessionEvent) {
        self.logger.log(SessionLog {
            component: COMPONENT,
            ssrc: self.ssrc,
            event,
        });
    }

    /// Accept one received chunk. Returns how many chunks it released to
    /// the decoder.
    pub fn push(&mut self, chunk: Chunk) -> Result<usize, CodecError> {
        let released = self.reorder.push(chunk.seq, chunk);
        self.stats
            .set_reorder_counts(self.reorder.duplicates(), self.reorder.skipped());
        self.apply_all(released)
    }

    /// Abandon the sequence numbers blocking the lowest pending chunk.
    pub fn skip_gap(&mut self) -> Result<usize, CodecError> {
        let from = self.reorder.expected();
        let released = self.reorder.skip_gap();
        if released.is_empty() {
            return Ok(0);
        }
        self.stats
            .set_reorder_counts(self.reorder.duplicates(), self.reorder.skipped());
        self.log(SessionEvent::GapSkipped {
            from,
            to: released[0].seq,
        });
        self.apply_all(released)
    }

    fn apply_all(&mut self, released: Vec<Chunk>) -> Result<usize, CodecError> {
        let n = released.len();
        for chunk in released {
            self.apply(chunk)?;
        }
        Ok(n)
    }

    fn apply(&mut self, chunk: Chunk) -> Result<(), CodecError> {
        if let ChunkBody::Config(json) = &chunk.body {
            let config: DecoderConfig = serde_json::from_str(json)?;
            let support = self.decoder.is_config_supported(&config);
            if !support.supported {
                return Err(CodecError::Unsupported(json.clone()));
            }
            self.decoder.configure(&support.config)?;
            self.log(SessionEvent::DecoderConfigured { config: json.clone() });
            return Ok(());
        }

        if self.decoder.is_closed() {
            return Err(CodecError::Closed);
        }
        let queue_depth = self.decoder.decode_queue_size();
        let before = Instant::now();
        self.decoder.decode(chunk)?;
        self.stats.record_decode(queue_depth, before.elapsed());
        Ok(())
    }

    /// Consume chunks until the channel closes or the stage is cancelled.
    /// The decoder is closed either way.
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let result = self.pump(&mut chunks, &cancel).await;
        self.decoder.close();
        result
    }

    async fn pump(
        &mut self,
        chunks: &mut mpsc::Receiver<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        // Last release, or when the buffer last went from empty to holding
        // chunks, whichever is later.
        let mut stalled_since = tokio::time::Instant::now();
        loop {
            let gap_deadline = match self.gap_timeout {
                Some(timeout) if self.reorder.has_pending() => Some(stalled_since + timeout),
                _ => None,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else {
                        return Ok(());
                    };
                    let was_idle = !self.reorder.has_pending();
                    if self.push(chunk)? > 0 || was_idle {
                        stalled_since = tokio::time::Instant::now();
                    }
                }
                _ = wait_until(gap_deadline) => {
                    self.skip_gap()?;
                    stalled_since = tokio::time::Instant::now();
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mediaecho_types::{MediaKind, PayloadType};

    use crate::codec::{DecoderOutputs, PassthroughDecoder};
    use crate::logging::NullLogger;

    fn session(gap: Option<Duration>) -> SessionConfig {
        SessionConfig {
            logger: Arc::new(NullLogger),
            reorder_gap_timeout: gap,
            ..Default::default()
        }
    }

    fn config_chunk(seq: u32) -> Chunk {
        Chunk::config(seq, 9, r#"{"codec":"vp8","codedWidth":2,"codedHeight":2}"#.into())
    }

    fn media(seq: u32, kind: MediaKind) -> Chunk {
        Chunk::media(seq, 9, PayloadType::Vp8, kind, u64::from(seq) * 10, Bytes::from_static(b"x"))
    }

    fn stage(gap: Option<Duration>) -> (DecodeStage<PassthroughDecoder>, DecoderOutputs, Arc<SessionStats>) {
        let (decoder, outputs) = PassthroughDecoder::new();
        let stats = Arc::new(SessionStats::new());
        (DecodeStage::new(decoder, 9, &session(gap), stats.clone()), outputs, stats)
    }

    fn timestamps(outputs: &mut DecoderOutputs) -> Vec<u64> {
        let mut ts = Vec::new();
        while let Ok(frame) = outputs.try_recv() {
            ts.push(frame.unwrap().timestamp);
        }
        ts
    }

    #[test]
    fn out_of_order_chunks_decode_in_sequence() {
        let (mut stage, mut out, stats) = stage(None);
        assert_eq!(stage.push(media(2, MediaKind::Delta)).unwrap(), 0);
        assert_eq!(stage.push(config_chunk(0)).unwrap(), 1);
        assert_eq!(stage.push(media(1, MediaKind::Key)).unwrap(), 2);
        assert_eq!(timestamps(&mut out), vec![10, 20]);
        assert_eq!(stats.counters().frames_decoded, 2);
    }

    #[test]
    fn media_before_config_is_an_error() {
        let (mut stage, _out, _) = stage(None);
        assert!(matches!(
            stage.push(media(0, MediaKind::Key)),
            Err(CodecError::NotConfigured)
        ));
    }

    #[test]
    fn unsupported_config_is_fatal() {
        let (mut stage, _out, _) = stage(None);
        let chunk = Chunk::config(0, 9, r#"{"codec":"theora"}"#.into());
        assert!(matches!(stage.push(chunk), Err(CodecError::Unsupported(_))));
        let garbage = Chunk::config(0, 9, "not json".into());
        let (mut stage, _out, _) = self::stage(None);
        assert!(matches!(stage.push(garbage), Err(CodecError::InvalidConfig(_))));
    }

    #[test]
    fn duplicates_counted_not_decoded() {
        let (mut stage, mut out, stats) = stage(None);
        stage.push(config_chunk(0)).unwrap();
        stage.push(media(1, MediaKind::Key)).unwrap();
        assert_eq!(stage.push(media(1, MediaKind::Key)).unwrap(), 0);
        assert_eq!(timestamps(&mut out), vec![10]);
        assert_eq!(stats.counters().duplicates, 1);
    }

    #[tokio::test]
    async fn missing_chunk_stalls_without_timeout() {
        let (stage, mut out, _) = stage(None);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(stage.run(rx, cancel.clone()));

        tx.send(config_chunk(0)).await.unwrap();
        tx.send(media(1, MediaKind::Key)).await.unwrap();
        tx.send(media(3, MediaKind::Delta)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(timestamps(&mut out), vec![10]);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn gap_timeout_skips_missing_chunk() {
        let (stage, mut out, stats) = stage(Some(Duration::from_millis(20)));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(stage.run(rx, CancellationToken::new()));

        tx.send(config_chunk(0)).await.unwrap();
        tx.send(media(1, MediaKind::Key)).await.unwrap();
        tx.send(media(3, MediaKind::Delta)).await.unwrap();
        tx.send(media(4, MediaKind::Delta)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        task.await.unwrap().unwrap();

        assert_eq!(timestamps(&mut out), vec![10, 30, 40]);
        assert_eq!(stats.counters().gaps_skipped, 1);
    }

    #[tokio::test]
    async fn gap_timer_starts_when_chunks_start_waiting() {
        let (stage, mut out, stats) = stage(Some(Duration::from_millis(20)));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(stage.run(rx, CancellationToken::new()));

        // Idle for longer than the timeout before anything arrives.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(media(1, MediaKind::Key)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(config_chunk(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        task.await.unwrap().unwrap();

        assert_eq!(timestamps(&mut out), vec![10]);
        assert_eq!(stats.counters().gaps_skipped, 0);
    }
}
