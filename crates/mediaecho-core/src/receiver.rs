/// Receive pipeline: every incoming unidirectional stream carries one frame.
///
/// ```text
/// accept_uni --> spawn per stream:
///                  read 28-byte header, bound-check length
///                  read the rest fully
///                  RTT sample + bandwidth record
///                  deserialize --> [chunks] (arrival order)
/// ```

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use mediaecho_types::Chunk;

use crate::config::SessionConfig;
use crate::error::{FrameError, ReceiveError, SessionError};
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::protocol::{FrameHeader, HEADER_LEN, deserialize_frame};
use crate::rtt::SessionClock;
use crate::stats::SessionStats;
use crate::transport::Transport;

const COMPONENT: &str = "receive";

/// Read until `buf` is full or the stream ends. Returns the bytes read.
pub async fn read_full<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read exactly one frame. The declared length is checked against
/// `max_frame_bytes` before any payload is buffered.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_frame_bytes: usize,
) -> Result<(FrameHeader, Bytes), ReceiveError> {
    let mut head = [0u8; HEADER_LEN];
    let got = read_full(stream, &mut head).await?;
    if got < HEADER_LEN {
        return Err(FrameError::ShortHeader { got }.into());
    }
    let header = FrameHeader::decode(&head)?;
    let declared = header.validate_length(max_frame_bytes)?;

    let mut frame = BytesMut::zeroed(declared);
    frame[..HEADER_LEN].copy_from_slice(&head);
    let read = HEADER_LEN + read_full(stream, &mut frame[HEADER_LEN..]).await?;
    if read != declared {
        return Err(FrameError::Truncated {
            read,
            declared: header.length,
        }
        .into());
    }
    Ok((header, frame.freeze()))
}

struct Shared {
    clock: SessionClock,
    stats: Arc<SessionStats>,
    logger: Arc<dyn SessionLogger>,
    ssrc: u32,
    max_frame_bytes: usize,
}

impl Shared {
    fn log(&self, event: SessionEvent) {
        self.logger.log(SessionLog {
            component: COMPONENT,
            ssrc: self.ssrc,
            event,
        });
    }
}

pub struct ReceivePipeline<T> {
    transport: Arc<T>,
    shared: Arc<Shared>,
}

impl<T: Transport> ReceivePipeline<T> {
    pub fn new(
        transport: Arc<T>,
        ssrc: u32,
        clock: SessionClock,
        session: &SessionConfig,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                clock,
                stats,
                logger: session.logger.clone(),
                ssrc,
                max_frame_bytes: session.max_frame_bytes,
            }),
        }
    }

    /// Accept streams until the transport has no more to offer, then wait
    /// for the readers still running.
    pub async fn run(
        self,
        chunks: mpsc::Sender<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let mut readers = JoinSet::new();
        let mut stream_number: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    readers.abort_all();
                    return Ok(());
                }
                Some(_) = readers.join_next(), if !readers.is_empty() => {}
                incoming = self.transport.accept_uni() => match incoming {
                    Some(stream) => {
                        stream_number += 1;
                        readers.spawn(receive_stream(
                            self.shared.clone(),
                            stream_number,
                            stream,
                            chunks.clone(),
                        ));
                    }
                    None => {
                        self.shared.log(SessionEvent::IncomingStreamsDone);
                        break;
                    }
                },
            }
        }

        while !readers.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => readers.abort_all(),
                _ = readers.join_next() => {}
            }
        }
        Ok(())
    }
}

async fn receive_stream<R: AsyncRead + Unpin>(
    shared: Arc<Shared>,
    stream_number: u64,
    mut stream: R,
    chunks: mpsc::Sender<Chunk>,
) {
    let (header, frame) = match read_frame(&mut stream, shared.max_frame_bytes).await {
        Ok(read) => read,
        Err(e) => {
            shared.stats.protocol_error();
            shared.log(SessionEvent::ProtocolViolation {
                stream: stream_number,
                message: e.to_string(),
            });
            return;
        }
    };

    let rtt_ms = shared.clock.rtt_since(header.send_time);
    shared.stats.record_arrival(header.seq, header.length, rtt_ms);
    shared.log(SessionEvent::FrameReceived {
        stream: stream_number,
        seq: header.seq,
        len: header.length,
        rtt_ms,
    });

    match deserialize_frame(frame) {
        Ok(chunk) => {
            // The decode side may already be gone during teardown.
            let _ = chunks.send(chunk).await;
        }
        Err(e) => {
            shared.stats.protocol_error();
            shared.log(SessionEvent::ProtocolViolation {
                stream: stream_number,
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaecho_types::{MediaKind, PayloadType};

    use crate::protocol::{MAX_FRAME_BYTES, WireConfig, serialize_chunk};

    fn frame(payload: usize) -> Bytes {
        let chunk = Chunk::media(
            3,
            8,
            PayloadType::H264,
            MediaKind::Key,
            90,
            Bytes::from(vec![7u8; payload]),
        );
        let wire = WireConfig {
            payload_type: PayloadType::H264,
            ssrc: 8,
            max_frame_bytes: MAX_FRAME_BYTES,
        };
        serialize_chunk(&chunk, &wire, 1234).unwrap().1
    }

    #[tokio::test]
    async fn reads_complete_frame() {
        let bytes = frame(500);
        let mut src: &[u8] = &bytes;
        let (header, read) = read_frame(&mut src, MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(header.seq, 3);
        assert_eq!(header.send_time, 1234);
        assert_eq!(read, bytes);
    }

    #[tokio::test]
    async fn declared_length_over_bound_is_discarded() {
        let bytes = frame(500);
        let mut src: &[u8] = &bytes;
        let err = read_frame(&mut src, 100).await.unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::Frame(FrameError::LengthOutOfBounds { declared: 528, max: 100 })
        ));
    }

    #[tokio::test]
    async fn truncated_stream_is_a_frame_error() {
        let bytes = frame(500);
        let mut src: &[u8] = &bytes[..300];
        let err = read_frame(&mut src, MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::Frame(FrameError::Truncated { read: 300, declared: 528 })
        ));

        let mut src: &[u8] = &bytes[..10];
        let err = read_frame(&mut src, MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, ReceiveError::Frame(FrameError::ShortHeader { got: 10 })));
    }

    #[tokio::test]
    async fn read_full_spans_short_reads() {
        let (mut w, mut r) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            w.write_all(b"0123456789").await.unwrap();
        });
        let mut buf = [0u8; 10];
        assert_eq!(read_full(&mut r, &mut buf).await.unwrap(), 10);
        assert_eq!(&buf, b"0123456789");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_counts_bad_streams_and_forwards_good_ones() {
        use std::time::Duration;
        use tokio::io::AsyncWriteExt;

        use crate::logging::NullLogger;
        use crate::transport::{LoopbackTransport, NetemConfig};

        let transport = Arc::new(LoopbackTransport::new(NetemConfig::default()));
        let stats = Arc::new(SessionStats::new());
        let session = SessionConfig {
            logger: Arc::new(NullLogger),
            max_frame_bytes: 100,
            ..Default::default()
        };
        let pipeline = ReceivePipeline::new(
            transport.clone(),
            8,
            SessionClock::new(),
            &session,
            stats.clone(),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(tx, cancel.clone()));

        let oversize = frame(500);
        let good = frame(20);
        for bytes in [&oversize[..], &good[..40], &good[..]] {
            let mut stream = transport.open_uni().await.unwrap();
            stream.write_all(bytes).await.unwrap();
            stream.shutdown().await.unwrap();
        }

        let chunk = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.seq, 3);
        assert_eq!(chunk.timestamp, 90);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.counters().protocol_errors, 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
