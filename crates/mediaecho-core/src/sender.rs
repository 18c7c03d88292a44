/// Send pipeline: one unidirectional stream per frame.
///
/// ```text
/// [chunks] --> serialize --> spawn per frame:
///                              open_uni
///                              write_all + shutdown   (bounded by RTO)
///                              abort on deadline
/// ```
///
/// A frame that misses its deadline is aborted on its own stream; other
/// frames in flight are unaffected. Cancelling the pipeline aborts every
/// stream still being written.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use mediaecho_types::Chunk;

use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::protocol::{FrameHeader, WireConfig, serialize_chunk};
use crate::rtt::{RttEstimate, SessionClock};
use crate::stats::SessionStats;
use crate::transport::{SendStream, Transport};

const COMPONENT: &str = "send";

/// Deadline for one frame: the estimator's RTO floored at `min_rto`,
/// scaled by `factor` for frames that must not be dropped.
pub fn compute_rto(
    estimate: &RttEstimate,
    min_rto: Duration,
    non_discardable: bool,
    factor: f64,
) -> Duration {
    let mut rto_ms = estimate.rto.max(min_rto.as_micros() as f64 / 1000.0);
    if non_discardable {
        rto_ms *= factor.max(1.0);
    }
    Duration::from_micros((rto_ms * 1000.0).round() as u64)
}

struct Shared<T> {
    transport: Arc<T>,
    stats: Arc<SessionStats>,
    logger: Arc<dyn SessionLogger>,
    ssrc: u32,
}

impl<T> Shared<T> {
    fn log(&self, event: SessionEvent) {
        self.logger.log(SessionLog {
            component: COMPONENT,
            ssrc: self.ssrc,
            event,
        });
    }
}

pub struct SendPipeline<T> {
    shared: Arc<Shared<T>>,
    wire: WireConfig,
    clock: SessionClock,
    default_rtt: Duration,
    min_rto: Duration,
    factor: f64,
}

impl<T: Transport> SendPipeline<T> {
    pub fn new(
        transport: Arc<T>,
        wire: WireConfig,
        clock: SessionClock,
        session: &SessionConfig,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                stats,
                logger: session.logger.clone(),
                ssrc: wire.ssrc,
            }),
            wire,
            clock,
            default_rtt: session.default_rtt,
            min_rto: session.min_rto,
            factor: session.non_discardable_rto_factor,
        }
    }

    /// Send every chunk until the channel closes, then wait for the sends
    /// still in flight. Cancellation aborts them.
    pub async fn run(
        self,
        mut chunks: mpsc::Receiver<Chunk>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => self.dispatch(&chunk, &mut inflight, &cancel),
                    None => break,
                },
            }
        }

        // Each send watches `cancel` and aborts its own stream.
        while inflight.join_next().await.is_some() {}
        Ok(())
    }

    fn dispatch(&self, chunk: &Chunk, inflight: &mut JoinSet<()>, cancel: &CancellationToken) {
        let (header, frame) = match serialize_chunk(chunk, &self.wire, self.clock.now_micros()) {
            Ok(out) => out,
            Err(e) => {
                self.shared.stats.send_failed();
                self.shared.log(SessionEvent::SendFailed {
                    seq: chunk.seq,
                    message: e.to_string(),
                });
                return;
            }
        };

        let estimate = self.shared.stats.rtt_estimate(self.default_rtt);
        let rto = compute_rto(
            &estimate,
            self.min_rto,
            header.marking.non_discardable,
            self.factor,
        );
        inflight.spawn(send_frame(
            self.shared.clone(),
            header,
            frame,
            rto,
            cancel.clone(),
        ));
    }
}

async fn send_frame<T: Transport>(
    shared: Arc<Shared<T>>,
    header: FrameHeader,
    frame: Bytes,
    rto: Duration,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = shared.transport.open_uni() => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            shared.stats.send_failed();
            shared.log(SessionEvent::SendFailed {
                seq: header.seq,
                message: format!("cannot open stream: {}", e),
            });
            return;
        }
    };

    let rto_ms = rto.as_secs_f64() * 1000.0;
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = tokio::time::timeout(rto, write_frame(&mut stream, &frame)) => Some(outcome),
    };
    let Some(outcome) = outcome else {
        if let Err(e) = stream.abort("session stopped") {
            tracing::debug!(seq = header.seq, "abort failed: {}", e);
        }
        return;
    };
    match outcome {
        Ok(Ok(())) => {
            shared.stats.frame_sent();
            shared.log(SessionEvent::FrameSent {
                seq: header.seq,
                len: header.length,
                rto_ms,
            });
        }
        Ok(Err(e)) => {
            shared.stats.send_failed();
            shared.log(SessionEvent::SendFailed {
                seq: header.seq,
                message: e.to_string(),
            });
        }
        Err(_) => {
            shared.stats.send_aborted();
            shared.log(SessionEvent::SendAborted {
                seq: header.seq,
                len: header.length,
                keyframe: header.marking.keyframe,
                non_discardable: header.marking.non_discardable,
                base_layer: header.marking.base_layer,
                payload_type: header.payload_type,
                temporal_layer_id: header.marking.temporal_layer_id,
                rto_ms,
            });
            if let Err(e) = stream.abort("send taking too long") {
                tracing::debug!(seq = header.seq, "abort failed: {}", e);
            }
        }
    }
}

async fn write_frame<S: SendStream>(stream: &mut S, frame: &[u8]) -> Result<(), TransportError> {
    stream.write_all(frame).await?;
    stream.shutdown().await?;
    Ok(())
}
