/// One echo session: two pipelines over one transport.
///
/// ```text
/// [frames] -> EncodeStage -> SendPipeline -> transport (one uni stream per frame)
///                                                 |
/// [decoded] <- DecodeStage <- ReceivePipeline <---+  (arrival order, reordered)
/// ```
///
/// Lifecycle is `Idle -> Running -> Stopped`. `stop` is idempotent and a
/// stopped session cannot be started again.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use mediaecho_types::{EncoderConfig, SessionReport};

use crate::codec::{EncoderOutputs, RawFrame, VideoDecoder, VideoEncoder};
use crate::config::SessionConfig;
use crate::decode::DecodeStage;
use crate::encode::EncodeStage;
use crate::error::SessionError;
use crate::logging::{SessionEvent, SessionLog};
use crate::protocol::WireConfig;
use crate::receiver::ReceivePipeline;
use crate::rtt::SessionClock;
use crate::sender::SendPipeline;
use crate::stats::SessionStats;
use crate::transport::Transport;

const COMPONENT: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

type TaskResult = (&'static str, Result<(), SessionError>);

pub struct Session<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    ssrc: u32,
    stats: Arc<SessionStats>,
    clock: SessionClock,
    state: SessionState,
    cancel: CancellationToken,
    tasks: JoinSet<TaskResult>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>, ssrc: u32, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            ssrc,
            stats: Arc::new(SessionStats::new()),
            clock: SessionClock::new(),
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    fn log(&self, event: SessionEvent) {
        self.config.logger.log(SessionLog {
            component: COMPONENT,
            ssrc: self.ssrc,
            event,
        });
    }

    /// Wait for the transport, configure the encoder and spawn the four
    /// pipeline tasks. Decoded frames come out of the decoder's own output
    /// channel.
    pub async fn start<E, D>(
        &mut self,
        encoder: E,
        encoder_outputs: EncoderOutputs,
        decoder: D,
        mut encoder_config: EncoderConfig,
        input: mpsc::Receiver<RawFrame>,
    ) -> Result<(), SessionError>
    where
        E: VideoEncoder,
        D: VideoDecoder,
    {
        match self.state {
            SessionState::Running => return Err(SessionError::AlreadyStarted),
            SessionState::Stopped => return Err(SessionError::Stopped),
            SessionState::Idle => {}
        }

        if let Err(e) = self.transport.ready().await {
            self.log(SessionEvent::Error {
                message: format!("connection failed: {}", e),
            });
            self.abandon();
            return Err(e.into());
        }
        self.log(SessionEvent::ConnectionReady);

        encoder_config.ssrc = self.ssrc;
        let wire = WireConfig {
            payload_type: encoder_config.payload_type,
            ssrc: self.ssrc,
            max_frame_bytes: self.config.max_frame_bytes,
        };

        let mut encode = EncodeStage::new(
            encoder,
            encoder_outputs,
            encoder_config,
            &self.config,
            self.stats.clone(),
        );
        if let Err(e) = encode.configure() {
            self.log(SessionEvent::Error {
                message: e.to_string(),
            });
            self.abandon();
            return Err(e.into());
        }

        let send = SendPipeline::new(
            self.transport.clone(),
            wire,
            self.clock,
            &self.config,
            self.stats.clone(),
        );
        let receive = ReceivePipeline::new(
            self.transport.clone(),
            self.ssrc,
            self.clock,
            &self.config,
            self.stats.clone(),
        );
        let decode = DecodeStage::new(decoder, self.ssrc, &self.config, self.stats.clone());

        let (outgoing_tx, outgoing_rx) = mpsc::channel(self.config.channel_capacity);
        let (incoming_tx, incoming_rx) = mpsc::channel(self.config.channel_capacity);

        let cancel = self.cancel.clone();
        self.tasks
            .spawn(async move { ("encode", encode.run(input, outgoing_tx, cancel).await) });
        let cancel = self.cancel.clone();
        self.tasks
            .spawn(async move { ("send", send.run(outgoing_rx, cancel).await) });
        let cancel = self.cancel.clone();
        self.tasks
            .spawn(async move { ("receive", receive.run(incoming_tx, cancel).await) });
        let cancel = self.cancel.clone();
        self.tasks
            .spawn(async move { ("decode", decode.run(incoming_rx, cancel).await) });

        self.state = SessionState::Running;
        self.log(SessionEvent::PipelinesStarted);
        Ok(())
    }

    fn abandon(&mut self) {
        self.state = SessionState::Stopped;
        self.cancel.cancel();
        self.transport.close();
    }

    /// Resolve when the session needs tearing down: a pipeline failed, the
    /// transport closed, or every pipeline ran to completion. An abrupt
    /// transport close is an error.
    pub async fn supervise(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Ok(());
        }
        loop {
            tokio::select! {
                closed = self.transport.closed() => {
                    return match closed {
                        Ok(()) => {
                            self.log(SessionEvent::ConnectionClosed {
                                abrupt: false,
                                reason: String::new(),
                            });
                            Ok(())
                        }
                        Err(e) => {
                            self.log(SessionEvent::ConnectionClosed {
                                abrupt: true,
                                reason: e.to_string(),
                            });
                            Err(e.into())
                        }
                    };
                }
                joined = self.tasks.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok((_, Ok(())))) => {}
                    Some(Ok((name, Err(e)))) => {
                        self.log(SessionEvent::Error {
                            message: format!("{} pipeline: {}", name, e),
                        });
                        return Err(e);
                    }
                    Some(Err(e)) => return Err(SessionError::Task(e.to_string())),
                },
            }
        }
    }

    /// Tear the session down and return its report. Only the first call on
    /// a running session yields a report.
    pub async fn stop(&mut self) -> Option<SessionReport> {
        match self.state {
            SessionState::Stopped => return None,
            SessionState::Idle => {
                self.abandon();
                return None;
            }
            SessionState::Running => {}
        }
        self.state = SessionState::Stopped;

        let report = self.stats.take_report(self.ssrc);
        match serde_json::to_string(&report) {
            Ok(json) => tracing::info!(ssrc = %format!("{:08x}", self.ssrc), report = %json, "session report"),
            Err(e) => tracing::warn!("cannot serialize session report: {}", e),
        }

        self.cancel.cancel();
        self.transport.close();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Err(e))) => tracing::debug!(pipeline = name, "ended with error: {}", e),
                Err(e) if !e.is_cancelled() => tracing::debug!("pipeline task failed: {}", e),
                _ => {}
            }
        }
        self.log(SessionEvent::Stopped);
        Some(report)
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            self.cancel.cancel();
            self.transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PassthroughDecoder, PassthroughEncoder};
    use crate::logging::NullLogger;
    use crate::transport::{LoopbackTransport, NetemConfig};

    fn config() -> SessionConfig {
        SessionConfig {
            logger: Arc::new(NullLogger),
            ..Default::default()
        }
    }

    async fn started(transport: Arc<LoopbackTransport>) -> (Session<LoopbackTransport>, mpsc::Sender<RawFrame>) {
        let mut session = Session::new(transport, 0xabcd, config());
        let (encoder, outputs) = PassthroughEncoder::new();
        let (decoder, _decoded) = PassthroughDecoder::new();
        let (tx, rx) = mpsc::channel(4);
        session
            .start(encoder, outputs, decoder, EncoderConfig::new("vp8", 2, 2, 0).unwrap(), rx)
            .await
            .unwrap();
        (session, tx)
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_stop_is_idempotent() {
        let transport = Arc::new(LoopbackTransport::new(NetemConfig::default()));
        let (mut session, _tx) = started(transport.clone()).await;
        assert_eq!(session.state(), SessionState::Running);

        let (encoder, outputs) = PassthroughEncoder::new();
        let (decoder, _decoded) = PassthroughDecoder::new();
        let (_tx2, rx2) = mpsc::channel(1);
        let again = session
            .start(encoder, outputs, decoder, EncoderConfig::new("vp8", 2, 2, 0).unwrap(), rx2)
            .await;
        assert!(matches!(again, Err(SessionError::AlreadyStarted)));

        let report = session.stop().await.unwrap();
        assert_eq!(report.ssrc, 0xabcd);
        assert!(session.stop().await.is_none());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn unready_transport_fails_start() {
        let transport = Arc::new(LoopbackTransport::new(NetemConfig::default()));
        transport.close();
        let mut session = Session::new(transport, 1, config());
        let (encoder, outputs) = PassthroughEncoder::new();
        let (decoder, _decoded) = PassthroughDecoder::new();
        let (_tx, rx) = mpsc::channel(1);
        let result = session
            .start(encoder, outputs, decoder, EncoderConfig::new("vp8", 2, 2, 0).unwrap(), rx)
            .await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn abrupt_close_surfaces_from_supervise() {
        let transport = Arc::new(LoopbackTransport::new(NetemConfig::default()));
        let (mut session, _tx) = started(transport.clone()).await;
        transport.fail("peer vanished");
        let result = session.supervise().await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(session.stop().await.is_some());
    }
}
