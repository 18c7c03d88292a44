//! In-process echo transport.
//!
//! Every stream opened by the sender comes back as an incoming stream, the
//! way an echo server would return it. Each stream gets its own delivery
//! delay (`base_delay` plus uniform `jitter`), so streams overtake each
//! other; a lost stream is never delivered.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{SendStream, Transport};
use crate::error::TransportError;

/// Network impairment applied per stream.
#[derive(Debug, Clone)]
pub struct NetemConfig {
    pub base_delay: Duration,
    pub jitter: Duration,
    /// Percentage of streams never delivered, 0.0 - 100.0.
    pub loss_percent: f64,
    /// In-flight byte capacity of each stream.
    pub stream_buffer: usize,
}

impl Default for NetemConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            loss_percent: 0.0,
            stream_buffer: 256 * 1024,
        }
    }
}

impl NetemConfig {
    fn sample_delay(&self) -> Duration {
        let jitter_us = self.jitter.as_micros() as u64;
        if jitter_us == 0 {
            return self.base_delay;
        }
        self.base_delay + Duration::from_micros(rand::rng().random_range(0..=jitter_us))
    }

    fn sample_loss(&self) -> bool {
        self.loss_percent > 0.0 && rand::random::<f64>() * 100.0 < self.loss_percent
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

struct LoopbackInner {
    netem: NetemConfig,
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<DuplexStream>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    shutdown: CancellationToken,
    failure: Mutex<Option<String>>,
}

impl LoopbackTransport {
    pub fn new(netem: NetemConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LoopbackInner {
                netem,
                incoming_tx: Mutex::new(Some(tx)),
                incoming_rx: tokio::sync::Mutex::new(rx),
                shutdown: CancellationToken::new(),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Tear the connection down as if the network failed.
    pub fn fail(&self, reason: &str) {
        *self.inner.failure.lock() = Some(reason.to_string());
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Transport for LoopbackTransport {
    type Send = LoopbackSendStream;
    type Recv = DuplexStream;

    async fn ready(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn open_uni(&self) -> Result<LoopbackSendStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let tx = self
            .inner
            .incoming_tx
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;

        let (local, remote) = tokio::io::duplex(self.inner.netem.stream_buffer);
        let delay = self.inner.netem.sample_delay();
        let lost = self.inner.netem.sample_loss();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Dropping `remote` breaks the sender's pipe if it is still writing.
            if !lost {
                let _ = tx.send(remote);
            }
        });

        Ok(LoopbackSendStream { inner: Some(local) })
    }

    async fn accept_uni(&self) -> Option<DuplexStream> {
        let mut rx = self.inner.incoming_rx.lock().await;
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => None,
            stream = rx.recv() => stream,
        }
    }

    async fn closed(&self) -> Result<(), TransportError> {
        self.inner.shutdown.cancelled().await;
        match self.inner.failure.lock().clone() {
            Some(reason) => Err(TransportError::Aborted(reason)),
            None => Ok(()),
        }
    }

    fn close(&self) {
        self.inner.incoming_tx.lock().take();
        self.inner.shutdown.cancel();
    }
}

/// Sending half of a loopback stream.
pub struct LoopbackSendStream {
    inner: Option<DuplexStream>,
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream aborted")
}

impl SendStream for LoopbackSendStream {
    fn abort(&mut self, _reason: &str) -> Result<(), TransportError> {
        match self.inner.take() {
            Some(_) => Ok(()),
            None => Err(TransportError::Io(aborted())),
        }
    }
}

impl AsyncWrite for LoopbackSendStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.as_mut() {
            Some(s) => Pin::new(s).poll_write(cx, buf),
            None => Poll::Ready(Err(aborted())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(s) => Pin::new(s).poll_flush(cx),
            None => Poll::Ready(Err(aborted())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(s) => Pin::new(s).poll_shutdown(cx),
            None => Poll::Ready(Err(aborted())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn opened_stream_is_echoed_back() {
        let t = LoopbackTransport::new(NetemConfig::default());
        t.ready().await.unwrap();
        let mut s = t.open_uni().await.unwrap();
        s.write_all(b"hello").await.unwrap();
        s.shutdown().await.unwrap();

        let mut r = t.accept_uni().await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn aborted_stream_reads_truncated() {
        let t = LoopbackTransport::new(NetemConfig::default());
        let mut s = t.open_uni().await.unwrap();
        s.write_all(b"par").await.unwrap();
        s.abort("too slow").unwrap();
        assert!(s.write_all(b"tial").await.is_err());
        assert!(s.abort("again").is_err());

        let mut r = t.accept_uni().await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"par");
    }

    #[tokio::test]
    async fn total_loss_delivers_nothing() {
        let t = LoopbackTransport::new(NetemConfig {
            loss_percent: 100.0,
            ..Default::default()
        });
        let mut s = t.open_uni().await.unwrap();
        let _ = s.write_all(b"gone").await;
        let got = tokio::time::timeout(Duration::from_millis(50), t.accept_uni()).await;
        assert!(got.is_err(), "lost stream must not be delivered");
    }

    #[tokio::test]
    async fn close_ends_accept_and_open() {
        let t = LoopbackTransport::new(NetemConfig::default());
        t.close();
        assert!(t.accept_uni().await.is_none());
        assert!(matches!(t.open_uni().await, Err(TransportError::Closed)));
        assert!(t.closed().await.is_ok());
    }

    #[tokio::test]
    async fn failure_surfaces_from_closed() {
        let t = LoopbackTransport::new(NetemConfig::default());
        t.fail("link down");
        match t.closed().await {
            Err(TransportError::Aborted(reason)) => assert_eq!(reason, "link down"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
