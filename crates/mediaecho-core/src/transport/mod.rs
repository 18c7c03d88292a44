//! Multi-stream transport capability.
//!
//! The pipelines only need unidirectional streams: open one per outgoing
//! frame, accept incoming ones in arrival order, and the session lifecycle
//! signals. Encryption and congestion control belong to the transport.

pub mod loopback;

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

pub use loopback::{LoopbackTransport, NetemConfig};

/// Sending half of a unidirectional stream.
///
/// Closing is `AsyncWriteExt::shutdown`. What dropping an unfinished
/// stream means is up to the transport, so senders abandon a stream with
/// [`SendStream::abort`] rather than by dropping it.
pub trait SendStream: AsyncWrite + Unpin + Send + 'static {
    /// Abandon the stream. The peer sees a truncated stream. Best effort.
    fn abort(&mut self, reason: &str) -> Result<(), TransportError>;
}

pub trait Transport: Send + Sync + 'static {
    type Send: SendStream;
    type Recv: AsyncRead + Unpin + Send + 'static;

    /// Resolves once the session is usable.
    fn ready(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn open_uni(&self) -> impl Future<Output = Result<Self::Send, TransportError>> + Send;

    /// Next incoming unidirectional stream, in arrival order. `None` once the
    /// transport will offer no more streams.
    fn accept_uni(&self) -> impl Future<Output = Option<Self::Recv>> + Send;

    /// Resolves when the session ends: `Ok` for a normal close, `Err` if it
    /// was torn down abruptly.
    fn closed(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&self);
}
