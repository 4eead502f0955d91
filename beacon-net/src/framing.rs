//! Message framing for peer streams using tokio-util LengthDelimitedCodec
//!
//! Sync messages are length-prefixed on the wire so a session can read one
//! message at a time from any AsyncRead/AsyncWrite stream, decoupled from
//! the transport (TCP in the daemon, duplex pipes in tests).

use crate::error::NetError;
use beacon_model::SyncMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Framed writer for sending sync messages over any AsyncWrite stream.
pub struct MessageSink<W: AsyncWrite + Send + Unpin> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Send + Unpin> MessageSink<W> {
    pub fn new(stream: W) -> Self {
        Self {
            inner: FramedWrite::new(stream, LengthDelimitedCodec::new()),
        }
    }

    /// Send a sync message (length-prefixed).
    pub async fn send(&mut self, msg: &SyncMessage) -> Result<(), NetError> {
        self.inner
            .send(msg.serialize().into())
            .await
            .map_err(NetError::Io)
    }
}

/// Framed reader for receiving sync messages from any AsyncRead stream.
pub struct MessageStream<R: AsyncRead + Send + Unpin> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Send + Unpin> MessageStream<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: FramedRead::new(stream, LengthDelimitedCodec::new()),
        }
    }

    /// Receive the next sync message (or None if the stream closed).
    pub async fn recv(&mut self) -> Result<Option<SyncMessage>, NetError> {
        match self.inner.next().await {
            Some(Ok(bytes)) => SyncMessage::parse(&bytes).map(Some).map_err(NetError::from),
            Some(Err(e)) => Err(NetError::Io(e)),
            None => Ok(None),
        }
    }
}
