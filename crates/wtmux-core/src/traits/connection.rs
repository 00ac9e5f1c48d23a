//! Connection traits

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::traits::stream::{RawRecvStream, RawSendStream, RawStream};
use crate::types::ConnectionId;

/// Capabilities the session layer needs from the shared transport connection
///
/// The blocking opens wait for the peer to raise its stream limit. They are
/// cancelled by dropping the returned future, so implementations must not
/// leak a stream when that happens.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Bidirectional stream type
    type Stream: RawStream;
    /// Outgoing unidirectional stream type
    type SendStream: RawSendStream;
    /// Incoming unidirectional stream type
    type RecvStream: RawRecvStream;

    /// Identifier of this connection
    fn id(&self) -> ConnectionId;

    /// Open a bidirectional stream, failing if the stream limit is reached
    fn open_stream(&self) -> Result<Self::Stream, TransportError>;

    /// Open a bidirectional stream, waiting for stream credit if needed
    async fn open_stream_sync(&self) -> Result<Self::Stream, TransportError>;

    /// Open a unidirectional stream, failing if the stream limit is reached
    fn open_uni_stream(&self) -> Result<Self::SendStream, TransportError>;

    /// Open a unidirectional stream, waiting for stream credit if needed
    async fn open_uni_stream_sync(&self) -> Result<Self::SendStream, TransportError>;

    /// Token cancelled when the connection goes away
    fn context(&self) -> CancellationToken;
}
