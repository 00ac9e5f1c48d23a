//! Loopback demo: one session, a batch of streams, then a close

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use wtmux_core::config::MuxConfig;
use wtmux_core::ConnectionError;
use wtmux_proto::{SessionErrorCode, SessionId, StreamId};
use wtmux_session::SessionRegistry;
use wtmux_testkit::loopback::{self, LoopbackSession};
use wtmux_testkit::MemConnection;

/// Extra time granted to uni streams beyond the reordering timeout
const RECEIPT_GRACE: Duration = Duration::from_millis(250);

/// What the demo does
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Bidirectional streams to echo over, and as many uni streams
    pub streams: usize,
    /// Bytes written on each stream
    pub payload_size: usize,
    /// How long the session request is held back after streams are opened
    pub announce_delay: Duration,
    /// Code the session is closed with
    pub close_code: SessionErrorCode,
    /// Message the session is closed with
    pub close_message: String,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            streams: 3,
            payload_size: 1024,
            announce_delay: Duration::ZERO,
            close_code: 0,
            close_message: "demo finished".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    Unidirectional,
}

/// Fate of a single stream
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub stream_id: StreamId,
    pub direction: Direction,
    pub sent: usize,
    /// Bytes echoed back (bidi) or seen by the peer (uni), or why not
    pub result: Result<usize, String>,
}

/// Everything the demo observed
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub session_id: SessionId,
    pub streams: Vec<StreamOutcome>,
    /// Close reason as seen by the peer session
    pub peer_close: ConnectionError,
}

impl DemoReport {
    /// Streams that made it to the peer intact
    pub fn delivered(&self) -> usize {
        self.streams.iter().filter(|s| s.result.is_ok()).count()
    }
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Run the demo over a fresh in-memory connection pair
pub async fn run_demo(config: MuxConfig, options: DemoOptions) -> Result<DemoReport> {
    let (client, server) = MemConnection::pair();
    let client_registry = SessionRegistry::new(config.clone());
    let server_registry = SessionRegistry::new(config.clone());

    let mut incoming = loopback::serve(&server, &server_registry);
    let (session, control) = loopback::dial_unannounced(&client, &client_registry).await?;
    tracing::info!(
        "Session {} opened, request held for {:?}",
        session.id(),
        options.announce_delay
    );

    let delay = options.announce_delay;
    let announcer = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        loopback::announce(&control).await
    });

    let (receipt_tx, mut receipt_rx) = mpsc::unbounded_channel();
    let peer = tokio::spawn(async move {
        let peer = incoming.recv().await?;
        tracing::info!("Peer established session {}", peer.id());
        serve_peer(&peer, receipt_tx);
        Some(peer.closed().await)
    });

    let data = payload(options.payload_size);
    let mut echoes = Vec::with_capacity(options.streams);
    let mut uni_ids = Vec::with_capacity(options.streams);
    for _ in 0..options.streams {
        let stream = session.open_stream_sync().await?;
        let echo_data = data.clone();
        echoes.push(async move {
            let stream_id = stream.stream_id();
            let result = async {
                stream.write_all(&echo_data).await?;
                stream.close().await?;
                stream.read_to_end().await
            }
            .await
            .map_err(|e| e.to_string())
            .and_then(|echoed| {
                if echoed == echo_data {
                    Ok(echoed.len())
                } else {
                    Err(format!("echo mismatch ({} bytes)", echoed.len()))
                }
            });
            StreamOutcome {
                stream_id,
                direction: Direction::Bidirectional,
                sent: echo_data.len(),
                result,
            }
        });

        let uni = session.open_uni_stream_sync().await?;
        uni.write_all(&data).await?;
        uni.close().await?;
        uni_ids.push(uni.stream_id());
    }

    let mut outcomes = join_all(echoes).await;

    // Rejected uni streams never produce a receipt
    let deadline = Instant::now() + delay.max(config.stream_reordering_timeout) + RECEIPT_GRACE;
    let mut receipts = Vec::new();
    while receipts.len() < uni_ids.len() {
        match tokio::time::timeout_at(deadline, receipt_rx.recv()).await {
            Ok(Some(receipt)) => receipts.push(receipt),
            Ok(None) | Err(_) => break,
        }
    }
    outcomes.extend(uni_ids.into_iter().map(|stream_id| {
        let result = receipts
            .iter()
            .find(|(id, _)| *id == stream_id)
            .map(|(_, len)| *len)
            .ok_or_else(|| "not delivered".to_string());
        StreamOutcome {
            stream_id,
            direction: Direction::Unidirectional,
            sent: data.len(),
            result,
        }
    }));

    announcer.await?.context("Session request was not sent")?;
    if let Err(e) = session
        .close_with_error(options.close_code, &options.close_message)
        .await
    {
        tracing::warn!("Closing session {} reported: {}", session.id(), e);
    }

    let peer_close = peer
        .await?
        .context("Peer never established the session")?;

    client_registry.close().await;
    server_registry.close().await;
    client.close();

    Ok(DemoReport {
        session_id: session.id(),
        streams: outcomes,
        peer_close,
    })
}

/// Echo bidi streams and report uni stream sizes until the session ends
fn serve_peer(peer: &LoopbackSession, receipts: mpsc::UnboundedSender<(StreamId, usize)>) {
    let bidi = peer.clone();
    tokio::spawn(async move {
        while let Ok(stream) = bidi.accept_stream().await {
            tokio::spawn(async move {
                let echoed = async {
                    let data = stream.read_to_end().await?;
                    stream.write_all(&data).await?;
                    stream.close().await
                };
                if let Err(e) = echoed.await {
                    tracing::debug!("Echo on stream {} failed: {}", stream.stream_id(), e);
                }
            });
        }
    });

    let uni = peer.clone();
    tokio::spawn(async move {
        while let Ok(stream) = uni.accept_uni_stream().await {
            let receipts = receipts.clone();
            tokio::spawn(async move {
                match stream.read_to_end().await {
                    Ok(data) => {
                        let _ = receipts.send((stream.stream_id(), data.len()));
                    }
                    Err(e) => tracing::debug!("Uni stream {} failed: {}", stream.stream_id(), e),
                }
            });
        }
    });
}
