//! Stream buffering, blocked opens and header flushing

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use wtmux_core::{io, Connection, RawRecvStream, RawSendStream, StreamHandle};
use wtmux_proto::error_code::BUFFERED_STREAM_REJECTED_ERROR_CODE;
use wtmux_proto::SessionId;
use wtmux_session::ConnectionError;
use wtmux_testkit::MemConnection;

use common::{dial, registry};

#[tokio::test(start_paused = true)]
async fn test_stream_ahead_of_session_is_delivered() {
    let (client, server) = MemConnection::pair();
    let registry = registry(Duration::from_secs(5));

    let _control = client.open_stream().unwrap();
    let server_control = server.accept_stream().await.unwrap();

    let data = client.open_stream().unwrap();
    io::write_all(&data, b"hello").await.unwrap();
    let raw = server.accept_stream().await.unwrap();
    registry.register_incoming_bidi_stream(&server, raw, SessionId::new(7));
    assert_eq!(registry.pending_streams(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let session = registry
        .create_session(Arc::new(server.clone()), SessionId::new(7), server_control)
        .unwrap();

    let stream = session.accept_stream().await.unwrap();
    assert_eq!(stream.stream_id(), data.stream_id());
    let mut buf = [0u8; 5];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(registry.pending_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_created_just_before_timeout() {
    let (client, server) = MemConnection::pair();
    let registry = registry(Duration::from_secs(5));

    let _control = client.open_stream().unwrap();
    let server_control = server.accept_stream().await.unwrap();

    let data = client.open_stream().unwrap();
    let raw = server.accept_stream().await.unwrap();
    registry.register_incoming_bidi_stream(&server, raw, SessionId::new(0));

    tokio::time::sleep(Duration::from_millis(4_999)).await;
    let session = registry
        .create_session(Arc::new(server.clone()), SessionId::new(0), server_control)
        .unwrap();

    let stream = session.accept_stream().await.unwrap();
    assert_eq!(stream.stream_id(), data.stream_id());
    assert_eq!(data.reset_code(), None);
}

#[tokio::test(start_paused = true)]
async fn test_uni_stream_ahead_of_session_is_delivered() {
    let (client, server) = MemConnection::pair();
    let registry = registry(Duration::from_secs(5));

    let _control = client.open_stream().unwrap();
    let server_control = server.accept_stream().await.unwrap();

    // Session ID varint followed by the payload
    let sender = client.open_uni_stream().unwrap();
    io::write_all(&sender, &[0x07, b'u', b'n', b'i']).await.unwrap();
    sender.close().unwrap();
    registry
        .register_incoming_uni_stream(&server, server.accept_uni_stream().await.unwrap())
        .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let session = registry
        .create_session(Arc::new(server.clone()), SessionId::new(7), server_control)
        .unwrap();

    let stream = session.accept_uni_stream().await.unwrap();
    assert_eq!(stream.read_to_end().await.unwrap(), b"uni");
}

#[tokio::test(start_paused = true)]
async fn test_orphaned_stream_rejected_once() {
    let (client, server) = MemConnection::pair();
    let registry = registry(Duration::from_secs(5));

    let data = client.open_stream().unwrap();
    let raw = server.accept_stream().await.unwrap();
    registry.register_incoming_bidi_stream(&server, raw, SessionId::new(3));

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(data.reset_code(), None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(data.reset_code(), Some(BUFFERED_STREAM_REJECTED_ERROR_CODE));
    assert_eq!(data.reset_count(), 1);
    assert_eq!(data.stop_sending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_opens_return_close_error() {
    // The control stream uses up the only stream credit
    let (client, _server) = MemConnection::builder().bidi_limit(1).build();
    let registry = registry(Duration::from_secs(5));
    let session = dial(&client, &registry).await;

    let opens: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.open_stream_sync().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    session.close_with_error(42, "bye").await.unwrap();

    for result in join_all(opens).await {
        let err = result.unwrap().unwrap_err();
        assert_eq!(err.as_session_close(), Some(&ConnectionError::local(42, "bye")));
    }
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_open_leaves_credit() {
    let (client, server) = MemConnection::builder().bidi_limit(1).build();
    let registry = registry(Duration::from_secs(5));
    let session = dial(&client, &registry).await;
    let _server_control = server.accept_stream().await.unwrap();

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), session.open_stream_sync()).await;
    assert!(timed_out.is_err());

    // Credit that shows up after an abandoned open is not consumed by it
    client.grant_bidi_streams(1);
    let stream = session.open_stream_sync().await.unwrap();
    stream.write_all(b"ok").await.unwrap();
    let peer = server.accept_stream().await.unwrap();
    assert_eq!(peer.stream_id(), stream.stream_id());
}

#[tokio::test]
async fn test_empty_uni_stream_still_sends_header() {
    let (client, server) = MemConnection::pair();
    let registry = registry(Duration::from_secs(5));
    let session = dial(&client, &registry).await;

    let stream = session.open_uni_stream().unwrap();
    stream.close().await.unwrap();

    let peer = server.accept_uni_stream().await.unwrap();
    let mut received = Vec::new();
    let mut buf = [0u8; 16];
    loop {
        let n = peer.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, [0x40, 0x54, session.id().as_u64() as u8]);
}
