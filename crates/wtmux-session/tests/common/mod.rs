//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use wtmux_session::{MuxConfig, SessionRegistry};
use wtmux_testkit::loopback::{self, LoopbackRegistry, LoopbackSession};
use wtmux_testkit::MemConnection;

pub use wtmux_testkit::loopback::serve;

pub fn registry(timeout: Duration) -> LoopbackRegistry {
    SessionRegistry::new(MuxConfig {
        stream_reordering_timeout: timeout,
        ..MuxConfig::default()
    })
}

/// Request a session on `conn`
pub async fn dial(conn: &MemConnection, registry: &LoopbackRegistry) -> LoopbackSession {
    loopback::dial(conn, registry).await.unwrap()
}

/// Client and server sessions joined over a fresh connection pair
pub async fn session_pair() -> (MemConnection, LoopbackSession, MemConnection, LoopbackSession) {
    let (client, server) = MemConnection::pair();
    let client_registry = registry(Duration::from_secs(5));
    let server_registry = registry(Duration::from_secs(5));

    let _ = serve(&client, &client_registry);
    let mut sessions = serve(&server, &server_registry);

    let client_session = dial(&client, &client_registry).await;
    let server_session = sessions.recv().await.unwrap();
    (client, client_session, server, server_session)
}
