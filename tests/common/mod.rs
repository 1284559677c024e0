//! Shared utilities for integration tests.
//!
//! Provides the demo `Text` handler, a listener bound to an unused local port
//! and helpers for running a server in the background.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;
use tokio::{
    task::JoinHandle,
    time::{Duration, sleep, timeout},
};
use wirelink::{
    Client,
    ClientBuilder,
    Connection,
    HandlerRegistry,
    HandlerResult,
    Message,
    Server,
    ServerError,
    ServiceContext,
};

/// Create a TCP listener bound to a free local port.
#[fixture]
pub fn unused_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("failed to bind port")
}

/// Answers `Errore` for payload `5`, otherwise echoes inside a `Response`.
pub async fn text_handler(_: Connection, msg: Message, _: Arc<ServiceContext>) -> HandlerResult {
    if msg.payload() == "5" {
        return Ok(Some(Message::new("Errore", "payload 5 is not accepted")));
    }
    Ok(Some(Message::new(
        "Response",
        format!("Response from server on: {}.", msg.payload()),
    )))
}

/// A bound server with the `Text` handler registered.
pub fn text_server(listener: StdTcpListener) -> Server {
    let registry = HandlerRegistry::new()
        .with_handler("Text", text_handler)
        .expect("register Text");
    Server::with_registry(Arc::new(registry))
        .bind_existing_listener(listener)
        .expect("bind")
}

/// Spawn the accept loop and wait until it runs.
pub async fn start(server: &Server) -> JoinHandle<Result<(), ServerError>> {
    let running = server.clone();
    let handle = tokio::spawn(async move { running.start().await });
    wait_until(|| server.is_running()).await;
    handle
}

/// Connect a client with a one second default timeout.
pub async fn client_for(server: &Server) -> Client {
    ClientBuilder::new()
        .default_timeout(Duration::from_secs(1))
        .connect(server.local_addr().expect("server is bound"))
        .await
        .expect("connect")
}

/// Poll `condition` until it holds, failing after one second.
pub async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
