//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;
use tokio::{
    task::JoinHandle,
    time::{Duration, sleep, timeout},
};

use super::{Server, ServerError};
use crate::{
    connection::Connection,
    context::ServiceContext,
    message::Message,
    registry::{HandlerRegistry, HandlerResult},
};

#[fixture]
/// Returns a bound listener on a free port.
///
/// Keeping the listener bound prevents another process from claiming the
/// port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

async fn echo(_: Connection, msg: Message, _: Arc<ServiceContext>) -> HandlerResult {
    Ok(Some(Message::new("Echoed", msg.payload())))
}

#[fixture]
pub fn echo_registry() -> Arc<HandlerRegistry> {
    Arc::new(
        HandlerRegistry::new()
            .with_handler("Echo", echo)
            .expect("register Echo"),
    )
}

pub fn bind_echo_server(listener: StdTcpListener) -> Server {
    Server::with_registry(echo_registry())
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

/// Spawn `server.start()` and wait until it reports running.
pub async fn spawn_running(server: &Server) -> JoinHandle<Result<(), ServerError>> {
    let running = server.clone();
    let handle = tokio::spawn(async move { running.start().await });
    wait_until(|| server.is_running()).await;
    handle
}

/// Poll `condition` every few milliseconds for up to a second.
pub async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
