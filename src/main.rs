//! Demo server answering `Text` messages.
//!
//! Replies `Response` with the echoed payload, or `Errore` when the payload
//! is `5`. Runs until Ctrl-C.

mod cli;

use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use wirelink::{
    Connection,
    HandlerRegistry,
    HandlerResult,
    Message,
    Server,
    ServiceContext,
};

async fn text(_: Connection, msg: Message, _: Arc<ServiceContext>) -> HandlerResult {
    if msg.payload() == "5" {
        return Ok(Some(Message::new("Errore", "payload 5 is not accepted")));
    }
    Ok(Some(Message::new(
        "Response",
        format!("Response from server on: {}.", msg.payload()),
    )))
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: std::net::SocketAddr) {
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        warn!("failed to install metrics exporter: error={e}, addr={addr}");
    }
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: std::net::SocketAddr) {
    warn!("built without the `metrics` feature; ignoring --metrics-addr {addr}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr);
    }

    let registry = HandlerRegistry::new().with_handler("Text", text)?;
    let server = Server::with_registry(Arc::new(registry))
        .max_frame_length(cli.max_frame_length)
        .bind(cli.listen_addr())?;

    let running = server.clone();
    let accept = tokio::spawn(async move { running.start().await });
    info!("press Ctrl-C to stop: local_addr={:?}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    server.stop().await?;
    accept.await??;
    info!("{}", server.status());
    Ok(())
}
