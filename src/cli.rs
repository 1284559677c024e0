//! Command line interface for the `wirelink` demo server.
//!
//! Also compiled by the build script to render the man page, so it must only
//! depend on `clap` and `std`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

/// Command line arguments for the `wirelink` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wirelink",
    version,
    about = "Demo request/response server answering `Text` messages"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 5335)]
    pub port: u16,

    /// Largest accepted frame in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_frame_length: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Listening address assembled from `--bind` and `--port`.
    #[must_use]
    #[allow(dead_code, reason = "the build script only renders the command")]
    pub fn listen_addr(&self) -> SocketAddr { SocketAddr::new(self.bind, self.port) }
}
