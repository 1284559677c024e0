//! The accept loop.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub backoff: BackoffConfig,
}

/// Accept connections until `shutdown` is cancelled.
///
/// Each accepted stream is handed to `on_accept`, which must not block: the
/// next accept starts as soon as it returns. Accept failures are reported to
/// `on_error` and retried after an exponential back-off.
pub(in crate::server) async fn accept_loop<L, A, E>(
    listener: Arc<L>,
    on_accept: A,
    on_error: E,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
    A: Fn(TcpStream, SocketAddr),
    E: Fn(&io::Error),
{
    let AcceptLoopOptions { shutdown, backoff } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    on_accept(stream, peer_addr);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    on_error(&e);
                    if wait_or_shutdown(&shutdown, delay).await {
                        break;
                    }
                    delay = backoff.next(delay);
                }
            },
        }
    }
}

/// Sleep for `delay`, returning `true` if shutdown fired first.
async fn wait_or_shutdown(shutdown: &CancellationToken, delay: Duration) -> bool {
    select! {
        biased;

        () = shutdown.cancelled() => true,
        () = sleep(delay) => false,
    }
}
