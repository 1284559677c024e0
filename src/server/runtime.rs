//! Start/stop control and the per-connection session task.

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::{io, net::SocketAddr, sync::Arc};

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{RunState, Server, ServerError, ServerInner};
use crate::{
    connection::Connection,
    metrics,
    panic::catch_panic,
    session::StartOutcome,
    sync::lock,
};

impl Server {
    /// Run the accept loop until [`stop`](Self::stop) is called.
    ///
    /// Each accepted connection gets its own session task, so a slow session
    /// never delays the next accept. Callers usually spawn this future. A
    /// stopped server may be started again.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if the accept loop is running.
    /// - [`ServerError::Bind`] if the listener cannot be handed to the
    ///   runtime.
    pub async fn start(&self) -> Result<(), ServerError> {
        let (shutdown, tracker) = {
            let mut run = lock(&self.inner.run);
            if run.is_some() {
                return Err(ServerError::AlreadyRunning);
            }
            let state = RunState::new();
            let handles = (state.shutdown.clone(), state.tracker.clone());
            *run = Some(state);
            handles
        };
        let listener = match self
            .inner
            .listener
            .try_clone()
            .and_then(TcpListener::from_std)
        {
            Ok(listener) => listener,
            Err(e) => {
                lock(&self.inner.run).take();
                return Err(ServerError::Bind(e));
            }
        };

        let local_addr = self.inner.local_addr;
        info!("server started: local_addr={local_addr:?}");
        tracing::info!(?local_addr, "server started");

        let on_accept = {
            let inner = Arc::clone(&self.inner);
            let tracker = tracker.clone();
            let shutdown = shutdown.clone();
            move |stream, peer_addr| spawn_session(&inner, stream, peer_addr, &tracker, &shutdown)
        };
        let on_error = {
            let inner = Arc::clone(&self.inner);
            move |e: &io::Error| {
                metrics::inc_errors("accept");
                let e = io::Error::new(e.kind(), e.to_string());
                inner.events.notify_error(&ServerError::Accept(e));
            }
        };
        tracker
            .track_future(accept_loop(
                Arc::new(listener),
                on_accept,
                on_error,
                AcceptLoopOptions {
                    shutdown,
                    backoff: self.inner.backoff,
                },
            ))
            .await;
        Ok(())
    }

    /// Stop accepting, close every live session and wait for their tasks.
    ///
    /// In-flight handlers are not awaited; their connections are already
    /// closed, so their sends fail with [`crate::Error::NotConnected`].
    ///
    /// On return the live-session table is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if the accept loop is not running.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let run = lock(&self.inner.run)
            .take()
            .ok_or(ServerError::NotRunning)?;
        run.shutdown.cancel();

        let sessions = self.sessions();
        for session in &sessions {
            session.close();
        }
        self.inner.sessions.clear();

        run.tracker.close();
        run.tracker.wait().await;
        // Sessions accepted while the first sweep ran.
        self.inner.sessions.clear();

        let local_addr = self.inner.local_addr;
        info!(
            "server stopped: local_addr={local_addr:?}, closed_sessions={}",
            sessions.len()
        );
        tracing::info!(?local_addr, closed_sessions = sessions.len(), "server stopped");
        Ok(())
    }
}

/// Wrap `stream` in a session, track it and run it on its own task.
fn spawn_session(
    inner: &Arc<ServerInner>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    tracker: &TaskTracker,
    shutdown: &CancellationToken,
) {
    let connection = Connection::from_tcp(stream, inner.codec.clone());
    let session = (inner.factory)(connection, Arc::clone(&inner.services));
    let id = session.id();
    inner.sessions.insert(id, session.clone());
    inner.counters.record_accept();
    debug!("connection accepted: session_id={id}, peer_addr={peer_addr}");
    inner.events.notify_opened(&session);

    let inner = Arc::clone(inner);
    let shutdown = shutdown.clone();
    tracker.spawn(async move {
        let outcome = select! {
            biased;

            () = shutdown.cancelled() => None,
            res = catch_panic(session.start()) => Some(res),
        };
        match outcome {
            Some(Ok(Ok(StartOutcome::Rejected))) => {
                debug!(
                    "session rejected by open conditions: session_id={id}, \
                     peer_addr={peer_addr}"
                );
            }
            Some(Ok(Ok(_))) | None => {}
            Some(Ok(Err(e))) => {
                warn!("session failed: session_id={id}, error={e}, peer_addr={peer_addr}");
                tracing::warn!(session_id = %id, error = %e, %peer_addr, "session failed");
                inner.events.notify_error(&ServerError::Session(e));
            }
            Some(Err(panic)) => {
                metrics::inc_errors("session_panic");
                // Emit via both `log` and `tracing` for tests that capture either.
                error!(
                    "session task panicked: panic={panic}, session_id={id}, \
                     peer_addr={peer_addr}"
                );
                tracing::error!(
                    panic = %panic,
                    session_id = %id,
                    %peer_addr,
                    "session task panicked"
                );
                inner
                    .events
                    .notify_error(&ServerError::SessionPanicked(panic.to_string()));
            }
        }

        session.close();
        inner.sessions.remove(&id);
        inner.counters.record_closed(session.processed_total());
        inner.events.notify_closed(&session);
    });
}
