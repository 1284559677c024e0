//! A single framed stream connection.
//!
//! [`Connection`] owns one byte stream exclusively. Outbound messages go
//! through a write gate so concurrent callers never interleave frames; inbound
//! messages are read by [`Connection::receive_loop`] and handed to the attached
//! receiver, or buffered in arrival order until one is attached.
//!
//! Transport failures never escape as errors: a failed read or write
//! disconnects the connection and callers observe [`Error::NotConnected`].

use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures::{FutureExt, SinkExt, StreamExt, future::BoxFuture};
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    select,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use crate::{
    codec::{CodecError, MessageCodec},
    error::{Error, Result},
    message::Message,
    metrics::{self, Direction},
    sync::lock,
};

mod inbox;
mod state;

use inbox::Inbox;
pub use state::ConnectionState;
use state::AtomicState;

/// Callback receiving inbound messages.
pub(crate) type Receiver = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

type DisconnectObserver = Arc<dyn Fn(&Connection) + Send + Sync>;
type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, MessageCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, MessageCodec>;

struct Inner {
    peer_addr: Option<SocketAddr>,
    state: AtomicState,
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader: Mutex<Option<Reader>>,
    inbox: Mutex<Inbox>,
    closed: CancellationToken,
    on_disconnect: Mutex<Vec<DisconnectObserver>>,
}

/// Handle to a framed stream connection.
///
/// Clones share the same underlying stream.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap an arbitrary duplex byte stream.
    ///
    /// `peer_addr` identifies the remote end for equality and logging.
    #[must_use]
    pub fn from_stream<S>(stream: S, peer_addr: Option<SocketAddr>, codec: MessageCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(Box::new(read), Box::new(write), peer_addr, codec)
    }

    /// Wrap an accepted or dialled TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream, codec: MessageCodec) -> Self {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: error={e:?}, peer_addr={peer_addr:?}");
        }
        let (read, write) = stream.into_split();
        Self::from_parts(Box::new(read), Box::new(write), peer_addr, codec)
    }

    /// Dial `addr` and wrap the resulting stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the TCP connection cannot be established.
    pub async fn connect<A: ToSocketAddrs>(addr: A, codec: MessageCodec) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(Error::Connect)?;
        Ok(Self::from_tcp(stream, codec))
    }

    fn from_parts(
        read: Box<dyn AsyncRead + Send + Unpin>,
        write: Box<dyn AsyncWrite + Send + Unpin>,
        peer_addr: Option<SocketAddr>,
        codec: MessageCodec,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                peer_addr,
                state: AtomicState::new(ConnectionState::Connected),
                writer: tokio::sync::Mutex::new(Some(FramedWrite::new(write, codec.clone()))),
                reader: Mutex::new(Some(FramedRead::new(read, codec))),
                inbox: Mutex::new(Inbox::default()),
                closed: CancellationToken::new(),
                on_disconnect: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Remote endpoint address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.inner.peer_addr }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.inner.state.load() }

    /// Returns `true` while the stream is open.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == ConnectionState::Connected }

    /// Resolves once the connection has disconnected.
    pub async fn closed(&self) { self.inner.closed.cancelled().await; }

    /// Number of inbound messages waiting for a receiver.
    #[must_use]
    pub fn buffered_len(&self) -> usize { lock(&self.inner.inbox).buffered_len() }

    /// Write one frame.
    ///
    /// Concurrent callers queue on the write gate; each frame is written
    /// whole before the next caller proceeds.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is, or becomes,
    ///   disconnected. An I/O failure disconnects the connection.
    /// - [`Error::InvalidArgument`] if the message cannot be framed, for
    ///   instance because it exceeds the maximum frame length. Nothing is
    ///   written and the connection stays open.
    pub async fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let closed = &self.inner.closed;
        let mut gate = select! {
            biased;

            () = closed.cancelled() => return Err(Error::NotConnected),
            gate = self.inner.writer.lock() => gate,
        };
        let Some(writer) = gate.as_mut() else {
            return Err(Error::NotConnected);
        };
        let outcome = select! {
            biased;

            () = closed.cancelled() => None,
            res = writer.send(message) => Some(res),
        };
        match outcome {
            Some(Ok(())) => {
                if closed.is_cancelled() {
                    gate.take();
                }
                metrics::inc_messages(Direction::Outbound);
                Ok(())
            }
            Some(Err(CodecError::Io(e))) => {
                warn!("send failed: error={e:?}, peer_addr={:?}", self.peer_addr());
                gate.take();
                drop(gate);
                self.disconnect();
                Err(Error::NotConnected)
            }
            Some(Err(e)) => Err(Error::InvalidArgument(e.to_string())),
            None => {
                gate.take();
                Err(Error::NotConnected)
            }
        }
    }

    /// Read frames until `cancel` fires, the peer closes, or a read fails.
    ///
    /// Each message goes to the attached receiver, whose future is spawned
    /// onto the runtime so a slow handler never stalls the next read. The
    /// connection is disconnected when the loop ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the peer violated the framing
    /// contract. A clean close, an I/O failure or cancellation end the loop
    /// with `Ok(())`.
    pub async fn receive_loop(&self, cancel: CancellationToken) -> Result<()> {
        let Some(mut reader) = lock(&self.inner.reader).take() else {
            debug!(
                "receive loop not started: peer_addr={:?}, state={}",
                self.peer_addr(),
                self.state()
            );
            return Ok(());
        };
        let outcome = loop {
            let next = select! {
                biased;

                () = cancel.cancelled() => break Ok(()),
                () = self.inner.closed.cancelled() => break Ok(()),
                next = reader.next() => next,
            };
            match next {
                Some(Ok(message)) => {
                    metrics::inc_messages(Direction::Inbound);
                    self.deliver(message);
                }
                Some(Err(e)) if e.is_malformed() => {
                    let peer_addr = self.peer_addr();
                    warn!("malformed frame: error={e}, peer_addr={peer_addr:?}");
                    tracing::warn!(error = %e, ?peer_addr, "malformed frame");
                    metrics::inc_errors(e.error_type());
                    break Err(Error::MalformedFrame(e));
                }
                Some(Err(e)) => {
                    debug!("read failed: error={e}, peer_addr={:?}", self.peer_addr());
                    break Ok(());
                }
                None => break Ok(()),
            }
        };
        drop(reader);
        self.disconnect();
        outcome
    }

    fn deliver(&self, message: Message) {
        let mut inbox = lock(&self.inner.inbox);
        match inbox.receiver() {
            Some(receiver) => {
                let fut = receiver(message);
                drop(inbox);
                tokio::spawn(fut);
            }
            None => inbox.buffer(message),
        }
    }

    /// Register the inbound message callback.
    ///
    /// Messages buffered before the call are handed over first, in arrival
    /// order. A later call replaces the callback; deliveries already
    /// dispatched still complete. The callback itself runs under the inbox
    /// lock and should only build its future.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while messages are buffered.
    pub fn attach_receiver<F, Fut>(&self, receiver: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let receiver: Receiver = Arc::new(move |message| receiver(message).boxed());
        let mut inbox = lock(&self.inner.inbox);
        let backlog = inbox.attach(Arc::clone(&receiver));
        if !self.is_connected() {
            inbox.detach();
        }
        for message in backlog {
            tokio::spawn(receiver(message));
        }
    }

    /// Register a callback fired once when the connection disconnects.
    ///
    /// Registering on an already disconnected connection fires immediately.
    pub fn on_disconnect<F>(&self, observer: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        let mut observers = lock(&self.inner.on_disconnect);
        if self.is_connected() {
            observers.push(Arc::new(observer));
        } else {
            drop(observers);
            observer(self);
        }
    }

    /// Close the stream and notify disconnect observers.
    ///
    /// Idempotent: only the first call, from any path, has an effect.
    pub fn disconnect(&self) {
        if !self.inner.state.mark_disconnected() {
            return;
        }
        self.inner.closed.cancel();
        // A sender holding the gate drops the writer itself once it sees
        // `closed`.
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            writer.take();
        }
        lock(&self.inner.reader).take();
        lock(&self.inner.inbox).detach();
        debug!("connection closed: peer_addr={:?}", self.peer_addr());
        let observers = std::mem::take(&mut *lock(&self.inner.on_disconnect));
        for observer in observers {
            observer(self);
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || matches!((self.peer_addr(), other.peer_addr()), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
