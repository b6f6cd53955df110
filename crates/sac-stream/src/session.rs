//! Subscription session: the public handle plus the background driver
//! task that owns the connection lifecycle.
//!
//! The handle is cheap to share and never blocks: `send` enqueues,
//! `start`/`stop` signal the driver over channels, and listeners are
//! invoked from the driver task. One driver task per session owns the
//! transport connection, the outbound queue, and the reconnect loop.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{mpsc, watch},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::SessionConfig,
    decode::FrameDecoder,
    error::{StreamError, StreamResult},
    frame::Frame,
    queue::{OutboundMessage, OutboundQueue},
    reconnect::ReconnectDecision,
    transport::{StreamTransport, TransportConn},
};

/// Connection lifecycle state, queryable at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet started.
    Idle,
    /// Establishing a connection (initial or reconnect).
    Connecting,
    /// Connection live; frames flowing.
    Open,
    /// Explicit stop in progress; transport winding down.
    Closing,
    /// Terminal: stopped, or the reconnect policy gave up. Never left.
    Closed,
}

/// Event delivered to registered listeners.
#[derive(Clone, Debug)]
pub enum SessionEvent<E> {
    /// A connection was established and the outbound queue flushed.
    /// Fires on every successful (re)connect, not just the first.
    Open,
    /// A decoded inbound event.
    Message(E),
    /// The server closed the connection. Not emitted on explicit stop.
    Close { reason: Option<String> },
    /// A connection attempt failed or a live connection faulted.
    Error { message: String },
    /// The reconnect policy gave up; the session is now `Closed`.
    MaxAttemptsReached,
}

impl<E> SessionEvent<E> {
    /// The kind used for listener registration.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Close { .. } => EventKind::Close,
            Self::Error { .. } => EventKind::Error,
            Self::MaxAttemptsReached => EventKind::MaxAttemptsReached,
        }
    }
}

/// Listener registration key, one per [`SessionEvent`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    MaxAttemptsReached,
}

/// Handle returned by [`StreamSession::on`], used to deregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Arc<dyn Fn(&SessionEvent<E>) + Send + Sync>;

struct ListenerEntry<E> {
    id: ListenerId,
    kind: EventKind,
    handler: Handler<E>,
}

/// Listener registry shared between the handle and the driver.
struct Listeners<E> {
    entries: Mutex<Vec<ListenerEntry<E>>>,
    next_id: AtomicU64,
}

impl<E> Listeners<E> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, kind: EventKind, handler: Handler<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry { id, kind, handler });
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Invoke matching listeners in registration order. Handlers run
    /// outside the lock so they may register or remove listeners; a
    /// panicking handler is contained and the rest still run.
    fn emit(&self, event: &SessionEvent<E>) {
        let kind = event.kind();
        let handlers: Vec<Handler<E>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| Arc::clone(&e.handler))
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(kind = ?kind, "Event listener panicked");
            }
        }
    }
}

enum Control {
    Stop,
}

/// An auto-reconnecting subscription over a [`StreamTransport`].
///
/// ```no_run
/// # use std::time::Duration;
/// # use sac_stream::{
/// #     AuthToken, Endpoint, EventKind, SessionConfig, StreamSession, WatchEventDecoder,
/// # };
/// # async fn demo() -> Result<(), sac_stream::StreamError> {
/// let config = SessionConfig::new(
///     Endpoint::new("ws://localhost:8081/api/skill-sync/watch").auth(AuthToken::query("tok")),
/// )
/// .max_attempts(Some(5))
/// .base_delay(Duration::from_secs(3));
///
/// let session = StreamSession::websocket(config, WatchEventDecoder)?;
/// session.on(EventKind::Message, |event| println!("{event:?}"));
/// session.start();
/// # Ok(())
/// # }
/// ```
pub struct StreamSession<D: FrameDecoder> {
    cmd_tx: mpsc::UnboundedSender<OutboundMessage>,
    ctrl_tx: mpsc::UnboundedSender<Control>,
    state: Arc<watch::Sender<ConnectionState>>,
    listeners: Arc<Listeners<D::Event>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
    parts: Mutex<Option<DriverParts<D>>>,
}

/// Everything the driver task takes ownership of on `start`.
struct DriverParts<D: FrameDecoder> {
    config: SessionConfig,
    transport: Arc<dyn StreamTransport>,
    decoder: D,
    cmd_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    ctrl_rx: mpsc::UnboundedReceiver<Control>,
}

impl<D: FrameDecoder> StreamSession<D> {
    /// Create a session over an arbitrary transport. Fails on invalid
    /// configuration.
    pub fn new(
        config: SessionConfig,
        transport: impl StreamTransport,
        decoder: D,
    ) -> StreamResult<Self> {
        config.validate().map_err(StreamError::config)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            cmd_tx,
            ctrl_tx,
            state: Arc::new(state),
            listeners: Arc::new(Listeners::new()),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
            parts: Mutex::new(Some(DriverParts {
                config,
                transport: Arc::new(transport),
                decoder,
                cmd_rx,
                ctrl_rx,
            })),
        })
    }

    /// Create a WebSocket session.
    pub fn websocket(config: SessionConfig, decoder: D) -> StreamResult<Self> {
        Self::new(config, crate::transport::WebSocketTransport::new(), decoder)
    }

    /// Create a streaming-HTTP session (receive-only).
    pub fn http(config: SessionConfig, decoder: D) -> StreamResult<Self> {
        Self::new(config, crate::transport::HttpStreamTransport::new(), decoder)
    }

    /// Spawn the driver task and begin connecting. Idempotent: calling
    /// again while running, or after `stop`, does nothing.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Ignoring start on stopped session");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Session already started");
            return;
        }
        let parts = self
            .parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(parts) = parts {
            info!(url = %parts.config.endpoint.url, "Starting stream session");
            let driver = Driver {
                config: parts.config,
                transport: parts.transport,
                decoder: parts.decoder,
                listeners: Arc::clone(&self.listeners),
                state: Arc::clone(&self.state),
                stopped: Arc::clone(&self.stopped),
                cmd_rx: parts.cmd_rx,
                ctrl_rx: parts.ctrl_rx,
                queue: OutboundQueue::new(),
                failures: 0,
            };
            tokio::spawn(driver.run());
        }
    }

    /// Stop the session from any state. Terminal and idempotent: drops
    /// queued messages, cancels any pending reconnect, and guarantees no
    /// further connection attempt.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.started.load(Ordering::SeqCst) {
            let _ = self.ctrl_tx.send(Control::Stop);
        } else {
            self.state.send_replace(ConnectionState::Closed);
            debug!("Session stopped before start");
        }
    }

    /// Submit an outbound message. Never blocks and never fails: if the
    /// connection is not open the message is queued and flushed, in
    /// order, on the next successful connect. Dropped silently after
    /// `stop`.
    pub fn send(&self, frame: impl Into<Frame>) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Dropping send on stopped session");
            return;
        }
        let _ = self.cmd_tx.send(OutboundMessage::new(frame.into()));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions (for callers that need to await them).
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register a listener for one event kind. Listeners fire in
    /// registration order, from the driver task.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent<D::Event>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(kind, Arc::new(handler))
    }

    /// Deregister a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// Why the connected loop ended.
enum Disconnect {
    /// Orderly server-side close.
    Server(Option<String>),
    /// Transport fault (read error, failed send).
    Fault(String),
    /// Explicit stop.
    Stop,
}

struct Driver<D: FrameDecoder> {
    config: SessionConfig,
    transport: Arc<dyn StreamTransport>,
    decoder: D,
    listeners: Arc<Listeners<D::Event>>,
    state: Arc<watch::Sender<ConnectionState>>,
    stopped: Arc<AtomicBool>,
    cmd_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    ctrl_rx: mpsc::UnboundedReceiver<Control>,
    queue: OutboundQueue,
    failures: u32,
}

impl<D: FrameDecoder> Driver<D> {
    async fn run(mut self) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                self.finish();
                return;
            }
            self.set_state(ConnectionState::Connecting);

            // The stop arm is polled first, so once `stop` is called no
            // further connection attempt is made.
            let attempt = timeout(
                self.config.connect_timeout,
                self.transport.open(&self.config.endpoint),
            );
            let outcome = tokio::select! {
                biased;
                _ = self.ctrl_rx.recv() => None,
                result = attempt => Some(result),
            };
            let conn = match outcome {
                None => {
                    self.finish();
                    return;
                }
                Some(Ok(Ok(conn))) => Some(conn),
                Some(Ok(Err(e))) => {
                    warn!(error = %e, url = %self.config.endpoint.url, "Connection attempt failed");
                    self.emit(&SessionEvent::Error {
                        message: e.to_string(),
                    });
                    None
                }
                Some(Err(_)) => {
                    let e = StreamError::timeout(self.config.connect_timeout);
                    warn!(error = %e, url = %self.config.endpoint.url, "Connection attempt timed out");
                    self.emit(&SessionEvent::Error {
                        message: e.to_string(),
                    });
                    None
                }
            };

            if let Some(mut conn) = conn {
                info!(url = %self.config.endpoint.url, "Stream connected");
                self.failures = 0;
                self.set_state(ConnectionState::Open);

                // Messages submitted while disconnected sit in the
                // command channel; move them behind any re-queued
                // backlog so the flush is strictly oldest-first.
                while let Ok(message) = self.cmd_rx.try_recv() {
                    self.queue.push(message);
                }

                match self.flush_queue(conn.as_mut()).await {
                    Ok(()) => {
                        self.emit(&SessionEvent::Open);
                        match self.connected(conn.as_mut()).await {
                            Disconnect::Stop => {
                                self.set_state(ConnectionState::Closing);
                                conn.close().await;
                                self.finish();
                                return;
                            }
                            Disconnect::Server(reason) => {
                                info!(reason = ?reason, "Server closed the stream");
                                self.emit(&SessionEvent::Close { reason });
                            }
                            Disconnect::Fault(message) => {
                                warn!(error = %message, "Stream faulted");
                                self.emit(&SessionEvent::Error { message });
                            }
                        }
                    }
                    Err(e) => {
                        self.emit(&SessionEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
                drop(conn);
            }

            if self.stopped.load(Ordering::SeqCst) {
                self.finish();
                return;
            }

            self.failures += 1;
            match self.config.reconnect.on_disconnect(self.failures) {
                ReconnectDecision::GiveUp => {
                    error!(
                        attempts = self.failures,
                        url = %self.config.endpoint.url,
                        "Giving up after repeated connection failures"
                    );
                    self.set_state(ConnectionState::Closed);
                    self.emit(&SessionEvent::MaxAttemptsReached);
                    return;
                }
                ReconnectDecision::RetryAfter(delay) => {
                    info!(
                        attempt = self.failures,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after delay"
                    );
                    let stopped = tokio::select! {
                        biased;
                        _ = self.ctrl_rx.recv() => true,
                        () = tokio::time::sleep(delay) => false,
                    };
                    if stopped {
                        self.finish();
                        return;
                    }
                }
            }
        }
    }

    /// Drain the queue oldest-first. A message is popped only after its
    /// send succeeds, so a mid-flush fault keeps the failed message and
    /// the unsent tail for the next connection.
    async fn flush_queue(&mut self, conn: &mut dyn TransportConn) -> StreamResult<()> {
        while let Some(front) = self.queue.front() {
            match conn.send(&front.frame).await {
                Ok(()) => {
                    if let Some(sent) = self.queue.pop() {
                        debug!(
                            queued_ms = sent.enqueued_at.elapsed().as_millis() as u64,
                            remaining = self.queue.len(),
                            "Flushed queued message"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, pending = self.queue.len(), "Queue flush interrupted");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Pump the open connection until it dies or the session stops.
    async fn connected(&mut self, conn: &mut dyn TransportConn) -> Disconnect {
        enum Step {
            Stop,
            Outbound(Option<OutboundMessage>),
            Inbound(Option<StreamResult<Frame>>),
        }

        loop {
            // The select arms only pick which input fired; acting on it
            // happens below, once the other borrows are released.
            let step = tokio::select! {
                biased;
                _ = self.ctrl_rx.recv() => Step::Stop,
                cmd = self.cmd_rx.recv() => Step::Outbound(cmd),
                frame = conn.next_frame() => Step::Inbound(frame),
            };
            match step {
                Step::Stop => return Disconnect::Stop,
                Step::Outbound(Some(message)) => {
                    if let Err(e) = conn.send(&message.frame).await {
                        warn!(error = %e, "Send failed, message re-queued");
                        self.queue.push_front(message);
                        return Disconnect::Fault(e.to_string());
                    }
                }
                // Handle dropped without stop(); wind down.
                Step::Outbound(None) => return Disconnect::Stop,
                Step::Inbound(Some(Ok(frame))) => {
                    if let Some(event) = self.decoder.decode(&frame) {
                        self.emit(&SessionEvent::Message(event));
                    }
                }
                Step::Inbound(Some(Err(StreamError::Closed { reason }))) => {
                    return Disconnect::Server(reason);
                }
                Step::Inbound(Some(Err(e))) => return Disconnect::Fault(e.to_string()),
                Step::Inbound(None) => return Disconnect::Server(None),
            }
        }
    }

    fn finish(&mut self) {
        self.queue.clear();
        self.set_state(ConnectionState::Closed);
        debug!(url = %self.config.endpoint.url, "Session stopped");
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    fn emit(&self, event: &SessionEvent<D::Event>) {
        self.listeners.emit(event);
    }
}
