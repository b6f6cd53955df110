//! End-to-end session lifecycle tests against a scripted in-memory
//! transport: connect/reconnect flows, queue flushing, attempt ceilings,
//! and stop semantics. Time is paused, so backoff delays are exercised
//! without real waiting.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sac_stream::{
    ConnectionState, Endpoint, EventKind, Frame, FrameDecoder, ReconnectPolicy, SessionConfig,
    SessionEvent, StreamError, StreamResult, StreamSession, StreamTransport, TransportConn,
};
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};

/// Decoder used throughout: text frames pass through, binary is dropped.
struct TextDecoder;

impl FrameDecoder for TextDecoder {
    type Event = String;

    fn decode(&self, frame: &Frame) -> Option<String> {
        frame.as_text().map(str::to_string)
    }
}

/// What the transport does on each successive `open` call.
enum Plan {
    /// Refuse the connection.
    Refuse,
    /// Never resolve the connection attempt.
    Hang,
    /// Accept; the connection rejects sends after `send_budget` (when
    /// set) successful ones.
    Accept { send_budget: Option<usize> },
}

fn accept() -> Plan {
    Plan::Accept { send_budget: None }
}

struct FakeTransport {
    plan: Mutex<VecDeque<Plan>>,
    servers: mpsc::UnboundedSender<FakeServer>,
    opens: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn open(&self, _endpoint: &Endpoint) -> StreamResult<Box<dyn TransportConn>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.plan.lock().unwrap().pop_front();
        match next {
            Some(Plan::Accept { send_budget }) => {
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(FakeServer {
                    frames: frames_tx,
                    sent: sent_rx,
                });
                Ok(Box::new(FakeConn {
                    frames: frames_rx,
                    sent: sent_tx,
                    send_budget,
                }))
            }
            Some(Plan::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Plan::Refuse) | None => Err(StreamError::connect("connection refused")),
        }
    }
}

struct FakeConn {
    frames: mpsc::UnboundedReceiver<StreamResult<Frame>>,
    sent: mpsc::UnboundedSender<Frame>,
    send_budget: Option<usize>,
}

#[async_trait]
impl TransportConn for FakeConn {
    async fn next_frame(&mut self) -> Option<StreamResult<Frame>> {
        self.frames.recv().await
    }

    async fn send(&mut self, frame: &Frame) -> StreamResult<()> {
        if let Some(budget) = &mut self.send_budget {
            if *budget == 0 {
                return Err(StreamError::transport("send rejected"));
            }
            *budget -= 1;
        }
        let _ = self.sent.send(frame.clone());
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Test-side handle to one accepted connection.
struct FakeServer {
    frames: mpsc::UnboundedSender<StreamResult<Frame>>,
    sent: mpsc::UnboundedReceiver<Frame>,
}

impl FakeServer {
    fn push_text(&self, text: &str) {
        let _ = self.frames.send(Ok(Frame::text(text)));
    }

    fn push_binary(&self, data: &[u8]) {
        let _ = self.frames.send(Ok(Frame::binary(data)));
    }

    fn fault(&self, message: &str) {
        let _ = self.frames.send(Err(StreamError::transport(message)));
    }

    /// Close the connection from the server side.
    fn close(self) {}

    async fn recv_sent(&mut self) -> String {
        let frame = timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("timed out waiting for a sent frame")
            .expect("connection dropped");
        frame.as_text().expect("text frame").to_string()
    }

    fn no_more_sent(&mut self) -> bool {
        self.sent.try_recv().is_err()
    }
}

async fn wait_until(mut pred: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !pred() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct Harness {
    session: StreamSession<TextDecoder>,
    servers: mpsc::UnboundedReceiver<FakeServer>,
    opens: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(plan: Vec<Plan>, config: SessionConfig) -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let opens = Arc::new(AtomicUsize::new(0));
        let transport = FakeTransport {
            plan: Mutex::new(plan.into()),
            servers: servers_tx,
            opens: Arc::clone(&opens),
        };
        let session = StreamSession::new(config, transport, TextDecoder).expect("valid config");

        let events: Arc<Mutex<Vec<String>>> = Arc::default();
        for kind in [
            EventKind::Open,
            EventKind::Message,
            EventKind::Close,
            EventKind::Error,
            EventKind::MaxAttemptsReached,
        ] {
            let events = Arc::clone(&events);
            session.on(kind, move |event| {
                let tag = match event {
                    SessionEvent::Open => "open".to_string(),
                    SessionEvent::Message(m) => format!("msg:{m}"),
                    SessionEvent::Close { .. } => "close".to_string(),
                    SessionEvent::Error { .. } => "error".to_string(),
                    SessionEvent::MaxAttemptsReached => "max".to_string(),
                };
                events.lock().unwrap().push(tag);
            });
        }

        Self {
            session,
            servers: servers_rx,
            opens,
            events,
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new(Endpoint::new("ws://test/watch"))
            .reconnect(ReconnectPolicy::fixed(Duration::from_millis(10)))
    }

    async fn next_server(&mut self) -> FakeServer {
        timeout(Duration::from_secs(5), self.servers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }

    async fn wait_state(&self, want: ConnectionState) {
        let mut rx = self.session.state_changes();
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {want:?} state"))
            .expect("session gone");
    }

    async fn wait_events(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.events.lock().unwrap().len() < count {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for events");
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[tokio::test(start_paused = true)]
async fn delivers_events_and_sends_when_open() {
    let mut h = Harness::new(vec![accept()], Harness::config());
    assert_eq!(h.session.state(), ConnectionState::Idle);

    h.session.start();
    let mut server = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    server.push_text("hello");
    server.push_binary(&[0xff, 0x00]);
    server.push_text("world");
    h.wait_events(3).await;
    assert_eq!(h.events(), vec!["open", "msg:hello", "msg:world"]);

    h.session.send("up");
    assert_eq!(server.recv_sent().await, "up");

    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn messages_sent_before_start_flush_in_order() {
    let mut h = Harness::new(vec![accept()], Harness::config());

    h.session.send("a");
    h.session.send("b");
    h.session.send("c");
    h.session.start();

    let mut server = h.next_server().await;
    assert_eq!(server.recv_sent().await, "a");
    assert_eq!(server.recv_sent().await, "b");
    assert_eq!(server.recv_sent().await, "c");

    // Once open, sends go straight through behind the flushed backlog.
    h.session.send("d");
    assert_eq!(server.recv_sent().await, "d");
}

#[tokio::test(start_paused = true)]
async fn queue_flushes_after_reconnect() {
    let mut h = Harness::new(vec![accept(), accept()], Harness::config());

    h.session.start();
    let server1 = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    server1.close();
    h.session.send("x");
    h.session.send("y");

    let mut server2 = h.next_server().await;
    assert_eq!(server2.recv_sent().await, "x");
    assert_eq!(server2.recv_sent().await, "y");

    h.wait_events(3).await;
    assert_eq!(h.events(), vec!["open", "close", "open"]);
    assert_eq!(h.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn mid_flush_fault_keeps_unsent_tail() {
    let plan = vec![
        Plan::Accept {
            send_budget: Some(1),
        },
        accept(),
    ];
    let mut h = Harness::new(plan, Harness::config());

    h.session.send("a");
    h.session.send("b");
    h.session.send("c");
    h.session.start();

    let mut server1 = h.next_server().await;
    assert_eq!(server1.recv_sent().await, "a");

    // "b" was rejected mid-flush; it and "c" land on the next
    // connection, exactly once each.
    let mut server2 = h.next_server().await;
    assert_eq!(server2.recv_sent().await, "b");
    assert_eq!(server2.recv_sent().await, "c");
    assert!(server2.no_more_sent());
    assert!(server1.no_more_sent());
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_transport_fault() {
    let mut h = Harness::new(vec![accept(), accept()], Harness::config());

    h.session.start();
    let server1 = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    server1.fault("connection reset");
    let _server2 = h.next_server().await;

    h.wait_events(3).await;
    assert_eq!(h.events(), vec!["open", "error", "open"]);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let config = Harness::config().max_attempts(Some(3));
    let h = Harness::new(vec![], config);

    h.session.start();
    h.wait_state(ConnectionState::Closed).await;

    assert_eq!(h.opens.load(Ordering::SeqCst), 3);
    assert_eq!(h.events(), vec!["error", "error", "error", "max"]);

    // Terminal: another start changes nothing.
    h.session.start();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 3);
    assert_eq!(h.session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn unlimited_policy_never_gives_up() {
    let h = Harness::new(vec![], Harness::config());

    h.session.start();
    timeout(Duration::from_secs(60), async {
        while h.opens.load(Ordering::SeqCst) < 100 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for retries");

    assert_ne!(h.session.state(), ConnectionState::Closed);
    assert!(!h.events().contains(&"max".to_string()));

    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_reconnect() {
    let config = SessionConfig::new(Endpoint::new("ws://test/watch"))
        .reconnect(ReconnectPolicy::fixed(Duration::from_secs(60)));
    let h = Harness::new(vec![], config);

    h.session.start();
    h.wait_events(1).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);

    // The driver is parked in its backoff sleep; stop must win even
    // after the timer would have fired.
    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
    sleep(Duration::from_secs(300)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn queue_survives_failed_attempts_before_first_open() {
    let plan = vec![Plan::Refuse, Plan::Refuse, accept()];
    let mut h = Harness::new(plan, Harness::config());

    h.session.send("a");
    h.session.send("b");
    h.session.start();

    let mut server = h.next_server().await;
    assert_eq!(server.recv_sent().await, "a");
    assert_eq!(server.recv_sent().await, "b");
    assert!(server.no_more_sent());
    assert_eq!(h.opens.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_while_connecting_cancels_the_attempt() {
    let config = Harness::config().connect_timeout(Duration::from_secs(3600));
    let h = Harness::new(vec![Plan::Hang], config);

    h.session.start();
    wait_until(|| h.opens.load(Ordering::SeqCst) == 1).await;
    assert_eq!(h.session.state(), ConnectionState::Connecting);

    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
    sleep(Duration::from_secs(300)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
    assert!(h.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_while_open_emits_nothing() {
    let mut h = Harness::new(vec![accept()], Harness::config());

    h.session.start();
    let _server = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
    sleep(Duration::from_secs(5)).await;

    // No close/error events for an explicit stop, and no reconnect.
    assert_eq!(h.events(), vec!["open"]);
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);

    h.session.start();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_is_terminal() {
    let h = Harness::new(vec![accept()], Harness::config());

    h.session.stop();
    assert_eq!(h.session.state(), ConnectionState::Closed);

    h.session.send("dropped");
    h.session.start();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(h.opens.load(Ordering::SeqCst), 0);
    assert!(h.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let mut h = Harness::new(vec![accept()], Harness::config());

    h.session.start();
    let _server = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    h.session.stop();
    h.session.stop();
    h.wait_state(ConnectionState::Closed).await;
    assert_eq!(h.session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_while_running() {
    let mut h = Harness::new(vec![accept()], Harness::config());

    h.session.start();
    h.session.start();
    let _server = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    h.session.start();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_listener_stops_firing() {
    let mut h = Harness::new(vec![accept()], Harness::config());

    let count = Arc::new(AtomicUsize::new(0));
    let count_in = Arc::clone(&count);
    let id = h.session.on(EventKind::Message, move |_| {
        count_in.fetch_add(1, Ordering::SeqCst);
    });

    h.session.start();
    let server = h.next_server().await;
    h.wait_state(ConnectionState::Open).await;

    server.push_text("one");
    h.wait_events(2).await;
    assert!(h.session.off(id));

    server.push_text("two");
    h.wait_events(3).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
