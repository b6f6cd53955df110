//! Resilient event-stream client.
//!
//! A reusable subscription client for backends that push events over
//! WebSocket or streaming HTTP. One [`StreamSession`] owns one logical
//! subscription and hides the physical connection churn behind it:
//!
//! - **Auto-reconnect**: dropped or failed connections are retried under
//!   a configurable [`ReconnectPolicy`] (fixed delay or capped
//!   exponential backoff, bounded or unlimited attempts).
//! - **Outbound queueing**: [`StreamSession::send`] never blocks and
//!   never fails; messages submitted while disconnected are queued and
//!   flushed in order on the next successful connect.
//! - **Typed events**: inbound frames pass through a [`FrameDecoder`];
//!   malformed frames are dropped, well-formed ones reach listeners as
//!   [`SessionEvent::Message`] values.
//! - **Lifecycle events**: listeners registered per [`EventKind`]
//!   observe connects, server closes, transport errors, and the
//!   reconnect policy giving up.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use sac_stream::{
//!     AuthToken, Endpoint, EventKind, ReconnectPolicy, SessionConfig, StreamSession,
//!     WatchEventDecoder,
//! };
//!
//! # async fn demo() -> Result<(), sac_stream::StreamError> {
//! let config = SessionConfig::new(
//!     Endpoint::new("ws://localhost:8081/api/skill-sync/watch?agent_id=7")
//!         .auth(AuthToken::query("session-token")),
//! )
//! .reconnect(ReconnectPolicy::fixed(Duration::from_secs(2)));
//!
//! let session = StreamSession::websocket(config, WatchEventDecoder)?;
//! session.on(EventKind::Message, |event| {
//!     println!("watch event: {event:?}");
//! });
//! session.start();
//! session.send(r#"{"type":"subscribe","channel":"skill_sync"}"#);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod queue;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use decode::{FrameDecoder, JsonDecoder, WatchEvent, WatchEventDecoder};
pub use endpoint::{AuthToken, Endpoint};
pub use error::{StreamError, StreamResult};
pub use frame::Frame;
pub use queue::{OutboundMessage, OutboundQueue};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use session::{ConnectionState, EventKind, ListenerId, SessionEvent, StreamSession};
pub use transport::{
    HttpStreamTransport, RecordSplitter, StreamTransport, TransportConn, WebSocketTransport,
};
