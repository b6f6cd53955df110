//! Transport abstraction: one physical connection per `open()` call.
//!
//! The session never constructs sockets itself; it is handed a
//! [`StreamTransport`] capability, so tests run against fakes and the
//! production code picks between [`WebSocketTransport`] and
//! [`HttpStreamTransport`].

use async_trait::async_trait;

use crate::{endpoint::Endpoint, error::StreamResult, frame::Frame};

mod stream_http;
mod websocket;

pub use stream_http::{HttpStreamTransport, RecordSplitter};
pub use websocket::WebSocketTransport;

/// Opens physical connections to an endpoint.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open one connection. Each call yields a fresh connection; the
    /// session guarantees at most one is live at a time.
    async fn open(&self, endpoint: &Endpoint) -> StreamResult<Box<dyn TransportConn>>;
}

/// One live physical connection.
///
/// After `next_frame` returns `None` (orderly close) or `Some(Err(_))`
/// (transport fault), the connection is dead and must not be reused.
#[async_trait]
pub trait TransportConn: Send {
    /// Wait for the next frame from the server.
    async fn next_frame(&mut self) -> Option<StreamResult<Frame>>;

    /// Send a frame to the server.
    ///
    /// Receive-only transports (streaming HTTP) reject every send.
    async fn send(&mut self, frame: &Frame) -> StreamResult<()>;

    /// Close the connection. Best-effort; the connection is considered
    /// dead afterwards either way.
    async fn close(&mut self);
}
