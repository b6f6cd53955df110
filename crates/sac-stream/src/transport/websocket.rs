//! WebSocket transport over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
    },
};
use tracing::{debug, trace};

use crate::{
    endpoint::Endpoint,
    error::{StreamError, StreamResult},
    frame::Frame,
    transport::{StreamTransport, TransportConn},
};

/// Connects WebSocket endpoints (`ws://` / `wss://`).
///
/// Query-parameter tokens ride on the request URL; header tokens are set
/// on the upgrade request.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self, endpoint: &Endpoint) -> StreamResult<Box<dyn TransportConn>> {
        let mut request = endpoint
            .request_url()
            .into_client_request()
            .map_err(|e| StreamError::connect(format!("Invalid WebSocket URL: {e}")))?;

        if let Some((name, value)) = endpoint.auth_header() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StreamError::connect(format!("Invalid auth header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StreamError::connect(format!("Invalid auth header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| StreamError::connect(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketConn { socket }))
    }
}

struct WebSocketConn {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportConn for WebSocketConn {
    async fn next_frame(&mut self) -> Option<StreamResult<Frame>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(Frame::Text(text.as_str().to_string())));
                }
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(Message::Ping(payload)) => {
                    trace!("Received ping, sending pong");
                    if let Err(e) = self.socket.send(Message::Pong(payload)).await {
                        return Some(Err(StreamError::transport(e.to_string())));
                    }
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(close)) => {
                    let reason = close
                        .map(|c| c.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    return Some(Err(StreamError::closed(reason)));
                }
                Err(e) => return Some(Err(StreamError::transport(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, frame: &Frame) -> StreamResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.as_str().into()),
            Frame::Binary(data) => Message::Binary(data.clone().into()),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| StreamError::transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
