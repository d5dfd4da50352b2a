//! Byte channels beneath the STOMP session
//!
//! ```text
//! ws://, wss://      ──> raw WebSocket (one STOMP payload per text message)
//! http://, https://  ──> GET /info
//!                          ├─ websocket allowed ──> SockJS over WebSocket
//!                          │                           └─ handshake failed ──┐
//!                          └─ websocket disabled ───────────────────────────┴─> SockJS xhr-streaming
//! ```
//!
//! Every channel yields batches of STOMP payload strings. An empty batch means
//! the peer sent only a keep-alive, which still counts as inbound traffic.

use crate::core::sockjs::{self, SockJsEndpoint, SockJsFrame, SockJsInfo};
use crate::core::stomp::MAX_FRAME_BYTES;
use crate::traits::*;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    WebSocket,
    SockJsWebSocket,
    SockJsXhrStreaming,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WebSocket => "websocket",
            Self::SockJsWebSocket => "sockjs-websocket",
            Self::SockJsXhrStreaming => "sockjs-xhr-streaming",
        };
        f.write_str(name)
    }
}

/// A negotiated, bidirectional payload channel
///
/// `recv` must be cancel-safe: the transport polls it inside `select!`.
#[async_trait]
pub trait FrameChannel: Send {
    /// Next batch of inbound payloads, `Ok(None)` once the peer closed
    async fn recv(&mut self) -> Result<Option<Vec<String>>>;

    /// Write one outbound payload
    async fn send(&mut self, payload: String) -> Result<()>;

    /// Close the channel; errors are swallowed
    async fn close(&mut self);

    fn kind(&self) -> ChannelKind;
}

/// Open the best channel available for the request's URL
pub async fn negotiate(request: &OpenRequest) -> Result<Box<dyn FrameChannel>> {
    let url = Url::parse(&request.url)?;
    match url.scheme() {
        "ws" | "wss" => {
            let channel = WsChannel::connect(url.as_str(), &request.authorization, false).await?;
            Ok(Box::new(channel))
        }
        "http" | "https" => negotiate_sockjs(request).await,
        other => Err(PushSocketError::Configuration(format!(
            "unsupported broker scheme '{other}'"
        ))),
    }
}

async fn negotiate_sockjs(request: &OpenRequest) -> Result<Box<dyn FrameChannel>> {
    let endpoint = SockJsEndpoint::new(&request.url)?;
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| PushSocketError::Transport(format!("http client: {e}")))?;

    let info = fetch_info(&client, &endpoint, &request.authorization).await?;
    debug!("[SockJS] Server info: {:?}", info);

    if info.websocket {
        let ws_url = endpoint.websocket_url()?;
        match WsChannel::connect(ws_url.as_str(), &request.authorization, true).await {
            Ok(channel) => return Ok(Box::new(channel)),
            Err(e) => warn!("[SockJS] WebSocket unavailable ({}), falling back to xhr-streaming", e),
        }
    } else {
        info!("[SockJS] Server disabled WebSocket, using xhr-streaming");
    }

    let channel = XhrStreamingChannel::connect(client, endpoint, &request.authorization).await?;
    Ok(Box::new(channel))
}

async fn fetch_info(
    client: &reqwest::Client,
    endpoint: &SockJsEndpoint,
    authorization: &str,
) -> Result<SockJsInfo> {
    let response = client
        .get(endpoint.info_url())
        .header(AUTHORIZATION_HEADER, authorization)
        .send()
        .await
        .map_err(|e| PushSocketError::Transport(format!("SockJS info request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(PushSocketError::Transport(format!(
            "SockJS info returned {}",
            response.status()
        )));
    }

    response
        .json::<SockJsInfo>()
        .await
        .map_err(|e| PushSocketError::Transport(format!("SockJS info unreadable: {e}")))
}

/// Payloads carried by one SockJS frame; `None` once the server closed the session
fn unwrap_sockjs(data: &str) -> Result<Option<Vec<String>>> {
    match sockjs::decode_frame(data)? {
        SockJsFrame::Open | SockJsFrame::Heartbeat => Ok(Some(Vec::new())),
        SockJsFrame::Messages(messages) => Ok(Some(messages)),
        SockJsFrame::Close { code, reason } => {
            info!("[SockJS] Session closed by server: {} {}", code, reason);
            Ok(None)
        }
    }
}

/// WebSocket channel, optionally speaking SockJS framing
pub struct WsChannel {
    stream: WsStream,
    sockjs: bool,
}

impl WsChannel {
    /// Connect, sending the bearer credential as an HTTP header on the handshake
    pub async fn connect(url: &str, authorization: &str, sockjs: bool) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| PushSocketError::Configuration(format!("invalid websocket url: {e}")))?;

        match http::header::HeaderValue::from_str(authorization) {
            Ok(value) => {
                request
                    .headers_mut()
                    .insert(http::header::AUTHORIZATION, value);
            }
            Err(_) => warn!("[Transport] Authorization value is not a valid header, omitting it"),
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| PushSocketError::Transport(format!("websocket handshake failed: {e}")))?;

        debug!("[Transport] WebSocket open to {}", url);
        Ok(Self { stream, sockjs })
    }

    fn unwrap_text(&self, text: String) -> Result<Option<Vec<String>>> {
        if self.sockjs {
            unwrap_sockjs(&text)
        } else {
            Ok(Some(vec![text]))
        }
    }
}

#[async_trait]
impl FrameChannel for WsChannel {
    async fn recv(&mut self) -> Result<Option<Vec<String>>> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => self.unwrap_text(text),
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8(data)
                    .map_err(|e| PushSocketError::Frame(format!("binary frame is not utf-8: {e}")))?;
                self.unwrap_text(text)
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("[Transport] WebSocket close frame: {:?}", frame);
                Ok(None)
            }
            // Control frames prove the peer is alive
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Ok(Some(Vec::new())),
            Some(Err(e)) => Err(PushSocketError::Transport(e.to_string())),
            None => Ok(None),
        }
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        let text = if self.sockjs {
            sockjs::encode_messages(&[payload.as_str()])?
        } else {
            payload
        };
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| PushSocketError::Transport(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }

    fn kind(&self) -> ChannelKind {
        if self.sockjs {
            ChannelKind::SockJsWebSocket
        } else {
            ChannelKind::WebSocket
        }
    }
}

/// SockJS xhr-streaming fallback
///
/// Inbound frames arrive newline-delimited on one long-lived POST response;
/// each outbound payload is a separate POST to `xhr_send`.
pub struct XhrStreamingChannel {
    client: reqwest::Client,
    endpoint: SockJsEndpoint,
    authorization: String,
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
}

/// Longest SockJS line accepted; JSON escaping can double a frame
const MAX_LINE_BYTES: usize = 2 * MAX_FRAME_BYTES;

/// Newline-delimited framing over a byte stream
#[derive(Debug, Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        let line_start = self
            .buffer
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        if self.buffer.len() - line_start > MAX_LINE_BYTES {
            return Err(PushSocketError::Frame(format!(
                "stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(())
    }

    /// Pop the next complete line
    fn take_line(&mut self) -> Option<Result<String>> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(
            String::from_utf8(line)
                .map_err(|e| PushSocketError::Frame(format!("stream line is not utf-8: {e}"))),
        )
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl XhrStreamingChannel {
    pub async fn connect(
        client: reqwest::Client,
        endpoint: SockJsEndpoint,
        authorization: &str,
    ) -> Result<Self> {
        let response = client
            .post(endpoint.xhr_streaming_url())
            .header(AUTHORIZATION_HEADER, authorization)
            .send()
            .await
            .map_err(|e| PushSocketError::Transport(format!("xhr-streaming request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PushSocketError::Transport(format!(
                "xhr-streaming returned {}",
                response.status()
            )));
        }

        debug!("[SockJS] xhr-streaming open for session {}", endpoint.session_id());
        Ok(Self {
            client,
            endpoint,
            authorization: authorization.to_string(),
            body: response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
            lines: LineBuffer::default(),
        })
    }

}

#[async_trait]
impl FrameChannel for XhrStreamingChannel {
    async fn recv(&mut self) -> Result<Option<Vec<String>>> {
        loop {
            if let Some(line) = self.lines.take_line() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                return unwrap_sockjs(&line);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.lines.extend(&chunk)?,
                Some(Err(e)) => {
                    return Err(PushSocketError::Transport(format!("xhr-streaming read failed: {e}")))
                }
                None => return Ok(None),
            }
        }
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        let body = sockjs::encode_messages(&[payload.as_str()])?;
        let response = self
            .client
            .post(self.endpoint.xhr_send_url())
            .header(AUTHORIZATION_HEADER, self.authorization.as_str())
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| PushSocketError::Transport(format!("xhr_send failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PushSocketError::Transport(format!(
                "xhr_send returned {}",
                response.status()
            )))
        }
    }

    async fn close(&mut self) {
        // Dropping the streaming response ends the session server-side
        self.body = futures::stream::empty().boxed();
        self.lines.clear();
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::SockJsXhrStreaming
    }
}
