//! Push transport over WebSocket
//!
//! Opens `{hub}/hub/requests` or `{hub}/hub/order-details` with the
//! restaurant id (and optional `access_token`) as query parameters, performs
//! the hub handshake, then turns hub records into typed `HubMessage`s.
//!
//! The session keeps the channel alive with a ping record every
//! `keep_alive_interval` and treats `server_timeout` of silence as a drop.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use types::errors::PayloadError;
use types::message::HubMessage;
use types::stream::StreamKind;

use super::signalr::{self, HubFrame, RecordBuffer};
use crate::connection::{EndpointParams, PushSession, PushTransport};
use crate::error::SyncError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hub URL for one stream, with `ws`/`wss` scheme.
pub fn hub_url(stream: StreamKind, params: &EndpointParams) -> Result<Url, SyncError> {
    let base = params.hub_base.trim_end_matches('/');
    let mut url = Url::parse(&format!("{}/{}", base, stream.hub_path()))
        .map_err(|e| SyncError::Transport(format!("invalid hub url {base}: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("restaurantId", &params.restaurant_id.to_string());
        if let Some(token) = &params.access_token {
            query.append_pair("access_token", token);
        }
    }

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Transport(format!("cannot use {scheme} for {base}")))?;
    Ok(url)
}

fn transport_error(err: tungstenite::Error) -> SyncError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                SyncError::Auth(format!("hub answered HTTP {status}"))
            } else {
                SyncError::Transport(format!("hub answered HTTP {status}"))
            }
        }
        other => SyncError::Transport(other.to_string()),
    }
}

// ── Record decoding ─────────────────────────────────────────────────

/// Turns raw socket text into queued hub messages.
#[derive(Debug, Default)]
pub struct HubDecoder {
    records: RecordBuffer,
    pending: VecDeque<Result<HubMessage, PayloadError>>,
    closed: Option<String>,
}

impl HubDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed socket text; complete records are decoded and queued.
    pub fn feed(&mut self, stream: StreamKind, text: &str) {
        for record in self.records.push(text) {
            self.decode_record(stream, &record);
        }
    }

    fn decode_record(&mut self, stream: StreamKind, record: &str) {
        let frame = match signalr::parse_record(record) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(stream = %stream, error = %err, "Skipping unreadable hub record");
                return;
            }
        };

        match frame {
            HubFrame::Invocation { target, arguments } => {
                match HubMessage::decode(&target, &arguments) {
                    Ok(decoded) => {
                        for rejected in &decoded.rejected {
                            warn!(stream = %stream, %target, error = %rejected, "Dropped malformed snapshot element");
                        }
                        self.pending.push_back(Ok(decoded.message));
                    }
                    Err(PayloadError::UnknownTarget(target)) => {
                        debug!(stream = %stream, %target, "Ignoring unknown hub target");
                    }
                    Err(err) => self.pending.push_back(Err(err)),
                }
            }
            HubFrame::Ping => {}
            HubFrame::Close { error } => {
                self.closed = Some(error.unwrap_or_else(|| "no reason given".to_string()));
            }
            HubFrame::Other(kind) => {
                debug!(stream = %stream, kind, "Ignoring hub record");
            }
        }
    }

    /// Next queued message, if any.
    pub fn pop(&mut self) -> Option<Result<HubMessage, PayloadError>> {
        self.pending.pop_front()
    }

    /// Reason of a server close record, once one was seen.
    pub fn closed(&self) -> Option<&str> {
        self.closed.as_deref()
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// WebSocket-backed `PushTransport`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(
        &self,
        stream: StreamKind,
        params: &EndpointParams,
    ) -> Result<Box<dyn PushSession>, SyncError> {
        let url = hub_url(stream, params)?;
        debug!(stream = %stream, host = url.host_str().unwrap_or(""), "Opening hub socket");

        let (mut socket, _) = connect_async(url.as_str()).await.map_err(transport_error)?;
        socket
            .send(Message::Text(signalr::handshake_request().into()))
            .await
            .map_err(transport_error)?;

        // The handshake answer may share a socket message with the first records.
        let mut records = RecordBuffer::new();
        let mut complete = Vec::new();
        while complete.is_empty() {
            let text = match socket.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::Transport("socket closed during handshake".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(transport_error(err)),
            };
            complete = records.push(&text);
        }

        let mut complete = complete.into_iter();
        if let Some(answer) = complete.next() {
            signalr::parse_handshake_response(&answer)
                .map_err(|e| SyncError::Transport(e.to_string()))?;
        }

        let mut decoder = HubDecoder {
            records,
            ..HubDecoder::default()
        };
        for record in complete {
            decoder.decode_record(stream, &record);
        }

        info!(stream = %stream, "Hub handshake completed");
        Ok(Box::new(WebSocketSession::new(stream, socket, decoder, self)))
    }
}

// ── Session ─────────────────────────────────────────────────────────

enum Wake {
    KeepAlive,
    ServerTimeout,
    Socket(Option<Result<Message, tungstenite::Error>>),
}

struct WebSocketSession {
    stream: StreamKind,
    socket: Socket,
    decoder: HubDecoder,
    keep_alive: Interval,
    server_timeout: Duration,
    last_received: Instant,
}

impl WebSocketSession {
    fn new(stream: StreamKind, socket: Socket, decoder: HubDecoder, transport: &WebSocketTransport) -> Self {
        let period = transport.keep_alive_interval.max(Duration::from_millis(1));
        let mut keep_alive = interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            stream,
            socket,
            decoder,
            keep_alive,
            server_timeout: transport.server_timeout,
            last_received: Instant::now(),
        }
    }
}

#[async_trait]
impl PushSession for WebSocketSession {
    async fn next_message(&mut self) -> Result<Option<HubMessage>, SyncError> {
        loop {
            if let Some(next) = self.decoder.pop() {
                return next.map(Some).map_err(SyncError::from);
            }
            if let Some(reason) = self.decoder.closed() {
                return Err(SyncError::Transport(format!("hub closed the session: {reason}")));
            }

            let deadline = self.last_received + self.server_timeout;
            let wake = tokio::select! {
                _ = self.keep_alive.tick() => Wake::KeepAlive,
                _ = sleep_until(deadline) => Wake::ServerTimeout,
                frame = self.socket.next() => Wake::Socket(frame),
            };

            match wake {
                Wake::KeepAlive => {
                    self.socket
                        .send(Message::Text(signalr::ping_record().into()))
                        .await
                        .map_err(transport_error)?;
                }
                Wake::ServerTimeout => {
                    return Err(SyncError::Transport(format!(
                        "no data from hub for {} ms",
                        self.server_timeout.as_millis()
                    )));
                }
                Wake::Socket(None) => return Ok(None),
                Wake::Socket(Some(Err(err))) => return Err(transport_error(err)),
                Wake::Socket(Some(Ok(message))) => {
                    self.last_received = Instant::now();
                    match message {
                        Message::Text(text) => self.decoder.feed(self.stream, &text),
                        Message::Binary(bytes) => {
                            self.decoder.feed(self.stream, &String::from_utf8_lossy(&bytes))
                        }
                        Message::Close(_) => return Ok(None),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.socket.close(None).await {
            debug!(stream = %self.stream, error = %err, "Socket close failed");
        }
    }
}
