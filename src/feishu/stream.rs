//! Long-lived event-stream channel delivering chat-platform events.
//!
//! The endpoint is discovered through the platform's callback-endpoint call,
//! then a WebSocket connection delivers JSON event envelopes. Frames are
//! decoded here, once, and the typed events handed to the supervisor over an
//! mpsc channel; a bad frame is logged and skipped, never fatal. The
//! connection has no forced-close primitive: on shutdown the read loop exits
//! and the socket is reclaimed passively.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::event::{decode_envelope, MessageEvent, MESSAGE_EVENT_TYPE};

/// Buffered events between the stream task and the supervisor loop.
const EVENT_BUFFER: usize = 64;

/// Errors from the event-stream channel.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The endpoint-discovery call failed.
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    /// The WebSocket connection could not be established.
    #[error("event stream connect failed: {0}")]
    Connect(String),

    /// The connection terminated while the channel was supposed to be live.
    #[error("event stream closed: {0}")]
    Closed(String),
}

/// Response of `POST /callback/ws/endpoint`.
#[derive(Debug, Deserialize)]
struct EndpointResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<EndpointData>,
}

#[derive(Debug, Deserialize)]
struct EndpointData {
    #[serde(rename = "URL", alias = "url")]
    url: Option<String>,
}

/// A connected event-stream channel.
pub struct EventChannel {
    /// Typed message events, in platform delivery order.
    pub events: mpsc::Receiver<MessageEvent>,
    /// The read-loop task; resolves when the channel terminates.
    pub task: tokio::task::JoinHandle<Result<(), StreamError>>,
}

/// Discover the stream endpoint for the given app identity.
///
/// # Errors
///
/// Returns [`StreamError::Discovery`] when the call fails or the response
/// carries no endpoint URL.
pub async fn discover_endpoint(
    http: &reqwest::Client,
    base_url: &str,
    app_id: &str,
    app_secret: &str,
) -> Result<String, StreamError> {
    let url = format!("{base_url}/callback/ws/endpoint");
    let body = serde_json::json!({ "AppID": app_id, "AppSecret": app_secret });

    let resp = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| StreamError::Discovery(e.to_string()))?;
    let parsed: EndpointResponse = resp
        .json()
        .await
        .map_err(|e| StreamError::Discovery(e.to_string()))?;

    if parsed.code != 0 {
        return Err(StreamError::Discovery(format!(
            "endpoint call rejected with code {}: {}",
            parsed.code, parsed.msg
        )));
    }

    let endpoint = parsed
        .data
        .and_then(|d| d.url)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| StreamError::Discovery("response carried no endpoint URL".to_owned()))?;
    url::Url::parse(&endpoint)
        .map_err(|e| StreamError::Discovery(format!("bad endpoint URL: {e}")))?;
    Ok(endpoint)
}

/// Open the event-stream channel: discover the endpoint, connect, and spawn
/// the read loop.
///
/// # Errors
///
/// Returns [`StreamError`] when discovery or the initial connect fails; later
/// failures surface through the returned task.
pub async fn connect(
    http: &reqwest::Client,
    base_url: &str,
    app_id: &str,
    app_secret: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<EventChannel, StreamError> {
    let endpoint = discover_endpoint(http, base_url, app_id, app_secret).await?;
    info!(endpoint = %endpoint, "connecting event stream");

    let (socket, _response) = connect_async(endpoint.as_str())
        .await
        .map_err(|e| StreamError::Connect(e.to_string()))?;
    info!("event stream connected");

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let task = tokio::spawn(read_loop(socket, events_tx, shutdown));

    Ok(EventChannel {
        events: events_rx,
        task,
    })
}

/// Read frames until shutdown or a terminal connection error.
async fn read_loop(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events_tx: mpsc::Sender<MessageEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StreamError> {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("event stream stopping on shutdown signal");
                return Ok(());
            }
            maybe_frame = source.next() => {
                let Some(frame) = maybe_frame else {
                    return Err(StreamError::Closed("connection ended".to_owned()));
                };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        handle_frame(text.as_str(), &events_tx).await;
                    }
                    Ok(WsMessage::Ping(payload)) => {
                        if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                            return Err(StreamError::Closed(e.to_string()));
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        return Err(StreamError::Closed("server closed the stream".to_owned()));
                    }
                    Ok(_) => {
                        // Binary and pong frames carry nothing for us.
                    }
                    Err(e) => {
                        return Err(StreamError::Closed(e.to_string()));
                    }
                }
            }
        }
    }
}

/// Decode one text frame and forward the event when it is a chat message.
async fn handle_frame(frame: &str, events_tx: &mpsc::Sender<MessageEvent>) {
    let envelope = match decode_envelope(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            let preview: String = frame.chars().take(200).collect();
            warn!(error = %e, frame = %preview, "dropping undecodable event frame");
            return;
        }
    };

    if envelope.header.event_type != MESSAGE_EVENT_TYPE {
        debug!(event_type = %envelope.header.event_type, "ignoring non-message event");
        return;
    }
    let Some(event) = envelope.event else {
        warn!(event_id = %envelope.header.event_id, "message event carried no payload");
        return;
    };

    if events_tx.send(event).await.is_err() {
        // Receiver dropped — the supervisor is gone, nothing left to do.
        debug!("event receiver dropped, discarding event");
    }
}
