//! Bus channel: the WebSocket connection to the agent-side message router.
//!
//! Canonical messages flow outbound as JSON text frames; agent replies come
//! back on the same socket and are decoded into canonical messages. The
//! socket is owned by a spawned task; the supervisor talks to it through mpsc
//! channels and observes readiness through a watch flag so the registration
//! handshake can wait for the connection to stabilize.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::message::Message;

/// Buffered messages in each direction between supervisor and io loop.
const CHANNEL_BUFFER: usize = 64;

/// Errors from the bus channel.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The WebSocket connection could not be established.
    #[error("bus connect failed: {0}")]
    Connect(String),

    /// An outbound frame could not be serialized.
    #[error("bus protocol error: {0}")]
    Protocol(String),

    /// The connection terminated while the channel was supposed to be live.
    #[error("bus connection closed: {0}")]
    Closed(String),
}

/// A connected bus channel.
pub struct BusChannel {
    /// Canonical messages headed to the agent.
    pub outbound: mpsc::Sender<Message>,
    /// Agent replies, already decoded.
    pub replies: mpsc::Receiver<Message>,
    /// Flips to `true` once the io loop is running.
    pub ready: watch::Receiver<bool>,
    /// The io-loop task; resolves when the channel terminates.
    pub task: tokio::task::JoinHandle<Result<(), BusError>>,
}

/// Build the router URL for the given bus host and port.
pub fn bus_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}/ws")
}

/// Open the bus channel and spawn its io loop.
///
/// # Errors
///
/// Returns [`BusError::Connect`] when the initial connect fails; later
/// failures surface through the returned task.
pub async fn connect(url: &str, shutdown: watch::Receiver<bool>) -> Result<BusChannel, BusError> {
    url::Url::parse(url).map_err(|e| BusError::Connect(format!("bad bus URL: {e}")))?;
    info!(url, "connecting to message bus");

    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| BusError::Connect(e.to_string()))?;
    info!("bus connected");

    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (replies_tx, replies_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (ready_tx, ready_rx) = watch::channel(false);

    let task = tokio::spawn(io_loop(socket, outbound_rx, replies_tx, ready_tx, shutdown));

    Ok(BusChannel {
        outbound: outbound_tx,
        replies: replies_rx,
        ready: ready_rx,
        task,
    })
}

/// Pump frames in both directions until shutdown or a terminal error.
async fn io_loop(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound_rx: mpsc::Receiver<Message>,
    replies_tx: mpsc::Sender<Message>,
    ready_tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let (mut sink, mut source) = socket.split();
    let _ = ready_tx.send(true);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("bus channel stopping on shutdown signal");
                return Ok(());
            }
            maybe_outbound = outbound_rx.recv() => {
                let Some(message) = maybe_outbound else {
                    debug!("bus senders dropped, stopping io loop");
                    return Ok(());
                };
                let frame = serde_json::to_string(&message)
                    .map_err(|e| BusError::Protocol(e.to_string()))?;
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    return Err(BusError::Closed(e.to_string()));
                }
                debug!(message_id = %message.message_id, "message pushed to bus");
            }
            maybe_frame = source.next() => {
                let Some(frame) = maybe_frame else {
                    return Err(BusError::Closed("connection ended".to_owned()));
                };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        handle_reply_frame(text.as_str(), &replies_tx).await;
                    }
                    Ok(WsMessage::Ping(payload)) => {
                        if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                            return Err(BusError::Closed(e.to_string()));
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        return Err(BusError::Closed("server closed the bus".to_owned()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(BusError::Closed(e.to_string()));
                    }
                }
            }
        }
    }
}

/// Decode one reply frame; status and other non-reply frames are ignored.
async fn handle_reply_frame(frame: &str, replies_tx: &mpsc::Sender<Message>) {
    match serde_json::from_str::<Message>(frame) {
        Ok(message) => {
            if replies_tx.send(message).await.is_err() {
                debug!("reply receiver dropped, discarding reply");
            }
        }
        Err(e) => {
            let preview: String = frame.chars().take(200).collect();
            debug!(error = %e, frame = %preview, "ignoring non-reply bus frame");
        }
    }
}
