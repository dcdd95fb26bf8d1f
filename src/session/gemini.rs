//! Gemini Live transport over tokio-tungstenite.
//!
//! The handshake is the WebSocket upgrade plus the `setup` /
//! `setupComplete` exchange. After that a single task pumps outbound
//! envelopes to the socket and turns socket messages into inbound events.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{realtime_input_message, setup_message, ServerMessage};
use super::{InboundEvent, LiveConnector, LiveLink, SessionConfig, TransportEnvelope};
use crate::error::VoiceError;

/// Default BidiGenerateContent endpoint.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Connects to the Gemini Live API.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiLiveConnector;

impl LiveConnector for GeminiLiveConnector {
    fn connect<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<LiveLink, VoiceError>> + Send + 'a>> {
        Box::pin(connect_live(config))
    }
}

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_live(config: &SessionConfig) -> Result<LiveLink, VoiceError> {
    if config.api_key.is_empty() {
        return Err(VoiceError::ConnectionFailed("no API key configured".into()));
    }

    // One deadline covers the upgrade, the setup send and setupComplete.
    let socket = tokio::time::timeout(config.connect_timeout, handshake(config))
        .await
        .map_err(|_| {
            VoiceError::ConnectionFailed(format!(
                "handshake did not complete within {:?}",
                config.connect_timeout
            ))
        })??;
    info!("Gemini Live setup complete");

    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(pump(sink, stream, out_rx, in_tx));

    Ok(LiveLink {
        outbound: out_tx,
        inbound: in_rx,
        task: Some(task),
    })
}

async fn handshake(config: &SessionConfig) -> Result<LiveSocket, VoiceError> {
    let url = format!("{}?key={}", config.endpoint, config.api_key);
    let (mut socket, response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| VoiceError::ConnectionFailed(format!("WebSocket connect failed: {}", e)))?;
    debug!(status = %response.status(), "WebSocket upgrade complete");

    socket
        .send(Message::Text(setup_message(config)))
        .await
        .map_err(|e| VoiceError::ConnectionFailed(format!("Failed to send setup: {}", e)))?;

    wait_for_setup(&mut socket).await?;
    Ok(socket)
}

/// Message payload as text, for both text and binary frames.
fn message_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Ignoring non-UTF-8 binary frame: {}", e);
                None
            }
        },
        _ => None,
    }
}

async fn wait_for_setup<S>(stream: &mut S) -> Result<(), VoiceError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| VoiceError::ConnectionFailed(format!("setup failed: {}", e)))?;
        if let Message::Close(frame) = &msg {
            let reason = frame
                .as_ref()
                .map(|f| f.reason.to_string())
                .unwrap_or_else(|| "no reason".into());
            return Err(VoiceError::ConnectionFailed(format!(
                "server closed during setup: {}",
                reason
            )));
        }
        let Some(text) = message_text(msg) else {
            continue;
        };
        match ServerMessage::parse(&text) {
            Ok(parsed) if parsed.is_setup_complete() => return Ok(()),
            Ok(_) => debug!("Ignoring message before setupComplete"),
            Err(e) => warn!("Unparseable message during setup: {}", e),
        }
    }
    Err(VoiceError::ConnectionFailed(
        "connection ended before setupComplete".into(),
    ))
}

async fn pump<K, S>(
    mut sink: K,
    mut stream: S,
    mut outbound: mpsc::UnboundedReceiver<TransportEnvelope>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
) where
    K: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    // Session dropped its sender: close politely.
                    let _ = sink.close().await;
                    break;
                };
                if let Err(e) = sink.send(Message::Text(realtime_input_message(&envelope))).await {
                    let _ = inbound.send(InboundEvent::Error(format!("send failed: {}", e)));
                    let _ = inbound.send(InboundEvent::Closed);
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Server closed live session");
                        let _ = inbound.send(InboundEvent::Closed);
                        break;
                    }
                    Some(Ok(msg)) => {
                        let Some(text) = message_text(msg) else {
                            continue;
                        };
                        match ServerMessage::parse(&text) {
                            Ok(parsed) => {
                                for event in parsed.into_events() {
                                    if inbound.send(event).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!("Skipping unparseable server message: {}", e),
                        }
                    }
                    Some(Err(e)) => {
                        let _ = inbound.send(InboundEvent::Error(e.to_string()));
                        let _ = inbound.send(InboundEvent::Closed);
                        break;
                    }
                    None => {
                        let _ = inbound.send(InboundEvent::Closed);
                        break;
                    }
                }
            }
        }
    }
    debug!("Live transport task exiting");
}
