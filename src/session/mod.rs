//! Live session: a duplex channel to the conversational model.
//!
//! Outbound audio goes through an [`OutboundGate`] that the capture callback
//! shares. Inbound provider messages are reduced to a single ordered stream
//! of [`InboundEvent`]s consumed by one dispatcher.

pub mod gemini;
pub mod protocol;
pub mod state;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::codec::text_safe_encode;
use crate::audio::AudioFrame;
use crate::error::VoiceError;

pub use gemini::GeminiLiveConnector;
pub use state::{SessionState, SessionStateMachine};

/// MIME tag for outbound microphone audio.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Events delivered by an open session, in transport arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Raw 16-bit PCM from the model (24 kHz mono).
    AudioChunk(Vec<u8>),
    /// The user barged in; pending model audio must be discarded.
    Interrupted,
    /// Transport failure. The session is no longer usable.
    Error(String),
    /// The remote side closed the session.
    Closed,
}

/// One base64-encoded frame ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    pub data: String,
    pub mime_type: &'static str,
}

impl TransportEnvelope {
    pub fn from_frame(frame: AudioFrame) -> Self {
        Self {
            data: text_safe_encode(&frame.into_bytes()),
            mime_type: INPUT_MIME_TYPE,
        }
    }
}

/// Options fixed when a session opens.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub response_modality: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub api_key: String,
    pub endpoint: String,
    pub connect_timeout: Duration,
}

/// Receiving half of a session's inbound events.
pub type InboundStream = mpsc::UnboundedReceiver<InboundEvent>;

/// What a connector hands back once the handshake succeeds.
pub struct LiveLink {
    pub outbound: mpsc::UnboundedSender<TransportEnvelope>,
    pub inbound: InboundStream,
    /// Background transport task, aborted on close.
    pub task: Option<JoinHandle<()>>,
}

/// Establishes the transport to a live model (dyn-compatible).
pub trait LiveConnector: Send + Sync {
    /// Resolves once the handshake completes, or fails with `ConnectionFailed`.
    fn connect<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<LiveLink, VoiceError>> + Send + 'a>>;
}

/// Shared entry point for outbound audio.
///
/// Not ready until a session attaches its sender, and not ready again after
/// the session closes. Frames offered while not ready are dropped.
#[derive(Debug, Default)]
pub struct OutboundGate {
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEnvelope>>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl OutboundGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attach(&self, tx: mpsc::UnboundedSender<TransportEnvelope>) {
        match self.sender.lock() {
            Ok(mut guard) => *guard = Some(tx),
            Err(e) => warn!("Failed to lock outbound gate: {}", e),
        }
    }

    fn detach(&self) {
        match self.sender.lock() {
            Ok(mut guard) => *guard = None,
            Err(e) => warn!("Failed to lock outbound gate: {}", e),
        }
    }

    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        self.sender
            .lock()
            .map(|g| g.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Encode and send one block of samples. Returns `false` if it was dropped.
    pub fn offer(&self, samples: &[f32]) -> bool {
        let Ok(guard) = self.sender.lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match guard.as_ref() {
            Some(tx) => {
                let envelope = TransportEnvelope::from_frame(AudioFrame::encode(samples));
                self.deliver(tx, envelope)
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn deliver(&self, tx: &mpsc::UnboundedSender<TransportEnvelope>, envelope: TransportEnvelope) -> bool {
        if tx.send(envelope).is_ok() {
            self.sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One open live session. At most one exists at a time.
pub struct SessionHandle {
    gate: Arc<OutboundGate>,
    inbound: InboundStream,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl SessionHandle {
    /// Connect and attach the outbound side to `gate`.
    pub async fn open(
        connector: &dyn LiveConnector,
        config: &SessionConfig,
        gate: Arc<OutboundGate>,
    ) -> Result<Self, VoiceError> {
        info!(model = %config.model, voice = %config.voice_name, "Opening live session");
        let link = connector.connect(config).await?;
        gate.attach(link.outbound);
        info!("Live session open");
        Ok(Self {
            gate,
            inbound: link.inbound,
            task: link.task,
            closed: false,
        })
    }

    /// Next inbound event, or `None` once closed or the transport is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tear down the transport. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.gate.detach();
        self.inbound.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!(
            sent = self.gate.sent(),
            dropped = self.gate.dropped(),
            "Live session closed"
        );
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{test_config, MemoryConnector};
    use super::*;

    #[test]
    fn test_gate_drops_frames_before_open() {
        let gate = OutboundGate::new();
        assert!(!gate.is_ready());
        assert!(!gate.offer(&[0.0; 16]));
        assert_eq!(gate.dropped(), 1);
        assert_eq!(gate.sent(), 0);
    }

    #[test]
    fn test_dropped_frames_are_not_replayed() {
        let gate = OutboundGate::new();
        gate.offer(&[0.1; 8]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        gate.attach(tx);
        assert!(gate.offer(&[0.0; 8]));
        let first = rx.try_recv().unwrap();
        // Only the frame offered after attach arrives, and it is silence.
        assert_eq!(first.data, text_safe_encode(&[0u8; 16]));
        assert_eq!(first.mime_type, INPUT_MIME_TYPE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_send_close() {
        let connector = MemoryConnector::new();
        let mut remote = connector.take_remote();
        let gate = OutboundGate::new();

        let mut session = SessionHandle::open(&connector, &test_config(), Arc::clone(&gate))
            .await
            .unwrap();
        assert!(gate.is_ready());

        assert!(gate.offer(&[0.0; 4]));
        let env = remote.outbound.recv().await.unwrap();
        assert_eq!(env.mime_type, "audio/pcm;rate=16000");

        remote.inbound.send(InboundEvent::Interrupted).unwrap();
        assert_eq!(session.recv().await, Some(InboundEvent::Interrupted));

        session.close();
        assert!(session.is_closed());
        assert!(!gate.is_ready());
        // Frames offered after close are dropped, not queued.
        assert!(!gate.offer(&[0.0; 4]));
        assert_eq!(gate.sent(), 1);
        assert_eq!(gate.dropped(), 1);
        assert_eq!(session.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = MemoryConnector::new();
        let gate = OutboundGate::new();
        let mut session = SessionHandle::open(&connector, &test_config(), gate)
            .await
            .unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_no_events_after_close() {
        let connector = MemoryConnector::new();
        let remote = connector.take_remote();
        let mut session = SessionHandle::open(&connector, &test_config(), OutboundGate::new())
            .await
            .unwrap();
        session.close();
        // The transport may still try to deliver; nothing reaches the caller.
        let _ = remote.inbound.send(InboundEvent::AudioChunk(vec![0, 0]));
        assert_eq!(session.recv().await, None);
    }

    #[tokio::test]
    async fn test_connection_failure_leaves_gate_closed() {
        let connector = MemoryConnector::failing("handshake refused");
        let gate = OutboundGate::new();
        let err = SessionHandle::open(&connector, &test_config(), Arc::clone(&gate))
            .await
            .err()
            .unwrap();
        assert_eq!(err, VoiceError::ConnectionFailed("handshake refused".into()));
        assert!(!gate.is_ready());
    }
}
