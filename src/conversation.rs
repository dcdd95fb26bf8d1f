//! Conversation controller: owns the one live session and its devices.
//!
//! `start` acquires the output device, then the microphone, then the
//! transport. Inbound events are dispatched one at a time by
//! `handle_event`. Every exit path runs the same teardown, which releases
//! capture, transport and playback independently of each other.
//!
//! `start` may be dropped while the handshake is in flight; `stop` then
//! releases whatever was acquired and returns to idle.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::audio::{AudioBackend, CaptureHandle};
use crate::error::VoiceError;
use crate::oplog::{self, OperationStatus, SharedOperationLog};
use crate::playback::PlaybackScheduler;
use crate::session::state::StateObserver;
use crate::session::{
    InboundEvent, LiveConnector, OutboundGate, SessionConfig, SessionHandle, SessionState,
    SessionStateMachine,
};

/// Operation-log name for live sessions.
pub const LIVE_SESSION_METHOD: &str = "gemini.liveSession";

pub struct Conversation {
    connector: Box<dyn LiveConnector>,
    backend: Box<dyn AudioBackend>,
    config: SessionConfig,
    state: SessionStateMachine,
    session: Option<SessionHandle>,
    capture: Option<CaptureHandle>,
    playback: Option<PlaybackScheduler>,
    oplog: SharedOperationLog,
    started_at: Option<Instant>,
}

impl Conversation {
    pub fn new(
        connector: Box<dyn LiveConnector>,
        backend: Box<dyn AudioBackend>,
        config: SessionConfig,
        oplog: SharedOperationLog,
    ) -> Self {
        Self {
            connector,
            backend,
            config,
            state: SessionStateMachine::new(),
            session: None,
            capture: None,
            playback: None,
            oplog,
            started_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Report every state transition to `observer`.
    pub fn on_state_change(&mut self, observer: StateObserver) {
        self.state.set_observer(observer);
    }

    /// Replace the options used by the next `start`.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    /// Open a session with live microphone and speaker.
    ///
    /// Fails with `SessionActive` unless idle. On any other failure every
    /// resource acquired so far is released and the state returns to idle.
    pub async fn start(&mut self) -> Result<(), VoiceError> {
        if !self.state.begin_opening() {
            return Err(VoiceError::SessionActive);
        }
        oplog::record(&self.oplog, LIVE_SESSION_METHOD, OperationStatus::Pending, None);
        self.started_at = Some(Instant::now());

        match self.acquire().await {
            Ok(()) => {
                self.state.mark_open();
                info!(model = %self.config.model, "Conversation started");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Conversation failed to start");
                self.state.fail();
                self.release_all();
                self.state.finish();
                oplog::record(&self.oplog, LIVE_SESSION_METHOD, OperationStatus::Error, None);
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<(), VoiceError> {
        let output = self.backend.open_output()?;
        self.playback = Some(PlaybackScheduler::new(output));

        // The microphone is live before the transport exists; frames are
        // dropped by the gate until the session attaches.
        let gate = OutboundGate::new();
        self.capture = Some(self.backend.open_microphone(Arc::clone(&gate))?);

        let session = SessionHandle::open(self.connector.as_ref(), &self.config, gate).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Wait for the next inbound event. Never resolves without a session.
    pub async fn next_event(&mut self) -> InboundEvent {
        match self.session.as_mut() {
            Some(session) => session.recv().await.unwrap_or(InboundEvent::Closed),
            None => std::future::pending().await,
        }
    }

    /// Dispatch one inbound event. Returns the transport error, if that is
    /// what the event carried, after the session has been torn down.
    pub fn handle_event(&mut self, event: InboundEvent) -> Result<(), VoiceError> {
        match event {
            InboundEvent::AudioChunk(bytes) => {
                if self.state() != SessionState::Open {
                    return Ok(());
                }
                let Some(playback) = self.playback.as_mut() else {
                    return Ok(());
                };
                match playback.on_audio_chunk(&bytes) {
                    Ok(_) => {}
                    Err(VoiceError::MalformedAudio(reason)) => {
                        warn!(len = bytes.len(), %reason, "Dropping malformed audio chunk");
                    }
                    Err(e) => warn!(error = %e, "Failed to schedule audio chunk"),
                }
                Ok(())
            }
            InboundEvent::Interrupted => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.interrupt();
                }
                Ok(())
            }
            InboundEvent::Error(message) => {
                warn!(%message, "Live session error");
                if self.state.fail() {
                    self.release_all();
                    self.state.finish();
                    oplog::record(&self.oplog, LIVE_SESSION_METHOD, OperationStatus::Error, None);
                }
                Err(VoiceError::Transport(message))
            }
            InboundEvent::Closed => {
                info!("Live session closed by remote");
                self.close_gracefully();
                Ok(())
            }
        }
    }

    /// End the conversation. Cancels a start still in flight. No-op when idle.
    pub fn stop(&mut self) {
        if self.state() == SessionState::Opening {
            self.abort_opening();
        } else {
            self.close_gracefully();
        }
    }

    fn abort_opening(&mut self) {
        if !self.state.fail() {
            return;
        }
        info!("Conversation start cancelled");
        self.release_all();
        self.state.finish();
        oplog::record(&self.oplog, LIVE_SESSION_METHOD, OperationStatus::Error, None);
    }

    fn close_gracefully(&mut self) {
        if !self.state.begin_closing() {
            return;
        }
        let duration = self.started_at.take().map(|t| t.elapsed());
        self.release_all();
        self.state.finish();
        oplog::record(&self.oplog, LIVE_SESSION_METHOD, OperationStatus::Success, duration);
        info!("Conversation ended");
    }

    /// Remove finished sources from the playing set.
    pub fn reap_finished(&mut self) -> usize {
        self.playback
            .as_mut()
            .map(PlaybackScheduler::reap_finished)
            .unwrap_or(0)
    }

    /// Release capture, transport and playback. A failing step is logged
    /// and does not prevent the others.
    fn release_all(&mut self) -> Vec<VoiceError> {
        let mut failures = Vec::new();

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                warn!(error = %e, "Failed to release microphone");
                failures.push(e);
            }
        }
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.shutdown() {
                warn!(error = %e, "Failed to release output device");
                failures.push(e);
            }
        }
        self.started_at = None;
        failures
    }

    #[cfg(test)]
    fn playback(&self) -> Option<&PlaybackScheduler> {
        self.playback.as_ref()
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.stop();
        self.release_all();
    }
}
