//! Error taxonomy for the voice pipeline.

/// Errors produced by the capture, session and playback components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// Microphone or output device unavailable, or access was refused.
    DeviceDenied(String),
    /// Transport handshake with the live model failed.
    ConnectionFailed(String),
    /// Audio bytes could not be decoded (bad framing or bad base64).
    MalformedAudio(String),
    /// A session is already opening or open.
    SessionActive,
    /// Transport-level failure after the session opened.
    Transport(String),
    /// Releasing a device or transport failed.
    Release(String),
}

impl std::fmt::Display for VoiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceDenied(msg) => write!(f, "Audio device denied: {}", msg),
            Self::ConnectionFailed(msg) => write!(f, "Live session connection failed: {}", msg),
            Self::MalformedAudio(msg) => write!(f, "Malformed audio: {}", msg),
            Self::SessionActive => write!(f, "A live session is already active"),
            Self::Transport(msg) => write!(f, "Live session transport error: {}", msg),
            Self::Release(msg) => write!(f, "Resource release failed: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let err = VoiceError::MalformedAudio("odd length 3".into());
        assert_eq!(err.to_string(), "Malformed audio: odd length 3");
        assert_eq!(
            VoiceError::SessionActive.to_string(),
            "A live session is already active"
        );
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = VoiceError::DeviceDenied("no mic".into()).into();
        assert!(err.to_string().contains("no mic"));
    }
}
