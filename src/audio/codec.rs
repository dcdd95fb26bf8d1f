//! PCM and transport encoding.
//!
//! The live model expects 16-bit signed little-endian mono PCM, base64
//! encoded and tagged `audio/pcm;rate=16000`. Replies arrive in the same
//! framing at 24 kHz.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::VoiceError;

/// Scale factor between float samples and 16-bit PCM.
const PCM_SCALE: f32 = 32768.0;

/// Decoded, playable audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// One sample vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Mono buffer from a sample vector.
    #[cfg(test)]
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Interleave channels for output devices that take a flat buffer.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Encode float samples as 16-bit little-endian PCM.
///
/// Values are scaled by 32768 and truncated toward zero, then wrapped into
/// the signed 16-bit range. Nothing is clipped: `1.0` encodes as `-32768`.
pub fn pcm_encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        // f32 -> i32 truncates (NaN becomes 0); i32 -> i16 wraps.
        let v = (s * PCM_SCALE) as i32 as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode interleaved 16-bit little-endian PCM into a float buffer.
pub fn pcm_decode(bytes: &[u8], sample_rate: u32, channel_count: usize) -> Result<AudioBuffer, VoiceError> {
    if channel_count == 0 {
        return Err(VoiceError::MalformedAudio("channel count is zero".into()));
    }
    let frame_bytes = channel_count * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(VoiceError::MalformedAudio(format!(
            "{} bytes is not a multiple of {} ({} channel(s) x 16-bit)",
            bytes.len(),
            frame_bytes,
            channel_count
        )));
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([sample[0], sample[1]]);
            channels[ch].push(v as f32 / PCM_SCALE);
        }
    }

    Ok(AudioBuffer {
        sample_rate,
        channels,
    })
}

/// Base64-encode bytes for a text-only channel.
pub fn text_safe_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`text_safe_encode`].
pub fn text_safe_decode(text: &str) -> Result<Vec<u8>, VoiceError> {
    STANDARD
        .decode(text)
        .map_err(|e| VoiceError::MalformedAudio(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_safe_round_trip() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        let cases: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0],
            vec![0xff, 0x00],
            vec![1, 2, 3],
            all_bytes.clone(),
            all_bytes.iter().rev().cycle().take(1001).copied().collect(),
        ];
        for bytes in cases {
            let text = text_safe_encode(&bytes);
            assert!(text.is_ascii());
            assert_eq!(text_safe_decode(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn test_text_safe_standard_alphabet() {
        assert_eq!(text_safe_encode(b""), "");
        assert_eq!(text_safe_encode(b"f"), "Zg==");
        assert_eq!(text_safe_encode(&[0xfb, 0xff]), "+/8=");
    }

    #[test]
    fn test_text_safe_decode_rejects_garbage() {
        let err = text_safe_decode("not*base64").unwrap_err();
        assert!(matches!(err, VoiceError::MalformedAudio(_)));
    }

    #[test]
    fn test_pcm_encode_little_endian() {
        let bytes = pcm_encode(&[0.0, 0.5, -0.5, -1.0]);
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x40, 0x00, 0xc0, 0x00, 0x80]);
    }

    #[test]
    fn test_pcm_encode_wraps_out_of_range() {
        // 1.0 * 32768 = 32768 wraps to -32768.
        assert_eq!(pcm_encode(&[1.0]), (-32768i16).to_le_bytes().to_vec());
        // 1.5 * 32768 = 49152 wraps to -16384.
        assert_eq!(pcm_encode(&[1.5]), (-16384i16).to_le_bytes().to_vec());
        assert_eq!(pcm_encode(&[f32::NAN]), vec![0, 0]);
    }

    #[test]
    fn test_pcm_round_trip_within_one_step() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([-1.0, 0.0, 0.999_969])
            .collect();
        let decoded = pcm_decode(&pcm_encode(&samples), 16_000, 1).unwrap();
        assert_eq!(decoded.frame_count(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded.channels[0]) {
            assert!(
                (orig - back).abs() <= 1.0 / 32768.0,
                "{} decoded as {}",
                orig,
                back
            );
        }
    }

    #[test]
    fn test_pcm_decode_rejects_odd_length() {
        let err = pcm_decode(&[0, 0, 0], 24_000, 1).unwrap_err();
        assert!(matches!(err, VoiceError::MalformedAudio(_)));
        // Stereo frames are four bytes wide.
        assert!(pcm_decode(&[0; 6], 24_000, 2).is_err());
        assert!(pcm_decode(&[0; 8], 24_000, 2).is_ok());
        assert!(pcm_decode(&[0; 8], 24_000, 0).is_err());
    }

    #[test]
    fn test_pcm_decode_deinterleaves() {
        let mut bytes = Vec::new();
        for v in [16384i16, -16384, 8192, -8192] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let buf = pcm_decode(&bytes, 24_000, 2).unwrap();
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.channels[0], vec![0.5, 0.25]);
        assert_eq!(buf.channels[1], vec![-0.5, -0.25]);
        assert_eq!(buf.interleaved(), vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn test_duration() {
        let buf = pcm_decode(&vec![0u8; 48_000], 24_000, 1).unwrap();
        assert!((buf.duration() - 1.0).abs() < f64::EPSILON);
        assert_eq!(AudioBuffer::mono(0, vec![0.0]).duration(), 0.0);
    }
}
