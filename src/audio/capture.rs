//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device at its native rate, down-mixes
//! to mono, resamples to 16 kHz and cuts the stream into 4096-sample frames.
//! Each frame is offered to the session's outbound gate, which drops it when
//! no session is open.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use super::codec::pcm_encode;
use crate::error::VoiceError;
use crate::session::OutboundGate;

/// Sample rate the live model expects for input audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound frame (256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

/// One block of mono 16-bit PCM, encoded once and consumed by a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    pub fn encode(samples: &[f32]) -> Self {
        Self {
            pcm: pcm_encode(samples),
        }
    }

    #[cfg(test)]
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pcm
    }
}

/// Accumulates arbitrary-length device blocks into fixed-size frames.
pub struct Framer {
    buf: Vec<f32>,
    frame_len: usize,
}

impl Framer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(frame_len * 2),
            frame_len,
        }
    }

    /// Append samples and call `emit` once per completed frame, in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.buf.extend_from_slice(samples);
        let mut consumed = 0;
        while self.buf.len() - consumed >= self.frame_len {
            emit(&self.buf[consumed..consumed + self.frame_len]);
            consumed += self.frame_len;
        }
        self.buf.drain(..consumed);
    }

    /// Samples waiting for the next frame.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// A running capture stream.
pub trait CaptureStream {
    /// Stop delivering audio and detach from the device.
    fn stop(&mut self) -> Result<(), VoiceError>;
}

/// Owns the capture stream for a session. Released on `stop` or drop.
pub struct CaptureHandle {
    stream: Option<Box<dyn CaptureStream>>,
}

impl CaptureHandle {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Stop capture. Later calls are no-ops.
    pub fn stop(&mut self) -> Result<(), VoiceError> {
        match self.stream.take() {
            Some(mut stream) => {
                let result = stream.stop();
                info!("Audio capture stopped");
                result
            }
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to release microphone on drop");
        }
    }
}

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// cpal-backed microphone.
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Acquire the device and start feeding `gate`.
    pub fn open(&self, gate: Arc<OutboundGate>) -> Result<CaptureHandle, VoiceError> {
        let stream = start_capture(self.device_name.as_deref(), gate)?;
        Ok(CaptureHandle::new(Box::new(CpalCapture { stream })))
    }
}

struct CpalCapture {
    stream: Stream,
}

impl CaptureStream for CpalCapture {
    fn stop(&mut self) -> Result<(), VoiceError> {
        // The device itself is released when the stream is dropped.
        self.stream
            .pause()
            .map_err(|e| VoiceError::Release(format!("Failed to pause input stream: {e}")))
    }
}

struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, VoiceError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| VoiceError::DeviceDenied(format!("Failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::DeviceDenied(format!("Input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| VoiceError::DeviceDenied("No default input device available".into()))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceDenied(format!("Failed to get default input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {}Hz mono if needed)",
        INPUT_SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Streaming linear resampler for mono f32 samples.
///
/// Keeps the fractional read position and the last input sample between
/// blocks, so block boundaries neither drop samples nor shift the phase.
pub struct LinearResampler {
    step: f64,
    /// Next read position relative to the start of the next block. `-1.0`
    /// addresses `prev`.
    pos: f64,
    prev: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            pos: 0.0,
            prev: 0.0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        let Some(&last) = input.last() else {
            return Vec::new();
        };

        let n = input.len() as f64;
        let sample = |i: isize| if i < 0 { self.prev } else { input[i as usize] };
        let mut output = Vec::with_capacity((n / self.step) as usize + 1);
        let mut pos = self.pos;
        while pos < n - 1.0 {
            let base = pos.floor();
            let frac = (pos - base) as f32;
            let s0 = sample(base as isize);
            let s1 = sample(base as isize + 1);
            output.push(s0 + frac * (s1 - s0));
            pos += self.step;
        }
        self.pos = pos - n;
        self.prev = last;
        output
    }
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Start capture and return the cpal `Stream` (must be kept alive).
fn start_capture(device_name: Option<&str>, gate: Arc<OutboundGate>) -> Result<Stream, VoiceError> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;
    let mut resampler = LinearResampler::new(native_rate, INPUT_SAMPLE_RATE);
    let mut framer = Framer::new(FRAME_SAMPLES);

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let resampled = if resampler.is_passthrough() {
                    mono
                } else {
                    resampler.process(&mono)
                };
                framer.push(&resampled, |frame| {
                    // Dropped frames are expected while the session handshakes.
                    gate.offer(frame);
                });
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| VoiceError::DeviceDenied(format!("Failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceDenied(format!("Failed to start input stream: {e}")))?;

    debug!(frame_samples = FRAME_SAMPLES, "Audio capture started");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_emits_fixed_frames() {
        let mut framer = Framer::new(4);
        let mut frames: Vec<Vec<f32>> = Vec::new();
        framer.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        assert_eq!(framer.pending(), 3);

        framer.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(framer.pending(), 1);
    }

    #[test]
    fn test_audio_frame_encoding() {
        let frame = AudioFrame::encode(&[0.0; FRAME_SAMPLES]);
        assert_eq!(frame.sample_count(), FRAME_SAMPLES);
        assert!(frame.into_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_to_mono_averages() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_resample_thirds_length() {
        let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let out = LinearResampler::new(48_000, 16_000).process(&input);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 3.0);
        assert_eq!(LinearResampler::new(16_000, 16_000).process(&input), input);
    }

    #[test]
    fn test_resample_carries_phase_across_blocks() {
        let signal: Vec<f32> = (0..512 * 100)
            .map(|i| (i as f32 * 0.01).sin())
            .collect();

        let whole = LinearResampler::new(44_100, 16_000).process(&signal);
        let mut streaming = LinearResampler::new(44_100, 16_000);
        let mut chunked = Vec::new();
        for block in signal.chunks(512) {
            chunked.extend(streaming.process(block));
        }

        // 51200 * 16000 / 44100 = 18575.96
        assert!((18_575..=18_576).contains(&chunked.len()), "got {}", chunked.len());
        assert!(whole.len().abs_diff(chunked.len()) <= 1);
        for (a, b) in whole.iter().zip(&chunked) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    struct CountingStream {
        stops: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl CaptureStream for CountingStream {
        fn stop(&mut self) -> Result<(), VoiceError> {
            self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_capture_handle_stops_once() {
        let stops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handle = CaptureHandle::new(Box::new(CountingStream {
            stops: Arc::clone(&stops),
        }));
        assert!(handle.is_active());
        handle.stop().unwrap();
        handle.stop().unwrap();
        drop(handle);
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_handle_releases_on_drop() {
        let stops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let _handle = CaptureHandle::new(Box::new(CountingStream {
                stops: Arc::clone(&stops),
            }));
        }
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
