//! Output device via rodio.
//!
//! Each scheduled source gets its own `Sink` holding a delayed
//! `SamplesBuffer`, so any one of them can be silenced without touching the
//! rest. The clock is the time since the device was opened.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tracing::info;

use super::{OutputDevice, SourceId};
use crate::audio::AudioBuffer;
use crate::error::VoiceError;

pub struct RodioOutput {
    stream: Option<OutputStream>,
    stream_handle: OutputStreamHandle,
    sinks: HashMap<SourceId, Sink>,
    opened_at: Instant,
    volume: f32,
}

impl RodioOutput {
    /// Open the named output device, or the default one.
    pub fn open(device_name: Option<&str>, volume: f32) -> Result<Self, VoiceError> {
        let (stream, stream_handle) = match device_name {
            Some(name) => {
                let device = rodio::cpal::default_host()
                    .output_devices()
                    .map_err(|e| VoiceError::DeviceDenied(format!("Failed to enumerate output devices: {}", e)))?
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| VoiceError::DeviceDenied(format!("Output device not found: {}", name)))?;
                OutputStream::try_from_device(&device)
            }
            None => OutputStream::try_default(),
        }
        .map_err(|e| VoiceError::DeviceDenied(format!("Failed to open audio output: {}", e)))?;

        info!(device = device_name.unwrap_or("default"), volume, "Audio output opened");

        Ok(Self {
            stream: Some(stream),
            stream_handle,
            sinks: HashMap::new(),
            opened_at: Instant::now(),
            volume: volume.clamp(0.0, 1.0),
        })
    }
}

impl OutputDevice for RodioOutput {
    fn now(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at: f64) -> Result<(), VoiceError> {
        if self.stream.is_none() {
            return Err(VoiceError::DeviceDenied("audio output already released".into()));
        }
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| VoiceError::DeviceDenied(format!("Failed to create audio sink: {}", e)))?;
        sink.set_volume(self.volume);

        let delay = Duration::from_secs_f64((at - self.now()).max(0.0));
        let source = SamplesBuffer::new(
            buffer.channel_count() as u16,
            buffer.sample_rate,
            buffer.interleaved(),
        )
        .delay(delay);
        sink.append(source);
        self.sinks.insert(id, sink);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        if let Some(sink) = self.sinks.remove(&id) {
            sink.stop();
        }
    }

    fn take_finished(&mut self, id: SourceId) -> bool {
        match self.sinks.get(&id) {
            Some(sink) if sink.empty() => {
                self.sinks.remove(&id);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn release(&mut self) -> Result<(), VoiceError> {
        for (_, sink) in self.sinks.drain() {
            sink.stop();
        }
        // Dropping the stream closes the device.
        self.stream.take();
        Ok(())
    }
}
