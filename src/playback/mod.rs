//! Playback scheduling for model audio.
//!
//! Inbound chunks are decoded and queued back to back on the output clock so
//! consecutive chunks play without gaps. An interruption stops everything
//! that is playing or queued in one step.

pub mod rodio_output;

use tracing::{debug, info, warn};

use crate::audio::codec::{pcm_decode, AudioBuffer};
use crate::error::VoiceError;

pub use rodio_output::RodioOutput;

/// Sample rate of model audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

pub type SourceId = u64;

/// Output device with a monotonic clock, measured in seconds.
pub trait OutputDevice {
    fn now(&self) -> f64;

    /// Begin playing `buffer` at clock time `at` (immediately if in the past).
    fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at: f64) -> Result<(), VoiceError>;

    /// Silence a source at once. Unknown ids are ignored.
    fn stop(&mut self, id: SourceId);

    /// True once the source has played to the end; the device forgets it.
    fn take_finished(&mut self, id: SourceId) -> bool;

    /// Release the underlying device.
    fn release(&mut self) -> Result<(), VoiceError>;
}

/// A buffer placed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Schedules model audio for gapless playback. Lives for one session.
pub struct PlaybackScheduler {
    device: Option<Box<dyn OutputDevice>>,
    next_start_offset: f64,
    active: Vec<ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device: Some(device),
            next_start_offset: 0.0,
            active: Vec::new(),
            next_id: 0,
        }
    }

    /// Decode one chunk and queue it after everything already scheduled.
    ///
    /// Returns `Ok(None)` for an empty chunk. A decode failure leaves the
    /// scheduler untouched.
    pub fn on_audio_chunk(&mut self, bytes: &[u8]) -> Result<Option<ScheduledSource>, VoiceError> {
        let buffer = pcm_decode(bytes, OUTPUT_SAMPLE_RATE, 1)?;
        if buffer.frame_count() == 0 {
            return Ok(None);
        }

        self.reap_finished();
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| VoiceError::DeviceDenied("output device already released".into()))?;

        let now = device.now();
        // A drained queue restarts at the current clock time even if the
        // device finished earlier than the offset predicted.
        let start_at = if self.active.is_empty() {
            now
        } else {
            self.next_start_offset.max(now)
        };

        let id = self.next_id;
        device.start(id, &buffer, start_at)?;
        self.next_id += 1;

        let source = ScheduledSource {
            id,
            start_at,
            duration: buffer.duration(),
        };
        self.next_start_offset = source.end_at();
        self.active.push(source);
        debug!(
            id,
            start_at,
            duration = source.duration,
            queued = self.active.len(),
            "Scheduled audio chunk"
        );
        Ok(Some(source))
    }

    /// Drop sources that played to completion. Returns how many were removed.
    pub fn reap_finished(&mut self) -> usize {
        let Some(device) = self.device.as_mut() else {
            return 0;
        };
        let before = self.active.len();
        self.active.retain(|s| !device.take_finished(s.id));
        before - self.active.len()
    }

    /// Stop every playing or queued source and reset the clock offset.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        if let Some(device) = self.device.as_mut() {
            for source in &self.active {
                device.stop(source.id);
            }
        }
        self.active.clear();
        self.next_start_offset = 0.0;
        if stopped > 0 {
            info!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Interrupt and release the output device. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), VoiceError> {
        self.interrupt();
        match self.device.take() {
            Some(mut device) => {
                let result = device.release();
                info!("Output device released");
                result
            }
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub fn next_start_offset(&self) -> f64 {
        self.next_start_offset
    }

    #[cfg(test)]
    pub fn active_sources(&self) -> &[ScheduledSource] {
        &self.active
    }

    /// Nothing playing or queued.
    #[cfg(test)]
    pub fn is_drained(&self) -> bool {
        self.active.is_empty()
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Failed to release output device on drop");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Manual-clock output device that records what it was asked to do.

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    pub struct DeviceLog {
        pub now: f64,
        pub started: Vec<(SourceId, f64, f64)>,
        pub stopped: Vec<SourceId>,
        pub released: usize,
        pub fail_release: bool,
    }

    /// Cloneable view into a [`FakeOutput`]'s log.
    pub type SharedDeviceLog = Arc<Mutex<DeviceLog>>;

    pub struct FakeOutput {
        log: SharedDeviceLog,
    }

    impl FakeOutput {
        pub fn new() -> (Self, SharedDeviceLog) {
            let log = SharedDeviceLog::default();
            (Self::with_log(Arc::clone(&log)), log)
        }

        /// A device writing into an existing log.
        pub fn with_log(log: SharedDeviceLog) -> Self {
            Self { log }
        }
    }

    impl OutputDevice for FakeOutput {
        fn now(&self) -> f64 {
            self.log.lock().unwrap().now
        }

        fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at: f64) -> Result<(), VoiceError> {
            self.log
                .lock()
                .unwrap()
                .started
                .push((id, at, buffer.duration()));
            Ok(())
        }

        fn stop(&mut self, id: SourceId) {
            self.log.lock().unwrap().stopped.push(id);
        }

        fn take_finished(&mut self, id: SourceId) -> bool {
            let log = self.log.lock().unwrap();
            log.started
                .iter()
                .find(|(sid, _, _)| *sid == id)
                .map(|(_, at, dur)| log.now >= at + dur)
                .unwrap_or(true)
        }

        fn release(&mut self) -> Result<(), VoiceError> {
            let mut log = self.log.lock().unwrap();
            log.released += 1;
            if log.fail_release {
                return Err(VoiceError::Release("device busy".into()));
            }
            Ok(())
        }
    }

    /// `seconds` of 24 kHz mono silence as PCM bytes.
    pub fn silence(seconds: f64) -> Vec<u8> {
        vec![0u8; (seconds * OUTPUT_SAMPLE_RATE as f64).round() as usize * 2]
    }
}
