//! Audio codec, microphone capture, and the device backend used by a
//! conversation.

pub mod capture;
pub mod codec;

use std::sync::Arc;

pub use capture::{list_input_devices, list_output_devices, AudioFrame, CaptureHandle};
pub use codec::AudioBuffer;

use crate::error::VoiceError;
use crate::playback::{OutputDevice, RodioOutput};
use crate::session::OutboundGate;

/// Opens the two audio devices a conversation needs.
pub trait AudioBackend {
    fn open_output(&self) -> Result<Box<dyn OutputDevice>, VoiceError>;
    fn open_microphone(&self, gate: Arc<OutboundGate>) -> Result<CaptureHandle, VoiceError>;
}

/// Real devices: cpal for input, rodio for output.
pub struct DeviceBackend {
    input_device: Option<String>,
    output_device: Option<String>,
    volume: f32,
}

impl DeviceBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>, volume: f32) -> Self {
        Self {
            input_device,
            output_device,
            volume,
        }
    }
}

impl AudioBackend for DeviceBackend {
    fn open_output(&self) -> Result<Box<dyn OutputDevice>, VoiceError> {
        let output = RodioOutput::open(self.output_device.as_deref(), self.volume)?;
        Ok(Box::new(output))
    }

    fn open_microphone(&self, gate: Arc<OutboundGate>) -> Result<CaptureHandle, VoiceError> {
        capture::CpalMicrophone::new(self.input_device.clone()).open(gate)
    }
}
