// Audio driver - cpal output stream driving the engine cycle by cycle

use crate::engine::Engine;
use crate::midi::output::MidiSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no audio output device found")]
    NoDevice,
    #[error("stream configuration failed: {0}")]
    Config(String),
    #[error("stream creation failed: {0}")]
    Stream(String),
}

/// Runs the engine off an audio output stream.
///
/// The sequencer produces no audio itself; the stream exists as the period
/// clock, so each callback runs one engine cycle and leaves the buffer
/// silent. Dropping the driver stops the stream.
pub struct AudioDriver {
    _device: Device,
    _stream: Stream,
    sample_rate: f64,
}

impl AudioDriver {
    pub fn start(
        mut engine: Engine,
        mut sink: Box<dyn MidiSink + Send>,
    ) -> Result<Self, DriverError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DriverError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| DriverError::Config(e.to_string()))?;
        let sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;
        let config: StreamConfig = config.into();

        log::info!(
            "audio driver on {} at {sample_rate} Hz",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );
        engine.set_sample_rate(sample_rate);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Realtime zone: no allocation, no locks, no I/O
                    let frames = (data.len() / channels) as u32;
                    engine.process_cycle(frames, sink.as_mut());
                    data.fill(0.0);
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| DriverError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DriverError::Stream(e.to_string()))?;

        Ok(Self {
            _device: device,
            _stream: stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
