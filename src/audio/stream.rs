use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use crossbeam::channel::Sender;
use std::sync::Arc;

use super::error::LooperError;
use super::session::CaptureControl;
use super::{AudioConfig, AudioEvent, BYTES_PER_SAMPLE, MixEngine};

// Lower bound on the callback scratch size. Periods longer than the scratch
// are handed to the engine in scratch-sized slices.
const MIN_SCRATCH_FRAMES: usize = 4096;

pub struct AudioStream {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_device_name: String,
    output_device_name: String,
    scratch_frames: usize,
}

impl AudioStream {
    /// Open the named devices (or the defaults) at the session sample rate.
    pub fn new(
        config: &AudioConfig,
        input_device_name: Option<&str>,
        output_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = match input_device_name {
            Some(name) => find_device(host.input_devices()?, name)
                .ok_or_else(|| anyhow!("Input device '{}' not found", name))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };
        let output_device = match output_device_name {
            Some(name) => find_device(host.output_devices()?, name)
                .ok_or_else(|| anyhow!("Output device '{}' not found", name))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?,
        };

        let input_default = input_device.default_input_config()?;
        let output_default = output_device.default_output_config()?;

        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        // No resampling: both streams run at the session rate or not at all.
        let input_config = StreamConfig {
            channels: input_default.channels(),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "input: {} ({}ch, device default {}Hz), output: {} ({}ch, device default {}Hz), session {}Hz",
            input_device_name,
            input_config.channels,
            input_default.sample_rate().0,
            output_device_name,
            output_config.channels,
            output_default.sample_rate().0,
            config.sample_rate
        );

        Ok(Self {
            input_device,
            output_device,
            input_config,
            output_config,
            input_device_name,
            output_device_name,
            scratch_frames: config.buffer_size.max(MIN_SCRATCH_FRAMES),
        })
    }

    /// Build both streams. Playback starts immediately; capture is returned
    /// paused for the session to start and stop.
    pub fn start(
        &self,
        engine: Arc<MixEngine>,
        event_sender: Sender<AudioEvent>,
    ) -> Result<(CaptureStream, Stream)> {
        let input_err_sender = event_sender.clone();
        let output_err_sender = event_sender;

        let capture_engine = Arc::clone(&engine);
        let input_channels = self.input_config.channels as usize;
        let mut capture_scratch = vec![0u8; self.scratch_frames * BYTES_PER_SAMPLE];

        let input_stream = self.input_device.build_input_stream(
            &self.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                capture_period(&capture_engine, data, input_channels, &mut capture_scratch);
            },
            move |err| {
                let _ = input_err_sender.try_send(AudioEvent::StreamError(format!(
                    "Input stream error: {}",
                    err
                )));
                let new_input = cpal::default_host()
                    .default_input_device()
                    .and_then(|d| d.name().ok());
                let _ = input_err_sender.try_send(AudioEvent::DevicesUpdated(new_input, None));
            },
            None,
        )?;
        input_stream.pause()?;

        let playback_engine = engine;
        let output_channels = self.output_config.channels as usize;
        let mut playback_scratch = vec![0u8; self.scratch_frames * BYTES_PER_SAMPLE];

        let output_stream = self.output_device.build_output_stream(
            &self.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                playback_period(&playback_engine, data, output_channels, &mut playback_scratch);
            },
            move |err| {
                let _ = output_err_sender.try_send(AudioEvent::StreamError(format!(
                    "Output stream error: {}",
                    err
                )));
                let new_output = cpal::default_host()
                    .default_output_device()
                    .and_then(|d| d.name().ok());
                let _ = output_err_sender.try_send(AudioEvent::DevicesUpdated(None, new_output));
            },
            None,
        )?;
        output_stream.play()?;

        log::info!("playback stream started, capture stream armed");
        Ok((CaptureStream::new(input_stream), output_stream))
    }

    pub fn get_input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn get_output_device_name(&self) -> &str {
        &self.output_device_name
    }
}

/// The input stream, started and paused by the recording session.
pub struct CaptureStream {
    stream: Stream,
}

impl CaptureStream {
    fn new(stream: Stream) -> Self {
        Self { stream }
    }
}

impl CaptureControl for CaptureStream {
    fn start(&mut self) -> super::error::Result<()> {
        self.stream
            .play()
            .map_err(|e| LooperError::Capture(e.to_string()))
    }

    fn stop(&mut self) -> super::error::Result<()> {
        self.stream
            .pause()
            .map_err(|e| LooperError::Capture(e.to_string()))
    }
}

/// Downmix one interleaved input period to 16-bit mono and append it to the
/// take, one scratch-sized slice at a time.
fn capture_period(engine: &MixEngine, data: &[f32], channels: usize, scratch: &mut [u8]) {
    let slice_frames = scratch.len() / BYTES_PER_SAMPLE;
    for block in data.chunks(slice_frames * channels) {
        let frame_count = block.len() / channels;
        let pcm = &mut scratch[..frame_count * BYTES_PER_SAMPLE];
        for (frame, out) in block
            .chunks_exact(channels)
            .zip(pcm.chunks_exact_mut(BYTES_PER_SAMPLE))
        {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            out.copy_from_slice(&f32_to_i16(mono).to_le_bytes());
        }
        engine.capture_callback(pcm, frame_count);
    }
}

/// Fill one interleaved output period from the loop, copying each mono
/// sample to every channel.
fn playback_period(engine: &MixEngine, data: &mut [f32], channels: usize, scratch: &mut [u8]) {
    let slice_frames = scratch.len() / BYTES_PER_SAMPLE;
    for block in data.chunks_mut(slice_frames * channels) {
        let frame_count = block.len() / channels;
        let pcm = &mut scratch[..frame_count * BYTES_PER_SAMPLE];
        engine.playback_callback(pcm);
        for (frame, sample) in block
            .chunks_exact_mut(channels)
            .zip(pcm.chunks_exact(BYTES_PER_SAMPLE))
        {
            frame.fill(i16_to_f32(i16::from_le_bytes([sample[0], sample[1]])));
        }
    }
}

fn find_device(mut devices: impl Iterator<Item = Device>, name: &str) -> Option<Device> {
    devices.find(|device| device.name().is_ok_and(|device_name| device_name == name))
}

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[inline]
fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn enumerate_device_names() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for device in host.input_devices()? {
        inputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
    }

    for device in host.output_devices()? {
        outputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
    }

    Ok((inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert!((i16_to_f32(f32_to_i16(0.5)) - 0.5).abs() < 0.001);
    }

    fn engine() -> MixEngine {
        MixEngine::new(AudioConfig {
            sample_rate: 100,
            buffer_size: 4,
            session_seconds: 1,
        })
    }

    #[test]
    fn test_long_capture_period_is_split_across_scratch() {
        let engine = engine();
        let mut scratch = vec![0u8; 4 * BYTES_PER_SAMPLE];
        // ten stereo frames, more than the four-frame scratch holds
        let data: Vec<f32> = (0..10).flat_map(|_| [0.5, 0.0]).collect();

        capture_period(&engine, &data, 2, &mut scratch);

        assert_eq!(scratch.len(), 4 * BYTES_PER_SAMPLE);
        assert_eq!(engine.capture().filled_bytes(), 10 * BYTES_PER_SAMPLE);
        assert!(engine.mix());
        assert_eq!(engine.mixed_samples(), vec![f32_to_i16(0.25); 10]);
    }

    #[test]
    fn test_long_playback_period_is_split_across_scratch() {
        let engine = engine();
        let mut scratch = vec![0u8; 4 * BYTES_PER_SAMPLE];
        let take: Vec<u8> = [16384i16, -16384, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        engine.capture_callback(&take, 3);
        engine.mix();

        let mut data = vec![9.0f32; 7 * 2];
        playback_period(&engine, &mut data, 2, &mut scratch);

        let left: Vec<f32> = data.chunks_exact(2).map(|f| f[0]).collect();
        assert_eq!(left, vec![0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5]);
        assert!(data.chunks_exact(2).all(|f| f[0] == f[1]));
        assert_eq!(engine.playback().cursor(), 2);
    }
}
