use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use super::error::{LooperError, Result};

/// Load a click sample. Only 16-bit integer mono at the session rate is
/// accepted; nothing is resampled or downmixed.
pub fn load_click<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Vec<i16>> {
    let mut reader = WavReader::open(&path)?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != SampleFormat::Int
        || spec.sample_rate != sample_rate
    {
        return Err(LooperError::UnsupportedWav {
            path: path.as_ref().to_path_buf(),
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            sample_rate: spec.sample_rate,
            expected_rate: sample_rate,
        });
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    log::debug!(
        "loaded click {} ({} samples)",
        path.as_ref().display(),
        samples.len()
    );
    Ok(samples)
}

/// Fallback click when no sample file is configured: a 15 ms decaying
/// 1 kHz sine burst.
pub fn default_click(sample_rate: u32) -> Vec<i16> {
    let num_samples = (sample_rate as f32 * 0.015) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (-t * 300.0).exp();
            let sample = (t * 1000.0 * std::f32::consts::TAU).sin() * envelope * 0.6;
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

/// Write the mix as 16-bit mono PCM.
pub fn export_wav<P: AsRef<Path>>(path: P, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::info!(
        "exported {} samples to {}",
        samples.len(),
        path.as_ref().display()
    );
    Ok(())
}
