use std::path::PathBuf;

/// Faults reported to the control context.
///
/// Real-time paths never produce these; contention and capacity exhaustion
/// degrade silently instead.
#[derive(Debug, thiserror::Error)]
pub enum LooperError {
    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(u32),

    #[error("A tempo must be set first")]
    TempoRequired,

    #[error("Cannot {0} while recording")]
    NotWhileRecording(&'static str),

    #[error(
        "Unsupported WAV {}: {channels}ch, {bits_per_sample}-bit, {sample_rate}Hz (need mono 16-bit at {expected_rate}Hz)",
        .path.display()
    )]
    UnsupportedWav {
        path: PathBuf,
        channels: u16,
        bits_per_sample: u16,
        sample_rate: u32,
        expected_rate: u32,
    },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture device error: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, LooperError>;
