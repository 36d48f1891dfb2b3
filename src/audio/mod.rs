pub mod error;
pub mod io;
pub mod metronome;
pub mod mix_engine;
pub mod session;
pub mod simd_mixer;
pub mod stream;
pub mod track;

pub use error::LooperError;
pub use io::{default_click, export_wav, load_click};
pub use metronome::Metronome;
pub use mix_engine::MixEngine;
pub use session::{CaptureControl, EventOutcome, RecordingSession, SessionEvent, SessionState};
pub use stream::AudioStream;
pub use track::{CaptureTrack, PlaybackTrack, RingTrack};

use serde::Deserialize;

/// 16-bit mono PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    /// Length of every track buffer; fixed for the lifetime of a session.
    pub session_seconds: u32,
}

impl AudioConfig {
    pub fn capacity_bytes(&self) -> usize {
        self.sample_rate as usize * self.session_seconds as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_to_seconds(&self, bytes: usize) -> f64 {
        (bytes / BYTES_PER_SAMPLE) as f64 / self.sample_rate as f64
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 512,
            session_seconds: 180,
        }
    }
}

/// Notifications from the device layer to the control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    StreamError(String),
    DevicesUpdated(Option<String>, Option<String>), // (input_name, output_name)
}
