use super::error::{LooperError, Result};
use super::track::TrackData;
use super::{AudioConfig, BYTES_PER_SAMPLE};

pub fn samples_per_beat(sample_rate: u32, bpm: u32) -> usize {
    if bpm == 0 {
        return 0;
    }
    (sample_rate as usize * 60) / bpm as usize
}

/// Reject tempos that would give an empty beat.
pub fn validate_bpm(sample_rate: u32, bpm: u32) -> Result<u32> {
    if samples_per_beat(sample_rate, bpm) == 0 {
        return Err(LooperError::InvalidTempo(bpm));
    }
    Ok(bpm)
}

/// A click track rendered once for the whole session length.
#[derive(Debug, Clone)]
pub struct Metronome {
    bpm: u32,
    pub enabled: bool,
    track: TrackData,
}

impl Metronome {
    /// Pad or truncate `click` to exactly one beat and tile it over the
    /// session, leaving any trailing partial beat silent.
    pub fn synthesize(click: &[i16], bpm: u32, config: &AudioConfig) -> Result<Self> {
        let bpm = validate_bpm(config.sample_rate, bpm)?;
        let beat_len = samples_per_beat(config.sample_rate, bpm);

        let mut beat = vec![0i16; beat_len];
        let copied = click.len().min(beat_len);
        beat[..copied].copy_from_slice(&click[..copied]);

        let mut track = TrackData::new(config.capacity_bytes());
        let session_samples = track.capacity_bytes() / BYTES_PER_SAMPLE;
        let beats = session_samples / beat_len;
        let filled_bytes = beats * beat_len * BYTES_PER_SAMPLE;

        let beat_bytes: Vec<u8> = beat.iter().flat_map(|s| s.to_le_bytes()).collect();
        for chunk in track.as_bytes_mut()[..filled_bytes].chunks_exact_mut(beat_bytes.len()) {
            chunk.copy_from_slice(&beat_bytes);
        }
        track.set_filled_bytes(filled_bytes);

        log::debug!(
            "metronome: {} BPM, {} samples/beat, {} beats",
            bpm,
            beat_len,
            beats
        );

        Ok(Self {
            bpm,
            enabled: true,
            track,
        })
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn track(&self) -> &TrackData {
        &self.track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sample_rate: u32, session_seconds: u32) -> AudioConfig {
        AudioConfig {
            sample_rate,
            buffer_size: 64,
            session_seconds,
        }
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_samples_per_beat() {
        assert_eq!(samples_per_beat(44100, 120), 22050);
        assert_eq!(samples_per_beat(44100, 100), 26460);
        assert_eq!(samples_per_beat(44100, 0), 0);
    }

    #[test]
    fn test_short_click_is_padded_with_silence() {
        // 10 Hz, 120 BPM: 5 samples per beat, 20 samples per session
        let metronome = Metronome::synthesize(&[7, 8], 120, &config(10, 2)).unwrap();
        let track = samples(metronome.track().contents());
        assert_eq!(track.len(), 20);
        assert_eq!(&track[..10], &[7, 8, 0, 0, 0, 7, 8, 0, 0, 0]);
        assert!(metronome.enabled);
    }

    #[test]
    fn test_long_click_is_truncated_to_one_beat() {
        let metronome = Metronome::synthesize(&[1, 2, 3, 4, 5, 6, 7], 120, &config(10, 1)).unwrap();
        let track = samples(metronome.track().contents());
        assert_eq!(track, vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_partial_trailing_beat_is_left_silent() {
        // 90 BPM at 10 Hz: 6 samples per beat; 20 samples fit 3 beats
        let metronome = Metronome::synthesize(&[9; 6], 90, &config(10, 2)).unwrap();
        assert_eq!(metronome.track().filled_bytes(), 36);
        let tail = samples(&metronome.track().as_bytes()[36..]);
        assert!(tail.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_invalid_tempo_is_rejected() {
        assert!(matches!(
            Metronome::synthesize(&[1], 0, &config(10, 1)),
            Err(LooperError::InvalidTempo(0))
        ));
        // faster than one sample per beat
        assert!(Metronome::synthesize(&[1], 601, &config(10, 1)).is_err());
    }
}
