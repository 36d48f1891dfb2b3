use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::Result;
use super::metronome::{Metronome, validate_bpm};
use super::simd_mixer::{mix_saturating, tile_in_place};
use super::track::{CaptureGuard, CaptureTrack, PlaybackGuard, PlaybackTrack, TrackData};
use super::{AudioConfig, BYTES_PER_SAMPLE};

/// Everything the control context mutates. Only ever locked after the
/// capture and playback locks (see [`MixEngine::lock_all`]), or on its own
/// by read-only accessors.
#[derive(Debug)]
struct MixState {
    mixed: TrackData,
    metronome: Option<Metronome>,
    bpm: Option<u32>,
    clip_half: bool,
}

struct Locked<'a> {
    capture: CaptureGuard<'a>,
    playback: PlaybackGuard<'a>,
    state: MutexGuard<'a, MixState>,
}

/// Owns the live take, the cumulative mix and what the output device hears.
///
/// The capture and playback device callbacks only ever `try_lock` their own
/// track; control operations take capture then playback, in that order,
/// everywhere.
#[derive(Debug)]
pub struct MixEngine {
    config: AudioConfig,
    capture: CaptureTrack,
    playback: PlaybackTrack,
    state: Mutex<MixState>,
    dropped_capture_chunks: AtomicU64,
    muted_playback_chunks: AtomicU64,
}

impl MixEngine {
    pub fn new(config: AudioConfig) -> Self {
        let capacity = config.capacity_bytes();
        Self {
            capture: CaptureTrack::new(capacity),
            playback: PlaybackTrack::new(capacity),
            state: Mutex::new(MixState {
                mixed: TrackData::new(capacity),
                metronome: None,
                bpm: None,
                clip_half: false,
            }),
            config,
            dropped_capture_chunks: AtomicU64::new(0),
            muted_playback_chunks: AtomicU64::new(0),
        }
    }

    fn lock_all(&self) -> Locked<'_> {
        let capture = self.capture.lock();
        let playback = self.playback.lock();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Locked {
            capture,
            playback,
            state,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MixState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Real-time entry points
    // ---------------------------------------------------------------------

    /// Capture device callback. `data` must hold `frame_count` 16-bit samples.
    pub fn capture_callback(&self, data: &[u8], frame_count: usize) -> bool {
        let consumed = self.capture.append(data, frame_count);
        if !consumed && !self.capture.is_full() {
            self.dropped_capture_chunks.fetch_add(1, Ordering::Relaxed);
        }
        consumed
    }

    /// Output device callback. Always fills `out`; silence on contention.
    pub fn playback_callback(&self, out: &mut [u8]) {
        if self.playback.read_into(out) == 0 && !out.is_empty() {
            out.fill(0);
            self.muted_playback_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ---------------------------------------------------------------------
    // Control operations
    // ---------------------------------------------------------------------

    /// Fold the current take into the mix and rebuild the playback buffer.
    /// Returns `false` if there was nothing to merge.
    pub fn mix(&self) -> bool {
        let Locked {
            mut capture,
            mut playback,
            mut state,
        } = self.lock_all();

        if capture.is_empty() {
            return false;
        }

        if let Some(bpm) = state.bpm {
            capture.clip_to_beat_boundary(bpm, self.config.sample_rate);
        }
        if state.clip_half {
            capture.clip_half();
        }
        if capture.is_empty() {
            log::debug!("mix: take shorter than one beat, discarding");
            capture.reset();
            return false;
        }

        let take_len = capture.filled_bytes();
        let mixed_len = state.mixed.filled_bytes();

        if mixed_len == 0 {
            state.mixed.assign(capture.contents());
            log::debug!("mix: first take, {} bytes", take_len);
        } else {
            let new_len = mixed_len.max(take_len).min(self.config.capacity_bytes());
            if mixed_len < take_len {
                tile_in_place(state.mixed.as_bytes_mut(), mixed_len, new_len);
            } else if take_len < mixed_len {
                tile_in_place(capture.as_bytes_mut(), take_len, new_len);
            }
            mix_saturating(
                &mut state.mixed.as_bytes_mut()[..new_len],
                &capture.as_bytes()[..new_len],
            );
            state.mixed.set_filled_bytes(new_len);
            log::debug!(
                "mix: merged {} byte take into {} byte mix -> {} bytes",
                take_len,
                mixed_len,
                new_len
            );
        }

        capture.reset();
        Self::recompute_playback(&state, &mut playback);
        true
    }

    /// Rebuild what the output hears from the mix and the metronome.
    fn recompute_playback(state: &MixState, playback: &mut PlaybackGuard<'_>) {
        match state.metronome.as_ref().filter(|m| m.enabled) {
            None => playback.assign(state.mixed.contents()),
            Some(metronome) => {
                let click = metronome.track();
                let mixed_len = state.mixed.filled_bytes();
                if mixed_len == 0 {
                    playback.assign(click.contents());
                } else {
                    playback.assign(click.as_bytes());
                    mix_saturating(
                        &mut playback.as_bytes_mut()[..mixed_len],
                        state.mixed.contents(),
                    );
                    playback.set_filled_bytes(mixed_len);
                }
            }
        }
        playback.reset_playback();
    }

    /// Tempo used to clip the next take to whole beats; `None` disables it.
    pub fn set_bpm(&self, bpm: Option<u32>) -> Result<()> {
        let bpm = bpm
            .map(|bpm| validate_bpm(self.config.sample_rate, bpm))
            .transpose()?;
        let mut locked = self.lock_all();
        locked.state.bpm = bpm;
        Ok(())
    }

    pub fn set_clip_half(&self, enabled: bool) {
        let mut locked = self.lock_all();
        locked.state.clip_half = enabled;
    }

    /// Install a new click track, replacing any previous one.
    pub fn add_metronome(&self, metronome: Metronome) {
        let Locked {
            capture: _capture,
            mut playback,
            mut state,
        } = self.lock_all();
        state.metronome = Some(metronome);
        Self::recompute_playback(&state, &mut playback);
    }

    /// Returns `false` if no metronome has been added.
    pub fn start_metronome(&self) -> bool {
        self.set_metronome_enabled(true)
    }

    pub fn stop_metronome(&self) -> bool {
        self.set_metronome_enabled(false)
    }

    fn set_metronome_enabled(&self, enabled: bool) -> bool {
        let Locked {
            capture: _capture,
            mut playback,
            mut state,
        } = self.lock_all();
        let Some(metronome) = state.metronome.as_mut() else {
            return false;
        };
        metronome.enabled = enabled;
        Self::recompute_playback(&state, &mut playback);
        true
    }

    /// Discard the in-progress take only.
    pub fn reset_capture(&self) {
        self.capture.reset();
    }

    /// Full session wipe. Allocations are kept; an enabled metronome keeps
    /// clicking over the now empty mix.
    pub fn reset(&self) {
        let Locked {
            mut capture,
            mut playback,
            mut state,
        } = self.lock_all();
        capture.reset();
        playback.reset();
        state.mixed.reset();
        Self::recompute_playback(&state, &mut playback);
        log::debug!("reset: take, mix and playback cleared");
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureTrack {
        &self.capture
    }

    pub fn playback(&self) -> &PlaybackTrack {
        &self.playback
    }

    pub fn bpm(&self) -> Option<u32> {
        self.lock_state().bpm
    }

    pub fn clip_half(&self) -> bool {
        self.lock_state().clip_half
    }

    /// `None` if no metronome was ever added.
    pub fn metronome_enabled(&self) -> Option<bool> {
        self.lock_state().metronome.as_ref().map(|m| m.enabled)
    }

    pub fn metronome_bpm(&self) -> Option<u32> {
        self.lock_state().metronome.as_ref().map(Metronome::bpm)
    }

    pub fn mixed_filled_bytes(&self) -> usize {
        self.lock_state().mixed.filled_bytes()
    }

    /// Copy of the mix's valid range, for saving.
    pub fn mixed_samples(&self) -> Vec<i16> {
        self.lock_state()
            .mixed
            .contents()
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn dropped_capture_chunks(&self) -> u64 {
        self.dropped_capture_chunks.load(Ordering::Relaxed)
    }

    pub fn muted_playback_chunks(&self) -> u64 {
        self.muted_playback_chunks.load(Ordering::Relaxed)
    }
}
