// src/audio/track.rs
// Fixed-capacity PCM tracks shared between the capture, playback and control contexts

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::BYTES_PER_SAMPLE;
use super::metronome::samples_per_beat;

/// Raw track storage: 16-bit little-endian mono PCM plus a cursor and the
/// length of meaningful content. Allocated once, never resized.
#[derive(Debug, Clone)]
pub struct TrackData {
    data: Vec<u8>,
    cursor: usize,
    filled_bytes: usize,
}

impl TrackData {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            data: vec![0; capacity_bytes],
            cursor: 0,
            filled_bytes: 0,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn filled_bytes(&self) -> usize {
        self.filled_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.filled_bytes == 0
    }

    /// The meaningful part of the buffer.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.filled_bytes]
    }

    /// The whole buffer, including bytes past `filled_bytes`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_filled_bytes(&mut self, filled_bytes: usize) {
        debug_assert!(filled_bytes <= self.data.len());
        debug_assert!(filled_bytes % BYTES_PER_SAMPLE == 0);
        self.filled_bytes = filled_bytes;
        self.cursor = self.cursor.min(filled_bytes);
    }

    /// Replace the contents wholesale and rewind. `src` is clamped to capacity.
    pub fn assign(&mut self, src: &[u8]) {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
        self.filled_bytes = len;
        self.cursor = 0;
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Forget the content but keep the allocation.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.filled_bytes = 0;
    }
}

/// A [`TrackData`] behind its own lock. Every cursor/length change happens
/// while this lock is held.
#[derive(Debug)]
pub struct RingTrack {
    data: Mutex<TrackData>,
    capacity_bytes: usize,
}

impl RingTrack {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            data: Mutex::new(TrackData::new(capacity_bytes)),
            capacity_bytes,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Blocking acquire, for the control context only.
    pub fn lock(&self) -> MutexGuard<'_, TrackData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking acquire for the real-time contexts. A poisoned lock counts
    /// as contention.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, TrackData>> {
        self.data.try_lock().ok()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

/// Write-only view used by the capture context.
#[derive(Debug)]
pub struct CaptureTrack {
    ring: RingTrack,
    is_full: AtomicBool,
}

impl CaptureTrack {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            ring: RingTrack::new(capacity_bytes),
            is_full: AtomicBool::new(false),
        }
    }

    /// Append one hardware period of audio. Never blocks: returns `false` if
    /// the track is full or currently locked by another context.
    ///
    /// # Panics
    /// If `data` is not exactly `frame_count` 16-bit samples.
    pub fn append(&self, data: &[u8], frame_count: usize) -> bool {
        assert_eq!(
            data.len(),
            frame_count * BYTES_PER_SAMPLE,
            "capture data is not 16-bit mono: {} bytes for {} frames",
            data.len(),
            frame_count
        );

        if self.is_full.load(Ordering::Acquire) {
            return false;
        }

        let Some(mut track) = self.ring.try_lock() else {
            log::debug!("capture: track busy, dropping {} frames", frame_count);
            return false;
        };

        let start = track.cursor;
        let mut end = start + data.len();
        if end >= track.capacity_bytes() {
            end = track.capacity_bytes();
            self.is_full.store(true, Ordering::Release);
        }

        let written = end - start;
        track.data[start..end].copy_from_slice(&data[..written]);
        track.cursor = end;
        track.filled_bytes = end;
        true
    }

    pub fn lock(&self) -> CaptureGuard<'_> {
        CaptureGuard {
            data: self.ring.lock(),
            is_full: &self.is_full,
        }
    }

    pub fn is_full(&self) -> bool {
        self.is_full.load(Ordering::Acquire)
    }

    pub fn filled_bytes(&self) -> usize {
        self.ring.lock().filled_bytes()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.ring.capacity_bytes()
    }

    /// Discard the take. The full latch is released after the data is
    /// cleared, so a racing `append` can only land in an empty track.
    pub fn reset(&self) {
        self.ring.reset();
        self.is_full.store(false, Ordering::Release);
    }
}

/// Locked capture track. Trims and resets go through here so they happen
/// inside whatever critical section the caller already holds.
pub struct CaptureGuard<'a> {
    data: MutexGuard<'a, TrackData>,
    is_full: &'a AtomicBool,
}

impl CaptureGuard<'_> {
    /// Drop trailing jitter so the take is a whole number of beats.
    pub fn clip_to_beat_boundary(&mut self, bpm: u32, sample_rate: u32) {
        let bytes_per_beat = samples_per_beat(sample_rate, bpm) * BYTES_PER_SAMPLE;
        if bytes_per_beat == 0 {
            return;
        }
        let clipped = (self.data.filled_bytes / bytes_per_beat) * bytes_per_beat;
        self.data.set_filled_bytes(clipped);
    }

    /// Keep the first half of the take, on a sample boundary.
    pub fn clip_half(&mut self) {
        let half = self.data.filled_bytes / 2;
        self.data.set_filled_bytes(half - half % BYTES_PER_SAMPLE);
    }

    pub fn reset(&mut self) {
        self.data.reset();
        self.is_full.store(false, Ordering::Release);
    }
}

impl Deref for CaptureGuard<'_> {
    type Target = TrackData;

    fn deref(&self) -> &TrackData {
        &self.data
    }
}

impl DerefMut for CaptureGuard<'_> {
    fn deref_mut(&mut self) -> &mut TrackData {
        &mut self.data
    }
}

/// Read-only view used by the playback context. Loops over the filled part
/// of the buffer, not the whole capacity.
#[derive(Debug)]
pub struct PlaybackTrack {
    ring: RingTrack,
    underrun_reported: AtomicBool,
}

impl PlaybackTrack {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            ring: RingTrack::new(capacity_bytes),
            underrun_reported: AtomicBool::new(false),
        }
    }

    /// Serve `frame_count` samples. Returns an empty vector if the track is
    /// locked elsewhere; otherwise always `frame_count * 2` bytes.
    pub fn read(&self, frame_count: usize) -> Vec<u8> {
        let mut out = vec![0; frame_count * BYTES_PER_SAMPLE];
        let written = self.read_into(&mut out);
        out.truncate(written);
        out
    }

    /// Allocation-free form of [`read`](Self::read). Fills all of `out` and
    /// returns its length, or returns 0 without touching `out` on contention.
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        let Some(mut track) = self.ring.try_lock() else {
            log::debug!("playback: track busy, muting {} bytes", out.len());
            return 0;
        };

        let filled = track.filled_bytes;
        if filled == 0 {
            out.fill(0);
            return out.len();
        }

        if filled < out.len() && !self.underrun_reported.swap(true, Ordering::Relaxed) {
            log::warn!(
                "playback: loop is {} bytes, callback wants {}; content will repeat within a period",
                filled,
                out.len()
            );
        }

        let mut cursor = track.cursor % filled;
        let mut written = 0;
        while written < out.len() {
            let n = (filled - cursor).min(out.len() - written);
            out[written..written + n].copy_from_slice(&track.data[cursor..cursor + n]);
            written += n;
            cursor = (cursor + n) % filled;
        }
        track.cursor = cursor;
        written
    }

    pub fn reset_playback(&self) {
        self.ring.lock().rewind();
    }

    pub fn lock(&self) -> PlaybackGuard<'_> {
        PlaybackGuard {
            data: self.ring.lock(),
            underrun_reported: &self.underrun_reported,
        }
    }

    pub fn cursor(&self) -> usize {
        self.ring.lock().cursor()
    }

    pub fn filled_bytes(&self) -> usize {
        self.ring.lock().filled_bytes()
    }

    /// `(cursor, filled_bytes)` read under one lock.
    pub fn position(&self) -> (usize, usize) {
        let track = self.ring.lock();
        (track.cursor(), track.filled_bytes())
    }

    pub fn capacity_bytes(&self) -> usize {
        self.ring.capacity_bytes()
    }
}

pub struct PlaybackGuard<'a> {
    data: MutexGuard<'a, TrackData>,
    underrun_reported: &'a AtomicBool,
}

impl PlaybackGuard<'_> {
    /// Replace the content and rewind; re-arms the underrun advisory.
    pub fn assign(&mut self, src: &[u8]) {
        self.data.assign(src);
        self.underrun_reported.store(false, Ordering::Relaxed);
    }

    pub fn reset_playback(&mut self) {
        self.data.rewind();
    }
}

impl Deref for PlaybackGuard<'_> {
    type Target = TrackData;

    fn deref(&self) -> &TrackData {
        &self.data
    }
}

impl DerefMut for PlaybackGuard<'_> {
    fn deref_mut(&mut self) -> &mut TrackData {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_append_advances_cursor_and_length() {
        let track = CaptureTrack::new(16);
        assert!(track.append(&pcm(&[1, 2, 3]), 3));
        assert!(track.append(&pcm(&[4]), 1));

        let guard = track.lock();
        assert_eq!(guard.cursor(), 8);
        assert_eq!(guard.filled_bytes(), 8);
        assert_eq!(guard.contents(), pcm(&[1, 2, 3, 4]).as_slice());
    }

    #[test]
    fn test_append_clamps_at_capacity_and_refuses_more() {
        let track = CaptureTrack::new(8);
        assert!(track.append(&pcm(&[1, 2, 3]), 3));
        assert!(track.append(&pcm(&[4, 5, 6]), 3));
        assert!(track.is_full());
        assert_eq!(track.filled_bytes(), 8);
        assert_eq!(track.lock().contents(), pcm(&[1, 2, 3, 4]).as_slice());

        assert!(!track.append(&pcm(&[7]), 1));
        assert_eq!(track.filled_bytes(), 8);

        track.reset();
        assert!(!track.is_full());
        assert_eq!(track.filled_bytes(), 0);
        assert!(track.append(&pcm(&[7]), 1));
    }

    #[test]
    fn test_append_fails_when_locked() {
        let track = CaptureTrack::new(16);
        let guard = track.lock();
        assert!(!track.append(&pcm(&[1]), 1));
        drop(guard);
        assert!(track.append(&pcm(&[1]), 1));
    }

    #[test]
    #[should_panic]
    fn test_append_rejects_length_mismatch() {
        let track = CaptureTrack::new(16);
        track.append(&[0, 0, 0], 2);
    }

    #[test]
    fn test_clip_to_beat_boundary() {
        // 60 BPM at 10 Hz: 10 samples per beat
        let track = CaptureTrack::new(200);
        track.append(&pcm(&[1; 25]), 25);

        let mut guard = track.lock();
        guard.clip_to_beat_boundary(60, 10);
        assert_eq!(guard.filled_bytes(), 40);
        assert_eq!(guard.filled_bytes() % 20, 0);
    }

    #[test]
    fn test_clip_to_beat_boundary_longer_than_take_empties_it() {
        let track = CaptureTrack::new(200);
        track.append(&pcm(&[1; 5]), 5);

        let mut guard = track.lock();
        guard.clip_to_beat_boundary(60, 10);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_clip_half_keeps_sample_alignment() {
        let track = CaptureTrack::new(64);
        track.append(&pcm(&[1; 7]), 7);

        let mut guard = track.lock();
        guard.clip_half();
        // 14 bytes -> 7 -> rounded down to 6
        assert_eq!(guard.filled_bytes(), 6);
    }

    #[test]
    fn test_read_empty_track_is_silence() {
        let track = PlaybackTrack::new(64);
        let out = track.read(5);
        assert_eq!(out, vec![0; 10]);
        assert_eq!(track.cursor(), 0);
    }

    #[test]
    fn test_read_wraps_at_filled_length() {
        let track = PlaybackTrack::new(64);
        track.lock().assign(&pcm(&[1, 2, 3]));

        assert_eq!(track.read(2), pcm(&[1, 2]));
        assert_eq!(track.read(2), pcm(&[3, 1]));
        assert_eq!(track.cursor(), 2);
        assert_eq!(track.read(1), pcm(&[2]));
    }

    #[test]
    fn test_read_longer_than_content_repeats_it() {
        let track = PlaybackTrack::new(64);
        track.lock().assign(&pcm(&[5, 6]));

        let out = track.read(5);
        assert_eq!(out.len(), 10);
        assert_eq!(out, pcm(&[5, 6, 5, 6, 5]));
        assert_eq!(track.cursor(), 2);
    }

    #[test]
    fn test_read_returns_nothing_when_locked() {
        let track = PlaybackTrack::new(64);
        track.lock().assign(&pcm(&[1, 2]));
        let guard = track.lock();
        assert!(track.read(4).is_empty());
        drop(guard);
        assert_eq!(track.read(1), pcm(&[1]));
    }

    #[test]
    fn test_reset_playback_rewinds_without_clearing() {
        let track = PlaybackTrack::new(64);
        track.lock().assign(&pcm(&[1, 2, 3]));
        track.read(2);
        track.reset_playback();
        assert_eq!(track.cursor(), 0);
        assert_eq!(track.filled_bytes(), 6);
        assert_eq!(track.read(1), pcm(&[1]));
    }

    #[test]
    fn test_position_reads_cursor_and_length_together() {
        let track = PlaybackTrack::new(64);
        assert_eq!(track.position(), (0, 0));
        track.lock().assign(&pcm(&[1, 2, 3]));
        track.read(2);
        assert_eq!(track.position(), (4, 6));
    }

    #[test]
    fn test_ring_reset_keeps_allocation() {
        let ring = RingTrack::new(32);
        ring.lock().assign(&[1, 2, 3, 4]);
        ring.reset();
        let data = ring.lock();
        assert_eq!(data.filled_bytes(), 0);
        assert_eq!(data.cursor(), 0);
        assert_eq!(data.capacity_bytes(), 32);
    }
}
