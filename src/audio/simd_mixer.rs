// src/audio/simd_mixer.rs
// Saturating 16-bit PCM mixing over little-endian byte buffers

use wide::i16x8;

const LANES: usize = 8;
const CHUNK_BYTES: usize = LANES * 2;

/// `dest[i] = clip16(dest[i] + src[i])` for every sample both slices cover.
/// SIMD in blocks of eight samples, scalar for the remainder.
pub fn mix_saturating(dest: &mut [u8], src: &[u8]) {
    let len = dest.len().min(src.len());
    let chunks = len / CHUNK_BYTES;

    for i in 0..chunks {
        let range = i * CHUNK_BYTES..(i + 1) * CHUNK_BYTES;
        let a = i16x8::new(load_lanes(&dest[range.clone()]));
        let b = i16x8::new(load_lanes(&src[range.clone()]));
        store_lanes(&mut dest[range], a.saturating_add(b).to_array());
    }

    let tail = chunks * CHUNK_BYTES;
    mix_saturating_scalar(&mut dest[tail..len], &src[tail..len]);
}

/// Reference implementation: widen to i32, add, clamp, narrow.
pub fn mix_saturating_scalar(dest: &mut [u8], src: &[u8]) {
    for (d, s) in dest.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
        let a = i16::from_le_bytes([d[0], d[1]]) as i32;
        let b = i16::from_le_bytes([s[0], s[1]]) as i32;
        let mixed = (a + b).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        d.copy_from_slice(&mixed.to_le_bytes());
    }
}

/// Repeat `buf[..content_len]` until `buf[..target_len]` is filled, wrapping
/// the last partial copy back to the start of the content.
pub fn tile_in_place(buf: &mut [u8], content_len: usize, target_len: usize) {
    let target_len = target_len.min(buf.len());
    if content_len == 0 || content_len >= target_len {
        return;
    }

    // Every step copies a prefix of a buffer whose length is a whole number
    // of periods, so the result stays periodic in `content_len`.
    let mut len = content_len;
    while len < target_len {
        let n = len.min(target_len - len);
        buf.copy_within(0..n, len);
        len += n;
    }
}

#[inline]
fn load_lanes(bytes: &[u8]) -> [i16; LANES] {
    let mut lanes = [0i16; LANES];
    for (lane, b) in lanes.iter_mut().zip(bytes.chunks_exact(2)) {
        *lane = i16::from_le_bytes([b[0], b[1]]);
    }
    lanes
}

#[inline]
fn store_lanes(bytes: &mut [u8], lanes: [i16; LANES]) {
    for (b, lane) in bytes.chunks_exact_mut(2).zip(lanes) {
        b.copy_from_slice(&lane.to_le_bytes());
    }
}
