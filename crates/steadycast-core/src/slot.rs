// crates/steadycast-core/src/slot.rs
//
// The shared frame slot: the only state the inbound reader and the pacing
// loop share. One mutex over plain buffers: last-writer-wins for video, a
// bounded FIFO for audio. Nothing under the lock decodes, encodes, or does
// I/O; every critical section is a bounded copy.
//
// Video crosses the slot as a packed (stride-free) YUV420P buffer laid out
// Y ++ U ++ V, the same convention as helpers/yuv.rs on the media side.

use parking_lot::Mutex;

use crate::audio_fifo::AudioFifo;
use crate::clock;

/// Byte length of a packed YUV420P image at `width` × `height`.
/// Dimensions must be even (4:2:0 chroma is half-resolution both ways).
pub fn packed_len(width: usize, height: usize) -> usize {
    width * height + 2 * ((width / 2) * (height / 2))
}

struct SlotState {
    /// Latest inbound frame, packed YUV420P at the output resolution.
    /// Allocated once; contents overwritten in place.
    video: Vec<u8>,
    /// Has the reader stored a frame since the last disconnect?
    has_video: bool,
    /// Reader's view of whether the inbound session is up.
    connected: bool,
    /// Monotonic timestamp of the last successful decode (video or audio).
    last_activity_us: i64,
    audio: AudioFifo,
}

pub struct SharedSlot {
    state: Mutex<SlotState>,
}

impl SharedSlot {
    /// `audio_capacity` is the shared audio queue bound in samples per
    /// channel (at least two seconds' worth at the output rate).
    pub fn new(width: usize, height: usize, audio_capacity: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                video: vec![0u8; packed_len(width, height)],
                has_video: false,
                connected: false,
                last_activity_us: clock::now_us(),
                audio: AudioFifo::with_capacity(audio_capacity),
            }),
        }
    }

    /// Store the latest inbound frame. `packed` must match the slot's
    /// allocated size — the reader scales to the output resolution first.
    pub fn publish_video(&self, packed: &[u8]) {
        let mut s = self.state.lock();
        debug_assert_eq!(packed.len(), s.video.len(), "publish_video: size mismatch");
        s.video.copy_from_slice(packed);
        s.has_video = true;
        s.last_activity_us = clock::now_us();
    }

    /// Append resampled inbound audio.
    pub fn publish_audio(&self, left: &[f32], right: &[f32]) {
        let mut s = self.state.lock();
        s.audio.push(left, right);
        s.last_activity_us = clock::now_us();
    }

    /// A new inbound session is up: no frame seen yet, stale audio gone.
    pub fn mark_connected(&self) {
        let mut s = self.state.lock();
        s.connected = true;
        s.has_video = false;
        s.audio.clear();
        s.last_activity_us = clock::now_us();
    }

    pub fn mark_disconnected(&self) {
        let mut s = self.state.lock();
        s.connected = false;
        s.has_video = false;
        s.audio.clear();
    }

    /// Copy the latest inbound frame into `out`. Returns false (leaving
    /// `out` untouched) unless the session is up and a frame has been
    /// stored since it came up.
    pub fn sample(&self, out: &mut [u8]) -> bool {
        let s = self.state.lock();
        if !(s.connected && s.has_video) {
            return false;
        }
        out.copy_from_slice(&s.video);
        true
    }

    /// Move every buffered audio sample into `local`. The vectors are
    /// taken under the lock (O(1)) and appended outside it.
    pub fn drain_audio_into(&self, local: &mut AudioFifo) {
        let (left, right) = self.state.lock().audio.take_all();
        local.push(&left, &right);
    }

    /// Discard all buffered audio (grace-period flush).
    pub fn reset_audio(&self) {
        self.state.lock().audio.clear();
    }

    /// Microseconds since the reader last decoded anything.
    pub fn liveness_elapsed_us(&self) -> i64 {
        clock::now_us() - self.state.lock().last_activity_us
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(slot_w: usize, slot_h: usize, fill: u8) -> Vec<u8> {
        vec![fill; packed_len(slot_w, slot_h)]
    }

    #[test]
    fn packed_len_counts_all_three_planes() {
        // 4x2: Y = 8, U = 2, V = 2.
        assert_eq!(packed_len(4, 2), 12);
        assert_eq!(packed_len(1280, 720), 1280 * 720 * 3 / 2);
    }

    #[test]
    fn sample_is_false_until_connected_and_published() {
        let slot = SharedSlot::new(4, 2, 16);
        let mut out = frame(4, 2, 0);
        assert!(!slot.sample(&mut out));

        slot.mark_connected();
        assert!(!slot.sample(&mut out)); // connected but no frame yet

        slot.publish_video(&frame(4, 2, 7));
        assert!(slot.sample(&mut out));
        assert!(out.iter().all(|&b| b == 7));
    }

    #[test]
    fn disconnect_invalidates_video_and_audio() {
        let slot = SharedSlot::new(4, 2, 16);
        slot.mark_connected();
        slot.publish_video(&frame(4, 2, 7));
        slot.publish_audio(&[0.5; 4], &[0.5; 4]);
        slot.mark_disconnected();

        let mut out = frame(4, 2, 0);
        assert!(!slot.sample(&mut out));
        let mut local = AudioFifo::with_capacity(16);
        slot.drain_audio_into(&mut local);
        assert!(local.is_empty());
    }

    #[test]
    fn reconnect_requires_a_fresh_frame() {
        let slot = SharedSlot::new(4, 2, 16);
        slot.mark_connected();
        slot.publish_video(&frame(4, 2, 7));
        slot.mark_disconnected();
        slot.mark_connected();
        let mut out = frame(4, 2, 0);
        assert!(!slot.sample(&mut out));
    }

    #[test]
    fn drain_moves_audio_out_of_the_slot() {
        let slot = SharedSlot::new(4, 2, 16);
        slot.publish_audio(&[1.0, 2.0], &[3.0, 4.0]);
        let mut local = AudioFifo::with_capacity(16);
        slot.drain_audio_into(&mut local);
        assert_eq!(local.len(), 2);
        slot.drain_audio_into(&mut local);
        assert_eq!(local.len(), 2); // nothing left behind
    }

    #[test]
    fn publish_refreshes_liveness() {
        let slot = SharedSlot::new(4, 2, 16);
        slot.publish_audio(&[0.0], &[0.0]);
        assert!(slot.liveness_elapsed_us() < 1_000_000);
    }
}
