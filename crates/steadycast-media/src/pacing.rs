// crates/steadycast-media/src/pacing.rs
//
// The pacing loop, the master clock of the whole pipeline. Once per
// output frame period it pulls the background forward, samples the shared
// slot, advances the audio source machine, encodes exactly one video frame
// and however many audio frames bring the audio clock up to the video
// clock, then sleeps to the deadline. It never waits on the inbound
// reader: a missing feed just means the background is on screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;

use steadycast_core::audio_fifo::AudioFifo;
use steadycast_core::clock;
use steadycast_core::config::Config;
use steadycast_core::machine::{AudioMode, AudioSourceMachine, AudioTransition};
use steadycast_core::slot::{packed_len, SharedSlot};
use steadycast_core::status::StatusLog;

use crate::background::{BackgroundSource, BgTick};
use crate::helpers::yuv;
use crate::output::OutputMuxer;

/// Background packets pulled per tick before giving up on a fresh frame.
const BG_READS_PER_TICK: usize = 5;

/// Cap on the local SRT audio queue. Bounds end-to-end lip-sync drift when
/// the inbound feed delivers audio faster than the output clock consumes it.
const SRT_QUEUE_MAX_MS: usize = 300;

/// Below this much remaining headroom the tick skips sleeping. A late
/// tick is not "caught up" by running faster; the audio loop realigns on
/// the next tick and video just loses one period of pacing.
const MIN_SLEEP_US: i64 = 1_000;

/// Sample index the audio clock must reach to match `video_pts` frames of
/// video. Integer floor, so audio approaches from below and never
/// overshoots.
pub fn target_audio_pts(video_pts: i64, sample_rate: u32, fps: u32) -> i64 {
    video_pts * sample_rate as i64 / fps.max(1) as i64
}

pub struct Compositor {
    cfg: Config,
    slot: Arc<SharedSlot>,
    shutdown: Arc<AtomicBool>,
    log: StatusLog,
    background: BackgroundSource,
    muxer: OutputMuxer,
    machine: AudioSourceMachine,
    /// Inbound audio drained from the slot, owned by this thread.
    srt_queue: AudioFifo,
    /// Resampled background audio, refilled opportunistically during ticks.
    bg_queue: AudioFifo,
    /// The one frame buffer every encoded picture passes through.
    out_frame: VideoFrame,
    /// Scratch packed-YUV buffer the slot is sampled into.
    packed: Vec<u8>,
    /// Which source the last encoded frame came from; None before the
    /// first tick so the initial source is announced too.
    was_srt_video: Option<bool>,
    stats_ticker: u32,
}

impl Compositor {
    pub fn new(
        cfg: Config,
        slot: Arc<SharedSlot>,
        shutdown: Arc<AtomicBool>,
        log: StatusLog,
        background: BackgroundSource,
        muxer: OutputMuxer,
    ) -> Self {
        let queue_cap = 2 * cfg.sample_rate as usize;
        let out_frame = VideoFrame::new(Pixel::YUV420P, cfg.out_width, cfg.out_height);
        let packed = vec![0u8; packed_len(cfg.out_width as usize, cfg.out_height as usize)];
        let machine = AudioSourceMachine::new(cfg.grace_us());
        Self {
            cfg,
            slot,
            shutdown,
            log,
            background,
            muxer,
            machine,
            srt_queue: AudioFifo::with_capacity(queue_cap),
            bg_queue: AudioFifo::with_capacity(queue_cap),
            out_frame,
            packed,
            was_srt_video: None,
            stats_ticker: 0,
        }
    }

    /// Run until the shutdown flag is set. Emits `running` on entry and
    /// `stopped` on exit.
    pub fn run(&mut self) {
        self.log.emit("running");
        let frame_dur_us = self.cfg.frame_duration_us();
        while !self.shutdown.load(Ordering::Relaxed) {
            let t0 = clock::now_us();
            self.tick();
            let sleep_us = frame_dur_us - (clock::now_us() - t0);
            if sleep_us > MIN_SLEEP_US {
                std::thread::sleep(Duration::from_micros(sleep_us as u64));
            }
        }
        self.log.emit("stopped");
    }

    /// Flush the encoders and finalize the container. Call after `run`
    /// returns and the reader thread is joined.
    pub fn finish(&mut self) {
        self.muxer.finish();
    }

    fn tick(&mut self) {
        // ── Background: pull until a video frame appears ──────────────────
        let mut bg_frame = None;
        for _ in 0..BG_READS_PER_TICK {
            match self.background.read_tick(&mut self.bg_queue) {
                BgTick::Video(frame) => {
                    bg_frame = Some(frame);
                    break;
                }
                BgTick::Audio | BgTick::Empty => {}
                BgTick::Eof => self.background.rewind(),
            }
        }

        // ── Sample the slot and advance the audio machine ─────────────────
        let use_srt_video = self.slot.sample(&mut self.packed);

        match self.machine.advance(use_srt_video, clock::now_us()) {
            Some(AudioTransition::SrtActive) => {
                // Stale background audio must not play once SRT returns.
                self.bg_queue.clear();
                self.log.emit("srt_active");
            }
            Some(AudioTransition::SrtGrace) => self.log.emit("srt_grace"),
            Some(AudioTransition::BgAudioOn) => self.log.emit("bg_audio_on"),
            None => {}
        }

        if self.was_srt_video != Some(use_srt_video) {
            self.log.emit(if use_srt_video { "video_srt" } else { "video_bg" });
            self.was_srt_video = Some(use_srt_video);
        }

        // ── Video: one encoded frame per tick ─────────────────────────────
        let (w, h) = (self.cfg.out_width as usize, self.cfg.out_height as usize);
        if use_srt_video {
            yuv::write_packed(&self.packed, &mut self.out_frame, w, h);
            self.muxer.encode_video(&mut self.out_frame);
        } else if let Some(bg) = bg_frame {
            // The first ticks may yield no background frame yet; once one
            // has been encoded the last picture simply stays on screen.
            yuv::copy_planes(&bg, &mut self.out_frame, w, h);
            self.muxer.encode_video(&mut self.out_frame);
        }

        // ── Audio: catch the sample clock up to the video clock ───────────
        if self.machine.mode() == AudioMode::Srt {
            self.slot.drain_audio_into(&mut self.srt_queue);
            self.srt_queue
                .trim_to(self.cfg.sample_rate as usize * SRT_QUEUE_MAX_MS / 1000);
        }

        let target = target_audio_pts(self.muxer.video_pts(), self.cfg.sample_rate, self.cfg.out_fps);
        while self.muxer.audio_pts() < target {
            match self.machine.mode() {
                AudioMode::Srt => {
                    // Whole frames only: padding a short frame with silence
                    // fragments the stream audibly. Let samples accumulate
                    // and catch up next tick.
                    if self.srt_queue.len() < self.muxer.audio_frame_size() {
                        break;
                    }
                    self.muxer.encode_audio_frame(&mut self.srt_queue);
                }
                AudioMode::Grace => {
                    // Pure silence, and no stale inbound audio left to
                    // replay when SRT comes back.
                    self.srt_queue.clear();
                    self.slot.reset_audio();
                    self.muxer.encode_audio_frame(&mut self.srt_queue);
                }
                AudioMode::Bg => self.muxer.encode_audio_frame(&mut self.bg_queue),
            }
        }

        // ── Stats once a second ───────────────────────────────────────────
        self.stats_ticker += 1;
        if self.stats_ticker >= self.cfg.out_fps {
            self.stats_ticker = 0;
            self.log.emit_fields(
                "stats",
                &[
                    ("fps", json!(self.cfg.out_fps)),
                    ("srt_connected", json!(self.slot.is_connected())),
                    ("audio_mode", json!(self.machine.mode().as_str())),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_starts_at_zero() {
        assert_eq!(target_audio_pts(0, 48_000, 30), 0);
    }

    #[test]
    fn target_is_one_tick_of_samples_per_frame() {
        assert_eq!(target_audio_pts(1, 48_000, 30), 1_600);
        assert_eq!(target_audio_pts(30, 48_000, 30), 48_000);
    }

    #[test]
    fn target_floors_on_non_divisible_rates() {
        // 44100 / 60 = 735 exactly; 44100 / 24 = 1837.5 floors.
        assert_eq!(target_audio_pts(1, 44_100, 60), 735);
        assert_eq!(target_audio_pts(1, 44_100, 24), 1_837);
    }

    #[test]
    fn target_is_monotone_and_advances_one_tick_at_a_time() {
        // The catch-up loop encodes while audio_pts < target, in whole AAC
        // frames — so audio tracks video to within one frame's granularity.
        // That only holds if the target itself is monotone and steps by at
        // most one tick of samples.
        let mut last = 0;
        for video_pts in 0..3_000 {
            let t = target_audio_pts(video_pts, 48_000, 30);
            assert!(t >= last);
            assert!(t - last <= 1_600);
            last = t;
        }
    }
}
