// crates/steadycast-media/src/background.rs
//
// The local loop file: always available, decoded one packet at a time at
// the pace the tick loop asks for it. At end of file it seeks back to the
// start and keeps going; the output never sees the seam.

use anyhow::{anyhow, Result};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::{audio::Audio as AudioFrame, video::Video as VideoFrame};

use steadycast_core::audio_fifo::AudioFifo;
use steadycast_core::config::Config;

use crate::helpers::pcm;

/// Result of one packet's worth of background work.
pub enum BgTick {
    /// A video frame was decoded and scaled to the output resolution.
    Video(VideoFrame),
    /// An audio frame was decoded, resampled, and appended to the queue.
    Audio,
    /// The packet decoded to nothing (decoder warm-up, corrupt packet).
    Empty,
    /// End of file — caller should `rewind` and try again.
    Eof,
}

pub struct BackgroundSource {
    ictx: ffmpeg::format::context::Input,
    video_idx: usize,
    audio_idx: Option<usize>,
    video_dec: ffmpeg::decoder::video::Video,
    audio_dec: Option<ffmpeg::decoder::audio::Audio>,
    scaler: Option<SwsContext>,
    resampler: Option<resampling::Context>,
    out_w: u32,
    out_h: u32,
    sample_rate: u32,
}

impl BackgroundSource {
    /// Open the loop file. A file without a video stream is a startup
    /// error; one without audio is fine (its ticks just never yield
    /// `Audio`, and the background queue stays silent).
    pub fn open(cfg: &Config) -> Result<Self> {
        let ictx = input(&cfg.bg_file)?;

        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| anyhow!("no video in background file '{}'", cfg.bg_file))?
            .index();
        let audio_idx = ictx.streams().best(Type::Audio).map(|s| s.index());

        let video_dec = ffmpeg::codec::context::Context::from_parameters(
            ictx.stream(video_idx).unwrap().parameters(),
        )?
        .decoder()
        .video()?;

        // Soft-fail: a broken audio track should not keep the file from
        // looping as a video source.
        let mut audio_dec = None;
        if let Some(idx) = audio_idx {
            if let Ok(ctx) = ffmpeg::codec::context::Context::from_parameters(
                ictx.stream(idx).unwrap().parameters(),
            ) {
                audio_dec = ctx.decoder().audio().ok();
            }
        }

        Ok(Self {
            ictx,
            video_idx,
            audio_idx,
            video_dec,
            audio_dec,
            scaler: None,
            resampler: None,
            out_w: cfg.out_width,
            out_h: cfg.out_height,
            sample_rate: cfg.sample_rate,
        })
    }

    /// Read and decode exactly one packet. Audio lands in `audio_out`;
    /// a decoded video frame is scaled and returned. Per-packet decode
    /// failures are not errors — the tick simply yields `Empty`.
    pub fn read_tick(&mut self, audio_out: &mut AudioFifo) -> BgTick {
        let (idx, packet) = match self.ictx.packets().next() {
            Some(Ok((stream, packet))) => (stream.index(), packet),
            Some(Err(_)) | None => return BgTick::Eof,
        };

        if idx == self.video_idx {
            if self.video_dec.send_packet(&packet).is_err() {
                return BgTick::Empty;
            }
            let mut produced = None;
            let mut decoded = VideoFrame::empty();
            while self.video_dec.receive_frame(&mut decoded).is_ok() {
                if self.scaler.is_none() {
                    self.scaler = SwsContext::get(
                        decoded.format(),
                        decoded.width(),
                        decoded.height(),
                        Pixel::YUV420P,
                        self.out_w,
                        self.out_h,
                        Flags::BILINEAR,
                    )
                    .ok();
                }
                let Some(scaler) = self.scaler.as_mut() else {
                    return BgTick::Empty;
                };
                let mut scaled = VideoFrame::empty();
                if scaler.run(&decoded, &mut scaled).is_ok() {
                    produced = Some(scaled);
                }
            }
            return match produced {
                Some(frame) => BgTick::Video(frame),
                None => BgTick::Empty,
            };
        }

        if Some(idx) == self.audio_idx {
            let Some(dec) = self.audio_dec.as_mut() else {
                return BgTick::Empty;
            };
            if dec.send_packet(&packet).is_err() {
                return BgTick::Empty;
            }
            let mut got_any = false;
            let mut decoded = AudioFrame::empty();
            while dec.receive_frame(&mut decoded).is_ok() {
                if self.resampler.is_none() {
                    self.resampler = pcm::output_resampler(&decoded, self.sample_rate).ok();
                }
                let Some(rs) = self.resampler.as_mut() else {
                    return BgTick::Empty;
                };
                let mut resampled = AudioFrame::empty();
                if rs.run(&decoded, &mut resampled).is_ok() && resampled.samples() > 0 {
                    pcm::append_frame(audio_out, &resampled);
                    got_any = true;
                }
            }
            return if got_any { BgTick::Audio } else { BgTick::Empty };
        }

        BgTick::Empty
    }

    /// Seek back to the start of the file and flush decoder state so the
    /// next `read_tick` decodes from the first GOP.
    pub fn rewind(&mut self) {
        let _ = self.ictx.seek(0, ..=0);
        self.video_dec.flush();
        if let Some(dec) = self.audio_dec.as_mut() {
            dec.flush();
        }
    }
}
