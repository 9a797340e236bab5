// crates/steadycast-media/src/output.rs
//
// FLV muxer on the stdout pipe: one H.264 video track, one AAC audio track.
//
// Stream layout:
//   Stream 0 — H.264 video (YUV420P, ultrafast/zerolatency, main profile,
//              no B-frames, GOP = 2 × fps)
//   Stream 1 — AAC audio (FLTP stereo at the configured rate)
//
// PTS strategy:
//   Video: monotonically increasing frame counter in 1/fps.
//   Audio: monotonically increasing sample counter in 1/sample_rate.
//   Both start at zero and are never rewritten from inbound timestamps.
//   The output clock is synthesized, so inbound gaps and reconnects leave
//   no discontinuities in the container.
//
// Packet writes are best-effort: a dying downstream consumer shows up as a
// write error (SIGPIPE is ignored in main), and the loop keeps ticking
// until it is told to stop.

use anyhow::{anyhow, Context as _, Result};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use steadycast_core::audio_fifo::AudioFifo;
use steadycast_core::config::Config;

pub struct OutputMuxer {
    octx: ffmpeg::format::context::Output,
    video_enc: ffmpeg::encoder::video::Video,
    audio_enc: ffmpeg::encoder::Audio,
    /// Encoder timebases (1/fps and 1/sample_rate).
    video_tb: Rational,
    audio_tb: Rational,
    /// Muxer-assigned stream timebases, read back after the header write.
    ost_video_tb: Rational,
    ost_audio_tb: Rational,
    video_pts: i64,
    audio_pts: i64,
    /// AAC input frame size in samples (1024 unless the encoder says
    /// otherwise).
    audio_frame_size: usize,
    sample_rate: u32,
}

impl OutputMuxer {
    pub fn open(cfg: &Config) -> Result<Self> {
        let mut octx = ffmpeg::format::output_as("pipe:1", "flv")
            .context("cannot open FLV output on stdout")?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        // ── Video encoder (stream 0) ──────────────────────────────────────
        let video_tb = Rational::new(1, cfg.out_fps as i32);

        let h264 = encoder::find(CodecId::H264)
            .ok_or_else(|| anyhow!("H.264 encoder not found — is libx264 available?"))?;
        {
            let mut ost = octx.add_stream(h264).context("add video stream")?;
            ost.set_time_base(video_tb);
        }

        let mut video = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()
            .context("create video encoder context")?;
        video.set_width(cfg.out_width);
        video.set_height(cfg.out_height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(video_tb);
        video.set_frame_rate(Some(Rational::new(cfg.out_fps as i32, 1)));
        video.set_bit_rate(cfg.video_bitrate);
        video.set_gop(cfg.out_fps * 2);
        video.set_max_b_frames(0);
        if global_header {
            video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }
        unsafe {
            (*video.as_mut_ptr()).thread_count = 4;
        }

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");
        opts.set("profile", "main");
        let video_enc = video.open_as_with(h264, opts).context("open H.264 encoder")?;

        // Copy encoder params into the stream's codecpar so the muxer has
        // resolution, format, and codec-private data. No safe setter takes
        // an encoder context, so this goes through FFI.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
                video_enc.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(anyhow!("avcodec_parameters_from_context (video) failed: {ret}"));
            }
        }

        // ── Audio encoder (stream 1) ──────────────────────────────────────
        let audio_tb = Rational::new(1, cfg.sample_rate as i32);

        let aac = encoder::find(CodecId::AAC).ok_or_else(|| anyhow!("AAC encoder not found"))?;
        {
            let mut ost = octx.add_stream(aac).context("add audio stream")?;
            ost.set_time_base(audio_tb);
        }

        let mut audio = codec::context::Context::new_with_codec(aac)
            .encoder()
            .audio()
            .context("create audio encoder context")?;
        audio.set_rate(cfg.sample_rate as i32);
        audio.set_ch_layout(ChannelLayout::STEREO);
        audio.set_format(Sample::F32(SampleType::Planar));
        audio.set_bit_rate(cfg.audio_bitrate);
        audio.set_time_base(audio_tb);
        if global_header {
            audio.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let audio_enc = audio
            .open_as_with(aac, ffmpeg::Dictionary::new())
            .context("open AAC encoder")?;

        let reported = audio_enc.frame_size();
        let audio_frame_size = if reported > 0 { reported as usize } else { 1024 };

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
                audio_enc.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(anyhow!("avcodec_parameters_from_context (audio) failed: {ret}"));
            }
        }

        octx.write_header().context("write FLV header")?;

        // The muxer may pick its own stream timebases (FLV uses 1/1000);
        // read them back for packet rescaling.
        let ost_video_tb = octx.stream(0).unwrap().time_base();
        let ost_audio_tb = octx.stream(1).unwrap().time_base();

        Ok(Self {
            octx,
            video_enc,
            audio_enc,
            video_tb,
            audio_tb,
            ost_video_tb,
            ost_audio_tb,
            video_pts: 0,
            audio_pts: 0,
            audio_frame_size,
            sample_rate: cfg.sample_rate,
        })
    }

    /// Frames emitted so far; also the PTS the next frame will carry.
    pub fn video_pts(&self) -> i64 {
        self.video_pts
    }

    /// Samples emitted so far; also the PTS the next audio frame will carry.
    pub fn audio_pts(&self) -> i64 {
        self.audio_pts
    }

    pub fn audio_frame_size(&self) -> usize {
        self.audio_frame_size
    }

    /// Encode one video frame at the next output PTS and write every ready
    /// packet.
    pub fn encode_video(&mut self, frame: &mut VideoFrame) {
        frame.set_pts(Some(self.video_pts));
        frame.set_kind(ffmpeg::picture::Type::None);
        self.video_pts += 1;
        if self.video_enc.send_frame(frame).is_ok() {
            self.drain_video();
        }
    }

    /// Encode one fixed-size audio frame from `source`. If the queue holds
    /// a full frame those samples are used; otherwise the frame is
    /// zero-filled and whatever samples are available overlay its start.
    /// An empty queue therefore encodes pure silence.
    pub fn encode_audio_frame(&mut self, source: &mut AudioFifo) {
        let n = self.audio_frame_size;
        let mut frame =
            AudioFrame::new(Sample::F32(SampleType::Planar), n, ChannelLayoutMask::STEREO);
        frame.set_rate(self.sample_rate);

        unsafe {
            let ldata = frame.data_mut(0);
            let left = std::slice::from_raw_parts_mut(ldata.as_mut_ptr() as *mut f32, n);
            let rdata = frame.data_mut(1);
            let right = std::slice::from_raw_parts_mut(rdata.as_mut_ptr() as *mut f32, n);
            let copied = source.pop_into(left, right);
            left[copied..].fill(0.0);
            right[copied..].fill(0.0);
        }

        frame.set_pts(Some(self.audio_pts));
        self.audio_pts += n as i64;
        if self.audio_enc.send_frame(&frame).is_ok() {
            self.drain_audio();
        }
    }

    /// Flush both encoders and write the container trailer. Call once at
    /// shutdown; the muxer is unusable afterwards.
    pub fn finish(&mut self) {
        let _ = self.video_enc.send_eof();
        self.drain_video();
        let _ = self.audio_enc.send_eof();
        self.drain_audio();
        let _ = self.octx.write_trailer();
    }

    fn drain_video(&mut self) {
        let mut pkt = Packet::empty();
        while self.video_enc.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(self.video_tb, self.ost_video_tb);
            let _ = pkt.write_interleaved(&mut self.octx);
        }
    }

    fn drain_audio(&mut self) {
        let mut pkt = Packet::empty();
        while self.audio_enc.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(self.audio_tb, self.ost_audio_tb);
            let _ = pkt.write_interleaved(&mut self.octx);
        }
    }
}
