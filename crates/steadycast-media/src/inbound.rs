// crates/steadycast-media/src/inbound.rs
//
// The inbound reader thread. Connects to the unreliable feed, decodes and
// scales it into the shared slot, and reconnects forever. It never talks
// to the pacing loop directly: all of its output is the slot's
// connected/has_video flags, the latest frame, and the audio queue.
//
// Every blocking libavformat call (open, read) runs under an interrupt
// callback wired to the process shutdown flag, so SIGINT aborts a stalled
// connect or read promptly instead of waiting out the socket timeout.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde_json::json;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::ffi;
use ffmpeg::format::context::Input;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::{audio::Audio as AudioFrame, video::Video as VideoFrame};

use steadycast_core::config::{Config, SRT_RETRY_US, SRT_TIMEOUT_US};
use steadycast_core::slot::{packed_len, SharedSlot};
use steadycast_core::status::StatusLog;

use crate::helpers::pcm;
use crate::helpers::yuv;

/// Interrupt callback handed to libavformat: non-zero aborts the blocking
/// call in progress. `opaque` is the process shutdown flag.
unsafe extern "C" fn interrupt_cb(opaque: *mut c_void) -> c_int {
    let shutdown = &*(opaque as *const AtomicBool);
    shutdown.load(Ordering::Relaxed) as c_int
}

/// One inbound connection and the decode state tied to it. Dropping the
/// session closes the demuxer and releases both decoders, the scaler, and
/// the resampler, so every disconnect path is just `drop`.
struct Session {
    ictx: Input,
    video_idx: usize,
    audio_idx: Option<usize>,
    video_dec: ffmpeg::decoder::video::Video,
    audio_dec: Option<ffmpeg::decoder::audio::Audio>,
    /// Created on the first decoded frame, once the real input format is
    /// known; lives for the session.
    scaler: Option<SwsContext>,
    resampler: Option<resampling::Context>,
    width: u32,
    height: u32,
}

impl Session {
    /// Open the inbound URL with low-latency demux options and the
    /// interrupt callback installed before anything can block. Any
    /// failure (connect, probe, or a feed with no video stream) closes
    /// whatever was opened and reports one message for the
    /// `srt_connect_failed` event.
    fn open(url: &str, shutdown: &Arc<AtomicBool>) -> Result<Self> {
        let url_c = CString::new(url)?;

        let ictx = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                bail!("cannot allocate demuxer context");
            }
            (*ctx).interrupt_callback = ffi::AVIOInterruptCB {
                callback: Some(interrupt_cb),
                opaque: Arc::as_ptr(shutdown) as *mut c_void,
            };

            let mut opts = ffmpeg::Dictionary::new();
            opts.set("timeout", "2000000");
            opts.set("rw_timeout", "2000000");
            opts.set("analyzeduration", "500000");
            opts.set("probesize", "500000");
            opts.set("fflags", "nobuffer");
            opts.set("flags", "low_delay");
            let mut opts_ptr = opts.disown();

            let ret = ffi::avformat_open_input(&mut ctx, url_c.as_ptr(), ptr::null(), &mut opts_ptr);
            ffi::av_dict_free(&mut opts_ptr);
            if ret < 0 {
                // avformat_open_input frees the context on failure.
                bail!("cannot open inbound: {}", ffmpeg::Error::from(ret));
            }
            (*ctx).flags |= ffi::AVFMT_FLAG_NOBUFFER as c_int;

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                bail!("inbound stream probe failed: {}", ffmpeg::Error::from(ret));
            }
            Input::wrap(ctx)
        };

        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| anyhow!("inbound has no video stream"))?
            .index();
        let audio_idx = ictx.streams().best(Type::Audio).map(|s| s.index());

        let video_dec = {
            let mut ctx = ffmpeg::codec::context::Context::from_parameters(
                ictx.stream(video_idx).unwrap().parameters(),
            )?;
            set_low_delay(&mut ctx);
            ctx.decoder().video()?
        };
        let (width, height) = (video_dec.width(), video_dec.height());

        // A feed without audio is valid; a broken audio decoder only mutes
        // the SRT audio path, it never fails the session.
        let mut audio_dec = None;
        if let Some(idx) = audio_idx {
            if let Ok(mut ctx) = ffmpeg::codec::context::Context::from_parameters(
                ictx.stream(idx).unwrap().parameters(),
            ) {
                set_low_delay(&mut ctx);
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
            width,
            height,
        })
    }
}

fn set_low_delay(ctx: &mut ffmpeg::codec::context::Context) {
    unsafe {
        let p = ctx.as_mut_ptr();
        (*p).thread_count = 2;
        (*p).flags |= ffi::AV_CODEC_FLAG_LOW_DELAY as c_int;
        (*p).flags2 |= ffi::AV_CODEC_FLAG2_FAST as c_int;
    }
}

pub struct InboundReader {
    cfg: Config,
    slot: Arc<SharedSlot>,
    shutdown: Arc<AtomicBool>,
    log: StatusLog,
    /// Scratch packed-YUV buffer reused for every published frame.
    packed: Vec<u8>,
}

impl InboundReader {
    pub fn new(
        cfg: Config,
        slot: Arc<SharedSlot>,
        shutdown: Arc<AtomicBool>,
        log: StatusLog,
    ) -> Self {
        let packed = vec![0u8; packed_len(cfg.out_width as usize, cfg.out_height as usize)];
        Self { cfg, slot, shutdown, log, packed }
    }

    /// Thread entry point. Runs until the shutdown flag is set.
    pub fn run(mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            let mut session = match Session::open(&self.cfg.srt_url, &self.shutdown) {
                Ok(session) => session,
                Err(e) => {
                    self.log
                        .emit_fields("srt_connect_failed", &[("message", json!(e.to_string()))]);
                    self.backoff();
                    continue;
                }
            };

            self.slot.mark_connected();
            self.log.emit_fields(
                "srt_connected",
                &[("resolution", json!(format!("{}x{}", session.width, session.height)))],
            );

            while !self.shutdown.load(Ordering::Relaxed) {
                let (idx, packet) = match session.ictx.packets().next() {
                    Some(Ok((stream, packet))) => (stream.index(), packet),
                    Some(Err(_)) | None => {
                        self.log.emit_fields("srt_dropped", &[("reason", json!("read_error"))]);
                        break;
                    }
                };

                if idx == session.video_idx {
                    self.handle_video(&mut session, &packet);
                } else if Some(idx) == session.audio_idx {
                    self.handle_audio(&mut session, &packet);
                }

                // A connected session that stops producing decodable media
                // is as dead as a closed socket.
                if self.slot.liveness_elapsed_us() > SRT_TIMEOUT_US {
                    self.log.emit_fields("srt_dropped", &[("reason", json!("timeout"))]);
                    break;
                }
            }

            self.slot.mark_disconnected();
            drop(session);
        }
    }

    /// Decode, scale, publish. Per-packet failures yield nothing; corrupt
    /// inbound packets are routine and must not escalate.
    fn handle_video(&mut self, session: &mut Session, packet: &ffmpeg::Packet) {
        if session.video_dec.send_packet(packet).is_err() {
            return;
        }
        let mut decoded = VideoFrame::empty();
        while session.video_dec.receive_frame(&mut decoded).is_ok() {
            if session.scaler.is_none() {
                session.scaler = SwsContext::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    Pixel::YUV420P,
                    self.cfg.out_width,
                    self.cfg.out_height,
                    Flags::BILINEAR,
                )
                .ok();
            }
            let Some(scaler) = session.scaler.as_mut() else {
                return;
            };
            let mut scaled = VideoFrame::empty();
            if scaler.run(&decoded, &mut scaled).is_err() {
                continue;
            }
            yuv::extract_into(
                &scaled,
                self.cfg.out_width as usize,
                self.cfg.out_height as usize,
                &mut self.packed,
            );
            self.slot.publish_video(&self.packed);
        }
    }

    fn handle_audio(&mut self, session: &mut Session, packet: &ffmpeg::Packet) {
        let Some(dec) = session.audio_dec.as_mut() else {
            return;
        };
        if dec.send_packet(packet).is_err() {
            return;
        }
        let mut decoded = AudioFrame::empty();
        while dec.receive_frame(&mut decoded).is_ok() {
            if session.resampler.is_none() {
                session.resampler = pcm::output_resampler(&decoded, self.cfg.sample_rate).ok();
            }
            let Some(rs) = session.resampler.as_mut() else {
                return;
            };
            let mut resampled = AudioFrame::empty();
            if rs.run(&decoded, &mut resampled).is_err() || resampled.samples() == 0 {
                continue;
            }
            let (left, right) = pcm::planes(&resampled);
            self.slot.publish_audio(left, right);
        }
    }

    /// Sleep out the reconnect backoff in ten slices so shutdown latency
    /// stays at a tenth of it.
    fn backoff(&self) {
        let slice = Duration::from_micros((SRT_RETRY_US / 10) as u64);
        for _ in 0..10 {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(slice);
        }
    }
}
