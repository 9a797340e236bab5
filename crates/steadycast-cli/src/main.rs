// crates/steadycast-cli/src/main.rs
//
// The steadycast binary: wire up signals, open the background and the
// output, spawn the inbound reader, and hand the initial thread to the
// pacing loop. Exit code 0 on clean shutdown, 1 on any startup failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use serde_json::json;

use ffmpeg_the_third as ffmpeg;

use steadycast_core::config::Config;
use steadycast_core::slot::SharedSlot;
use steadycast_core::status::StatusLog;
use steadycast_media::{BackgroundSource, Compositor, InboundReader, OutputMuxer};

/// Composites an unreliable inbound feed over a looping background file
/// and writes a continuous H.264+AAC FLV stream to stdout.
#[derive(Parser)]
#[command(name = "steadycast")]
struct Cli {
    /// JSON configuration file. When given, legacy positionals are ignored.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Inbound URL (legacy positional form).
    srt_url: Option<String>,
    /// Background loop file (legacy positional form).
    bg_file: Option<String>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let cfg = match resolve_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            StatusLog::new("").emit_fields("error", &[("message", json!(e.to_string()))]);
            return 1;
        }
    };
    if cfg.srt_url.is_empty() {
        eprintln!("Usage: steadycast --config <config.json>");
        eprintln!("   or: steadycast <srt_url> [background.mp4]  (legacy)");
        return 1;
    }

    let log = StatusLog::new(cfg.stream_id.clone());

    // A dying downstream consumer must surface as a write error from the
    // muxer, not as signal-driven termination.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed)).is_err() {
            log.emit_fields("error", &[("message", json!("cannot install signal handler"))]);
            return 1;
        }
    }

    log.emit("started");

    if let Err(e) = ffmpeg::init() {
        log.emit_fields("error", &[("message", json!(format!("ffmpeg init failed: {e}")))]);
        return 1;
    }
    ffmpeg::format::network::init();

    let slot = Arc::new(SharedSlot::new(
        cfg.out_width as usize,
        cfg.out_height as usize,
        2 * cfg.sample_rate as usize,
    ));

    let background = match BackgroundSource::open(&cfg) {
        Ok(background) => {
            log.emit("bg_opened");
            background
        }
        Err(e) => {
            log.emit_fields("error", &[("message", json!(format!("background open failed: {e}")))]);
            return 1;
        }
    };

    let muxer = match OutputMuxer::open(&cfg) {
        Ok(muxer) => muxer,
        Err(e) => {
            log.emit_fields("error", &[("message", json!(format!("output open failed: {e}")))]);
            return 1;
        }
    };
    log.emit_fields(
        "output_ready",
        &[
            ("resolution", json!(format!("{}x{}", cfg.out_width, cfg.out_height))),
            ("fps", json!(cfg.out_fps)),
            ("vbr", json!(cfg.video_bitrate)),
            ("abr", json!(cfg.audio_bitrate)),
        ],
    );

    let reader = InboundReader::new(
        cfg.clone(),
        Arc::clone(&slot),
        Arc::clone(&shutdown),
        log.clone(),
    );
    let reader_thread = match thread::Builder::new()
        .name("inbound-reader".into())
        .spawn(move || reader.run())
    {
        Ok(handle) => handle,
        Err(_) => {
            log.emit_fields("error", &[("message", json!("reader thread create failed"))]);
            return 1;
        }
    };

    let mut compositor = Compositor::new(cfg, slot, Arc::clone(&shutdown), log.clone(), background, muxer);
    compositor.run();

    // run() only returns once the shutdown flag is set; make that explicit
    // for the reader before joining it.
    shutdown.store(true, Ordering::Relaxed);
    let _ = reader_thread.join();
    compositor.finish();

    log.emit("done");
    0
}

/// A config file, when present, wins wholesale over the legacy positional
/// arguments — matching how a supervisor-provided file is expected to be
/// authoritative.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    if let Some(path) = &cli.config {
        return Config::load(path);
    }
    let mut cfg = Config::default();
    if let Some(url) = &cli.srt_url {
        cfg.srt_url = url.clone();
    }
    if let Some(bg) = &cli.bg_file {
        cfg.bg_file = bg.clone();
    }
    Ok(cfg)
}
