// crates/steadycast-media/src/helpers/pcm.rs
//
// Planar-float audio plumbing shared by the inbound reader and the
// background source: pull f32 planes out of a decoded/resampled frame and
// build the resampler that targets the output format.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio as AudioFrame;

use steadycast_core::audio_fifo::AudioFifo;

/// Borrow the left/right sample planes of an FLTP frame.
///
/// The frame must be in FLTP format. Mono frames yield the same plane
/// twice so the caller always gets proper stereo.
pub fn planes(frame: &AudioFrame) -> (&[f32], &[f32]) {
    let n = frame.samples();
    unsafe {
        let left_bytes = frame.data(0);
        let left = std::slice::from_raw_parts(left_bytes.as_ptr() as *const f32, n);
        let right_bytes = if frame.ch_layout().channels() >= 2 {
            frame.data(1)
        } else {
            frame.data(0)
        };
        let right = std::slice::from_raw_parts(right_bytes.as_ptr() as *const f32, n);
        (left, right)
    }
}

/// Append one FLTP frame's samples to a FIFO.
pub fn append_frame(fifo: &mut AudioFifo, frame: &AudioFrame) {
    if frame.samples() == 0 {
        return;
    }
    let (left, right) = planes(frame);
    fifo.push(left, right);
}

/// Build the resampler from `frame`'s actual format to FLTP stereo at
/// `out_rate`. Created lazily on the first decoded frame of a session so
/// the real input format is known.
///
/// Sources with no declared channel layout are treated as stereo; mono
/// must be declared as MONO or swr misinterprets the layout.
pub fn output_resampler(
    frame: &AudioFrame,
    out_rate: u32,
) -> Result<resampling::Context, ffmpeg::Error> {
    let channels = frame.ch_layout().channels();
    let src_layout = if channels == 0 {
        ChannelLayout::STEREO
    } else if channels == 1 {
        ChannelLayout::MONO
    } else {
        frame.ch_layout()
    };
    resampling::Context::get2(
        frame.format(),
        src_layout,
        frame.rate(),
        Sample::F32(SampleType::Planar),
        ChannelLayout::STEREO,
        out_rate,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::util::channel_layout::ChannelLayoutMask;

    fn fltp_frame(n: usize) -> AudioFrame {
        let mut f = AudioFrame::new(Sample::F32(SampleType::Planar), n, ChannelLayoutMask::STEREO);
        f.set_rate(48_000);
        unsafe {
            let l = std::slice::from_raw_parts_mut(f.data_mut(0).as_mut_ptr() as *mut f32, n);
            l.iter_mut().enumerate().for_each(|(i, s)| *s = i as f32);
            let r = std::slice::from_raw_parts_mut(f.data_mut(1).as_mut_ptr() as *mut f32, n);
            r.iter_mut().for_each(|s| *s = -1.0);
        }
        f
    }

    #[test]
    fn append_frame_pushes_both_planes() {
        ffmpeg::init().unwrap();
        let frame = fltp_frame(16);
        let mut fifo = AudioFifo::with_capacity(64);
        append_frame(&mut fifo, &frame);
        assert_eq!(fifo.len(), 16);
        let mut l = [0.0f32; 16];
        let mut r = [0.0f32; 16];
        fifo.pop_into(&mut l, &mut r);
        assert_eq!(l[3], 3.0);
        assert!(r.iter().all(|&s| s == -1.0));
    }
}
