// crates/steadycast-media/src/helpers/yuv.rs
//
// YUV420P plane copies between strided AVFrames and packed byte buffers.
//
// The packed layout is the slot's wire format between the two threads:
//   [0 .. w*h]                       — Y plane, packed (no stride)
//   [w*h .. w*h + uv_w*uv_h]         — U plane, packed
//   [w*h + uv_w*uv_h .. end]         — V plane, packed
// where uv_w = w/2 and uv_h = h/2. "Packed" means strides are removed —
// each row is exactly w (or uv_w) bytes. FFmpeg frame rows may carry
// alignment padding; extract_into strips it, write_packed restores it.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::util::frame::video::Video as VideoFrame;

/// Strip strides from a scaled YUV420P frame into `out`.
///
/// `out` must be exactly `packed_len(w, h)` bytes; the frame must already
/// be YUV420P at `w` × `h` — scale first.
pub fn extract_into(frame: &VideoFrame, w: usize, h: usize, out: &mut [u8]) {
    let (uv_w, uv_h) = (w / 2, h / 2);
    debug_assert_eq!(out.len(), w * h + 2 * uv_w * uv_h);

    let y_stride = frame.stride(0);
    let y_src = frame.data(0);
    for row in 0..h {
        out[row * w..row * w + w].copy_from_slice(&y_src[row * y_stride..row * y_stride + w]);
    }

    let u_offset = w * h;
    let u_stride = frame.stride(1);
    let u_src = frame.data(1);
    for row in 0..uv_h {
        let dst = u_offset + row * uv_w;
        out[dst..dst + uv_w].copy_from_slice(&u_src[row * u_stride..row * u_stride + uv_w]);
    }

    let v_offset = u_offset + uv_w * uv_h;
    let v_stride = frame.stride(2);
    let v_src = frame.data(2);
    for row in 0..uv_h {
        let dst = v_offset + row * uv_w;
        out[dst..dst + uv_w].copy_from_slice(&v_src[row * v_stride..row * v_stride + uv_w]);
    }
}

/// Write a packed YUV420P buffer into a frame's planes, respecting stride.
///
/// The inverse of `extract_into`. The destination is made writable first —
/// the encoder may still hold a reference to its buffer from the previous
/// tick's send.
pub fn write_packed(packed: &[u8], frame: &mut VideoFrame, w: usize, h: usize) {
    make_writable(frame);
    let (uv_w, uv_h) = (w / 2, h / 2);

    let y_stride = frame.stride(0);
    let y_dst = frame.data_mut(0);
    for row in 0..h {
        y_dst[row * y_stride..row * y_stride + w].copy_from_slice(&packed[row * w..row * w + w]);
    }

    let u_offset = w * h;
    let u_stride = frame.stride(1);
    let u_dst = frame.data_mut(1);
    for row in 0..uv_h {
        let src = u_offset + row * uv_w;
        u_dst[row * u_stride..row * u_stride + uv_w].copy_from_slice(&packed[src..src + uv_w]);
    }

    let v_offset = u_offset + uv_w * uv_h;
    let v_stride = frame.stride(2);
    let v_dst = frame.data_mut(2);
    for row in 0..uv_h {
        let src = v_offset + row * uv_w;
        v_dst[row * v_stride..row * v_stride + uv_w].copy_from_slice(&packed[src..src + uv_w]);
    }
}

/// Strided plane-to-plane copy between two YUV420P frames of the same
/// visible size (source and destination strides may differ).
pub fn copy_planes(src: &VideoFrame, dst: &mut VideoFrame, w: usize, h: usize) {
    make_writable(dst);
    let (uv_w, uv_h) = (w / 2, h / 2);
    for (plane, (pw, ph)) in [(w, h), (uv_w, uv_h), (uv_w, uv_h)].into_iter().enumerate() {
        let s_stride = src.stride(plane);
        let d_stride = dst.stride(plane);
        let s = src.data(plane);
        let d = dst.data_mut(plane);
        for row in 0..ph {
            d[row * d_stride..row * d_stride + pw]
                .copy_from_slice(&s[row * s_stride..row * s_stride + pw]);
        }
    }
}

/// No safe wrapper exists for av_frame_make_writable; without it an
/// in-place overwrite would mutate a buffer the encoder still references.
fn make_writable(frame: &mut VideoFrame) {
    unsafe {
        ffmpeg::ffi::av_frame_make_writable(frame.as_mut_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::Pixel;

    fn numbered_frame(w: u32, h: u32) -> VideoFrame {
        let mut f = VideoFrame::new(Pixel::YUV420P, w, h);
        let mut v = 0u8;
        for plane in 0..3 {
            let (pw, ph) = if plane == 0 {
                (w as usize, h as usize)
            } else {
                (w as usize / 2, h as usize / 2)
            };
            let stride = f.stride(plane);
            let data = f.data_mut(plane);
            for row in 0..ph {
                for col in 0..pw {
                    data[row * stride + col] = v;
                    v = v.wrapping_add(1);
                }
            }
        }
        f
    }

    #[test]
    fn extract_then_write_roundtrips() {
        ffmpeg::init().unwrap();
        let src = numbered_frame(8, 4);
        let mut packed = vec![0u8; 8 * 4 + 2 * (4 * 2)];
        extract_into(&src, 8, 4, &mut packed);
        // First Y row is 0..8 regardless of stride.
        assert_eq!(&packed[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);

        let mut dst = VideoFrame::new(Pixel::YUV420P, 8, 4);
        write_packed(&packed, &mut dst, 8, 4);
        let mut packed2 = vec![0u8; packed.len()];
        extract_into(&dst, 8, 4, &mut packed2);
        assert_eq!(packed, packed2);
    }

    #[test]
    fn copy_planes_preserves_visible_pixels() {
        ffmpeg::init().unwrap();
        let src = numbered_frame(8, 4);
        let mut dst = VideoFrame::new(Pixel::YUV420P, 8, 4);
        copy_planes(&src, &mut dst, 8, 4);
        let mut a = vec![0u8; 8 * 4 + 2 * (4 * 2)];
        let mut b = vec![0u8; a.len()];
        extract_into(&src, 8, 4, &mut a);
        extract_into(&dst, 8, 4, &mut b);
        assert_eq!(a, b);
    }
}
