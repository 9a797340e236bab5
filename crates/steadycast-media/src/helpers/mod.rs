// crates/steadycast-media/src/helpers/mod.rs

pub mod pcm;
pub mod yuv;
