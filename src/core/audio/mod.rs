//! Audio helpers: file-backed devices for running sessions without a sound
//! card and the PCMU codec used on peer media tracks.

pub mod g711;
mod wav;

pub use wav::{WavFileInput, WavFileOutput, WavMicrophone, chunk_len};
