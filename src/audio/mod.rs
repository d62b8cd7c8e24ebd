//! Audio input and WAV framing.

pub mod source;
pub mod wav;

pub use source::{AudioSource, MemorySource, WavFileSource};
