//! Speak a typed number through a remote TTS service and play the result.

pub mod audio;
pub mod codec;
pub mod config;
pub mod keypad;
pub mod pipeline;
pub mod speech;
