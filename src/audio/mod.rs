//! audio - ALSA playback for decoded speech
//!
//! A dedicated playback thread owns the PCM device for the whole session.
//! Clips arrive as normalized float buffers and are resampled / channel
//! converted with SpeexDSP when the negotiated device format differs.

mod alsa_device;
mod audio_system;
mod play;
mod speex;

pub use audio_system::{AudioConfig, AudioSystem, PlaybackError, PlaybackHandle};
pub use play::{convert_channels, AlsaPlayback, PlaybackDriver};
