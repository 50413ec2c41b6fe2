//! ALSA PCM device wrapper for playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × 4 bytes)
    pub period_size: usize,
}

/// Open a PCM device for interleaved 32-bit float playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::FloatLE)
            .with_context(|| format!("Device '{}' rejected FLOAT_LE", device))?;
        hwp.set_channels(channels)
            .with_context(|| format!("Device '{}' rejected {} channel(s)", device, channels))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}
