use alsa::pcm::PCM;
use anyhow::Result;

use super::alsa_device::{self, AlsaParams};
use super::audio_system::AudioConfig;
use super::speex::Resampler;
use crate::codec::DecodedAudioBuffer;

/// Consecutive failed writes tolerated before the rest of a clip is dropped.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Something that can render decoded audio to an output.
///
/// Implementations own their device and run on the playback thread.
pub trait PlaybackDriver: Send {
    fn render(&mut self, buffer: &DecodedAudioBuffer) -> Result<()>;
}

/// Playback through an ALSA PCM device opened once per session.
pub struct AlsaPlayback {
    pcm: PCM,
    params: AlsaParams,
}

impl AlsaPlayback {
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let period_size_opt = if config.playback_period_size > 0 {
            Some(config.playback_period_size)
        } else {
            None
        };
        let (pcm, params) = alsa_device::open_playback(
            &config.playback_device,
            config.playback_sample_rate,
            config.playback_channels,
            period_size_opt,
        )?;
        Ok(Self { pcm, params })
    }

    /// Bring a clip to the negotiated device rate and channel count.
    fn prepare_samples(&self, buffer: &DecodedAudioBuffer) -> Result<Vec<f32>> {
        let src_channels = buffer.channel_count() as u32;
        let interleaved = buffer.interleaved();

        let resampled = if buffer.sample_rate() != self.params.sample_rate {
            log::debug!(
                "Resampling {} Hz -> {} Hz",
                buffer.sample_rate(),
                self.params.sample_rate
            );
            let mut resampler =
                Resampler::new(src_channels, buffer.sample_rate(), self.params.sample_rate)?;
            resampler.process_clip(&interleaved)?
        } else {
            interleaved
        };

        Ok(convert_channels(&resampled, src_channels, self.params.channels))
    }

    fn write_all(&self, samples: &[f32]) -> Result<()> {
        let writer = AlsaWriter {
            pcm: &self.pcm,
            io: self.pcm.io_f32()?,
        };
        write_frames(
            &writer,
            samples,
            self.params.channels as usize,
            self.params.period_size,
        )
    }
}

/// The two device calls the write loop needs.
trait PcmWriter {
    /// Write interleaved samples, returning frames accepted.
    fn writei(&self, samples: &[f32]) -> Result<usize>;
    /// Recover from an XRUN or other write failure.
    fn recover(&self) -> Result<()>;
}

struct AlsaWriter<'a> {
    pcm: &'a PCM,
    io: alsa::pcm::IO<'a, f32>,
}

impl PcmWriter for AlsaWriter<'_> {
    fn writei(&self, samples: &[f32]) -> Result<usize> {
        Ok(self.io.writei(samples)?)
    }

    fn recover(&self) -> Result<()> {
        Ok(self.pcm.prepare()?)
    }
}

/// Write a whole clip, retrying short writes and recovering from XRUNs.
///
/// Each `writei` gets at most one period (`period_frames`, 0 = unbounded).
/// Fails once `MAX_RECOVERY_RETRIES` consecutive writes fail, so a clip
/// that was cut short is never reported as played.
fn write_frames(
    writer: &dyn PcmWriter,
    samples: &[f32],
    channels: usize,
    period_frames: usize,
) -> Result<()> {
    let total_frames = samples.len() / channels;
    let chunk_frames = if period_frames > 0 { period_frames } else { total_frames };
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        let end = (frames_written + chunk_frames).min(total_frames) * channels;
        match writer.writei(&samples[offset..end]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;

                // 触发 ALSA 硬件恢复状态机
                if let Err(e2) = writer.recover() {
                    anyhow::bail!("Failed to recover PCM playback: {}", e2);
                }

                // 熔断器：底层持续跟不上写入速度时，放弃剩余帧并上报
                if retry_count >= MAX_RECOVERY_RETRIES {
                    anyhow::bail!(
                        "Max recovery retries ({}) reached, dropped {} of {} frames: {}",
                        retry_count,
                        total_frames - frames_written,
                        total_frames,
                        e
                    );
                }
            }
        }
    }
    Ok(())
}

impl PlaybackDriver for AlsaPlayback {
    fn render(&mut self, buffer: &DecodedAudioBuffer) -> Result<()> {
        if buffer.is_empty() {
            log::info!("Nothing to play: empty audio buffer");
            return Ok(());
        }
        log::debug!(
            "Rendering at {} Hz, {} ch, period {} frames",
            self.params.sample_rate,
            self.params.channels,
            self.params.period_size
        );
        let samples = self.prepare_samples(buffer)?;
        self.write_all(&samples)?;
        // 等待本段音频播完再接收下一段
        self.pcm.drain()?;
        // drain 之后设备进入 SETUP 状态，需要 prepare 才能继续写
        self.pcm.prepare()?;
        log::info!(
            "Played {} frames ({:.2}s)",
            buffer.frame_count(),
            buffer.duration_secs()
        );
        Ok(())
    }
}

/// Convert interleaved samples from `input_channels` to `output_channels`.
///
/// Downmix to mono averages; any other mismatch wraps source channels
/// (mono → stereo duplicates).
pub fn convert_channels(samples: &[f32], input_channels: u32, output_channels: u32) -> Vec<f32> {
    let in_ch = input_channels as usize;
    let out_ch = output_channels as usize;
    let frame_size = samples.len() / in_ch;

    if out_ch == in_ch {
        samples[..frame_size * in_ch].to_vec()
    } else if out_ch == 1 {
        let mut mono = vec![0.0f32; frame_size];
        for (i, out) in mono.iter_mut().enumerate() {
            let sum: f32 = samples[i * in_ch..(i + 1) * in_ch].iter().sum();
            *out = sum / in_ch as f32;
        }
        mono
    } else {
        let mut out = vec![0.0f32; frame_size * out_ch];
        for i in 0..frame_size {
            for c in 0..out_ch {
                out[i * out_ch + c] = samples[i * in_ch + (c % in_ch)];
            }
        }
        out
    }
}
