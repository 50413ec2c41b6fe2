//! The AudioSystem that owns the output device on a dedicated playback thread.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O so a long
//! ALSA write never stalls the async HTTP side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use anyhow::{Context, Result};

use super::play::{AlsaPlayback, PlaybackDriver};
use crate::codec::DecodedAudioBuffer;
use crate::config::Config;

/// Clips queued ahead of the one currently playing.
const PLAYBACK_QUEUE_DEPTH: usize = 8;

/// Audio output configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub playback_device: String,
    /// Desired ALSA playback sample rate (may be negotiated by hardware)
    pub playback_sample_rate: u32,
    /// Desired ALSA playback channel count
    pub playback_channels: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_device: "default".to_string(),
            playback_sample_rate: 24000,
            playback_channels: 1,
            playback_period_size: 1024,
        }
    }
}

impl From<&Config> for AudioConfig {
    fn from(config: &Config) -> Self {
        Self {
            playback_device: config.playback_device.to_string(),
            playback_sample_rate: config.playback_sample_rate,
            playback_channels: config.playback_channels,
            playback_period_size: config.playback_period_size,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Audio system is not running")]
    Stopped,

    #[error("Playback failed: {0}")]
    Device(String),
}

struct PlaybackJob {
    buffer: DecodedAudioBuffer,
    done: oneshot::Sender<Result<(), PlaybackError>>,
}

/// Cloneable handle for queueing clips on the playback thread.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<PlaybackJob>,
}

impl PlaybackHandle {
    /// Queue a clip and wait until it has been rendered.
    pub async fn play(&self, buffer: DecodedAudioBuffer) -> Result<(), PlaybackError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(PlaybackJob { buffer, done })
            .await
            .map_err(|_| PlaybackError::Stopped)?;
        rx.await.map_err(|_| PlaybackError::Stopped)?
    }
}

/// The audio system manages playback in a dedicated OS thread.
///
/// - Playback thread: `PlaybackJob` queue → driver render → completion reply
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    play_handle: Option<JoinHandle<()>>,
    handle: Option<PlaybackHandle>,
}

impl AudioSystem {
    /// Open the configured ALSA device and start the playback thread.
    pub fn start(config: AudioConfig) -> Result<Self> {
        log::info!(
            "AudioSystem starting, playback: \"{}\", rate: {}Hz, ch: {}",
            config.playback_device,
            config.playback_sample_rate,
            config.playback_channels,
        );
        Self::start_with(move || {
            let driver = AlsaPlayback::open(&config)?;
            Ok(Box::new(driver) as Box<dyn PlaybackDriver>)
        })
    }

    /// Start the playback thread with a custom driver.
    ///
    /// The driver is built on the playback thread; a construction error is
    /// returned from here and no thread is left running.
    pub fn start_with<F>(make_driver: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn PlaybackDriver>> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<PlaybackJob>(PLAYBACK_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let play_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let driver = match make_driver() {
                        Ok(driver) => {
                            let _ = ready_tx.send(Ok(()));
                            driver
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    play_thread(driver, rx, &running);
                })?
        };

        ready_rx
            .recv()
            .context("Playback thread exited before reporting readiness")?
            .context("Failed to open playback device")?;

        Ok(Self {
            running,
            play_handle: Some(play_handle),
            handle: Some(PlaybackHandle { tx }),
        })
    }

    pub fn handle(&self) -> Option<PlaybackHandle> {
        self.handle.clone()
    }

    /// Signal the thread to stop and release the device.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.take();
        // Playback thread will exit once every PlaybackHandle is dropped.
        // We detach it here to avoid blocking.
        self.play_handle.take();
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Playback thread ========================

fn play_thread(
    mut driver: Box<dyn PlaybackDriver>,
    mut rx: mpsc::Receiver<PlaybackJob>,
    running: &AtomicBool,
) {
    log::info!("Playback thread started");

    while running.load(Ordering::Relaxed) {
        // Block until we receive a clip (or channel closes)
        match rx.blocking_recv() {
            Some(job) if !running.load(Ordering::Relaxed) => {
                let _ = job.done.send(Err(PlaybackError::Stopped));
                break;
            }
            Some(job) => {
                let result = driver.render(&job.buffer).map_err(|e| {
                    log::error!("Playback error: {:#}", e);
                    PlaybackError::Device(format!("{:#}", e))
                });
                // 调用方可能已放弃等待，忽略发送失败
                let _ = job.done.send(result);
            }
            None => {
                log::info!("Playback channel closed");
                break;
            }
        }
    }

    log::info!("Playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{interpret_pcm16, PcmFormat};
    use std::sync::Mutex;

    struct Recorder {
        played: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    }

    impl PlaybackDriver for Recorder {
        fn render(&mut self, buffer: &DecodedAudioBuffer) -> Result<()> {
            if self.fail {
                anyhow::bail!("device unplugged");
            }
            self.played.lock().unwrap().push(buffer.frame_count());
            Ok(())
        }
    }

    fn clip(frames: usize) -> DecodedAudioBuffer {
        interpret_pcm16(&vec![0u8; frames * 2], PcmFormat::new(24000, 1)).unwrap()
    }

    #[tokio::test]
    async fn test_clips_reach_driver_in_order() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder { played: played.clone(), fail: false };
        let system = AudioSystem::start_with(move || Ok(Box::new(recorder) as Box<dyn PlaybackDriver>)).unwrap();
        let handle = system.handle().unwrap();

        handle.play(clip(3)).await.unwrap();
        handle.play(clip(5)).await.unwrap();
        assert_eq!(*played.lock().unwrap(), vec![3, 5]);
    }

    #[tokio::test]
    async fn test_render_failure_is_reported_and_thread_survives() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder { played, fail: true };
        let system = AudioSystem::start_with(move || Ok(Box::new(recorder) as Box<dyn PlaybackDriver>)).unwrap();
        let handle = system.handle().unwrap();

        for _ in 0..2 {
            match handle.play(clip(1)).await {
                Err(PlaybackError::Device(msg)) => assert!(msg.contains("device unplugged")),
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_driver_open_failure_is_returned() {
        let result = AudioSystem::start_with(|| anyhow::bail!("no such device"));
        let err = result.err().expect("start should fail");
        assert!(format!("{:#}", err).contains("no such device"));
    }

    #[tokio::test]
    async fn test_handle_after_stop_reports_stopped() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder { played: played.clone(), fail: false };
        let mut system = AudioSystem::start_with(move || Ok(Box::new(recorder) as Box<dyn PlaybackDriver>)).unwrap();
        let handle = system.handle().unwrap();
        system.stop();
        assert!(system.handle().is_none());

        assert!(matches!(handle.play(clip(4)).await, Err(PlaybackError::Stopped)));
        assert!(played.lock().unwrap().is_empty());
    }
}
