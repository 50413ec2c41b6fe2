//! Safe wrapper around the SpeexDSP resampler.

use std::ffi::c_int;

// ======================== FFI declarations ========================

/// Opaque type for SpeexResamplerState
#[repr(C)]
pub struct SpeexResamplerState {
    _private: [u8; 0],
}

const SPEEX_RESAMPLER_QUALITY_DEFAULT: c_int = 4;
const RESAMPLER_ERR_SUCCESS: c_int = 0;

unsafe extern "C" {
    fn speex_resampler_init(
        nb_channels: u32,
        in_rate: u32,
        out_rate: u32,
        quality: c_int,
        err: *mut c_int,
    ) -> *mut SpeexResamplerState;
    fn speex_resampler_destroy(st: *mut SpeexResamplerState);
    fn speex_resampler_process_interleaved_float(
        st: *mut SpeexResamplerState,
        in_: *const f32,
        in_len: *mut u32,
        out: *mut f32,
        out_len: *mut u32,
    ) -> c_int;
    fn speex_resampler_get_input_latency(st: *mut SpeexResamplerState) -> c_int;
    fn speex_resampler_get_output_latency(st: *mut SpeexResamplerState) -> c_int;
}

// ======================== Resampler ========================

/// Safe wrapper around SpeexResamplerState.
pub struct Resampler {
    state: *mut SpeexResamplerState,
    channels: u32,
    in_rate: u32,
    out_rate: u32,
}

// SpeexResamplerState is only touched from the playback thread
unsafe impl Send for Resampler {}

impl Resampler {
    /// Create a new resampler.
    ///
    /// * `channels` - Number of interleaved channels
    /// * `in_rate`  - Input sample rate
    /// * `out_rate` - Output sample rate
    pub fn new(channels: u32, in_rate: u32, out_rate: u32) -> anyhow::Result<Self> {
        let mut err: c_int = 0;
        let state = unsafe {
            speex_resampler_init(
                channels,
                in_rate,
                out_rate,
                SPEEX_RESAMPLER_QUALITY_DEFAULT,
                &mut err,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS || state.is_null() {
            anyhow::bail!("Failed to initialize speex resampler: err={}", err);
        }
        Ok(Self {
            state,
            channels,
            in_rate,
            out_rate,
        })
    }

    /// Resample a whole interleaved float clip, including the filter tail.
    pub fn process_clip(&mut self, input: &[f32]) -> anyhow::Result<Vec<f32>> {
        let channels = self.channels as usize;
        let in_frames = input.len() / channels;
        let input_latency = unsafe { speex_resampler_get_input_latency(self.state) }.max(0) as usize;
        let output_latency = unsafe { speex_resampler_get_output_latency(self.state) }.max(0) as usize;
        let window = ClipWindow::new(in_frames, self.in_rate, self.out_rate, input_latency, output_latency);

        // Flush the filter delay with silence so the clip end is not cut off
        let mut padded = input[..in_frames * channels].to_vec();
        padded.resize(window.padded_frames * channels, 0.0);

        let mut output = vec![0.0f32; window.output_capacity() * channels];
        let (_consumed, produced) = self.process_interleaved(&padded, &mut output)?;

        let (start, end) = window.keep(produced as usize);
        Ok(output[start * channels..end * channels].to_vec())
    }

    /// Returns `(input_frames_consumed, output_frames_produced)`.
    fn process_interleaved(&mut self, input: &[f32], output: &mut [f32]) -> anyhow::Result<(u32, u32)> {
        let mut in_len = (input.len() / self.channels as usize) as u32;
        let mut out_len = (output.len() / self.channels as usize) as u32;
        let err = unsafe {
            speex_resampler_process_interleaved_float(
                self.state,
                input.as_ptr(),
                &mut in_len,
                output.as_mut_ptr(),
                &mut out_len,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS {
            anyhow::bail!("Speex resampler error: {}", err);
        }
        Ok((in_len, out_len))
    }
}

/// Frame bookkeeping for resampling one clip in a single call.
///
/// Input is padded by the input-side latency (in input frames); the first
/// `output_latency` output frames are the filter delay and are dropped.
#[derive(Debug, PartialEq, Eq)]
struct ClipWindow {
    padded_frames: usize,
    expected_frames: usize,
    output_latency: usize,
}

impl ClipWindow {
    fn new(
        in_frames: usize,
        in_rate: u32,
        out_rate: u32,
        input_latency: usize,
        output_latency: usize,
    ) -> Self {
        let expected_frames = (in_frames as f64 * out_rate as f64 / in_rate as f64).ceil() as usize;
        Self {
            // +1 covers the fractional phase rounding
            padded_frames: in_frames + input_latency + 1,
            expected_frames,
            output_latency,
        }
    }

    fn output_capacity(&self) -> usize {
        self.expected_frames + self.output_latency + 64
    }

    /// Range of produced frames that belongs to the clip.
    fn keep(&self, produced: usize) -> (usize, usize) {
        let start = self.output_latency.min(produced);
        let end = (start + self.expected_frames).min(produced);
        (start, end)
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        unsafe {
            speex_resampler_destroy(self.state);
        }
    }
}
