//! Streaming log-mel filterbank extraction.
//!
//! 40 mel bins over 20 Hz .. 8 kHz, 25 ms Hamming windows every 10 ms at
//! 16 kHz, Kaldi-style (snip-edges, pre-emphasis 0.97, power spectrum from
//! a power-of-two padded FFT).

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::audio::SAMPLE_RATE;

pub const FBANK_DIM: usize = 40;
pub const FRAME_LENGTH: usize = 400; // 25 ms
pub const FRAME_SHIFT: usize = 160; // 10 ms
pub const LOW_FREQ: f32 = 20.0;
pub const HIGH_FREQ: f32 = SAMPLE_RATE as f32 / 2.0;
pub const PREEMPH_COEFF: f32 = 0.97;

/// Per-utterance state: raw samples not yet consumed by a full window, and
/// the last consumed sample so pre-emphasis stays seamless across calls.
#[derive(Default)]
pub struct FbankState {
    wave_buffer: Vec<f32>,
    prev_sample: Option<f32>,
}

impl FbankState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Filterbank extractor with precomputed window, mel triangles and FFT plan.
/// Immutable after construction; shared by all utterances of a session.
pub struct Fbank {
    padded_length: usize,
    window: Vec<f32>,
    mel_banks: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Fbank {
    pub fn new() -> Self {
        let padded_length = FRAME_LENGTH.next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded_length);

        Fbank {
            padded_length,
            window: hamming_window(FRAME_LENGTH),
            mel_banks: mel_filterbank(FBANK_DIM, padded_length, LOW_FREQ, HIGH_FREQ),
            fft,
        }
    }

    /// Append samples to the stream and return all newly completed frames,
    /// one row per frame. Consumes `num_frames * FRAME_SHIFT` samples; the
    /// residue stays buffered for the next call.
    pub fn process(&self, state: &mut FbankState, samples: &[f32]) -> Array2<f32> {
        state.wave_buffer.extend_from_slice(samples);

        let available = state.wave_buffer.len();
        let num_frames = if available >= FRAME_LENGTH {
            1 + (available - FRAME_LENGTH) / FRAME_SHIFT
        } else {
            0
        };

        let mut features = Array2::zeros((num_frames, FBANK_DIM));
        for f in 0..num_frames {
            let start = f * FRAME_SHIFT;
            let row = self.compute_frame(&state.wave_buffer, start, state.prev_sample);
            features.row_mut(f).assign(&row);
        }

        let consumed = num_frames * FRAME_SHIFT;
        if consumed > 0 {
            state.prev_sample = Some(state.wave_buffer[consumed - 1]);
        }
        state.wave_buffer.drain(..consumed);
        features
    }

    fn compute_frame(&self, wave: &[f32], start: usize, prev_sample: Option<f32>) -> Array1<f32> {
        let mut frame = wave[start..start + FRAME_LENGTH].to_vec();

        // Pre-emphasis; the sample before the window is the "previous" for
        // the first element, except at the very start of the stream.
        let first_prev = if start > 0 {
            wave[start - 1]
        } else {
            prev_sample.unwrap_or(frame[0])
        };
        for j in (1..FRAME_LENGTH).rev() {
            frame[j] -= PREEMPH_COEFF * frame[j - 1];
        }
        frame[0] -= PREEMPH_COEFF * first_prev;

        for (x, w) in frame.iter_mut().zip(&self.window) {
            *x *= w;
        }

        // Zero-padded FFT and power spectrum over bins 0 ..= N/2.
        let mut fft_buf: Vec<Complex<f32>> =
            frame.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft_buf.resize(self.padded_length, Complex::new(0.0, 0.0));
        self.fft.process(&mut fft_buf);

        let num_bins = self.padded_length / 2 + 1;
        let power: Array1<f32> = fft_buf[..num_bins].iter().map(|c| c.norm_sqr()).collect();

        let mut mel = self.mel_banks.dot(&power);
        mel.mapv_inplace(|e| e.max(f32::EPSILON).ln());
        mel
    }
}

impl Default for Fbank {
    fn default() -> Self {
        Self::new()
    }
}

fn hamming_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (length as f32 - 1.0)).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Triangular mel filters of shape `[num_bins, fft_size/2 + 1]`. Triangle
/// edges are equally spaced on the mel scale and the weights are
/// interpolated in mel space at each FFT bin's center frequency.
fn mel_filterbank(num_bins: usize, fft_size: usize, low_freq: f32, high_freq: f32) -> Array2<f32> {
    let num_fft_bins = fft_size / 2 + 1;
    let mel_low = hz_to_mel(low_freq);
    let mel_high = hz_to_mel(high_freq);
    let mel_delta = (mel_high - mel_low) / (num_bins + 1) as f32;

    let mut banks = Array2::zeros((num_bins, num_fft_bins));
    for m in 0..num_bins {
        let left = mel_low + m as f32 * mel_delta;
        let center = left + mel_delta;
        let right = center + mel_delta;

        for k in 0..num_fft_bins {
            let freq = k as f32 * SAMPLE_RATE as f32 / fft_size as f32;
            let mel = hz_to_mel(freq);
            if mel > left && mel < right {
                banks[[m, k]] = if mel <= center {
                    (mel - left) / (center - left)
                } else {
                    (right - mel) / (right - center)
                };
            }
        }
    }
    banks
}
