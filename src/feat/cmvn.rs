//! Sliding-window cepstral mean normalization.
//!
//! Subtracts a running mean over the last [`CMVN_WINDOW`] frames from each
//! feature vector. While the window is still filling, the statistics are
//! blended with precomputed global statistics so early frames are not
//! normalized against a handful of samples.

use std::collections::VecDeque;

use ndarray::{Array1, ArrayView1};

/// Sliding window length, in frames.
pub const CMVN_WINDOW: usize = 100;
/// Upper bound on how many frames worth of global stats may be blended in.
pub const CMVN_GLOBAL_FRAMES: usize = 200;

/// Streaming CMVN state for one utterance. Frames must be fed in order;
/// each call normalizes exactly the next frame.
pub struct Cmvn {
    /// Global stats: per-dimension feature sum, then the frame count.
    global_stats: Array1<f64>,
    /// Running sums over the trailing window, same layout as `global_stats`.
    cached_stats: Array1<f64>,
    /// The last `CMVN_WINDOW` raw frames, oldest first.
    window: VecDeque<Array1<f32>>,
    dim: usize,
}

impl Cmvn {
    /// `global_stats` has `dim + 1` entries: summed features plus count.
    pub fn new(global_stats: ArrayView1<f32>) -> Self {
        assert!(global_stats.len() >= 2, "global stats need sums and a count");
        let dim = global_stats.len() - 1;
        assert!(
            global_stats[dim] > 0.0,
            "global stats frame count must be positive"
        );
        Cmvn {
            global_stats: global_stats.mapv(|v| v as f64),
            cached_stats: Array1::zeros(dim + 1),
            window: VecDeque::with_capacity(CMVN_WINDOW),
            dim,
        }
    }

    /// Normalize the next frame of the stream.
    pub fn process(&mut self, raw: ArrayView1<f32>) -> Array1<f32> {
        assert_eq!(raw.len(), self.dim, "cmvn frame dimension mismatch");

        // Advance the window sums: add this frame, drop the one that slid out.
        for (s, &x) in self.cached_stats.iter_mut().zip(raw.iter()) {
            *s += x as f64;
        }
        self.cached_stats[self.dim] += 1.0;

        if self.window.len() == CMVN_WINDOW {
            let oldest = self.window.pop_front().expect("window is non-empty");
            for (s, &x) in self.cached_stats.iter_mut().zip(oldest.iter()) {
                *s -= x as f64;
            }
            self.cached_stats[self.dim] -= 1.0;
        }
        self.window.push_back(raw.to_owned());

        // Blend in global stats while the window is underfilled.
        let mut stats = self.cached_stats.clone();
        let count = stats[self.dim];
        if count < CMVN_WINDOW as f64 {
            let from_global =
                (CMVN_WINDOW as f64 - count).min(CMVN_GLOBAL_FRAMES as f64);
            let scale = from_global / self.global_stats[self.dim];
            stats.scaled_add(scale, &self.global_stats);
        }

        let total = stats[self.dim];
        debug_assert!(total > 0.0);
        let mut out = Array1::zeros(self.dim);
        for d in 0..self.dim {
            out[d] = raw[d] - (stats[d] / total) as f32;
        }
        out
    }
}
