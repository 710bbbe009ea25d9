//! Acoustic model: the network plus its prior and transition map, driven in
//! fixed-size chunks over a context-padded feature window.
//!
//! Feature frames accumulate in a per-utterance deque. Once
//! `left + chunk + right` frames are buffered, that window is propagated
//! through the network, which narrows it back down to `chunk` rows of
//! log-posteriors; the prior is subtracted to turn posteriors into
//! log-likelihoods for the decoder.

use std::collections::VecDeque;

use ndarray::{Array1, Array2, ArrayView1};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::BinaryReader;
use crate::nnet::Nnet;

pub struct AcousticModel {
    nnet: Nnet,
    log_prior: Array1<f32>,
    tid2pdf: Vec<i32>,
    left_context: usize,
    right_context: usize,
    chunk_size: usize,
    num_pdfs: usize,
}

/// Per-utterance streaming state.
pub struct AmState {
    started: bool,
    feats: VecDeque<Array1<f32>>,
}

impl AmState {
    pub fn new() -> Self {
        AmState {
            started: false,
            feats: VecDeque::new(),
        }
    }
}

impl Default for AmState {
    fn default() -> Self {
        Self::new()
    }
}

impl AcousticModel {
    /// Load the network, prior and transition map named by the config keys
    /// `nnet`, `prior`, `tid2pdf`, `left_context`, `right_context`,
    /// `chunk_size` and `num_pdfs`.
    pub fn read(conf: &Config) -> Result<Self> {
        let nnet_path = conf.require_path("nnet")?;
        let mut reader = BinaryReader::open(&nnet_path)?;
        let nnet = Nnet::read(&mut reader)?;

        let prior_path = conf.require_path("prior")?;
        let mut reader = BinaryReader::open(&prior_path)?;
        let mut log_prior = reader.read_f32_vector()?;
        log_prior.mapv_inplace(f32::ln);

        let tid2pdf_path = conf.require_path("tid2pdf")?;
        let mut reader = BinaryReader::open(&tid2pdf_path)?;
        let tid2pdf = reader.read_i32_vector()?;

        let left_context = conf.require_int("left_context")?;
        let right_context = conf.require_int("right_context")?;
        let chunk_size = conf.require_int("chunk_size")?;
        let num_pdfs = conf.require_int("num_pdfs")?;
        if left_context < 0 || right_context < 0 || chunk_size <= 0 || num_pdfs <= 0 {
            return Err(Error::Runtime(format!(
                "acoustic model config: contexts {}/{}, chunk {}, {} pdfs",
                left_context, right_context, chunk_size, num_pdfs
            )));
        }
        let num_pdfs = num_pdfs as usize;
        if log_prior.len() != num_pdfs {
            return Err(Error::corruption(
                &prior_path,
                format!("prior of {} values, {} pdfs expected", log_prior.len(), num_pdfs),
            ));
        }
        if let Some(&bad) = tid2pdf.iter().find(|&&p| p < 0 || p as usize >= num_pdfs) {
            return Err(Error::corruption(
                &tid2pdf_path,
                format!("transition map entry {} out of {} pdfs", bad, num_pdfs),
            ));
        }

        log::info!(
            "acoustic model: {} pdfs, context {}+{}, chunk {}",
            num_pdfs,
            left_context,
            right_context,
            chunk_size
        );

        Ok(AcousticModel {
            nnet,
            log_prior,
            tid2pdf,
            left_context: left_context as usize,
            right_context: right_context as usize,
            chunk_size: chunk_size as usize,
            num_pdfs,
        })
    }

    pub fn transition_pdf_map(&self) -> &[i32] {
        &self.tid2pdf
    }

    pub fn num_pdfs(&self) -> usize {
        self.num_pdfs
    }

    /// Feed one feature frame. Returns a batch of `chunk_size` rows of
    /// log-likelihoods whenever enough context has accumulated.
    pub fn process(&self, state: &mut AmState, frame: ArrayView1<f32>) -> Option<Array2<f32>> {
        if !state.started {
            // Left-pad the stream by replicating its first frame.
            for _ in 0..self.left_context {
                state.feats.push_back(frame.to_owned());
            }
            state.started = true;
        }
        state.feats.push_back(frame.to_owned());

        let window = self.left_context + self.chunk_size + self.right_context;
        if state.feats.len() < window {
            return None;
        }

        let log_prob = self.compute_batch(state, window);
        assert_eq!(
            log_prob.nrows(),
            self.chunk_size,
            "network must emit exactly chunk_size rows for a full window"
        );
        state.feats.drain(..self.chunk_size);
        Some(log_prob)
    }

    /// Flush the stream: right-pad with the last frame and emit whatever
    /// complete frames remain.
    pub fn end_of_stream(&self, state: &mut AmState) -> Option<Array2<f32>> {
        let last = state.feats.back()?.clone();
        for _ in 0..self.right_context {
            state.feats.push_back(last.clone());
        }

        let rows = state.feats.len();
        if rows <= self.left_context + self.right_context {
            return None;
        }
        let log_prob = self.compute_batch(state, rows);
        state.feats.clear();
        if log_prob.nrows() == 0 {
            None
        } else {
            Some(log_prob)
        }
    }

    fn compute_batch(&self, state: &AmState, batch_rows: usize) -> Array2<f32> {
        let dim = state.feats[0].len();
        let mut batch = Array2::zeros((batch_rows, dim));
        for (r, frame) in state.feats.iter().take(batch_rows).enumerate() {
            batch.row_mut(r).assign(frame);
        }

        let mut log_prob = self.nnet.propagate(&batch);
        assert_eq!(
            log_prob.ncols(),
            self.num_pdfs,
            "network output dimension must match the pdf count"
        );
        for mut row in log_prob.rows_mut() {
            row -= &self.log_prior;
        }
        log_prob
    }
}
