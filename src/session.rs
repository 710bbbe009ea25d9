//! Recognition sessions.
//!
//! A [`Recognizer`] owns everything loaded from the model config: the HCLG
//! graph, the acoustic model, the symbol table and (optionally) the large
//! LM for on-the-fly rescoring. It is read-only after loading.
//!
//! An [`Utterance`] is the per-stream state machine: raw PCM bytes go in,
//! a running hypothesis comes out. Each utterance borrows its recognizer
//! and is single-threaded.

use std::path::Path;

use ndarray::Array1;

use crate::am::{AcousticModel, AmState};
use crate::audio::{WaveFormat, WaveReader};
use crate::config::Config;
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::feat::fbank::FBANK_DIM;
use crate::feat::{Cmvn, Fbank, FbankState};
use crate::fst::delta::DeltaLmFst;
use crate::fst::lm::LmFst;
use crate::fst::Fst;
use crate::io::BinaryReader;
use crate::symbols::SymbolTable;

/// Acoustic scale applied to every log-likelihood during search.
const AM_SCALE: f32 = 0.1;

/// The running hypothesis is re-extracted every this many decoded frames.
const HYP_UPDATE_INTERVAL: u32 = 20;

pub struct Recognizer {
    fst: Fst,
    am: AcousticModel,
    symbols: SymbolTable,
    fbank: Fbank,
    cmvn_global_stats: Option<Array1<f32>>,
    enable_cmvn: bool,
    large_lm: Option<LmFst>,
    small_lm: Option<Array1<f32>>,
}

impl Recognizer {
    /// Load all models named by a config file.
    pub fn from_config(config_path: &Path) -> Result<Self> {
        let conf = Config::read(config_path)?;

        let fst_path = conf.require_path("fst")?;
        let mut reader = BinaryReader::open(&fst_path)?;
        let fst = Fst::read(&mut reader)?;
        log::info!("loaded HCLG with {} states from {:?}", fst.num_states(), fst_path);

        let am = AcousticModel::read(&conf)?;

        let symbols_path = conf.require_path("symbol_table")?;
        let symbols = SymbolTable::read(&symbols_path)?;

        let (large_lm, small_lm) = Self::read_delta_lm(&conf, &symbols)?;
        let (cmvn_global_stats, enable_cmvn) = Self::read_cmvn(&conf)?;

        Ok(Recognizer {
            fst,
            am,
            symbols,
            fbank: Fbank::new(),
            cmvn_global_stats,
            enable_cmvn,
            large_lm,
            small_lm,
        })
    }

    fn read_delta_lm(
        conf: &Config,
        symbols: &SymbolTable,
    ) -> Result<(Option<LmFst>, Option<Array1<f32>>)> {
        let large_lm_path = match conf.path("large_lm") {
            Some(path) => path,
            None => return Ok((None, None)),
        };
        let small_lm_path = conf.require_path("original_lm")?;

        let mut reader = BinaryReader::open(&small_lm_path)?;
        let small_lm = reader.read_f32_vector()?;
        let needed = symbols.bos_id().max(symbols.eos_id()) as usize;
        if small_lm.len() <= needed {
            return Err(Error::corruption(
                &small_lm_path,
                format!(
                    "unigram table of {} entries cannot cover word id {}",
                    small_lm.len(),
                    needed
                ),
            ));
        }

        let mut reader = BinaryReader::open(&large_lm_path)?;
        let large_lm = LmFst::read(&mut reader)?;
        log::info!("rescoring against large LM from {:?}", large_lm_path);

        Ok((Some(large_lm), Some(small_lm)))
    }

    fn read_cmvn(conf: &Config) -> Result<(Option<Array1<f32>>, bool)> {
        let enable_cmvn = conf.int_or("enable_cmvn", 0)? > 0;
        let stats = match conf.path("cmvn_stats") {
            Some(path) => {
                let mut reader = BinaryReader::open(&path)?;
                let stats = reader.read_f32_vector()?;
                if stats.len() != FBANK_DIM + 1 {
                    return Err(Error::corruption(
                        &path,
                        format!("cmvn stats of {} values, {} expected", stats.len(), FBANK_DIM + 1),
                    ));
                }
                Some(stats)
            }
            None => None,
        };
        if enable_cmvn && stats.is_none() {
            return Err(Error::Runtime(
                "enable_cmvn is set but no cmvn_stats given".to_string(),
            ));
        }
        Ok((stats, enable_cmvn))
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn delta_lm(&self) -> Option<DeltaLmFst<'_>> {
        match (&self.small_lm, &self.large_lm) {
            (Some(small), Some(large)) => Some(DeltaLmFst::new(small, large, &self.symbols)),
            _ => None,
        }
    }

    /// Start a new utterance for a PCM stream in the given format.
    pub fn utterance(&self, format: WaveFormat) -> Result<Utterance<'_>> {
        let wave_reader = WaveReader::new(format)?;
        let decoder = Decoder::new(
            &self.fst,
            self.am.transition_pdf_map(),
            AM_SCALE,
            self.delta_lm(),
        );
        Ok(Utterance {
            recognizer: self,
            wave_reader,
            fbank_state: FbankState::new(),
            cmvn: self
                .enable_cmvn
                .then(|| Cmvn::new(self.cmvn_global_stats.as_ref().expect("checked at load").view())),
            am_state: AmState::new(),
            decoder,
            hyp: String::new(),
            loglikelihood_per_frame: 0.0,
        })
    }
}

pub struct Utterance<'r> {
    recognizer: &'r Recognizer,
    wave_reader: WaveReader,
    fbank_state: FbankState,
    cmvn: Option<Cmvn>,
    am_state: AmState,
    decoder: Decoder<'r>,
    hyp: String,
    loglikelihood_per_frame: f32,
}

impl<'r> Utterance<'r> {
    /// Feed raw PCM bytes. Returns the number of whole samples consumed;
    /// the running hypothesis is refreshed as frames are decoded.
    pub fn process(&mut self, data: &[u8]) -> usize {
        let samples = self.wave_reader.process(data);
        if samples.is_empty() {
            return 0;
        }

        let feats = self
            .recognizer
            .fbank
            .process(&mut self.fbank_state, &samples);
        log::trace!("{} samples -> {} fbank frames", samples.len(), feats.nrows());

        for frame_idx in 0..feats.nrows() {
            let raw = feats.row(frame_idx);
            let frame = match &mut self.cmvn {
                Some(cmvn) => cmvn.process(raw),
                None => raw.to_owned(),
            };
            if let Some(log_prob) = self
                .recognizer
                .am
                .process(&mut self.am_state, frame.view())
            {
                self.decode_batch(&log_prob);
            }
        }

        samples.len()
    }

    /// Flush every stage and extract the final hypothesis.
    pub fn end_of_stream(&mut self) {
        if let Some(log_prob) = self.recognizer.am.end_of_stream(&mut self.am_state) {
            self.decode_batch(&log_prob);
        }
        self.decoder.end_of_stream();
        self.refresh_hypothesis();
    }

    fn decode_batch(&mut self, log_prob: &ndarray::Array2<f32>) {
        for row in log_prob.rows() {
            if !self.decoder.process(row) {
                log::debug!(
                    "beam died at frame {}",
                    self.decoder.num_frames_decoded()
                );
            }
            if self.decoder.num_frames_decoded() % HYP_UPDATE_INTERVAL == 0 {
                self.refresh_hypothesis();
            }
        }
    }

    fn refresh_hypothesis(&mut self) {
        let hyp = self.decoder.best_path();
        if hyp.words().is_empty() {
            self.hyp.clear();
            self.loglikelihood_per_frame = 0.0;
            return;
        }

        let symbols = self.recognizer.symbols();
        let mut text = String::new();
        // The decoder reports words newest-first.
        for &word in hyp.words().iter().rev() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(symbols.word(word));
        }
        self.hyp = text;

        let frames = self.decoder.num_frames_decoded();
        self.loglikelihood_per_frame = if frames > 0 {
            hyp.weight() / frames as f32
        } else {
            0.0
        };
    }

    /// The current best hypothesis; final after [`Utterance::end_of_stream`].
    pub fn hypothesis(&self) -> &str {
        &self.hyp
    }

    /// Average cost per decoded frame of the reported hypothesis.
    pub fn loglikelihood_per_frame(&self) -> f32 {
        self.loglikelihood_per_frame
    }
}
