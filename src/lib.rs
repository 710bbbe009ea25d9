//! # recognize-rs
//!
//! A small-footprint streaming speech recognition engine. Audio goes in as
//! 16 kHz mono PCM; a running best-guess transcription comes out, finalized
//! at end of stream.
//!
//! The engine is a classic WFST pipeline:
//!
//! - **Front-end**: streaming 40-bin log-mel filterbank features, optional
//!   sliding-window cepstral mean normalization, and a chunked dense neural
//!   network producing per-frame log-likelihoods.
//! - **Search**: time-synchronous Viterbi beam search over a statically
//!   composed HCLG transducer, with adaptive beam pruning and a shared
//!   back-pointer graph for output history.
//! - **Rescoring** (optional): on-the-fly composition with a large backoff
//!   language model, scoring each crossed word with the large LM minus the
//!   unigram cost baked into the graph.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::path::Path;
//! use recognize_rs::{audio, Recognizer};
//!
//! let recognizer = Recognizer::from_config(Path::new("models/model.conf"))?;
//!
//! let mut file = std::fs::File::open("audio.wav")?;
//! let format = audio::read_pcm_header(&mut file, "audio.wav")?;
//! let mut utt = recognizer.utterance(format)?;
//!
//! let mut buffer = [0u8; 1024];
//! loop {
//!     let n = std::io::Read::read(&mut file, &mut buffer)?;
//!     if n == 0 {
//!         break;
//!     }
//!     utt.process(&buffer[..n]);
//! }
//! utt.end_of_stream();
//! println!("{}", utt.hypothesis());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Audio requirements
//!
//! Input streams must be mono, 16 kHz, 8/16/32-bit signed PCM. Sample
//! values are used at their raw integer amplitude.
//!
//! ## Threading
//!
//! A [`Recognizer`] is immutable after loading; any number of
//! [`Utterance`]s may borrow it, each owned by exactly one caller. An
//! utterance is strictly sequential: samples in temporal order, one frame
//! decoded at a time.

pub mod am;
pub mod audio;
pub mod config;
pub mod decoder;
pub mod error;
pub mod feat;
pub mod fst;
pub mod io;
pub mod nnet;
pub mod session;
pub mod symbols;

pub use audio::{read_pcm_header, WaveFormat};
pub use decoder::Hypothesis;
pub use error::{Error, Result};
pub use session::{Recognizer, Utterance};
