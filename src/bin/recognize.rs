//! Command-line decoder.
//!
//! `recognize <config> <input>`. If `input` ends in `.wav` the file is
//! decoded and the hypothesis printed; otherwise it is read as an SCP list
//! of `utt_id wav_path` lines, printing `utt_id hyp` per utterance.

use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use recognize_rs::{audio, Recognizer};

const EXIT_MODEL_ERROR: u8 = 1;
const EXIT_ARG_ERROR: u8 = 22;

fn print_usage() -> ExitCode {
    eprintln!("Usage: recognize <config-file> <input-file>");
    eprintln!("  input-file:");
    eprintln!("    *.wav: decode this file.");
    eprintln!("    anything else: SCP list of 'utt_id wav_path' lines.");
    ExitCode::from(EXIT_ARG_ERROR)
}

fn decode_file(recognizer: &Recognizer, path: &Path) -> recognize_rs::Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| recognize_rs::Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    let format = audio::read_pcm_header(&mut file, &path.display().to_string())?;

    let mut utt = recognizer.utterance(format)?;
    let mut buffer = [0u8; 1024];
    loop {
        let n = file.read(&mut buffer).map_err(|e| recognize_rs::Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        utt.process(&buffer[..n]);
    }
    utt.end_of_stream();
    Ok(utt.hypothesis().to_string())
}

fn run_scp(recognizer: &Recognizer, scp_path: &Path) -> Result<(), ExitCode> {
    let text = std::fs::read_to_string(scp_path).map_err(|e| {
        eprintln!("recognize: unable to read {}: {}", scp_path.display(), e);
        ExitCode::from(EXIT_MODEL_ERROR)
    })?;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (name, wav_path) = match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(path), None) => (name, path),
            _ => {
                eprintln!("recognize: scp: unexpected line: {}", line);
                return Err(ExitCode::from(EXIT_ARG_ERROR));
            }
        };

        let hyp = decode_file(recognizer, Path::new(wav_path)).map_err(|e| {
            eprintln!("recognize: {}", e);
            ExitCode::from(EXIT_MODEL_ERROR)
        })?;
        println!("{} {}", name, hyp);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        return print_usage();
    }
    let config_path = Path::new(&args[1]);
    let input_path = Path::new(&args[2]);

    let recognizer = match Recognizer::from_config(config_path) {
        Ok(recognizer) => recognizer,
        Err(e) => {
            eprintln!("recognize: {}", e);
            return ExitCode::from(EXIT_MODEL_ERROR);
        }
    };

    let is_wav = input_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        match decode_file(&recognizer, input_path) {
            Ok(hyp) => println!("{}", hyp),
            Err(e) => {
                eprintln!("recognize: {}", e);
                return ExitCode::from(EXIT_MODEL_ERROR);
            }
        }
    } else if let Err(code) = run_scp(&recognizer, input_path) {
        return code;
    }

    ExitCode::SUCCESS
}
