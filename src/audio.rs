//! Audio input: WAV files and streaming PCM byte conversion.
//!
//! The decoder consumes raw-amplitude samples (an s16 sample value of 1000
//! becomes `1000.0f32`), matching the scale the acoustic model was trained
//! on. Samples are never normalized to `[-1, 1]`.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

pub const SAMPLE_RATE: u32 = 16000;

/// PCM stream format, as parsed from a WAV header or supplied by an
/// embedder that feeds headerless PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub num_channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// Check that the stream is something the engine can decode: mono,
    /// 16 kHz, 8/16/32-bit signed PCM.
    pub fn validate(&self) -> Result<()> {
        if self.num_channels != 1 {
            return Err(Error::Runtime(format!(
                "unsupported audio: {} channels (mono expected)",
                self.num_channels
            )));
        }
        if self.sample_rate != SAMPLE_RATE {
            return Err(Error::Runtime(format!(
                "unsupported audio: {} Hz ({} Hz expected)",
                self.sample_rate, SAMPLE_RATE
            )));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 32) {
            return Err(Error::Runtime(format!(
                "unsupported audio: {} bits per sample (8, 16 or 32 expected)",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

fn read_tag<R: Read>(reader: &mut R, expected: &[u8; 4], name: &str) -> Result<()> {
    let mut tag = [0u8; 4];
    reader
        .read_exact(&mut tag)
        .map_err(|e| Error::io(name, e))?;
    if &tag != expected {
        return Err(Error::corruption(
            name,
            format!("'{}' chunk expected", String::from_utf8_lossy(expected)),
        ));
    }
    Ok(())
}

fn read_u16<R: Read>(reader: &mut R, name: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::io(name, e))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R, name: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::io(name, e))?;
    Ok(u32::from_le_bytes(buf))
}

/// Parse a 44-byte RIFF/WAVE/fmt/data header, leaving the reader positioned
/// at the first data byte. `name` is used in error messages.
pub fn read_pcm_header<R: Read>(reader: &mut R, name: &str) -> Result<WaveFormat> {
    read_tag(reader, b"RIFF", name)?;
    let _chunk_size = read_u32(reader, name)?;
    read_tag(reader, b"WAVE", name)?;

    read_tag(reader, b"fmt ", name)?;
    let subchunk1_size = read_u32(reader, name)?;
    if subchunk1_size != 16 {
        return Err(Error::corruption(
            name,
            format!("fmt chunk size 16 expected, {} found", subchunk1_size),
        ));
    }
    let audio_format = read_u16(reader, name)?;
    if audio_format != 1 {
        return Err(Error::corruption(
            name,
            format!("audio format 1 (PCM) expected, {} found", audio_format),
        ));
    }
    let num_channels = read_u16(reader, name)?;
    let sample_rate = read_u32(reader, name)?;
    let byte_rate = read_u32(reader, name)?;
    let block_align = read_u16(reader, name)?;
    let bits_per_sample = read_u16(reader, name)?;
    let expected_byte_rate =
        sample_rate * num_channels as u32 * bits_per_sample as u32 / 8;
    if byte_rate != expected_byte_rate {
        return Err(Error::corruption(
            name,
            format!(
                "byte rate {} expected, {} found",
                expected_byte_rate, byte_rate
            ),
        ));
    }
    let _ = block_align;

    read_tag(reader, b"data", name)?;
    let _data_size = read_u32(reader, name)?;

    Ok(WaveFormat {
        num_channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Converts a stream of raw PCM bytes into sample values, keeping any
/// trailing partial sample buffered across calls.
pub struct WaveReader {
    format: WaveFormat,
    buffer: Vec<u8>,
}

impl WaveReader {
    pub fn new(format: WaveFormat) -> Result<Self> {
        format.validate()?;
        Ok(WaveReader {
            format,
            buffer: Vec::new(),
        })
    }

    /// Convert a chunk of bytes to samples. All whole samples in the
    /// internal buffer are consumed; the residue stays for the next call.
    pub fn process(&mut self, data: &[u8]) -> Vec<f32> {
        self.buffer.extend_from_slice(data);

        let bytes_per_sample = (self.format.bits_per_sample / 8) as usize;
        let num_samples = self.buffer.len() / bytes_per_sample;
        let consumed = num_samples * bytes_per_sample;

        let mut samples = Vec::with_capacity(num_samples);
        for chunk in self.buffer[..consumed].chunks_exact(bytes_per_sample) {
            let value = match self.format.bits_per_sample {
                8 => chunk[0] as i8 as f32,
                16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f32,
                32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32,
                _ => unreachable!("format validated at construction"),
            };
            samples.push(value);
        }
        self.buffer.drain(..consumed);

        samples
    }
}

/// Read a whole 16 kHz mono WAV file into raw-amplitude samples.
pub fn read_wav_samples(path: &Path) -> Result<Vec<f32>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| Error::corruption(path, e.to_string()))?;
    let spec = reader.spec();

    let format = WaveFormat {
        num_channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
    };
    format.validate()?;
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Runtime(format!(
            "unsupported audio: float samples in {}",
            path.display()
        )));
    }

    reader
        .into_samples::<i32>()
        .map(|s| s.map(|v| v as f32).map_err(|e| Error::corruption(path, e.to_string())))
        .collect()
}
