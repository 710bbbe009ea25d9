//! Shared helpers: serializers for the model formats and WAV synthesis.

#![allow(dead_code)]

use std::path::Path;

pub fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).unwrap();
}

pub fn vec0_f32(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"VEC0");
    out.extend_from_slice(&((values.len() * 4 + 4) as i32).to_le_bytes());
    out.extend_from_slice(&(values.len() as i32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn vec0_i32(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"VEC0");
    out.extend_from_slice(&((values.len() * 4 + 4) as i32).to_le_bytes());
    out.extend_from_slice(&(values.len() as i32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn mat0(rows: &[&[f32]]) -> Vec<u8> {
    let cols = rows.first().map_or(0, |r| r.len());
    let mut out = Vec::new();
    out.extend_from_slice(b"MAT0");
    out.extend_from_slice(&8i32.to_le_bytes());
    out.extend_from_slice(&(rows.len() as i32).to_le_bytes());
    out.extend_from_slice(&(cols as i32).to_le_bytes());
    for row in rows {
        out.extend(vec0_f32(row));
    }
    out
}

#[derive(Clone, Copy)]
pub struct FstArcSpec {
    pub next_state: i32,
    pub ilabel: i32,
    pub olabel: i32,
    pub weight: f32,
}

pub fn fst_arc(next_state: i32, ilabel: i32, olabel: i32, weight: f32) -> FstArcSpec {
    FstArcSpec {
        next_state,
        ilabel,
        olabel,
        weight,
    }
}

/// Serialize a `pk::fst_0` section. Arcs must be grouped by state and
/// sorted by input label within each state.
pub fn fst_bytes(
    start_state: i32,
    finals: &[f32],
    arc_base: &[i32],
    arcs: &[FstArcSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut tag = [0u8; 32];
    tag[.."pk::fst_0".len()].copy_from_slice(b"pk::fst_0");
    out.extend_from_slice(&tag);

    let section_size = 12 + finals.len() * 8 + arcs.len() * 16;
    out.extend_from_slice(&(section_size as i32).to_le_bytes());
    out.extend_from_slice(&(finals.len() as i32).to_le_bytes());
    out.extend_from_slice(&(arcs.len() as i32).to_le_bytes());
    out.extend_from_slice(&start_state.to_le_bytes());
    for f in finals {
        out.extend_from_slice(&f.to_le_bytes());
    }
    for b in arc_base {
        out.extend_from_slice(&b.to_le_bytes());
    }
    for a in arcs {
        out.extend_from_slice(&a.next_state.to_le_bytes());
        out.extend_from_slice(&a.ilabel.to_le_bytes());
        out.extend_from_slice(&a.olabel.to_le_bytes());
        out.extend_from_slice(&a.weight.to_le_bytes());
    }
    out
}

pub fn nn02_header(left: i32, right: i32, num_layers: i32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"NN02");
    out.extend_from_slice(&left.to_le_bytes());
    out.extend_from_slice(&right.to_le_bytes());
    out.extend_from_slice(&num_layers.to_le_bytes());
    out
}

fn lay0(layer_type: i32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"LAY0");
    out.extend_from_slice(&layer_type.to_le_bytes());
    out
}

/// Linear layer; `weight` is input-major (`[in_dim][out_dim]`).
pub fn lay0_linear(weight: &[&[f32]], bias: &[f32]) -> Vec<u8> {
    let mut out = lay0(0);
    out.extend(mat0(weight));
    out.extend(vec0_f32(bias));
    out
}

pub fn lay0_log_softmax() -> Vec<u8> {
    lay0(8)
}

pub fn lay0_splice(offsets: &[i32]) -> Vec<u8> {
    let mut out = lay0(6);
    out.extend_from_slice(&(offsets.len() as i32).to_le_bytes());
    for o in offsets {
        out.extend_from_slice(&o.to_le_bytes());
    }
    out
}

pub fn lay0_narrow(left: i32, right: i32) -> Vec<u8> {
    let mut out = lay0(9);
    out.extend_from_slice(&left.to_le_bytes());
    out.extend_from_slice(&right.to_le_bytes());
    out
}

/// A complete RIFF/WAVE file around 16-bit mono samples at 16 kHz.
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&16000u32.to_le_bytes());
    out.extend_from_slice(&32000u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// A deterministic tone with s16 amplitudes.
pub fn sine_samples(num_samples: usize) -> Vec<i16> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / 16000.0;
            (6000.0 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()) as i16
        })
        .collect()
}
