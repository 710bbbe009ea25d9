//! Weighted FSTs over the tropical semiring.
//!
//! [`Fst`] is the compact static HCLG representation: all arcs in one
//! ordered array, a per-state index into it, and per-state final costs.
//! Arc weights are negative log-probabilities; `f32::INFINITY` marks a
//! non-final state.

pub mod delta;
pub mod lm;

use crate::error::{Error, Result};
use crate::io::BinaryReader;

pub const FST_SECTION: &str = "pk::fst_0";

/// Input label 0 marks a nonemitting (epsilon) arc.
pub const EPSILON: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arc {
    pub next_state: i32,
    pub input_label: i32,
    pub output_label: i32,
    pub weight: f32,
}

pub struct Fst {
    start_state: i32,
    final_weights: Vec<f32>,
    /// Index of each state's first arc in `arcs`, -1 for states without
    /// out-going arcs.
    arc_base: Vec<i32>,
    /// Out-arc count per state, derived from `arc_base` at load time.
    arc_count: Vec<u32>,
    arcs: Vec<Arc>,
}

impl Fst {
    pub fn read<R: std::io::Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        reader.expect_padded_tag(FST_SECTION)?;
        let section_size = reader.read_i32()?;

        let num_states = reader.read_i32()?;
        let num_arcs = reader.read_i32()?;
        let start_state = reader.read_i32()?;
        if num_states < 0 || num_arcs < 0 || start_state < 0 || start_state >= num_states {
            return Err(Error::corruption(
                reader.path(),
                format!(
                    "fst header: {} states, {} arcs, start {}",
                    num_states, num_arcs, start_state
                ),
            ));
        }

        let expected_size = 12 + num_states as i64 * 8 + num_arcs as i64 * 16;
        if section_size as i64 != expected_size {
            return Err(Error::corruption(
                reader.path(),
                format!(
                    "fst section size {} expected, {} found",
                    expected_size, section_size
                ),
            ));
        }

        let final_weights = reader.read_f32_slice(num_states as usize)?;
        let arc_base = reader.read_i32_slice(num_states as usize)?;

        let mut arcs = Vec::with_capacity(num_arcs as usize);
        for _ in 0..num_arcs {
            arcs.push(Arc {
                next_state: reader.read_i32()?,
                input_label: reader.read_i32()?,
                output_label: reader.read_i32()?,
                weight: reader.read_f32()?,
            });
        }

        let arc_count = count_arcs(&arc_base, arcs.len(), reader)?;

        Ok(Fst {
            start_state,
            final_weights,
            arc_base,
            arc_count,
            arcs,
        })
    }

    pub fn start_state(&self) -> i32 {
        self.start_state
    }

    pub fn num_states(&self) -> usize {
        self.final_weights.len()
    }

    /// Final cost of `state`; `f32::INFINITY` for non-final states.
    pub fn final_weight(&self, state: i32) -> f32 {
        self.final_weights[state as usize]
    }

    /// All out-going arcs of `state`, sorted by input label.
    pub fn arcs(&self, state: i32) -> &[Arc] {
        let state = state as usize;
        let base = self.arc_base[state];
        if base < 0 {
            return &[];
        }
        let base = base as usize;
        &self.arcs[base..base + self.arc_count[state] as usize]
    }

    /// Binary-search the out-going arc of `state` with the given input
    /// label. With duplicate labels the first match in arc order wins.
    pub fn get_arc(&self, state: i32, ilabel: i32) -> Option<Arc> {
        let arcs = self.arcs(state);
        let idx = arcs.partition_point(|arc| arc.input_label < ilabel);
        match arcs.get(idx) {
            Some(arc) if arc.input_label == ilabel => Some(*arc),
            _ => None,
        }
    }
}

/// Derive per-state arc counts from the first-arc index. Walking backwards
/// makes each state's span end where the next indexed state begins, without
/// re-scanning per query; non-monotone indices are a corrupt file.
fn count_arcs<R: std::io::Read>(
    arc_base: &[i32],
    num_arcs: usize,
    reader: &BinaryReader<R>,
) -> Result<Vec<u32>> {
    let mut counts = vec![0u32; arc_base.len()];
    let mut next_base = num_arcs as i64;
    for state in (0..arc_base.len()).rev() {
        let base = arc_base[state] as i64;
        if base < 0 {
            continue;
        }
        if base > next_base {
            return Err(Error::corruption(
                reader.path(),
                format!("state {}: arc index {} out of order", state, base),
            ));
        }
        counts[state] = (next_base - base) as u32;
        next_base = base;
    }
    Ok(counts)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Serializers for the on-disk format, shared by the unit tests.

    use super::*;

    pub fn arc(next_state: i32, ilabel: i32, olabel: i32, weight: f32) -> Arc {
        Arc {
            next_state,
            input_label: ilabel,
            output_label: olabel,
            weight,
        }
    }

    /// Serialize an FST section. `finals` and `arc_base` are per-state;
    /// arcs must already be grouped by state and sorted by input label.
    pub fn fst_bytes(start_state: i32, finals: &[f32], arc_base: &[i32], arcs: &[Arc]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut tag = [0u8; 32];
        tag[..FST_SECTION.len()].copy_from_slice(FST_SECTION.as_bytes());
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
            out.extend_from_slice(&a.input_label.to_le_bytes());
            out.extend_from_slice(&a.output_label.to_le_bytes());
            out.extend_from_slice(&a.weight.to_le_bytes());
        }
        out
    }

    pub fn read_fst(bytes: Vec<u8>) -> Result<Fst> {
        let mut reader = BinaryReader::from_reader(std::io::Cursor::new(bytes), "test.fst");
        Fst::read(&mut reader)
    }
}
