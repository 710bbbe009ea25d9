//! Backoff language model FST.
//!
//! Queries follow backoff arcs on demand: a miss at a state falls back to
//! the state's backoff target (the unique epsilon-input arc, stored first
//! by convention) with the backoff weight added. State 0 is the unigram
//! history and by far the hottest query target, so its out-arcs also live
//! in a directly indexed table.

use crate::error::Result;
use crate::fst::{Arc, Fst, EPSILON};
use crate::io::BinaryReader;

pub struct LmFst {
    fst: Fst,
    /// Out-arcs of state 0 indexed by input label; `None` where state 0
    /// has no arc for that label.
    bucket0: Vec<Option<Arc>>,
}

impl LmFst {
    pub fn read<R: std::io::Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let fst = Fst::read(reader)?;
        Ok(Self::from_fst(fst))
    }

    pub fn from_fst(fst: Fst) -> Self {
        let mut bucket0 = Vec::new();
        for arc in fst.arcs(0) {
            if arc.input_label == EPSILON {
                continue;
            }
            let idx = arc.input_label as usize;
            if idx >= bucket0.len() {
                bucket0.resize(idx + 1, None);
            }
            bucket0[idx] = Some(*arc);
        }
        log::debug!("lm fst: bucket0 spans {} labels", bucket0.len());
        LmFst { fst, bucket0 }
    }

    pub fn start_state(&self) -> i32 {
        self.fst.start_state()
    }

    /// The backoff arc of `state`, if it has one.
    fn backoff_arc(&self, state: i32) -> Option<&Arc> {
        match self.fst.arcs(state).first() {
            Some(arc) if arc.input_label == EPSILON => Some(arc),
            _ => None,
        }
    }

    /// Resolve the arc for `ilabel` at `state`, following backoff arcs and
    /// accumulating their weights until a state has an explicit arc.
    /// `ilabel` must not be epsilon; backoff arcs are internal.
    pub fn get_arc(&self, state: i32, ilabel: i32) -> Option<Arc> {
        debug_assert_ne!(ilabel, EPSILON, "epsilon is not a queryable label");
        if state == 0 {
            return self.bucket0.get(ilabel as usize).copied().flatten();
        }
        if let Some(arc) = self.fst.get_arc(state, ilabel) {
            return Some(arc);
        }
        let backoff = self.backoff_arc(state)?;
        let mut arc = self.get_arc(backoff.next_state, ilabel)?;
        arc.weight += backoff.weight;
        Some(arc)
    }

    /// Final cost of `state`, following backoff arcs until a final state is
    /// reached; `f32::INFINITY` when the backoff chain never ends finite.
    pub fn final_weight(&self, state: i32) -> f32 {
        let weight = self.fst.final_weight(state);
        if weight.is_finite() {
            return weight;
        }
        match self.backoff_arc(state) {
            Some(backoff) => {
                let tail = self.final_weight(backoff.next_state);
                if tail.is_finite() {
                    tail + backoff.weight
                } else {
                    f32::INFINITY
                }
            }
            None => f32::INFINITY,
        }
    }
}
