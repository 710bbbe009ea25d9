//! On-the-fly rescoring FST: `G⁻¹ ∘ G'`.
//!
//! HCLG was built with a small unigram grammar; this view replaces it with
//! a large backoff LM during search by scoring each output word with the
//! large LM and subtracting the unigram cost baked into the graph. Pure
//! view: it borrows the unigram vector and the large LM, holds no search
//! state of its own.

use ndarray::Array1;

use crate::fst::lm::LmFst;
use crate::fst::Arc;
use crate::symbols::SymbolTable;

pub struct DeltaLmFst<'a> {
    small_lm: &'a Array1<f32>,
    large_lm: &'a LmFst,
    bos_id: i32,
    eos_id: i32,
}

impl<'a> DeltaLmFst<'a> {
    /// `small_lm` is the unigram cost per word id used when HCLG was
    /// composed; word ids are shared with `symbols`.
    pub fn new(small_lm: &'a Array1<f32>, large_lm: &'a LmFst, symbols: &SymbolTable) -> Self {
        DeltaLmFst {
            small_lm,
            large_lm,
            bos_id: symbols.bos_id(),
            eos_id: symbols.eos_id(),
        }
    }

    /// Start state: the large LM after consuming `<s>`, so callers never
    /// feed the sentence-begin symbol themselves.
    pub fn start_state(&self) -> i32 {
        let start = self.large_lm.start_state();
        match self.large_lm.get_arc(start, self.bos_id) {
            Some(arc) => arc.next_state,
            None => {
                log::warn!("language model has no <s> arc from its start state");
                start
            }
        }
    }

    pub fn get_arc(&self, state: i32, ilabel: i32) -> Option<Arc> {
        self.large_lm.get_arc(state, ilabel).map(|mut arc| {
            arc.weight -= self.small_lm[ilabel as usize];
            arc
        })
    }

    /// Final cost: transduce `</s>` and finish in the large LM, minus the
    /// unigram cost of `</s>`.
    pub fn final_weight(&self, state: i32) -> f32 {
        match self.large_lm.get_arc(state, self.eos_id) {
            Some(arc) => {
                arc.weight + self.large_lm.final_weight(arc.next_state)
                    - self.small_lm[self.eos_id as usize]
            }
            None => f32::INFINITY,
        }
    }
}

#[derive(Clone, Copy)]
struct CacheSlot {
    state: i32,
    ilabel: i32,
    arc: Arc,
}

/// Delta-LM wrapped with a single-entry-per-bucket arc cache.
///
/// Backoff resolution can walk several states per query; decoding asks for
/// the same `(state, word)` pairs constantly, so a fixed-size direct-mapped
/// cache absorbs most of that. State 0 bypasses the cache: the LM's
/// bucket-0 already serves it in one lookup.
pub struct CachedDeltaLm<'a> {
    fst: DeltaLmFst<'a>,
    slots: Vec<Option<CacheSlot>>,
}

pub const ARC_CACHE_SIZE: usize = 1_000_000;

impl<'a> CachedDeltaLm<'a> {
    pub fn new(fst: DeltaLmFst<'a>) -> Self {
        Self::with_capacity(fst, ARC_CACHE_SIZE)
    }

    pub fn with_capacity(fst: DeltaLmFst<'a>, capacity: usize) -> Self {
        CachedDeltaLm {
            fst,
            slots: vec![None; capacity],
        }
    }

    pub fn start_state(&self) -> i32 {
        self.fst.start_state()
    }

    pub fn get_arc(&mut self, state: i32, ilabel: i32) -> Option<Arc> {
        if state == 0 {
            return self.fst.get_arc(state, ilabel);
        }

        let bucket = bucket_index(state, ilabel, self.slots.len());
        if let Some(slot) = &self.slots[bucket] {
            if slot.state == state && slot.ilabel == ilabel {
                return Some(slot.arc);
            }
        }

        let arc = self.fst.get_arc(state, ilabel)?;
        self.slots[bucket] = Some(CacheSlot { state, ilabel, arc });
        Some(arc)
    }

    pub fn final_weight(&self, state: i32) -> f32 {
        self.fst.final_weight(state)
    }
}

fn bucket_index(state: i32, ilabel: i32, capacity: usize) -> usize {
    let mut h: i32 = 19;
    h = h.wrapping_mul(31).wrapping_add(state);
    h = h.wrapping_mul(31).wrapping_add(ilabel);
    (h as u32 as usize) % capacity
}
