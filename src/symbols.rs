//! Word symbol table.
//!
//! Plain-text file with one `word id` pair per line. The table must define
//! the sentence boundary symbols `<s>` and `</s>`; language model queries
//! use them for BOS/EOS transitions.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

pub const BOS_SYMBOL: &str = "<s>";
pub const EOS_SYMBOL: &str = "</s>";

pub struct SymbolTable {
    words: Vec<String>,
    ids: FxHashMap<String, i32>,
    bos_id: i32,
    eos_id: i32,
}

impl SymbolTable {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let mut words: Vec<String> = Vec::new();
        let mut ids = FxHashMap::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (word, id) = match (fields.next(), fields.next(), fields.next()) {
                (Some(word), Some(id), None) => (word, id),
                _ => {
                    return Err(Error::corruption(
                        path,
                        format!("line {}: expected 'word id'", lineno + 1),
                    ))
                }
            };
            let id: i32 = id.parse().map_err(|_| {
                Error::corruption(path, format!("line {}: bad symbol id '{}'", lineno + 1, id))
            })?;
            if id < 0 {
                return Err(Error::corruption(
                    path,
                    format!("line {}: negative symbol id", lineno + 1),
                ));
            }
            if id as usize >= words.len() {
                words.resize(id as usize + 1, String::new());
            }
            words[id as usize] = word.to_string();
            ids.insert(word.to_string(), id);
        }

        let bos_id = *ids
            .get(BOS_SYMBOL)
            .ok_or_else(|| Error::corruption(path, "symbol table has no <s>"))?;
        let eos_id = *ids
            .get(EOS_SYMBOL)
            .ok_or_else(|| Error::corruption(path, "symbol table has no </s>"))?;

        Ok(SymbolTable {
            words,
            ids,
            bos_id,
            eos_id,
        })
    }

    /// The word for a symbol id; empty for ids the table never defined.
    pub fn word(&self, id: i32) -> &str {
        self.words
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn id(&self, word: &str) -> Option<i32> {
        self.ids.get(word).copied()
    }

    pub fn bos_id(&self) -> i32 {
        self.bos_id
    }

    pub fn eos_id(&self) -> i32 {
        self.eos_id
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
