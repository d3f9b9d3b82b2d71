//! Keyword injection used to make a slice of the corpus drift away from the
//! rest.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

// Keeps the pollution stream independent from snippet sampling under the same seed.
/// Share of documents polluted when no fraction is given.
pub const DEFAULT_FRACTION: f64 = 0.3;

const POLLUTION_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Pollution {
    pub keyword: String,
    /// Probability that a document receives the keyword.
    pub fraction: f64,
}

impl Pollution {
    pub fn new(keyword: impl Into<String>, fraction: f64) -> Self {
        Self {
            keyword: keyword.into(),
            fraction,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.keyword.trim().is_empty() {
            return Err(DatasetError::InvalidConfig(
                "pollution keyword must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(DatasetError::InvalidConfig(format!(
                "pollution fraction {} is outside [0, 1]",
                self.fraction
            )));
        }
        Ok(())
    }
}

/// Decides, document by document, whether and where to insert the keyword.
///
/// Every call consumes the same amount of randomness regardless of the
/// document, so two polluters built from the same seed make identical
/// decisions over the same document sequence.
pub struct Polluter<'a> {
    pollution: &'a Pollution,
    rng: StdRng,
}

impl<'a> Polluter<'a> {
    pub fn new(pollution: &'a Pollution, seed: u64) -> Self {
        Self {
            pollution,
            rng: StdRng::seed_from_u64(seed ^ POLLUTION_STREAM),
        }
    }

    /// Returns the polluted text, or `None` when this document is left as is.
    pub fn apply(&mut self, text: &str) -> Option<String> {
        let roll: f64 = self.rng.gen();
        let position: u64 = self.rng.gen();
        if roll >= self.pollution.fraction {
            return None;
        }

        let keyword = &self.pollution.keyword;
        let boundaries = word_starts(text);
        // one extra slot for appending after the last word
        let slot = (position % (boundaries.len() as u64 + 1)) as usize;
        Some(match boundaries.get(slot) {
            Some(&offset) => format!("{}{keyword} {}", &text[..offset], &text[offset..]),
            None if text.is_empty() => keyword.clone(),
            None => format!("{text} {keyword}"),
        })
    }
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut previous_is_space = true;
    for (offset, c) in text.char_indices() {
        let is_space = c.is_whitespace();
        if previous_is_space && !is_space {
            starts.push(offset);
        }
        previous_is_space = is_space;
    }
    starts
}
