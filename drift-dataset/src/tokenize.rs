use lazy_static::lazy_static;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::{DatasetError, Result};

lazy_static! {
    static ref ENCODER: std::result::Result<CoreBPE, String> =
        cl100k_base().map_err(|e| e.to_string());
}

/// A window of token ids, the unit that gets embedded.
pub type Snippet = Vec<usize>;

pub fn encoder() -> Result<&'static CoreBPE> {
    ENCODER
        .as_ref()
        .map_err(|e| DatasetError::ModelLoadFailure(format!("could not load tokenizer: {e}")))
}

pub fn tokens_for(text: &str) -> Result<Vec<usize>> {
    Ok(encoder()?.encode_ordinary(text))
}

/// Splits token sequences into windows of at most `max_length` tokens, where
/// consecutive windows share `doc_stride` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetWindows {
    max_length: usize,
    doc_stride: usize,
}

impl SnippetWindows {
    pub fn new(max_length: usize, doc_stride: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(DatasetError::InvalidConfig(
                "max_length must be positive".to_string(),
            ));
        }
        if doc_stride >= max_length {
            return Err(DatasetError::InvalidConfig(format!(
                "doc_stride ({doc_stride}) must be smaller than max_length ({max_length})"
            )));
        }
        Ok(Self {
            max_length,
            doc_stride,
        })
    }

    fn step(&self) -> usize {
        self.max_length - self.doc_stride
    }

    pub fn window_count(&self, token_count: usize) -> usize {
        match token_count {
            0 => 0,
            n if n <= self.max_length => 1,
            n => 1 + (n - self.max_length).div_ceil(self.step()),
        }
    }

    pub fn windows<'a>(&self, tokens: &'a [usize]) -> impl Iterator<Item = &'a [usize]> + 'a {
        let (step, max_length) = (self.step(), self.max_length);
        (0..self.window_count(tokens.len())).map(move |i| {
            let start = i * step;
            &tokens[start..(start + max_length).min(tokens.len())]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_overlap_by_stride() {
        let windows = SnippetWindows::new(4, 2).unwrap();
        let tokens: Vec<usize> = (0..9).collect();
        let result: Vec<&[usize]> = windows.windows(&tokens).collect();
        assert_eq!(
            result,
            vec![&[0, 1, 2, 3][..], &[2, 3, 4, 5], &[4, 5, 6, 7], &[6, 7, 8]]
        );
        assert_eq!(windows.window_count(tokens.len()), 4);
    }

    #[test]
    fn short_and_empty_inputs() {
        let windows = SnippetWindows::new(64, 32).unwrap();
        assert_eq!(windows.window_count(0), 0);
        assert_eq!(windows.window_count(1), 1);
        assert_eq!(windows.window_count(64), 1);
        assert_eq!(windows.window_count(65), 2);
        assert_eq!(windows.window_count(96), 2);
        assert_eq!(windows.window_count(97), 3);
    }

    #[test]
    fn stride_must_be_below_length() {
        assert!(SnippetWindows::new(32, 32).is_err());
        assert!(SnippetWindows::new(0, 0).is_err());
    }

    #[test]
    fn tokenizer_is_available() {
        let tokens = tokens_for("the quick brown fox").unwrap();
        assert!(!tokens.is_empty());
        assert!(tokens.len() < 64);
    }
}
