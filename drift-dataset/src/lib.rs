//! Generation of drifting embedding datasets from the C4 corpus.
//!
//! Snippets are cut from corpus documents, embedded, and written as `.fvecs`.
//! A drift dataset is a base set followed by a set built from another corpus
//! slice in which a keyword was injected into a fraction of the documents.

pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod fvecs;
pub mod generate;
pub mod hashing;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod pollution;
pub mod test_util;
pub mod tokenize;
pub mod vectors;

pub use error::{DatasetError, Result};
