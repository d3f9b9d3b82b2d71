//! Access to a local copy of the C4 "en" corpus.
//!
//! The corpus is laid out as `{c4_dir}/train/c4-train.00000-of-01024.json.gz`
//! and `{c4_dir}/validation/c4-validation.00000-of-00008.json.gz`, one JSON
//! document per line. Uncompressed `.json` files are accepted as well.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatasetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
        }
    }

    pub const fn shard_count(self) -> usize {
        match self {
            Self::Train => 1024,
            Self::Validation => 8,
        }
    }

    pub fn file_name(self, index: usize) -> String {
        format!(
            "c4-{}.{index:05}-of-{:05}.json",
            self.dir_name(),
            self.shard_count()
        )
    }
}

/// A contiguous range of numbered corpus files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CorpusSlice {
    pub split: Split,
    pub init_file: usize,
    pub number_of_files: usize,
}

impl CorpusSlice {
    pub fn new(split: Split, init_file: usize, number_of_files: usize) -> Self {
        Self {
            split,
            init_file,
            number_of_files,
        }
    }

    /// One past the last file index. Saturates, [`Self::validate`] rejects
    /// slices whose end does not fit.
    pub fn end(&self) -> usize {
        self.init_file.saturating_add(self.number_of_files)
    }

    pub fn validate(&self) -> Result<()> {
        if self.number_of_files == 0 {
            return Err(DatasetError::InvalidConfig(
                "a corpus slice needs at least one file".to_string(),
            ));
        }
        let end = self
            .init_file
            .checked_add(self.number_of_files)
            .ok_or_else(|| {
                DatasetError::InvalidConfig(format!(
                    "file range starting at {} with {} files overflows",
                    self.init_file, self.number_of_files
                ))
            })?;
        if end > self.split.shard_count() {
            return Err(DatasetError::InvalidConfig(format!(
                "files {}..{end} are out of range for the {} split, which has {} files",
                self.init_file,
                self.split.dir_name(),
                self.split.shard_count()
            )));
        }
        Ok(())
    }

    /// Resolves the slice to existing files, preferring the gzipped variant.
    pub fn file_paths<P: AsRef<Path>>(&self, c4_dir: P) -> Result<Vec<PathBuf>> {
        self.validate()?;
        let split_dir = c4_dir.as_ref().join(self.split.dir_name());
        (self.init_file..self.end())
            .map(|index| {
                let plain = split_dir.join(self.split.file_name(index));
                let gzipped = plain.with_extension("json.gz");
                if gzipped.is_file() {
                    Ok(gzipped)
                } else if plain.is_file() {
                    Ok(plain)
                } else {
                    Err(DatasetError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("corpus file {gzipped:?} not found"),
                    )))
                }
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct RawDocument {
    text: String,
}

fn open_corpus_file(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    Ok(if is_gzip {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Yields the `text` of every document of the given files, in order.
pub struct Documents {
    paths: std::vec::IntoIter<PathBuf>,
    current: Option<OpenFile>,
}

struct OpenFile {
    origin: String,
    lines: io::Lines<Box<dyn BufRead>>,
    line: usize,
}

impl Documents {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
            current: None,
        }
    }

    fn next_document(&mut self) -> Result<Option<String>> {
        loop {
            let Some(current) = self.current.as_mut() else {
                let Some(path) = self.paths.next() else {
                    return Ok(None);
                };
                debug!("reading corpus file {path:?}");
                self.current = Some(OpenFile {
                    origin: path.display().to_string(),
                    lines: open_corpus_file(&path)?.lines(),
                    line: 0,
                });
                continue;
            };

            match current.lines.next() {
                None => self.current = None,
                Some(line) => {
                    current.line += 1;
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let document: RawDocument =
                        serde_json::from_str(&line).map_err(|e| DatasetError::BadDocument {
                            origin: current.origin.clone(),
                            line: current.line,
                            reason: e.to_string(),
                        })?;
                    return Ok(Some(document.text));
                }
            }
        }
    }
}

impl Iterator for Documents {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_document().transpose()
    }
}
