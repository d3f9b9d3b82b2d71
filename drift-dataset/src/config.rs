use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    cache::StageKey,
    corpus::{CorpusSlice, Split},
    error::Result,
    generate::{GenerationRequest, OutputLocation},
    model::EmbedderMetadata,
    pollution::{Pollution, DEFAULT_FRACTION},
};

/// A corpus slice to sample from and the prefix its output is named with.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StageParams {
    pub split: Split,
    pub init_file: usize,
    pub number_of_files: usize,
    pub num_embeddings: usize,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pollution: Option<Pollution>,
}

impl StageParams {
    pub fn slice(&self) -> CorpusSlice {
        CorpusSlice::new(self.split, self.init_file, self.number_of_files)
    }
}

/// File names the pipeline stages its results under, inside `work_dir`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StagedNames {
    pub base: String,
    pub drift: String,
    pub combined: String,
}

impl Default for StagedNames {
    fn default() -> Self {
        Self {
            base: "DPR50KDriftBegin.fvecs".to_string(),
            drift: "DPR50KDriftEnd.fvecs".to_string(),
            combined: "DPR100KDrift.fvecs".to_string(),
        }
    }
}

/// What to do with an existing combined file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConcatPolicy {
    /// Rewrite it from the staged files on every run.
    #[default]
    Refresh,
    /// Leave it alone if it exists.
    SkipIfExists,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// The c4 `en` directory.
    pub dataset_dir: PathBuf,
    /// Where staged and combined files are written.
    pub work_dir: PathBuf,
    pub seed: u64,
    pub doc_stride: usize,
    pub max_length: usize,
    pub dimension: usize,
    pub batch_size: usize,
    pub base: StageParams,
    pub drift: StageParams,
    pub queries: StageParams,
    pub staged: StagedNames,
    pub concat_policy: ConcatPolicy,
    pub trust_existing: bool,
    pub embedder: EmbedderMetadata,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("c4/en"),
            work_dir: PathBuf::from("."),
            seed: 0,
            doc_stride: 32,
            max_length: 64,
            dimension: 768,
            batch_size: 512,
            base: StageParams {
                split: Split::Train,
                init_file: 0,
                number_of_files: 1,
                num_embeddings: 50_000,
                prefix: "c4-raw".to_string(),
                pollution: None,
            },
            drift: StageParams {
                split: Split::Train,
                init_file: 1,
                number_of_files: 1,
                num_embeddings: 50_000,
                prefix: "c4-drift-pollute".to_string(),
                pollution: Some(Pollution::new("Covid19", DEFAULT_FRACTION)),
            },
            queries: StageParams {
                split: Split::Validation,
                init_file: 0,
                number_of_files: 1,
                num_embeddings: 10_000,
                prefix: "c4-val".to_string(),
                pollution: None,
            },
            staged: StagedNames::default(),
            concat_policy: ConcatPolicy::default(),
            trust_existing: false,
            embedder: EmbedderMetadata::default(),
        }
    }
}

impl DatasetConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn request(&self, stage: &StageParams) -> GenerationRequest {
        GenerationRequest {
            slice: stage.slice(),
            num_embeddings: stage.num_embeddings,
            doc_stride: self.doc_stride,
            max_length: self.max_length,
            dimension: self.dimension,
            batch_size: self.batch_size,
            seed: self.seed,
            pollution: stage.pollution.clone(),
        }
    }

    pub fn location(&self, stage: &StageParams) -> OutputLocation {
        OutputLocation::new(&self.dataset_dir, &stage.prefix)
    }

    pub fn stage_key(&self, stage: &StageParams) -> StageKey {
        StageKey {
            request: self.request(stage),
            model: self.embedder.identity(),
        }
    }

    pub fn staged_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}
