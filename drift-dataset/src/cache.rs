//! Memoization of pipeline stages.
//!
//! A staged file is accompanied by a `{file}.manifest.json` sidecar holding
//! the key it was generated for. A stage is skipped only when the file exists
//! and its manifest matches the key of the current run.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::Result, generate::GenerationRequest};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StageKey {
    pub request: GenerationRequest,
    /// see [`crate::model::EmbedderMetadata::identity`]
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// File present and generated for this key.
    Hit,
    /// File present, but generated for another key or of unknown origin.
    Stale,
    Miss,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageCache {
    /// Treat any existing file as a hit, whatever its manifest says.
    pub trust_existing: bool,
}

impl StageCache {
    pub fn new(trust_existing: bool) -> Self {
        Self { trust_existing }
    }

    pub fn manifest_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(".manifest.json");
        PathBuf::from(name)
    }

    pub fn decide(&self, key: &StageKey, path: &Path) -> Result<CacheDecision> {
        if !path.is_file() {
            return Ok(CacheDecision::Miss);
        }
        let manifest_path = Self::manifest_path(path);
        if !manifest_path.is_file() {
            debug!("{path:?} has no manifest");
            return Ok(CacheDecision::Stale);
        }
        let recorded: StageKey = match serde_json::from_reader(File::open(&manifest_path)?) {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!("ignoring unreadable manifest {manifest_path:?}: {e}");
                return Ok(CacheDecision::Stale);
            }
        };

        Ok(if recorded == *key {
            CacheDecision::Hit
        } else {
            CacheDecision::Stale
        })
    }

    pub fn should_generate(&self, decision: CacheDecision) -> bool {
        match decision {
            CacheDecision::Hit => false,
            CacheDecision::Stale => !self.trust_existing,
            CacheDecision::Miss => true,
        }
    }

    pub fn record(&self, key: &StageKey, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(Self::manifest_path(path))?);
        serde_json::to_writer_pretty(&mut writer, key)?;
        writer.flush()?;
        Ok(())
    }

    /// Drops a manifest, so the file it describes no longer counts as a hit.
    pub fn invalidate(&self, path: &Path) -> Result<()> {
        match fs::remove_file(Self::manifest_path(path)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{CorpusSlice, Split},
        pollution::Pollution,
    };

    fn key(seed: u64) -> StageKey {
        StageKey {
            request: GenerationRequest {
                slice: CorpusSlice::new(Split::Train, 1, 1),
                num_embeddings: 100,
                doc_stride: 32,
                max_length: 64,
                dimension: 8,
                batch_size: 16,
                seed,
                pollution: Some(Pollution::new("Covid19", 0.3)),
            },
            model: "hashing".to_string(),
        }
    }

    #[test]
    fn manifest_sits_next_to_file() {
        assert_eq!(
            StageCache::manifest_path(Path::new("out/DPR50KDriftEnd.fvecs")),
            PathBuf::from("out/DPR50KDriftEnd.fvecs.manifest.json")
        );
    }

    #[test]
    fn decisions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.fvecs");
        let cache = StageCache::default();

        assert_eq!(cache.decide(&key(0), &path).unwrap(), CacheDecision::Miss);

        fs::write(&path, b"").unwrap();
        assert_eq!(cache.decide(&key(0), &path).unwrap(), CacheDecision::Stale);

        cache.record(&key(0), &path).unwrap();
        assert_eq!(cache.decide(&key(0), &path).unwrap(), CacheDecision::Hit);
        assert_eq!(cache.decide(&key(1), &path).unwrap(), CacheDecision::Stale);

        cache.invalidate(&path).unwrap();
        assert_eq!(cache.decide(&key(0), &path).unwrap(), CacheDecision::Stale);
        cache.invalidate(&path).unwrap();
    }

    #[test]
    fn garbage_manifest_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.fvecs");
        fs::write(&path, b"").unwrap();
        fs::write(StageCache::manifest_path(&path), b"not json").unwrap();
        assert_eq!(
            StageCache::default().decide(&key(0), &path).unwrap(),
            CacheDecision::Stale
        );
    }

    #[test]
    fn trusting_existing_files_skips_stale_stages() {
        assert!(StageCache::new(false).should_generate(CacheDecision::Stale));
        assert!(!StageCache::new(true).should_generate(CacheDecision::Stale));
        assert!(StageCache::new(true).should_generate(CacheDecision::Miss));
        assert!(!StageCache::new(false).should_generate(CacheDecision::Hit));
    }

    #[test]
    fn recorded_manifest_is_complete_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.fvecs");
        fs::write(&path, b"").unwrap();
        StageCache::default().record(&key(3), &path).unwrap();

        let text = fs::read_to_string(StageCache::manifest_path(&path)).unwrap();
        let recorded: StageKey = serde_json::from_str(&text).unwrap();
        assert_eq!(recorded, key(3));
        assert!(text.trim_end().ends_with('}'));
    }
}
