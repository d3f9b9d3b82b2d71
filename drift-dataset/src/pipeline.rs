//! The drift dataset run: base vectors, polluted drift vectors, and the
//! combined file with the drift vectors appended after the base vectors.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    cache::{CacheDecision, StageCache},
    config::{ConcatPolicy, DatasetConfig, StageParams},
    error::Result,
    fvecs::{append_fvecs, partial_path},
    generate::generate_embeddings,
    model::Model,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Freshly generated at the given path, then staged.
    Generated(PathBuf),
    Cached(CacheDecision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatOutcome {
    Written(usize),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub base: StageOutcome,
    pub drift: StageOutcome,
    pub combined: ConcatOutcome,
    pub combined_path: PathBuf,
}

/// Generates a stage unless the stage cache says its staged file is current,
/// then copies the result to `staged`.
pub async fn run_stage<M: Model>(
    model: &M,
    config: &DatasetConfig,
    stage: &StageParams,
    staged: &Path,
) -> Result<StageOutcome> {
    let cache = StageCache::new(config.trust_existing);
    let key = config.stage_key(stage);
    let decision = cache.decide(&key, staged)?;
    if !cache.should_generate(decision) {
        info!("{staged:?} is up to date ({decision:?}), skipping generation");
        return Ok(StageOutcome::Cached(decision));
    }

    info!("generating {staged:?} ({decision:?})");
    cache.invalidate(staged)?;
    let generated = generate_embeddings(model, &key.request, &config.location(stage)).await?;
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(staged);
    fs::copy(&generated, &partial)?;
    fs::rename(&partial, staged)?;
    cache.record(&key, staged)?;

    Ok(StageOutcome::Generated(generated))
}

pub async fn run_drift_pipeline<M: Model>(model: &M, config: &DatasetConfig) -> Result<PipelineReport> {
    let base_path = config.staged_path(&config.staged.base);
    let drift_path = config.staged_path(&config.staged.drift);
    let combined_path = config.staged_path(&config.staged.combined);

    let base = run_stage(model, config, &config.base, &base_path).await?;
    let drift = run_stage(model, config, &config.drift, &drift_path).await?;

    let combined = match config.concat_policy {
        ConcatPolicy::SkipIfExists if combined_path.exists() => {
            info!("{combined_path:?} exists, leaving it alone");
            ConcatOutcome::Skipped
        }
        _ => ConcatOutcome::Written(append_fvecs(&drift_path, &base_path, &combined_path)?),
    };

    Ok(PipelineReport {
        base,
        drift,
        combined,
        combined_path,
    })
}

/// Generates the query set. Not memoized.
pub async fn generate_queries<M: Model>(model: &M, config: &DatasetConfig) -> Result<PathBuf> {
    let request = config.request(&config.queries);
    generate_embeddings(model, &request, &config.location(&config.queries)).await
}
