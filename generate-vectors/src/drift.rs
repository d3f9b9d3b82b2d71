use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use drift_dataset::{
    config::{ConcatPolicy, DatasetConfig},
    pipeline::{run_drift_pipeline, ConcatOutcome, StageOutcome},
};
use tracing::info;

use crate::stage::load_model;

#[derive(Parser)]
pub struct DriftCommand {
    /// the c4 `en` directory. embeddings are written below it
    #[arg(long)]
    dataset_dir: Option<PathBuf>,

    /// directory for the staged and combined files
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// what to do with an existing combined file
    #[arg(long, value_enum)]
    concat_policy: Option<ConcatPolicy>,

    /// reuse existing staged files even if they were made with other parameters
    #[arg(long)]
    trust_existing: bool,
}

impl DriftCommand {
    fn apply(&self, config: &DatasetConfig) -> DatasetConfig {
        let mut config = config.clone();
        if let Some(dataset_dir) = &self.dataset_dir {
            config.dataset_dir = dataset_dir.clone();
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(concat_policy) = self.concat_policy {
            config.concat_policy = concat_policy;
        }
        config.trust_existing |= self.trust_existing;

        config
    }

    pub async fn execute(&self, config: &DatasetConfig) -> Result<(), anyhow::Error> {
        let config = self.apply(config);
        let model = load_model(&config)?;
        let report = run_drift_pipeline(&model, &config)
            .await
            .context("drift dataset generation failed")?;

        for (name, outcome) in [("base", &report.base), ("drift", &report.drift)] {
            match outcome {
                StageOutcome::Generated(path) => info!("{name}: generated {path:?}"),
                StageOutcome::Cached(decision) => info!("{name}: reused ({decision:?})"),
            }
        }
        match report.combined {
            ConcatOutcome::Written(count) => {
                info!("{count} vectors written to {:?}", report.combined_path)
            }
            ConcatOutcome::Skipped => info!("kept existing {:?}", report.combined_path),
        }

        println!("{}", report.combined_path.display());
        Ok(())
    }
}
