use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, ValueEnum};
use drift_dataset::{
    config::{DatasetConfig, StageParams},
    generate::{generate_embeddings, generate_embeddings_with_word_pollution},
    model::Embedder,
    pipeline::generate_queries,
    pollution::{Pollution, DEFAULT_FRACTION},
};
use tracing::info;

/// The configured stage a command works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    Base,
    Drift,
    Queries,
}

impl Stage {
    pub fn params(self, config: &DatasetConfig) -> &StageParams {
        match self {
            Self::Base => &config.base,
            Self::Drift => &config.drift,
            Self::Queries => &config.queries,
        }
    }

    fn params_mut(self, config: &mut DatasetConfig) -> &mut StageParams {
        match self {
            Self::Base => &mut config.base,
            Self::Drift => &mut config.drift,
            Self::Queries => &mut config.queries,
        }
    }
}

/// Command line overrides for one stage of the configuration.
#[derive(Args)]
pub struct StageArgs {
    /// the c4 `en` directory. embeddings are written below it
    #[arg(long)]
    dataset_dir: Option<PathBuf>,

    /// index of the first corpus file
    #[arg(long)]
    init_file: Option<usize>,

    #[arg(long)]
    number_of_files: Option<usize>,

    /// number of embeddings to sample
    #[arg(short, long)]
    num_embeddings: Option<usize>,

    /// output file name prefix
    #[arg(long)]
    prefix: Option<String>,

    #[arg(long)]
    seed: Option<u64>,
}

impl StageArgs {
    pub fn apply(&self, config: &DatasetConfig, stage: Stage) -> DatasetConfig {
        let mut config = config.clone();
        if let Some(dataset_dir) = &self.dataset_dir {
            config.dataset_dir = dataset_dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        let params = stage.params_mut(&mut config);
        if let Some(init_file) = self.init_file {
            params.init_file = init_file;
        }
        if let Some(number_of_files) = self.number_of_files {
            params.number_of_files = number_of_files;
        }
        if let Some(num_embeddings) = self.num_embeddings {
            params.num_embeddings = num_embeddings;
        }
        if let Some(prefix) = &self.prefix {
            params.prefix = prefix.clone();
        }

        config
    }
}

pub fn load_model(config: &DatasetConfig) -> Result<Embedder, anyhow::Error> {
    info!(
        "loading {} embedder with dimension {}",
        config.embedder.identity(),
        config.dimension
    );
    config
        .embedder
        .load(config.dimension)
        .context("could not load embedding model")
}

#[derive(Parser)]
pub struct BaseCommand {
    #[command(flatten)]
    stage: StageArgs,
}

impl BaseCommand {
    pub async fn execute(&self, config: &DatasetConfig) -> Result<(), anyhow::Error> {
        let config = self.stage.apply(config, Stage::Base);
        let model = load_model(&config)?;
        let path = generate_embeddings(
            &model,
            &config.request(&config.base),
            &config.location(&config.base),
        )
        .await
        .context("could not generate embeddings")?;

        println!("{}", path.display());
        Ok(())
    }
}

#[derive(Parser)]
pub struct PollutedCommand {
    #[command(flatten)]
    stage: StageArgs,

    /// word injected into polluted documents
    #[arg(short, long)]
    keyword: Option<String>,

    /// probability that a document is polluted. defaults to the configured
    /// fraction, or 0.3
    #[arg(short, long)]
    fraction: Option<f64>,
}

impl PollutedCommand {
    fn pollution(&self, config: &DatasetConfig) -> Result<Pollution, anyhow::Error> {
        let mut pollution = match (&config.drift.pollution, &self.keyword) {
            (Some(pollution), _) => pollution.clone(),
            (None, Some(keyword)) => Pollution::new(keyword.clone(), DEFAULT_FRACTION),
            (None, None) => {
                anyhow::bail!("no pollution configured for the drift stage and no --keyword given")
            }
        };
        if let Some(keyword) = &self.keyword {
            pollution.keyword = keyword.clone();
        }
        if let Some(fraction) = self.fraction {
            pollution.fraction = fraction;
        }

        Ok(pollution)
    }

    pub async fn execute(&self, config: &DatasetConfig) -> Result<(), anyhow::Error> {
        let config = self.stage.apply(config, Stage::Drift);
        let pollution = self.pollution(&config)?;
        let model = load_model(&config)?;
        let path = generate_embeddings_with_word_pollution(
            &model,
            &config.request(&config.drift),
            &config.location(&config.drift),
            &pollution.keyword,
            pollution.fraction,
        )
        .await
        .context("could not generate polluted embeddings")?;

        println!("{}", path.display());
        Ok(())
    }
}

#[derive(Parser)]
pub struct QueriesCommand {
    #[command(flatten)]
    stage: StageArgs,
}

impl QueriesCommand {
    pub async fn execute(&self, config: &DatasetConfig) -> Result<(), anyhow::Error> {
        let config = self.stage.apply(config, Stage::Queries);
        let model = load_model(&config)?;
        let path = generate_queries(&model, &config)
            .await
            .context("could not generate query embeddings")?;

        println!("{}", path.display());
        Ok(())
    }
}
