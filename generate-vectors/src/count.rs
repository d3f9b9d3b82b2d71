use anyhow::Context;
use clap::Parser;
use drift_dataset::{config::DatasetConfig, generate::count_embeddings};

use crate::stage::{Stage, StageArgs};

#[derive(Parser)]
pub struct CountCommand {
    /// which configured stage's corpus slice to count
    #[arg(long, value_enum, default_value_t = Stage::Base)]
    stage: Stage,

    #[command(flatten)]
    overrides: StageArgs,
}

impl CountCommand {
    pub fn execute(&self, config: &DatasetConfig) -> Result<(), anyhow::Error> {
        let config = self.overrides.apply(config, self.stage);
        let request = config.request(self.stage.params(&config));
        let count = count_embeddings(&request, &config.dataset_dir)
            .context("could not count embeddings")?;

        println!("{count}");
        Ok(())
    }
}
