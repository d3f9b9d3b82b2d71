use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use drift_dataset::fvecs::append_fvecs;

#[derive(Parser)]
pub struct AppendCommand {
    /// file whose vectors come first
    prefix: PathBuf,
    /// file whose vectors are written after those of `prefix`
    suffix: PathBuf,
    /// combined file. replaced if it exists
    output: PathBuf,
}

impl AppendCommand {
    pub fn execute(&self) -> Result<(), anyhow::Error> {
        let count = append_fvecs(&self.suffix, &self.prefix, &self.output).with_context(|| {
            format!(
                "could not append {:?} to {:?} into {:?}",
                self.suffix, self.prefix, self.output
            )
        })?;

        println!("{count}");
        Ok(())
    }
}
