use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use drift_dataset::{fvecs::count_fvecs, vectors::Vectors};

#[derive(Parser)]
pub struct InspectCommand {
    path: PathBuf,

    /// read every record instead of deriving the count from the file length
    #[arg(long)]
    verify: bool,
}

impl InspectCommand {
    fn read_all(&self) -> Result<(usize, Option<usize>), anyhow::Error> {
        let size = fs::metadata(&self.path)
            .with_context(|| format!("could not open {:?}", self.path))?
            .len();
        if size == 0 {
            return Ok((0, None));
        }
        let vectors = Vectors::from_fvecs(&self.path)
            .with_context(|| format!("could not read {:?}", self.path))?;

        Ok((vectors.num_vecs(), Some(vectors.dimension())))
    }

    pub fn execute(&self) -> Result<(), anyhow::Error> {
        let (count, dimension) = if self.verify {
            self.read_all()?
        } else {
            count_fvecs(&self.path).with_context(|| format!("could not inspect {:?}", self.path))?
        };

        println!(
            "{}",
            serde_json::json!({
                "path": self.path.display().to_string(),
                "count": count,
                "dimension": dimension,
            })
        );
        Ok(())
    }
}
