use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use drift_dataset::test_util::random_vectors_normalized;

/// Writes seeded, normalized random vectors as an fvecs file.
#[derive(Parser, Debug)]
struct Command {
    output: PathBuf,
    num_vecs: usize,

    #[arg(long, default_value_t = 768)]
    dimension: usize,
    #[arg(long, default_value_t = 0x533D)]
    seed: u64,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Command::parse();
    anyhow::ensure!(args.dimension > 0, "dimension must be positive");

    let vectors = random_vectors_normalized(args.num_vecs, args.dimension, args.seed);
    vectors
        .store_fvecs(&args.output)
        .with_context(|| format!("could not write {:?}", args.output))?;

    Ok(())
}
