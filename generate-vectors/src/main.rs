use std::path::PathBuf;

use anyhow::Context;
use append::AppendCommand;
use clap::Parser;
use count::CountCommand;
use drift::DriftCommand;
use drift_dataset::config::DatasetConfig;
use inspect::InspectCommand;
use stage::{BaseCommand, PollutedCommand, QueriesCommand};
use tracing_subscriber::EnvFilter;

mod append;
mod count;
mod drift;
mod inspect;
mod stage;

#[derive(Parser)]
struct Command {
    #[arg(short, long, global = true)]
    /// path to configuration file specifying how vectors are to be generated
    config: Option<PathBuf>,

    /// log filter, used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser)]
enum Subcommand {
    /// Generate base and drift vectors and concatenate them into the drift dataset
    Drift(DriftCommand),
    /// Generate embeddings from a corpus slice
    Base(BaseCommand),
    /// Generate embeddings from a corpus slice with keyword pollution
    Polluted(PollutedCommand),
    /// Generate query embeddings from the validation split
    Queries(QueriesCommand),
    /// Count the embeddings a corpus slice can supply, without any inference
    Count(CountCommand),
    /// Write the vectors of one fvecs file after those of another
    Append(AppendCommand),
    /// Print vector count and dimension of an fvecs file
    Inspect(InspectCommand),
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Command::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => DatasetConfig::from_file(path)
            .with_context(|| format!("could not load configuration file {path:?}"))?,
        None => DatasetConfig::default(),
    };

    match args.subcommand {
        Subcommand::Drift(dc) => dc.execute(&config).await,
        Subcommand::Base(bc) => bc.execute(&config).await,
        Subcommand::Polluted(pc) => pc.execute(&config).await,
        Subcommand::Queries(qc) => qc.execute(&config).await,
        Subcommand::Count(cc) => cc.execute(&config),
        Subcommand::Append(ac) => ac.execute(),
        Subcommand::Inspect(ic) => ic.execute(),
    }
}
