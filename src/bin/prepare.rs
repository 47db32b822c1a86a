use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use somno::store::SubjectDir;
use somno::{prepare, PipelineConfig, SubjectPartition};

#[derive(Parser)]
#[command(
    name = "prepare",
    about = "Compute normalization statistics and normalized arrays for a processed dataset directory"
)]
struct Args {
    /// Directory of per-subject safetensors arrays
    #[arg(long)]
    dir: PathBuf,

    /// Training subject ids (comma-separated)
    #[arg(long)]
    train: String,

    /// Validation subject ids (comma-separated)
    #[arg(long, default_value = "")]
    val: String,

    /// Pipeline configuration JSON (defaults used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn split_ids(s: &str) -> Vec<String> {
    s.split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let cfg: PipelineConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };

    let partition = SubjectPartition::new(split_ids(&args.train), split_ids(&args.val));
    println!(
        "Preparing {} train + {} val subjects in {}",
        partition.train.len(),
        partition.val.len(),
        args.dir.display()
    );

    let store = SubjectDir::new(&args.dir);
    let stats = prepare(&store, &partition, &cfg)?;

    println!(
        "Statistics over {} channels (mean[0] = {:.4}, std[0] = {:.4})",
        stats.n_channels(),
        stats.mean[0],
        stats.std[0]
    );
    println!("Done.");
    Ok(())
}
