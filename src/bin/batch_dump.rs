/// batch_dump: build a batch generator over already-prepared subjects,
/// materialize the first batches of one epoch, and write every tensor to a
/// safetensors file for inspection or comparison against another pipeline.
///
/// Output keys:
///   signals_N   [B, W, C, 1]  f32  window stack of batch N
///   labels_N    [B, K]        f32  one-hot stack of batch N (zero rows = sentinel)
///   n_batches   [1]           i32
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use somno::store::SubjectDir;
use somno::{BatchGenerator, LabelMap, PipelineConfig, StWriter};

#[derive(Parser, Debug)]
#[command(name = "batch_dump")]
struct Args {
    /// Directory of per-subject safetensors arrays (already prepared)
    #[arg(long)]
    dir: PathBuf,

    /// Subject ids to draw windows from (comma-separated)
    #[arg(long)]
    subjects: String,

    /// Output safetensors path
    #[arg(long)]
    output: PathBuf,

    /// Number of batches to materialize
    #[arg(long, default_value_t = 4)]
    batches: usize,

    /// Pipeline configuration JSON (defaults used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the shuffle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Keep enumeration order instead of shuffling
    #[arg(long, default_value_t = false)]
    no_shuffle: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut cfg: PipelineConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if args.no_shuffle {
        cfg.shuffle = false;
    }

    let subjects: Vec<String> = args
        .subjects
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let store = SubjectDir::new(&args.dir);

    let t_index = Instant::now();
    let mut gen = BatchGenerator::new(&store, subjects, LabelMap::sleep_stages(), cfg)?;
    eprintln!(
        "indexed {} windows → {} batches in {:.1} ms",
        gen.num_windows(),
        gen.num_batches(),
        t_index.elapsed().as_secs_f64() * 1000.0
    );

    let n = args.batches.min(gen.num_batches());
    let mut w = StWriter::new();
    for i in 0..n {
        let t_batch = Instant::now();
        let batch = gen.get_batch(i)?;
        eprintln!(
            "batch {i}: signals {:?} labels {:?} in {:.2} ms",
            batch.signals.shape(),
            batch.labels.shape(),
            t_batch.elapsed().as_secs_f64() * 1000.0
        );

        let signals: Vec<f32> = batch.signals.iter().copied().collect();
        w.add_f32(&format!("signals_{i}"), &signals, batch.signals.shape());
        let labels: Vec<f32> = batch.labels.iter().copied().collect();
        w.add_f32(&format!("labels_{i}"), &labels, batch.labels.shape());
    }
    w.add_i32("n_batches", &[n as i32], &[1]);
    w.write(&args.output)?;

    eprintln!("Written → {}", args.output.display());
    Ok(())
}
