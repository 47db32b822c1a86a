//! # somno — sleep-stage dataset preparation in pure Rust
//!
//! `somno` turns per-subject multi-channel physiological recordings with
//! aligned sleep-stage labels into shuffled, fixed-size training batches:
//! it slices each recording into fixed-length (possibly overlapping)
//! windows, normalizes channels with statistics computed once over a
//! training partition, and serves `(window tensor, one-hot label)` batches
//! epoch over epoch, reproducibly.
//!
//! ## Pipeline overview
//!
//! ```text
//! <processed dir>/{S###}_raw.safetensors      [N, 30] f32 signal + stage labels
//!   │
//!   ├─ stats::compute_or_load()   per-channel mean/std streamed over the
//!   │                             training partition, one subject at a time
//!   │                             → norm_stats.safetensors (computed once)
//!   ├─ normalize                  (x − μ) / σ per channel, every subject,
//!   │                             → {S###}_norm.safetensors (written once)
//!   └─ BatchGenerator             128-sample windows, label at window end,
//!        │                        seeded per-epoch shuffle
//!        └─→ Batch { signals [32, 128, 30, 1], labels [32, 7] }
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use somno::{prepare, BatchGenerator, LabelMap, PipelineConfig, SubjectPartition};
//! use somno::store::SubjectDir;
//!
//! let store = SubjectDir::new("data/processed");
//! let cfg = PipelineConfig::default();
//! let partition = SubjectPartition::new(
//!     vec!["S002".into(), "S003".into(), "S004".into()],
//!     vec!["S005".into()],
//! );
//!
//! // One-time preparation: statistics over the training partition, then
//! // normalized arrays for every subject. Re-runs are cheap no-ops.
//! prepare(&store, &partition, &cfg).unwrap();
//!
//! // Shuffled training batches.
//! let mut train = BatchGenerator::new(
//!     &store,
//!     partition.train.clone(),
//!     LabelMap::sleep_stages(),
//!     cfg,
//! )
//! .unwrap();
//!
//! for _epoch in 0..20 {
//!     for i in 0..train.num_batches() {
//!         let batch = train.get_batch(i).unwrap();
//!         // feed batch.signals / batch.labels to the model
//!     }
//!     train.on_epoch_end();
//! }
//! ```
//!
//! Unresolvable stage labels (tokens outside [`LabelMap`]'s vocabulary)
//! appear in batches as sentinel rows — all-zero window *and* all-zero
//! label — rather than being dropped; consumers can detect and down-weight
//! them via the zero label row.

pub mod batch;
pub mod config;
pub mod error;
pub mod label;
pub mod normalize;
pub mod stats;
pub mod store;
pub mod window;

use tracing::info;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `somno::Foo` without having to know the internal module layout.

// batch
pub use batch::{Batch, BatchGenerator};

// config
pub use config::{PipelineConfig, SubjectPartition};

// error
pub use error::{PipelineError, Result};

// label
pub use label::LabelMap;

// normalize
pub use normalize::{normalize_array, normalize_partition, normalize_subject};

// stats
pub use stats::{compute_incremental, compute_or_load, ChannelStats, RunningStats};

// store
pub use store::{MemStore, StWriter, SubjectDir, SubjectStore};

// window
pub use window::{window_starts, Window, WindowIndex};

/// Run the **one-time preparation pass** over a dataset.
///
/// This is the upstream half of the pipeline, run once before training:
///
/// 1. Load the persisted statistics artifact, or compute per-channel
///    mean/std by streaming over `partition.train` in its given order and
///    persist the result.
/// 2. Normalize every subject — training *and* validation — with those
///    statistics, skipping subjects whose normalized array already exists.
///
/// Validation subjects are never normalized with their own statistics;
/// using the training partition's statistics for everything is what keeps
/// held-out data leak-free.
///
/// # Errors
///
/// Fails if any subject's raw array is missing, if a subject's channel
/// count disagrees with the statistics, if the training partition holds
/// zero samples, or on any store I/O failure. Re-running after a partial
/// failure resumes where it left off (both stages are idempotent).
///
/// # Examples
///
/// ```no_run
/// use somno::store::SubjectDir;
/// use somno::{prepare, PipelineConfig, SubjectPartition};
///
/// let store = SubjectDir::new("data/processed");
/// let ids: Vec<String> = (2..=10).map(|i| format!("S{i:03}")).collect();
/// let partition = SubjectPartition::split(&ids, 0.8);
/// let stats = prepare(&store, &partition, &PipelineConfig::default()).unwrap();
/// assert_eq!(stats.n_channels(), 30);
/// ```
pub fn prepare(
    store: &dyn SubjectStore,
    partition: &SubjectPartition,
    cfg: &PipelineConfig,
) -> Result<ChannelStats> {
    cfg.validate()?;
    let stats = stats::compute_or_load(store, &partition.train, cfg.epsilon)?;
    if stats.n_channels() != cfg.n_channels {
        return Err(PipelineError::InvalidConfig(format!(
            "statistics cover {} channels but n_channels is {}",
            stats.n_channels(),
            cfg.n_channels
        )));
    }
    let written = normalize::normalize_partition(store, &partition.train, &stats)?
        + normalize::normalize_partition(store, &partition.val, &stats)?;
    info!(
        train = partition.train.len(),
        val = partition.val.len(),
        written,
        "preparation complete"
    );
    Ok(stats)
}
