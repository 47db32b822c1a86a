//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter for windowing,
//! normalization and batch generation.  All fields have defaults matching
//! the values the sleep-stage model was trained with, and the struct is
//! serde-serializable so a run's settings can be stored alongside its
//! artifacts.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Configuration for the windowed-dataset pipeline.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use somno::PipelineConfig;
///
/// let cfg = PipelineConfig {
///     window_size: 256,   // 2.56 s windows at 100 Hz
///     overlap: 64,        // slide by 192 samples
///     ..PipelineConfig::default()
/// };
/// assert_eq!(cfg.step_size(), 192);
/// ```
///
/// Or just call [`PipelineConfig::default()`] for the training settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Samples per window.
    ///
    /// Every window cut from a subject's recording has exactly this many
    /// samples; subjects shorter than one window contribute zero windows.
    ///
    /// Default: `128`.
    pub window_size: usize,

    /// Samples shared between consecutive windows.
    ///
    /// The advance distance between window starts is
    /// `step = window_size − overlap` (see [`PipelineConfig::step_size`]),
    /// which must be at least 1 — [`PipelineConfig::validate`] rejects
    /// `overlap >= window_size`.
    ///
    /// Default: `0` (non-overlapping windows).
    pub overlap: usize,

    /// Windows per emitted batch.
    ///
    /// An epoch yields `floor(total_windows / batch_size)` batches; the
    /// remainder windows are dropped rather than forming a short batch.
    ///
    /// Default: `32`.
    pub batch_size: usize,

    /// Channels per sample, fixed across all subjects.
    ///
    /// Default: `30` (the DREAMT 100 Hz channel set).
    pub n_channels: usize,

    /// Reshuffle the window order at each epoch boundary.
    ///
    /// When `false` the enumeration order (subject list order, then start
    /// offset) is preserved across all epochs — use this for validation
    /// generators and determinism tests.
    ///
    /// Default: `true`.
    pub shuffle: bool,

    /// Base seed for the epoch shuffle.
    ///
    /// The permutation for epoch `e` is derived from `seed + e` alone, so
    /// two generators with the same seed and subject list replay identical
    /// orders. No global RNG state is consulted.
    ///
    /// Default: `0`.
    pub seed: u64,

    /// Additive floor applied to the per-channel std at finalization.
    ///
    /// Keeps the std strictly positive even for a constant channel, so
    /// normalization never divides by zero.
    ///
    /// Default: `1e-8`.
    pub epsilon: f64,

    /// Maximum number of subjects whose arrays the batch generator keeps
    /// resident at once.
    ///
    /// Per-subject recordings are large; the generator loads them on demand
    /// and evicts least-recently-used entries beyond this bound.
    ///
    /// Default: `8`.
    pub cache_subjects: usize,
}

impl Default for PipelineConfig {
    /// Returns the training configuration:
    /// 128-sample windows · no overlap · batches of 32 · 30 channels.
    fn default() -> Self {
        Self {
            window_size: 128,
            overlap: 0,
            batch_size: 32,
            n_channels: 30,
            shuffle: true,
            seed: 0,
            epsilon: 1e-8,
            cache_subjects: 8,
        }
    }
}

impl PipelineConfig {
    /// Advance distance between consecutive window starts.
    ///
    /// Computed as `window_size − overlap`.  Only meaningful on a validated
    /// configuration (`overlap < window_size`).
    ///
    /// # Examples
    ///
    /// ```
    /// use somno::PipelineConfig;
    /// let cfg = PipelineConfig::default();
    /// assert_eq!(cfg.step_size(), 128);
    /// ```
    pub fn step_size(&self) -> usize {
        self.window_size - self.overlap
    }

    /// Check every pipeline precondition, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_size must be >= 1".into(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(PipelineError::InvalidConfig(format!(
                "overlap {} leaves a window step of less than 1 (window_size {})",
                self.overlap, self.window_size
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be >= 1".into(),
            ));
        }
        if self.n_channels == 0 {
            return Err(PipelineError::InvalidConfig(
                "n_channels must be >= 1".into(),
            ));
        }
        if self.cache_subjects == 0 {
            return Err(PipelineError::InvalidConfig(
                "cache_subjects must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Training/validation subject-id partitions.
///
/// Normalization statistics are computed over `train` only; *every* subject
/// (both partitions) is then normalized with those statistics, so held-out
/// subjects never leak their own distribution into the model input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectPartition {
    /// Subjects whose raw data defines the normalization statistics.
    pub train: Vec<String>,
    /// Held-out subjects, normalized with the training statistics.
    pub val: Vec<String>,
}

impl SubjectPartition {
    pub fn new(train: Vec<String>, val: Vec<String>) -> Self {
        Self { train, val }
    }

    /// Ordered split: the first `floor(len * train_ratio)` ids become the
    /// training partition, the rest validation.
    ///
    /// ```
    /// use somno::SubjectPartition;
    /// let ids: Vec<String> = (1..=10).map(|i| format!("S{i:03}")).collect();
    /// let p = SubjectPartition::split(&ids, 0.8);
    /// assert_eq!(p.train.len(), 8);
    /// assert_eq!(p.val, vec!["S009".to_string(), "S010".to_string()]);
    /// ```
    pub fn split(ids: &[String], train_ratio: f64) -> Self {
        let cut = (ids.len() as f64 * train_ratio) as usize;
        Self {
            train: ids[..cut].to_vec(),
            val: ids[cut..].to_vec(),
        }
    }

    /// All subjects, training partition first.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.train.iter().chain(self.val.iter())
    }
}
