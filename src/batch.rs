//! Shuffled fixed-size batch generation.
//!
//! [`BatchGenerator`] owns the flattened (subject, start-offset) window
//! list, an explicit seed plus epoch counter, and a small bounded cache of
//! per-subject arrays.  Each epoch's window order is re-derived from
//! `(seed, epoch)` alone — no hidden global RNG — so a given order can be
//! replayed exactly.
//!
//! Batches are materialized fresh on every call.  A window whose label
//! cannot be resolved contributes a sentinel slot: an all-zero signal
//! window and an all-zero label row.  Sentinel slots are *kept*, so every
//! batch has exactly `batch_size` rows; consumers that want to down-weight
//! them can detect the all-zero label row.

use ndarray::{s, Array2, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::label::LabelMap;
use crate::store::SubjectStore;
use crate::window::{Window, WindowIndex};

/// One materialized batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Window stack, shape `[batch_size, window_size, n_channels, 1]`
    /// (trailing unit axis for 2-D convolution consumers).
    pub signals: Array4<f32>,
    /// One-hot label stack, shape `[batch_size, num_classes]`.
    /// All-zero rows mark unresolved labels.
    pub labels: Array2<f32>,
}

struct SubjectArrays {
    signal: Array2<f32>,
    labels: Vec<String>,
}

/// Bounded least-recently-used cache of per-subject arrays.
///
/// Recordings are large; only `capacity` subjects are ever resident at
/// once, loaded on demand and evicted oldest-first.
struct SubjectCache {
    capacity: usize,
    entries: VecDeque<(String, Arc<SubjectArrays>)>,
}

impl SubjectCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, id: &str) -> Option<Arc<SubjectArrays>> {
        let pos = self.entries.iter().position(|(k, _)| k == id)?;
        let entry = self.entries.remove(pos)?;
        let hit = entry.1.clone();
        self.entries.push_back(entry);
        Some(hit)
    }

    fn put(&mut self, id: String, arrays: Arc<SubjectArrays>) {
        if self.entries.len() == self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                debug!(subject = %evicted, "evicted from subject cache");
            }
        }
        self.entries.push_back((id, arrays));
    }
}

/// Pull-based batch source over a subject list.
///
/// Consumer contract: call [`BatchGenerator::get_batch`] for indices
/// `0..num_batches()`, then [`BatchGenerator::on_epoch_end`] once per
/// completed epoch before requesting the next epoch's batches.
///
/// Requires every subject in the list to have a *normalized* array in the
/// store (run [`crate::prepare`] first).
pub struct BatchGenerator<'a> {
    store: &'a dyn SubjectStore,
    subjects: Vec<String>,
    labels: LabelMap,
    cfg: PipelineConfig,
    index: WindowIndex,
    /// Current epoch's permutation into `index`.
    order: Vec<usize>,
    epoch: u64,
    cache: SubjectCache,
}

impl<'a> BatchGenerator<'a> {
    /// Build the window index over `subjects` and derive epoch 0's order.
    pub fn new(
        store: &'a dyn SubjectStore,
        subjects: Vec<String>,
        labels: LabelMap,
        cfg: PipelineConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let index = WindowIndex::build(store, &subjects, cfg.window_size, cfg.step_size())?;
        debug!(
            subjects = subjects.len(),
            windows = index.len(),
            batches = index.len() / cfg.batch_size,
            "window index built"
        );
        let order = (0..index.len()).collect();
        let cache = SubjectCache::new(cfg.cache_subjects);
        let mut gen = Self {
            store,
            subjects,
            labels,
            cfg,
            index,
            order,
            epoch: 0,
            cache,
        };
        gen.reshuffle();
        Ok(gen)
    }

    /// Batches per epoch: `floor(total_windows / batch_size)`.
    ///
    /// Remainder windows are dropped; there is never a short final batch.
    pub fn num_batches(&self) -> usize {
        self.index.len() / self.cfg.batch_size
    }

    /// Total windows across the subject list (before batch truncation).
    pub fn num_windows(&self) -> usize {
        self.index.len()
    }

    pub fn num_classes(&self) -> usize {
        self.labels.num_classes()
    }

    /// Epochs completed so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The current epoch's window order, as an explicit value tests can
    /// assert against.
    pub fn window_order(&self) -> Vec<Window> {
        self.order.iter().map(|&i| self.index.get(i)).collect()
    }

    /// Advance to the next epoch, re-deriving the window order.
    pub fn on_epoch_end(&mut self) {
        self.epoch += 1;
        self.reshuffle();
    }

    /// Materialize the `index`-th batch of the current epoch.
    ///
    /// `index` must satisfy `index < num_batches()`; out-of-range requests
    /// are a contract violation, never clamped.
    pub fn get_batch(&mut self, index: usize) -> Result<Batch> {
        let len = self.num_batches();
        if index >= len {
            return Err(PipelineError::BatchIndexOutOfRange { index, len });
        }
        let (b, w, c) = (
            self.cfg.batch_size,
            self.cfg.window_size,
            self.cfg.n_channels,
        );
        let picks: Vec<usize> = self.order[index * b..(index + 1) * b].to_vec();

        let mut signals = Array4::<f32>::zeros((b, w, c, 1));
        let mut labels = Array2::<f32>::zeros((b, self.labels.num_classes()));

        for (slot, wi) in picks.into_iter().enumerate() {
            let win = self.index.get(wi);
            let id = self.subjects[win.subject].clone();
            let subj = self.fetch(&id)?;
            let end = win.start + w;
            if end > subj.signal.nrows() {
                return Err(PipelineError::Format(format!(
                    "window [{}, {end}) exceeds subject {id} length {}",
                    win.start,
                    subj.signal.nrows()
                )));
            }
            // Label-at-window-end policy: the class describes the state at
            // the window's last sample.
            let class = match self.labels.resolve(&subj.labels[end - 1]) {
                Some(class) => class,
                None => continue, // sentinel slot stays all-zero
            };
            signals
                .slice_mut(s![slot, .., .., 0])
                .assign(&subj.signal.slice(s![win.start..end, ..]));
            labels.row_mut(slot).assign(&self.labels.one_hot(class));
        }
        Ok(Batch { signals, labels })
    }

    fn epoch_seed(&self) -> u64 {
        self.cfg.seed.wrapping_add(self.epoch)
    }

    /// Re-derive the order from enumeration order plus `(seed, epoch)`.
    fn reshuffle(&mut self) {
        self.order = (0..self.index.len()).collect();
        if self.cfg.shuffle {
            let mut rng = StdRng::seed_from_u64(self.epoch_seed());
            self.order.shuffle(&mut rng);
        }
    }

    fn fetch(&mut self, id: &str) -> Result<Arc<SubjectArrays>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(hit);
        }
        let signal = self.store.load_normalized(id)?;
        let labels = self.store.load_labels(id)?;
        if signal.ncols() != self.cfg.n_channels {
            return Err(PipelineError::ChannelMismatch {
                id: id.to_string(),
                expected: self.cfg.n_channels,
                actual: signal.ncols(),
            });
        }
        if labels.len() != signal.nrows() {
            return Err(PipelineError::Format(format!(
                "subject {id}: {} labels for {} samples",
                labels.len(),
                signal.nrows()
            )));
        }
        let arrays = Arc::new(SubjectArrays { signal, labels });
        self.cache.put(id.to_string(), arrays.clone());
        Ok(arrays)
    }
}
