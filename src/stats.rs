//! Incremental per-channel normalization statistics.
//!
//! Mean and variance over the training partition are folded one subject at
//! a time, so no two subjects' arrays are ever resident together.
//! Accumulation is f64 regardless of the f32 signal data.
//!
//! Each subject array is summarized as a partition aggregate
//! `(count, mean[C], M2[C])` with `M2 = Σ(x − mean)²`, and aggregates are
//! combined with the numerically stable two-partition formula:
//!
//! ```text
//! n     = n_a + n_b
//! delta = mean_b − mean_a
//! mean  = mean_a + delta · n_b / n
//! M2    = M2_a + M2_b + delta² · n_a · n_b / n
//! ```
//!
//! Folding subjects in a fixed order is reproducible; the same combine can
//! also be applied pairwise in a parallel reduction tree, which is
//! numerically close to — but not bit-identical with — the sequential
//! fold.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::store::SubjectStore;

/// Running per-channel aggregate: sample count, mean and sum of squared
/// deviations from that mean (M2).
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningStats {
    /// Empty aggregate over `n_channels` channels.
    pub fn new(n_channels: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(n_channels),
            m2: Array1::zeros(n_channels),
        }
    }

    /// Partition aggregate of a single `[N, C]` array.
    pub fn from_array(x: &Array2<f32>) -> Self {
        let n = x.nrows();
        if n == 0 {
            return Self::new(x.ncols());
        }
        let xf = x.mapv(f64::from);
        let mean = xf.sum_axis(Axis(0)) / n as f64;
        let dev = &xf - &mean;
        let m2 = (&dev * &dev).sum_axis(Axis(0));
        Self {
            count: n as u64,
            mean,
            m2,
        }
    }

    /// Samples aggregated so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn n_channels(&self) -> usize {
        self.mean.len()
    }

    /// Fold one subject's `[N, C]` raw array into the running aggregate.
    ///
    /// One streaming step: the array is summarized as a partition aggregate
    /// and combined into the running state, so earlier subjects' data is
    /// never revisited.  An empty array is a no-op.
    pub fn fold(&mut self, x: &Array2<f32>) {
        debug_assert_eq!(x.ncols(), self.n_channels());
        self.merge(&Self::from_array(x));
    }

    /// Combine another aggregate into this one.
    ///
    /// The combine is symmetric, so aggregates may be reduced sequentially
    /// or in a fixed pairwise tree; the two strategies agree to floating
    /// rounding but are not bit-identical.
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let (na, nb) = (self.count as f64, other.count as f64);
        let total = na + nb;
        let delta = &other.mean - &self.mean;
        self.mean = &self.mean + &(&delta * (nb / total));
        self.m2 = &self.m2 + &other.m2 + &((&delta * &delta) * (na * nb / total));
        self.count += other.count;
    }

    /// Finalize into per-channel mean and strictly positive std:
    /// `std = sqrt(M2 / count) + epsilon`.
    pub fn finalize(&self, epsilon: f64) -> Result<ChannelStats> {
        if self.count == 0 {
            return Err(PipelineError::EmptyPartition);
        }
        let variance = &self.m2 / self.count as f64;
        Ok(ChannelStats {
            mean: self.mean.clone(),
            std: variance.mapv(|v| v.sqrt() + epsilon),
        })
    }
}

/// Finalized per-channel normalization statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub mean: Array1<f64>,
    /// Strictly positive (epsilon floor applied at finalization).
    pub std: Array1<f64>,
}

impl ChannelStats {
    pub fn n_channels(&self) -> usize {
        self.mean.len()
    }
}

/// Compute statistics over `subjects` in the given order.
///
/// Subjects are folded strictly sequentially — each step depends on the
/// prior aggregate — and the subject order must be kept fixed for
/// reproducible rounding.
pub fn compute_incremental(
    store: &dyn SubjectStore,
    subjects: &[String],
    epsilon: f64,
) -> Result<ChannelStats> {
    let mut agg: Option<RunningStats> = None;
    for id in subjects {
        let (x, _labels) = store.load_raw(id)?;
        let agg = agg.get_or_insert_with(|| RunningStats::new(x.ncols()));
        if x.ncols() != agg.n_channels() {
            return Err(PipelineError::ChannelMismatch {
                id: id.clone(),
                expected: agg.n_channels(),
                actual: x.ncols(),
            });
        }
        agg.fold(&x);
        debug!(subject = %id, count = agg.count(), "folded subject into running statistics");
    }
    match agg {
        Some(agg) => agg.finalize(epsilon),
        None => Err(PipelineError::EmptyPartition),
    }
}

/// Load the persisted statistics artifact if the store has one, otherwise
/// compute over the training partition and persist the result.
pub fn compute_or_load(
    store: &dyn SubjectStore,
    subjects: &[String],
    epsilon: f64,
) -> Result<ChannelStats> {
    if store.has_statistics() {
        debug!("statistics artifact present, skipping recomputation");
        return store.load_statistics();
    }
    let stats = compute_incremental(store, subjects, epsilon)?;
    store.save_statistics(&stats)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::concatenate;

    /// Deterministic [N, C] test signal (no RNG).
    fn synth(n: usize, c: usize, phase: f64) -> Array2<f32> {
        Array2::from_shape_fn((n, c), |(i, j)| {
            ((i as f64 * 0.13 + j as f64 * 1.7 + phase).sin() * (j as f64 + 1.0)) as f32
        })
    }

    fn direct_stats(x: &Array2<f32>) -> (Array1<f64>, Array1<f64>) {
        let xf = x.mapv(f64::from);
        let mean = xf.sum_axis(Axis(0)) / x.nrows() as f64;
        let dev = &xf - &mean;
        let var = (&dev * &dev).sum_axis(Axis(0)) / x.nrows() as f64;
        (mean, var)
    }

    #[test]
    fn fold_matches_concatenated_computation() {
        let parts = [synth(400, 5, 0.0), synth(251, 5, 2.0), synth(97, 5, 4.5)];

        let mut agg = RunningStats::new(5);
        for p in &parts {
            agg.fold(p);
        }
        let folded = agg.finalize(0.0).unwrap();

        let whole = concatenate(
            Axis(0),
            &[parts[0].view(), parts[1].view(), parts[2].view()],
        )
        .unwrap();
        let (mean, var) = direct_stats(&whole);

        for ch in 0..5 {
            assert_relative_eq!(folded.mean[ch], mean[ch], max_relative = 1e-6);
            assert_relative_eq!(folded.std[ch], var[ch].sqrt(), max_relative = 1e-6);
        }
    }

    #[test]
    fn tree_merge_matches_sequential_fold_within_tolerance() {
        let parts = [
            synth(300, 4, 0.3),
            synth(500, 4, 1.1),
            synth(120, 4, 2.9),
            synth(777, 4, 5.0),
        ];

        let mut seq = RunningStats::new(4);
        for p in &parts {
            seq.fold(p);
        }

        // Balanced pairwise tree: (0+1) + (2+3).
        let mut left = RunningStats::from_array(&parts[0]);
        left.merge(&RunningStats::from_array(&parts[1]));
        let mut right = RunningStats::from_array(&parts[2]);
        right.merge(&RunningStats::from_array(&parts[3]));
        left.merge(&right);

        let s = seq.finalize(0.0).unwrap();
        let t = left.finalize(0.0).unwrap();
        for ch in 0..4 {
            assert_relative_eq!(s.mean[ch], t.mean[ch], max_relative = 1e-9);
            assert_relative_eq!(s.std[ch], t.std[ch], max_relative = 1e-9);
        }
    }

    #[test]
    fn merge_into_empty_copies() {
        let mut a = RunningStats::new(3);
        let b = RunningStats::from_array(&synth(64, 3, 0.0));
        a.merge(&b);
        assert_eq!(a.count(), 64);
        let sa = a.finalize(0.0).unwrap();
        let sb = b.finalize(0.0).unwrap();
        assert_eq!(sa.mean, sb.mean);
    }

    #[test]
    fn constant_channel_gets_epsilon_floor() {
        let x = Array2::from_elem((200, 2), 3.5_f32);
        let mut agg = RunningStats::new(2);
        agg.fold(&x);
        let stats = agg.finalize(1e-8).unwrap();
        for ch in 0..2 {
            assert!(stats.std[ch] > 0.0);
            assert_relative_eq!(stats.std[ch], 1e-8);
            assert_relative_eq!(stats.mean[ch], 3.5, max_relative = 1e-12);
        }
    }

    #[test]
    fn empty_fold_is_noop() {
        let mut agg = RunningStats::new(3);
        agg.fold(&Array2::zeros((0, 3)));
        assert_eq!(agg.count(), 0);
        assert!(matches!(
            agg.finalize(1e-8),
            Err(PipelineError::EmptyPartition)
        ));
    }

    #[test]
    fn fold_order_changes_rounding_not_result() {
        let a = synth(321, 3, 0.0);
        let b = synth(654, 3, 3.3);

        let mut ab = RunningStats::new(3);
        ab.fold(&a);
        ab.fold(&b);
        let mut ba = RunningStats::new(3);
        ba.fold(&b);
        ba.fold(&a);

        let sab = ab.finalize(0.0).unwrap();
        let sba = ba.finalize(0.0).unwrap();
        for ch in 0..3 {
            assert_relative_eq!(sab.mean[ch], sba.mean[ch], max_relative = 1e-10);
            assert_relative_eq!(sab.std[ch], sba.std[ch], max_relative = 1e-10);
        }
    }
}
