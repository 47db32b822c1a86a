//! Per-channel normalization with training-partition statistics.
//!
//! Every subject — training and held-out alike — is normalized with the
//! *training* partition's statistics, never its own, so validation data
//! cannot leak its distribution into the model input.  Normalization is
//! idempotent: a subject whose normalized array is already stored is
//! skipped.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::stats::ChannelStats;
use crate::store::SubjectStore;

/// `(x − mean) / std`, broadcast per channel.
///
/// The subtraction and division run in f64 (the statistics' precision)
/// before narrowing back to f32.
pub fn normalize_array(x: &Array2<f32>, stats: &ChannelStats) -> Array2<f32> {
    let xf = x.mapv(f64::from);
    let normed = (&xf - &stats.mean) / &stats.std;
    normed.mapv(|v| v as f32)
}

/// Normalize one subject and persist the result.
///
/// Returns `Ok(false)` without touching the raw data when the store
/// already holds a normalized array for this subject.
pub fn normalize_subject(
    store: &dyn SubjectStore,
    id: &str,
    stats: &ChannelStats,
) -> Result<bool> {
    if store.has_normalized(id) {
        debug!(subject = %id, "already normalized, skipping");
        return Ok(false);
    }
    let (x, _labels) = store.load_raw(id)?;
    if x.ncols() != stats.n_channels() {
        return Err(PipelineError::ChannelMismatch {
            id: id.to_string(),
            expected: stats.n_channels(),
            actual: x.ncols(),
        });
    }
    store.save_normalized(id, &normalize_array(&x, stats))?;
    debug!(subject = %id, samples = x.nrows(), "normalized signal written");
    Ok(true)
}

/// Normalize a whole subject partition, fanning out across subjects.
///
/// Each subject is handled by exactly one worker, so the idempotent
/// per-subject write is never raced.  Returns the number of subjects
/// actually (re)normalized, excluding cached skips.
pub fn normalize_partition(
    store: &dyn SubjectStore,
    subjects: &[String],
    stats: &ChannelStats,
) -> Result<usize> {
    let written: Vec<bool> = subjects
        .par_iter()
        .map(|id| normalize_subject(store, id, stats))
        .collect::<Result<_>>()?;
    let count = written.iter().filter(|w| **w).count();
    info!(
        subjects = subjects.len(),
        written = count,
        "partition normalized"
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RunningStats;
    use crate::store::MemStore;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn synth(n: usize, c: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, c), |(i, j)| {
            ((i as f32 * 0.31 + j as f32).cos() * 10.0) + j as f32
        })
    }

    fn stats_of(x: &Array2<f32>, epsilon: f64) -> ChannelStats {
        let mut agg = RunningStats::new(x.ncols());
        agg.fold(x);
        agg.finalize(epsilon).unwrap()
    }

    #[test]
    fn normalized_channels_have_zero_mean_unit_std() {
        let x = synth(500, 4);
        let stats = stats_of(&x, 0.0);
        let xn = normalize_array(&x, &stats);

        let check = stats_of(&xn, 0.0);
        for ch in 0..4 {
            assert_abs_diff_eq!(check.mean[ch], 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(check.std[ch], 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn round_trip_recovers_raw() {
        let x = synth(300, 3);
        let stats = stats_of(&x, 1e-8);
        let xn = normalize_array(&x, &stats);

        for ((i, j), &v) in xn.indexed_iter() {
            let back = v as f64 * stats.std[j] + stats.mean[j];
            assert_abs_diff_eq!(back, x[[i, j]] as f64, epsilon = 1e-4);
        }
    }

    #[test]
    fn constant_channel_normalizes_without_blowup() {
        let x = Array2::from_elem((100, 2), 7.0_f32);
        let stats = stats_of(&x, 1e-8);
        let xn = normalize_array(&x, &stats);
        // (7 − 7) / 1e-8 = 0 for every element.
        for &v in xn.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6_f32);
        }
    }

    #[test]
    fn normalize_subject_is_idempotent() {
        let store = MemStore::new();
        let x = synth(200, 3);
        store.insert("S001", x.clone(), vec!["W".into(); 200]);
        let stats = stats_of(&x, 1e-8);

        assert!(normalize_subject(&store, "S001", &stats).unwrap());
        let first = store.load_normalized("S001").unwrap();

        // Second call must skip and leave the cached array unchanged.
        assert!(!normalize_subject(&store, "S001", &stats).unwrap());
        let second = store.load_normalized("S001").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_subject_is_fatal() {
        let store = MemStore::new();
        let stats = ChannelStats {
            mean: array![0.0],
            std: array![1.0],
        };
        assert!(matches!(
            normalize_subject(&store, "S404", &stats),
            Err(PipelineError::SubjectNotFound { .. })
        ));
    }

    #[test]
    fn channel_mismatch_is_fatal() {
        let store = MemStore::new();
        store.insert("S001", synth(50, 5), vec!["W".into(); 50]);
        let stats = ChannelStats {
            mean: array![0.0, 0.0],
            std: array![1.0, 1.0],
        };
        assert!(matches!(
            normalize_subject(&store, "S001", &stats),
            Err(PipelineError::ChannelMismatch {
                expected: 2,
                actual: 5,
                ..
            })
        ));
    }
}
