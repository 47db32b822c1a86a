//! Window indexing over per-subject recordings.
//!
//! Splits each subject's [N, C] recording into fixed-length windows that
//! advance by `step = window_size − overlap` samples, dropping any trailing
//! samples that do not fill a complete window.  A subject shorter than one
//! window contributes zero windows.
//!
//! A window's label is drawn from its *last* sample
//! (`start + window_size − 1`), so the class describes the state at the
//! window's end.

use tracing::debug;

use crate::error::Result;
use crate::store::SubjectStore;

/// Start offsets of every complete window in a recording of `n_samples`.
///
/// Offsets are `0, step, 2·step, …`; the count is
/// `floor((n_samples − window_size) / step) + 1`, or zero when the
/// recording is shorter than one window.
///
/// # Panics
///
/// `step` must be at least 1 (callers validate this via
/// [`crate::PipelineConfig::validate`]).
pub fn window_starts(n_samples: usize, window_size: usize, step: usize) -> Vec<usize> {
    assert!(step >= 1, "window step must be >= 1");
    if n_samples < window_size {
        return Vec::new();
    }
    let count = (n_samples - window_size) / step + 1;
    (0..count).map(|i| i * step).collect()
}

/// One window: an index into the generator's subject list plus the start
/// offset within that subject's recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Position of the owning subject in the subject list.
    pub subject: usize,
    /// First sample of the window.
    pub start: usize,
}

/// The flattened window list across a whole subject list, in enumeration
/// order (subject list order, then ascending start offset).
///
/// Building the index reads only each subject's sample count from the
/// store, never the array data.
#[derive(Debug, Clone)]
pub struct WindowIndex {
    windows: Vec<Window>,
}

impl WindowIndex {
    pub fn build(
        store: &dyn SubjectStore,
        subjects: &[String],
        window_size: usize,
        step: usize,
    ) -> Result<Self> {
        let mut windows = Vec::new();
        for (subject, id) in subjects.iter().enumerate() {
            let n = store.sample_count(id)?;
            let starts = window_starts(n, window_size, step);
            debug!(subject = %id, samples = n, windows = starts.len(), "indexed subject");
            windows.extend(starts.into_iter().map(|start| Window { subject, start }));
        }
        Ok(Self { windows })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, i: usize) -> Window {
        self.windows[i]
    }

    pub fn as_slice(&self) -> &[Window] {
        &self.windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_recording_has_no_windows() {
        assert!(window_starts(50, 128, 128).is_empty());
        assert!(window_starts(127, 128, 128).is_empty());
        assert!(window_starts(0, 128, 128).is_empty());
    }

    #[test]
    fn exact_fit_gives_one_window() {
        assert_eq!(window_starts(128, 128, 128), vec![0]);
    }

    #[test]
    fn non_overlapping_count_and_starts() {
        // 300 samples, 128-sample windows, step 128 → floor(172/128)+1 = 2.
        assert_eq!(window_starts(300, 128, 128), vec![0, 128]);
    }

    #[test]
    fn overlap_increases_count() {
        // step 64: floor((300-128)/64)+1 = 3 → starts 0, 64, 128.
        assert_eq!(window_starts(300, 128, 64), vec![0, 64, 128]);
    }

    #[test]
    fn step_one_is_dense() {
        let starts = window_starts(130, 128, 1);
        assert_eq!(starts, vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "step must be >= 1")]
    fn zero_step_is_a_contract_violation() {
        window_starts(300, 128, 0);
    }

    #[test]
    fn last_window_fits_entirely() {
        for n in [128usize, 300, 301, 512, 1000] {
            for step in [32usize, 100, 128] {
                for start in window_starts(n, 128, step) {
                    assert!(start + 128 <= n, "n={n} step={step} start={start}");
                }
            }
        }
    }
}
