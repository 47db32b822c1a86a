//! Sleep-stage label vocabulary.
//!
//! A [`LabelMap`] is an immutable token→class mapping injected wherever
//! labels are resolved, so generators with different vocabularies can
//! coexist.  `Missing` and `nan` markers share one class index; any token
//! outside the vocabulary resolves to `None` and produces a sentinel row
//! downstream — resolution failure is a representable outcome, never an
//! error.

use ndarray::Array1;
use std::collections::{HashMap, HashSet};

/// Immutable mapping from raw stage tokens to contiguous class indices.
#[derive(Debug, Clone)]
pub struct LabelMap {
    map: HashMap<String, usize>,
    num_classes: usize,
}

impl LabelMap {
    /// Build a map from `(token, class)` pairs.
    ///
    /// Class indices must be contiguous starting at 0; several tokens may
    /// share one index (the stage vocabulary folds `Missing` and `nan`
    /// together).  `num_classes` is the number of distinct indices.
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let map: HashMap<String, usize> =
            pairs.into_iter().map(|(t, c)| (t.into(), c)).collect();
        let distinct: HashSet<usize> = map.values().copied().collect();
        Self {
            num_classes: distinct.len(),
            map,
        }
    }

    /// The DREAMT sleep-stage vocabulary:
    ///
    /// | token     | class |
    /// |-----------|-------|
    /// | `W`       | 0     |
    /// | `N1`      | 1     |
    /// | `N2`      | 2     |
    /// | `N3`      | 3     |
    /// | `R`       | 4     |
    /// | `P`       | 5     |
    /// | `Missing` | 6     |
    /// | `nan`     | 6     |
    ///
    /// Seven classes total: six stages plus the shared missing/unknown
    /// class.
    pub fn sleep_stages() -> Self {
        Self::new([
            ("W", 0),
            ("N1", 1),
            ("N2", 2),
            ("N3", 3),
            ("R", 4),
            ("P", 5),
            ("Missing", 6),
            ("nan", 6),
        ])
    }

    /// Resolve a raw token to its class index, or `None` when the token is
    /// outside the vocabulary.
    pub fn resolve(&self, token: &str) -> Option<usize> {
        self.map.get(token).copied()
    }

    /// Number of distinct class indices, including the shared
    /// missing/unknown class.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// One-hot row of length [`LabelMap::num_classes`] for a resolved class.
    pub fn one_hot(&self, class: usize) -> Array1<f32> {
        let mut row = Array1::zeros(self.num_classes);
        row[class] = 1.0;
        row
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::sleep_stages()
    }
}
