/// Shared helpers: deterministic synthetic subjects (no RNG — every value
/// is computed from its indices, so tests are reproducible everywhere).
use ndarray::Array2;

#[allow(unused)]
pub const STAGES: [&str; 6] = ["W", "N1", "N2", "N3", "R", "P"];

#[allow(unused)]
/// [N, C] sinusoid signal; `phase` separates subjects.
pub fn synth_signal(n: usize, c: usize, phase: f64) -> Array2<f32> {
    Array2::from_shape_fn((n, c), |(i, j)| {
        ((i as f64 * 0.17 + j as f64 * 2.1 + phase).sin() * (j as f64 + 1.0) + j as f64) as f32
    })
}

#[allow(unused)]
/// Stage labels cycling through the vocabulary.
pub fn cyclic_labels(n: usize) -> Vec<String> {
    (0..n).map(|i| STAGES[i % STAGES.len()].to_string()).collect()
}

#[allow(unused)]
/// `n` copies of one token.
pub fn constant_labels(n: usize, token: &str) -> Vec<String> {
    vec![token.to_string(); n]
}
