//! Subject array store.
//!
//! Per-subject persisted arrays keyed by subject id: the raw `[N, C]`
//! signal with its aligned label tokens, the normalized signal (written
//! once, reused thereafter), and one statistics artifact for the training
//! partition.
//!
//! [`SubjectDir`] keeps everything in one directory, one safetensors file
//! per array kind:
//!
//! ```text
//! <dir>/
//!   S001_raw.safetensors     "signal" F32 [N, C] · "labels" U8 (newline-joined tokens)
//!   S001_norm.safetensors    "signal" F32 [N, C]
//!   norm_stats.safetensors   "mean" F64 [C] · "std" F64 [C]
//! ```
//!
//! [`MemStore`] holds the same arrays in memory for unit tests and benches.

use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stats::ChannelStats;

/// Interface the pipeline consumes arrays through.
///
/// Implementations must be `Send + Sync` so normalization can fan out
/// across subjects.
pub trait SubjectStore: Send + Sync {
    /// Raw signal and aligned label tokens for one subject.
    fn load_raw(&self, id: &str) -> Result<(Array2<f32>, Vec<String>)>;

    /// Label tokens only.
    fn load_labels(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.load_raw(id)?.1)
    }

    /// Sample count of the raw signal, without materializing the array.
    fn sample_count(&self, id: &str) -> Result<usize> {
        Ok(self.load_raw(id)?.0.nrows())
    }

    fn has_normalized(&self, id: &str) -> bool;

    /// Normalized signal; fails with `SubjectNotFound` when absent.
    fn load_normalized(&self, id: &str) -> Result<Array2<f32>>;

    fn save_normalized(&self, id: &str, signal: &Array2<f32>) -> Result<()>;

    fn has_statistics(&self) -> bool;

    /// Persisted statistics; fails with `StatisticsMissing` when absent.
    fn load_statistics(&self) -> Result<ChannelStats>;

    fn save_statistics(&self, stats: &ChannelStats) -> Result<()>;
}

// ── Low-level safetensors parsing ─────────────────────────────────────────
//
// Minimal parser for the tensors this crate writes — no dependency on the
// `safetensors` crate's tensor types, we just need raw bytes → ndarray.

type Header = HashMap<String, serde_json::Value>;

fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    if bytes.len() < 8 {
        return Err(PipelineError::Format("safetensors file too small".into()));
    }
    let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    if bytes.len() < 8 + n {
        return Err(PipelineError::Format(
            "safetensors header exceeds file size".into(),
        ));
    }
    let header: Header = serde_json::from_slice(&bytes[8..8 + n])
        .map_err(|e| PipelineError::Format(format!("bad safetensors header: {e}")))?;
    Ok((header, 8 + n))
}

fn tensor_entry<'h>(header: &'h Header, name: &str) -> Result<&'h serde_json::Value> {
    header
        .get(name)
        .ok_or_else(|| PipelineError::Format(format!("missing '{name}' tensor")))
}

fn shape_of(entry: &serde_json::Value) -> Result<Vec<usize>> {
    entry["shape"]
        .as_array()
        .ok_or_else(|| PipelineError::Format("tensor entry without shape".into()))?
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| PipelineError::Format("non-integer tensor shape".into()))
        })
        .collect()
}

fn tensor_bytes<'b>(
    bytes: &'b [u8],
    data_start: usize,
    entry: &serde_json::Value,
    dtype: &str,
) -> Result<&'b [u8]> {
    let actual = entry["dtype"].as_str().unwrap_or("?");
    if actual != dtype {
        return Err(PipelineError::Format(format!(
            "expected {dtype} tensor, found {actual}"
        )));
    }
    let offsets = entry["data_offsets"]
        .as_array()
        .ok_or_else(|| PipelineError::Format("tensor entry without data_offsets".into()))?;
    let (s, e) = match (
        offsets.first().and_then(serde_json::Value::as_u64),
        offsets.get(1).and_then(serde_json::Value::as_u64),
    ) {
        (Some(s), Some(e)) if s <= e => (s as usize, e as usize),
        _ => return Err(PipelineError::Format("bad data_offsets".into())),
    };
    bytes
        .get(data_start + s..data_start + e)
        .ok_or_else(|| PipelineError::Format("tensor data out of file bounds".into()))
}

fn f32_tensor(bytes: &[u8], data_start: usize, entry: &serde_json::Value) -> Result<Vec<f32>> {
    let raw = tensor_bytes(bytes, data_start, entry, "F32")?;
    Ok(raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn f64_tensor(bytes: &[u8], data_start: usize, entry: &serde_json::Value) -> Result<Vec<f64>> {
    let raw = tensor_bytes(bytes, data_start, entry, "F64")?;
    Ok(raw
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

fn str_tensor(bytes: &[u8], data_start: usize, entry: &serde_json::Value) -> Result<String> {
    let raw = tensor_bytes(bytes, data_start, entry, "U8")?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| PipelineError::Format(format!("non-UTF-8 string tensor: {e}")))
}

// ── Safetensors writer ────────────────────────────────────────────────────

/// Simple safetensors writer for the array kinds this crate persists
/// (F32/F64 tensors plus a U8 byte-string tensor for label tokens).
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries
            .push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f32_arr2(&mut self, name: &str, arr: &Array2<f32>) {
        let data: Vec<f32> = arr.iter().copied().collect();
        self.add_f32(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_f64_arr1(&mut self, name: &str, arr: &Array1<f64>) {
        let bytes: Vec<u8> = arr.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries
            .push((name.to_string(), bytes, "F64", vec![arr.len()]));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries
            .push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    /// Store UTF-8 text as a U8 tensor, one byte per element.
    pub fn add_str(&mut self, name: &str, text: &str) {
        let bytes = text.as_bytes().to_vec();
        let len = bytes.len();
        self.entries.push((name.to_string(), bytes, "U8", vec![len]));
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)
            .map_err(|e| PipelineError::Format(e.to_string()))?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes
            .into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::fs::File::create(path)?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

impl Default for StWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Directory-backed store ────────────────────────────────────────────────

/// Filesystem store: one directory holding every subject's array files and
/// the statistics artifact.
pub struct SubjectDir {
    dir: PathBuf,
}

impl SubjectDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn raw_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}_raw.safetensors"))
    }

    fn norm_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}_norm.safetensors"))
    }

    fn stats_path(&self) -> PathBuf {
        self.dir.join("norm_stats.safetensors")
    }

    /// Persist one subject's raw signal and aligned labels.
    ///
    /// This is the hand-off point from upstream ingestion; the pipeline
    /// itself only reads raw arrays.
    pub fn save_raw(&self, id: &str, signal: &Array2<f32>, labels: &[String]) -> Result<()> {
        if labels.len() != signal.nrows() {
            return Err(PipelineError::Format(format!(
                "subject {id}: {} labels for {} samples",
                labels.len(),
                signal.nrows()
            )));
        }
        let mut w = StWriter::new();
        w.add_f32_arr2("signal", signal);
        w.add_str("labels", &labels.join("\n"));
        w.write(&self.raw_path(id))
    }

    fn read_file(&self, path: &Path, id: &str, kind: &'static str) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::SubjectNotFound {
                id: id.to_string(),
                kind,
            },
            _ => PipelineError::Io(e),
        })
    }

    fn signal_from(bytes: &[u8]) -> Result<Array2<f32>> {
        let (header, data_start) = parse_header(bytes)?;
        let entry = tensor_entry(&header, "signal")?;
        let shape = shape_of(entry)?;
        if shape.len() != 2 {
            return Err(PipelineError::Format(format!(
                "expected 2-D signal, got shape {shape:?}"
            )));
        }
        let data = f32_tensor(bytes, data_start, entry)?;
        Array2::from_shape_vec((shape[0], shape[1]), data)
            .map_err(|e| PipelineError::Format(e.to_string()))
    }

    fn labels_from(bytes: &[u8]) -> Result<Vec<String>> {
        let (header, data_start) = parse_header(bytes)?;
        let text = str_tensor(bytes, data_start, tensor_entry(&header, "labels")?)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(text.split('\n').map(String::from).collect())
    }
}

impl SubjectStore for SubjectDir {
    fn load_raw(&self, id: &str) -> Result<(Array2<f32>, Vec<String>)> {
        let bytes = self.read_file(&self.raw_path(id), id, "raw")?;
        let signal = Self::signal_from(&bytes)?;
        let labels = Self::labels_from(&bytes)?;
        if labels.len() != signal.nrows() {
            return Err(PipelineError::Format(format!(
                "subject {id}: {} labels for {} samples",
                labels.len(),
                signal.nrows()
            )));
        }
        Ok((signal, labels))
    }

    fn load_labels(&self, id: &str) -> Result<Vec<String>> {
        let bytes = self.read_file(&self.raw_path(id), id, "raw")?;
        Self::labels_from(&bytes)
    }

    /// Reads only the 8-byte length prefix and the JSON header — the array
    /// data is never touched.
    fn sample_count(&self, id: &str) -> Result<usize> {
        let path = self.raw_path(id);
        let mut f = std::fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::SubjectNotFound {
                id: id.to_string(),
                kind: "raw",
            },
            _ => PipelineError::Io(e),
        })?;
        let mut len = [0u8; 8];
        f.read_exact(&mut len)?;
        let mut header = vec![0u8; u64::from_le_bytes(len) as usize];
        f.read_exact(&mut header)?;
        let header: Header = serde_json::from_slice(&header)
            .map_err(|e| PipelineError::Format(format!("bad safetensors header: {e}")))?;
        let shape = shape_of(tensor_entry(&header, "signal")?)?;
        match shape.first() {
            Some(&n) => Ok(n),
            None => Err(PipelineError::Format("0-D signal tensor".into())),
        }
    }

    fn has_normalized(&self, id: &str) -> bool {
        self.norm_path(id).exists()
    }

    fn load_normalized(&self, id: &str) -> Result<Array2<f32>> {
        let bytes = self.read_file(&self.norm_path(id), id, "normalized")?;
        Self::signal_from(&bytes)
    }

    fn save_normalized(&self, id: &str, signal: &Array2<f32>) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f32_arr2("signal", signal);
        w.write(&self.norm_path(id))?;
        debug!(subject = %id, path = %self.norm_path(id).display(), "normalized array written");
        Ok(())
    }

    fn has_statistics(&self) -> bool {
        self.stats_path().exists()
    }

    fn load_statistics(&self) -> Result<ChannelStats> {
        let bytes = std::fs::read(self.stats_path()).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::StatisticsMissing,
            _ => PipelineError::Io(e),
        })?;
        let (header, data_start) = parse_header(&bytes)?;
        let mean = f64_tensor(&bytes, data_start, tensor_entry(&header, "mean")?)?;
        let std = f64_tensor(&bytes, data_start, tensor_entry(&header, "std")?)?;
        if mean.len() != std.len() {
            return Err(PipelineError::Format(format!(
                "statistics artifact: {} mean channels vs {} std channels",
                mean.len(),
                std.len()
            )));
        }
        Ok(ChannelStats {
            mean: Array1::from_vec(mean),
            std: Array1::from_vec(std),
        })
    }

    fn save_statistics(&self, stats: &ChannelStats) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f64_arr1("mean", &stats.mean);
        w.add_f64_arr1("std", &stats.std);
        w.write(&self.stats_path())
    }
}

// ── In-memory store ───────────────────────────────────────────────────────

/// In-memory [`SubjectStore`] for unit tests and benches.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    raw: HashMap<String, (Array2<f32>, Vec<String>)>,
    normalized: HashMap<String, Array2<f32>>,
    stats: Option<ChannelStats>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one subject's raw arrays.
    pub fn insert(&self, id: &str, signal: Array2<f32>, labels: Vec<String>) {
        assert_eq!(labels.len(), signal.nrows(), "labels must align with samples");
        self.inner
            .lock()
            .raw
            .insert(id.to_string(), (signal, labels));
    }
}

impl SubjectStore for MemStore {
    fn load_raw(&self, id: &str) -> Result<(Array2<f32>, Vec<String>)> {
        self.inner
            .lock()
            .raw
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::SubjectNotFound {
                id: id.to_string(),
                kind: "raw",
            })
    }

    fn sample_count(&self, id: &str) -> Result<usize> {
        self.inner
            .lock()
            .raw
            .get(id)
            .map(|(x, _)| x.nrows())
            .ok_or_else(|| PipelineError::SubjectNotFound {
                id: id.to_string(),
                kind: "raw",
            })
    }

    fn has_normalized(&self, id: &str) -> bool {
        self.inner.lock().normalized.contains_key(id)
    }

    fn load_normalized(&self, id: &str) -> Result<Array2<f32>> {
        self.inner
            .lock()
            .normalized
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::SubjectNotFound {
                id: id.to_string(),
                kind: "normalized",
            })
    }

    fn save_normalized(&self, id: &str, signal: &Array2<f32>) -> Result<()> {
        self.inner
            .lock()
            .normalized
            .insert(id.to_string(), signal.clone());
        Ok(())
    }

    fn has_statistics(&self) -> bool {
        self.inner.lock().stats.is_some()
    }

    fn load_statistics(&self) -> Result<ChannelStats> {
        self.inner
            .lock()
            .stats
            .clone()
            .ok_or(PipelineError::StatisticsMissing)
    }

    fn save_statistics(&self, stats: &ChannelStats) -> Result<()> {
        self.inner.lock().stats = Some(stats.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mem_store_raw_round_trip() {
        let store = MemStore::new();
        let x = array![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let y = vec!["W".to_string(), "N1".to_string(), "N2".to_string()];
        store.insert("S001", x.clone(), y.clone());

        let (signal, labels) = store.load_raw("S001").unwrap();
        assert_eq!(signal, x);
        assert_eq!(labels, y);
        assert_eq!(store.sample_count("S001").unwrap(), 3);
        assert_eq!(store.load_labels("S001").unwrap(), y);
    }

    #[test]
    fn mem_store_missing_subject_is_not_found() {
        let store = MemStore::new();
        assert!(matches!(
            store.load_raw("S999"),
            Err(PipelineError::SubjectNotFound { kind: "raw", .. })
        ));
        assert!(matches!(
            store.load_normalized("S999"),
            Err(PipelineError::SubjectNotFound {
                kind: "normalized",
                ..
            })
        ));
    }

    #[test]
    fn mem_store_statistics_life_cycle() {
        let store = MemStore::new();
        assert!(!store.has_statistics());
        assert!(matches!(
            store.load_statistics(),
            Err(PipelineError::StatisticsMissing)
        ));

        let stats = ChannelStats {
            mean: array![0.5, -0.5],
            std: array![1.0, 2.0],
        };
        store.save_statistics(&stats).unwrap();
        assert!(store.has_statistics());
        assert_eq!(store.load_statistics().unwrap(), stats);
    }
}
