//! Safetensors I/O for operator persistence and pipeline fixtures.
//!
//! Forward solutions, noise covariances and evoked averages enter this
//! crate through a minimal safetensors codec (8-byte little-endian header
//! length, JSON header, raw tensor payload). Only the dtypes actually
//! used are implemented: F64 matrices, I32 index arrays and U8 string
//! fields. No dependency on the `safetensors` crate's tensor types — raw
//! bytes go straight into `ndarray`.
use std::collections::HashMap;
use std::path::Path;

use ndarray::Array2;

use crate::channel::ChannelKind;
use crate::cov::NoiseCovariance;
use crate::data::Evoked;
use crate::error::{MinvError, Result};
use crate::forward::{ForwardOperator, SourceBlock, SourceSpace};

// ── Channel-kind codes (stable across files) ──────────────────────────────

fn kind_to_code(kind: ChannelKind) -> i32 {
    match kind {
        ChannelKind::Grad => 0,
        ChannelKind::Mag => 1,
        ChannelKind::Eeg => 2,
    }
}

fn code_to_kind(code: i32) -> Result<ChannelKind> {
    match code {
        0 => Ok(ChannelKind::Grad),
        1 => Ok(ChannelKind::Mag),
        2 => Ok(ChannelKind::Eeg),
        other => Err(MinvError::InvalidInput(format!(
            "unknown channel-kind code {other}"
        ))),
    }
}

// ── Reader ────────────────────────────────────────────────────────────────

/// A parsed safetensors file: header plus payload bytes.
pub struct StFile {
    header: HashMap<String, serde_json::Value>,
    bytes: Vec<u8>,
    data_start: usize,
}

impl StFile {
    pub fn open(path: &Path) -> Result<StFile> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 8 {
            return Err(MinvError::InvalidInput(format!(
                "safetensors file {} too small",
                path.display()
            )));
        }
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        if bytes.len() < 8 + n {
            return Err(MinvError::InvalidInput(format!(
                "safetensors file {} truncated inside its header",
                path.display()
            )));
        }
        let header: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..8 + n]).map_err(|e| {
                MinvError::InvalidInput(format!(
                    "bad safetensors header in {}: {e}",
                    path.display()
                ))
            })?;
        Ok(StFile { header, bytes, data_start: 8 + n })
    }

    pub fn has(&self, name: &str) -> bool {
        self.header.contains_key(name)
    }

    fn entry(&self, name: &str) -> Result<(&serde_json::Value, &[u8])> {
        let entry = self.header.get(name).ok_or_else(|| {
            MinvError::InvalidInput(format!("missing tensor {name:?}"))
        })?;
        let offsets = entry["data_offsets"].as_array().ok_or_else(|| {
            MinvError::InvalidInput(format!("tensor {name:?} has no data_offsets"))
        })?;
        let s = offsets[0].as_u64().unwrap_or(0) as usize;
        let e = offsets[1].as_u64().unwrap_or(0) as usize;
        let lo = self.data_start + s;
        let hi = self.data_start + e;
        if hi > self.bytes.len() || lo > hi {
            return Err(MinvError::InvalidInput(format!(
                "tensor {name:?} offsets [{s}, {e}) exceed the payload"
            )));
        }
        Ok((entry, &self.bytes[lo..hi]))
    }

    fn shape(entry: &serde_json::Value) -> Vec<usize> {
        entry["shape"]
            .as_array()
            .map(|a| a.iter().map(|v| v.as_u64().unwrap_or(0) as usize).collect())
            .unwrap_or_default()
    }

    pub fn f64_arr(&self, name: &str) -> Result<Vec<f64>> {
        let (_, raw) = self.entry(name)?;
        Ok(raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
            .collect())
    }

    pub fn f64_arr2(&self, name: &str) -> Result<Array2<f64>> {
        let (entry, raw) = self.entry(name)?;
        let shape = Self::shape(entry);
        if shape.len() != 2 {
            return Err(MinvError::InvalidInput(format!(
                "tensor {name:?} has shape {shape:?}, expected 2-D"
            )));
        }
        let vals: Vec<f64> = raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
            .collect();
        Array2::from_shape_vec((shape[0], shape[1]), vals).map_err(|e| {
            MinvError::InvalidInput(format!("tensor {name:?}: {e}"))
        })
    }

    pub fn i32_arr(&self, name: &str) -> Result<Vec<i32>> {
        let (_, raw) = self.entry(name)?;
        Ok(raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .collect())
    }

    pub fn str_field(&self, name: &str) -> Result<String> {
        let (_, raw) = self.entry(name)?;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            MinvError::InvalidInput(format!("tensor {name:?} is not valid UTF-8"))
        })
    }

    fn ch_names(&self) -> Result<Vec<String>> {
        Ok(self
            .str_field("ch_names")?
            .split('\n')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }

    fn kinds(&self) -> Result<Vec<ChannelKind>> {
        self.i32_arr("kinds")?.into_iter().map(code_to_kind).collect()
    }
}

// ── Writer ────────────────────────────────────────────────────────────────

/// Safetensors file builder handling F64, I32 and U8 tensors.
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl Default for StWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StWriter {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_str(&mut self, name: &str, s: &str) {
        let bytes = s.as_bytes().to_vec();
        let n = bytes.len();
        self.entries.push((name.to_string(), bytes, "U8", vec![n]));
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
            .map_err(|e| MinvError::InvalidInput(format!("header encode: {e}")))?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes
            .into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── Fixture loaders ───────────────────────────────────────────────────────

/// Load a forward solution.
///
/// Expected tensors: `ch_names` (U8, newline-joined), `kinds` (I32 codes),
/// `leadfield` (F64 `[n_ch, n_src × n_comp]`), `n_components` +
/// `surface_oriented` + `n_blocks` (I32 scalars), and per block
/// `src{b}_vertices` / `src{b}_positions` / `src{b}_normals`.
pub fn read_forward(path: &Path) -> Result<ForwardOperator> {
    let f = StFile::open(path)?;
    let n_blocks = f.i32_arr("n_blocks")?.first().copied().unwrap_or(0) as usize;
    let mut blocks = Vec::with_capacity(n_blocks);
    for b in 0..n_blocks {
        blocks.push(SourceBlock {
            vertices: f
                .i32_arr(&format!("src{b}_vertices"))?
                .iter()
                .map(|&v| v as u32)
                .collect(),
            positions: f.f64_arr2(&format!("src{b}_positions"))?,
            normals: f.f64_arr2(&format!("src{b}_normals"))?,
        });
    }
    ForwardOperator::new(
        f.ch_names()?,
        f.kinds()?,
        f.f64_arr2("leadfield")?,
        SourceSpace { blocks },
        f.i32_arr("n_components")?.first().copied().unwrap_or(3) as usize,
        f.i32_arr("surface_oriented")?.first().copied().unwrap_or(0) != 0,
    )
}

/// Write a forward solution in the layout [`read_forward`] expects.
pub fn write_forward(path: &Path, fwd: &ForwardOperator) -> Result<()> {
    let mut w = StWriter::new();
    w.add_str("ch_names", &fwd.ch_names.join("\n"));
    let codes: Vec<i32> = fwd.kinds.iter().map(|&k| kind_to_code(k)).collect();
    w.add_i32("kinds", &codes, &[codes.len()]);
    w.add_f64_arr2("leadfield", &fwd.leadfield);
    w.add_i32("n_components", &[fwd.n_components as i32], &[1]);
    w.add_i32("surface_oriented", &[fwd.surface_oriented as i32], &[1]);
    w.add_i32("n_blocks", &[fwd.src.blocks.len() as i32], &[1]);
    for (b, block) in fwd.src.blocks.iter().enumerate() {
        let verts: Vec<i32> = block.vertices.iter().map(|&v| v as i32).collect();
        w.add_i32(&format!("src{b}_vertices"), &verts, &[verts.len()]);
        w.add_f64_arr2(&format!("src{b}_positions"), &block.positions);
        w.add_f64_arr2(&format!("src{b}_normals"), &block.normals);
    }
    w.write(path)
}

/// Load a noise covariance (`ch_names`, `kinds`, `data` F64 `[n, n]`).
pub fn read_cov(path: &Path) -> Result<NoiseCovariance> {
    let f = StFile::open(path)?;
    NoiseCovariance::new(f.ch_names()?, f.kinds()?, f.f64_arr2("data")?)
}

/// Write a noise covariance in the layout [`read_cov`] expects.
pub fn write_cov(path: &Path, cov: &NoiseCovariance) -> Result<()> {
    let mut w = StWriter::new();
    w.add_str("ch_names", &cov.ch_names.join("\n"));
    let codes: Vec<i32> = cov.kinds.iter().map(|&k| kind_to_code(k)).collect();
    w.add_i32("kinds", &codes, &[codes.len()]);
    w.add_f64_arr2("data", &cov.data);
    w.write(path)
}

/// Load an evoked average (`ch_names`, `data` F64 `[n_ch, n_times]`,
/// `tmin`/`sfreq` F64 scalars, `nave` I32 scalar).
pub fn read_evoked(path: &Path) -> Result<Evoked> {
    let f = StFile::open(path)?;
    let data = f.f64_arr2("data")?;
    let ch_names = f.ch_names()?;
    if ch_names.len() != data.nrows() {
        return Err(MinvError::DimensionMismatch(format!(
            "evoked file {}: {} channel names for {} data rows",
            path.display(),
            ch_names.len(),
            data.nrows()
        )));
    }
    Ok(Evoked {
        ch_names,
        data,
        tmin: f.f64_arr("tmin")?.first().copied().unwrap_or(0.0),
        sfreq: f.f64_arr("sfreq")?.first().copied().unwrap_or(1000.0),
        nave: f.i32_arr("nave")?.first().copied().unwrap_or(1).max(1) as usize,
    })
}

/// Write an evoked average in the layout [`read_evoked`] expects.
pub fn write_evoked(path: &Path, evoked: &Evoked) -> Result<()> {
    let mut w = StWriter::new();
    w.add_str("ch_names", &evoked.ch_names.join("\n"));
    w.add_f64_arr2("data", &evoked.data);
    w.add_f64("tmin", &[evoked.tmin], &[1]);
    w.add_f64("sfreq", &[evoked.sfreq], &[1]);
    w.add_i32("nave", &[evoked.nave as i32], &[1]);
    w.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn writer_reader_round_trip() {
        let path = std::env::temp_dir().join("minv-test-io.safetensors");
        let mut w = StWriter::new();
        w.add_f64("x", &[1.5, -2.25, 1e-300], &[3]);
        w.add_i32("idx", &[7, 8], &[2]);
        w.add_str("names", "a\nb\nc");
        w.add_f64_arr2("m", &array![[1.0, 2.0], [3.0, 4.0]]);
        w.write(&path).unwrap();

        let f = StFile::open(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(f.f64_arr("x").unwrap(), vec![1.5, -2.25, 1e-300]);
        assert_eq!(f.i32_arr("idx").unwrap(), vec![7, 8]);
        assert_eq!(f.str_field("names").unwrap(), "a\nb\nc");
        let m = f.f64_arr2("m").unwrap();
        assert_eq!(m.dim(), (2, 2));
        assert_eq!(m[[1, 0]], 3.0);
        assert!(!f.has("missing"));
    }

    #[test]
    fn missing_tensor_is_invalid_input() {
        let path = std::env::temp_dir().join("minv-test-io2.safetensors");
        let mut w = StWriter::new();
        w.add_f64("x", &[0.0], &[1]);
        w.write(&path).unwrap();
        let f = StFile::open(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(matches!(f.f64_arr("y"), Err(MinvError::InvalidInput(_))));
    }

    #[test]
    fn evoked_round_trip() {
        let path = std::env::temp_dir().join("minv-test-evoked.safetensors");
        let evoked = Evoked {
            ch_names: vec!["EEG 001".into(), "EEG 002".into()],
            data: array![[1e-6, 2e-6], [0.0, -1e-6]],
            tmin: -0.1,
            sfreq: 600.0,
            nave: 55,
        };
        write_evoked(&path, &evoked).unwrap();
        let back = read_evoked(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.ch_names, evoked.ch_names);
        assert_eq!(back.nave, 55);
        assert_eq!(back.data, evoked.data);
        assert_eq!(back.tmin, -0.1);
    }
}
