//! Source estimates and the STC on-disk format.
//!
//! A [`SourceEstimate`] is the output of every inverse application: one
//! row of time series per source vertex, plus the uniform time base.
//! Estimates are value objects — arithmetic returns new instances.
//!
//! # STC layout
//!
//! One file per source block, big-endian throughout:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ tmin : f32 (ms) │ tstep : f32 (ms) │ n_vertices : u32    │
//! ├──────────────────────────────────────────────────────────┤
//! │ vertices : u32 × n_vertices                              │
//! ├──────────────────────────────────────────────────────────┤
//! │ n_times : u32                                            │
//! ├──────────────────────────────────────────────────────────┤
//! │ data : f32 × (n_times × n_vertices), time-major          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Surface estimates (two blocks) persist as `stem-lh.stc`/`stem-rh.stc`,
//! volume estimates (one block) as `stem-vl.stc`.
use std::io::{Read, Write};
use std::path::Path;

use ndarray::{s, Array1, Array2};

use crate::error::{MinvError, Result};

/// Per-vertex source time series with timing metadata.
#[derive(Debug, Clone)]
pub struct SourceEstimate {
    /// Vertex ids per source block (`[lh, rh]` for surface, one list for
    /// volume). Row `i` of `data` belongs to the `i`-th vertex counting
    /// across blocks in order.
    pub vertices: Vec<Vec<u32>>,
    /// `[n_vertices, n_times]`.
    pub data: Array2<f64>,
    /// Time of the first sample (seconds).
    pub tmin: f64,
    /// Sample period (seconds).
    pub tstep: f64,
}

impl SourceEstimate {
    pub fn new(
        vertices: Vec<Vec<u32>>,
        data: Array2<f64>,
        tmin: f64,
        tstep: f64,
    ) -> Result<Self> {
        let n: usize = vertices.iter().map(|v| v.len()).sum();
        if data.nrows() != n {
            return Err(MinvError::DimensionMismatch(format!(
                "estimate data has {} rows but the vertex lists hold {n} vertices",
                data.nrows()
            )));
        }
        if !(tstep.is_finite() && tstep > 0.0) {
            return Err(MinvError::InvalidParameter(format!(
                "tstep must be finite and > 0, got {tstep}"
            )));
        }
        Ok(Self { vertices, data, tmin, tstep })
    }

    pub fn n_vertices(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    /// Sample times in seconds.
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times()).map(|i| self.tmin + i as f64 * self.tstep).collect()
    }

    fn check_compatible(&self, other: &SourceEstimate) -> Result<()> {
        if self.vertices != other.vertices {
            return Err(MinvError::IncompatibleEstimate(
                "vertex lists differ".into(),
            ));
        }
        if self.n_times() != other.n_times()
            || (self.tmin - other.tmin).abs() > 1e-12
            || (self.tstep - other.tstep).abs() > 1e-12
        {
            return Err(MinvError::IncompatibleEstimate(format!(
                "time bases differ: {} samples from {} step {} vs {} samples from {} step {}",
                self.n_times(),
                self.tmin,
                self.tstep,
                other.n_times(),
                other.tmin,
                other.tstep
            )));
        }
        Ok(())
    }

    /// Elementwise sum with an estimate over the same vertices and times.
    pub fn add(&self, other: &SourceEstimate) -> Result<SourceEstimate> {
        self.check_compatible(other)?;
        Ok(SourceEstimate {
            vertices: self.vertices.clone(),
            data: &self.data + &other.data,
            tmin: self.tmin,
            tstep: self.tstep,
        })
    }

    /// Elementwise mean across a non-empty sequence of compatible estimates.
    pub fn average(stcs: &[SourceEstimate]) -> Result<SourceEstimate> {
        let first = stcs.first().ok_or_else(|| {
            MinvError::InvalidInput("cannot average an empty estimate list".into())
        })?;
        let mut acc = first.clone();
        for stc in &stcs[1..] {
            acc = acc.add(stc)?;
        }
        acc.data /= stcs.len() as f64;
        Ok(acc)
    }

    /// Mean over vertices at each time point: `[n_times]`.
    pub fn mean_over_vertices(&self) -> Array1<f64> {
        self.data.mean_axis(ndarray::Axis(0)).unwrap_or_else(|| Array1::zeros(0))
    }

    /// Mean over time for each vertex: `[n_vertices]`.
    pub fn mean_over_time(&self) -> Array1<f64> {
        self.data.mean_axis(ndarray::Axis(1)).unwrap_or_else(|| Array1::zeros(0))
    }

    /// Vertex mean with one weight per vertex (sign flips, typically).
    pub fn weighted_vertex_mean(&self, weights: &[f64]) -> Result<Array1<f64>> {
        if weights.len() != self.n_vertices() {
            return Err(MinvError::DimensionMismatch(format!(
                "{} weights for {} vertices",
                weights.len(),
                self.n_vertices()
            )));
        }
        let mut out = Array1::<f64>::zeros(self.n_times());
        for (i, &w) in weights.iter().enumerate() {
            out += &(&self.data.row(i) * w);
        }
        out /= self.n_vertices() as f64;
        Ok(out)
    }

    /// Write the estimate next to `stem`: `-lh.stc`/`-rh.stc` for surface
    /// (two blocks), `-vl.stc` for volume (one block).
    pub fn save(&self, stem: &Path) -> Result<()> {
        match self.vertices.len() {
            1 => write_stc(
                &with_suffix(stem, "-vl.stc"),
                &self.vertices[0],
                &self.data,
                self.tmin,
                self.tstep,
            ),
            2 => {
                let n_lh = self.vertices[0].len();
                write_stc(
                    &with_suffix(stem, "-lh.stc"),
                    &self.vertices[0],
                    &self.data.slice(s![..n_lh, ..]).to_owned(),
                    self.tmin,
                    self.tstep,
                )?;
                write_stc(
                    &with_suffix(stem, "-rh.stc"),
                    &self.vertices[1],
                    &self.data.slice(s![n_lh.., ..]).to_owned(),
                    self.tmin,
                    self.tstep,
                )
            }
            n => Err(MinvError::InvalidInput(format!(
                "cannot save an estimate with {n} source blocks"
            ))),
        }
    }

    /// Load an estimate saved by [`SourceEstimate::save`] from the same stem.
    pub fn load(stem: &Path) -> Result<SourceEstimate> {
        let lh = with_suffix(stem, "-lh.stc");
        let vl = with_suffix(stem, "-vl.stc");
        if lh.exists() {
            let (v_lh, d_lh, tmin, tstep) = read_stc(&lh)?;
            let (v_rh, d_rh, tmin_r, tstep_r) = read_stc(&with_suffix(stem, "-rh.stc"))?;
            if d_lh.ncols() != d_rh.ncols()
                || (tmin - tmin_r).abs() > 1e-9
                || (tstep - tstep_r).abs() > 1e-9
            {
                return Err(MinvError::InvalidInput(
                    "lh/rh STC files have inconsistent time bases".into(),
                ));
            }
            let mut data = Array2::zeros((d_lh.nrows() + d_rh.nrows(), d_lh.ncols()));
            data.slice_mut(s![..d_lh.nrows(), ..]).assign(&d_lh);
            data.slice_mut(s![d_lh.nrows().., ..]).assign(&d_rh);
            SourceEstimate::new(vec![v_lh, v_rh], data, tmin, tstep)
        } else if vl.exists() {
            let (v, d, tmin, tstep) = read_stc(&vl)?;
            SourceEstimate::new(vec![v], d, tmin, tstep)
        } else {
            Err(MinvError::InvalidInput(format!(
                "no STC file found for stem {}",
                stem.display()
            )))
        }
    }
}

fn with_suffix(stem: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(suffix);
    std::path::PathBuf::from(name)
}

// ── STC codec ─────────────────────────────────────────────────────────────

/// Write one STC block file (big-endian, times in milliseconds).
pub fn write_stc(
    path: &Path,
    vertices: &[u32],
    data: &Array2<f64>,
    tmin: f64,
    tstep: f64,
) -> Result<()> {
    if data.nrows() != vertices.len() {
        return Err(MinvError::DimensionMismatch(format!(
            "{} data rows for {} vertices",
            data.nrows(),
            vertices.len()
        )));
    }
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_stc_to(&mut f, vertices, data, tmin, tstep)
}

/// Write an STC block to any writer (exposed for in-memory round-trips).
pub fn write_stc_to<W: Write>(
    w: &mut W,
    vertices: &[u32],
    data: &Array2<f64>,
    tmin: f64,
    tstep: f64,
) -> Result<()> {
    w.write_all(&((tmin * 1000.0) as f32).to_be_bytes())?;
    w.write_all(&((tstep * 1000.0) as f32).to_be_bytes())?;
    w.write_all(&(vertices.len() as u32).to_be_bytes())?;
    for &v in vertices {
        w.write_all(&v.to_be_bytes())?;
    }
    w.write_all(&(data.ncols() as u32).to_be_bytes())?;
    // Time-major payload: all vertices of sample 0, then sample 1, …
    for t in 0..data.ncols() {
        for i in 0..data.nrows() {
            w.write_all(&(data[[i, t]] as f32).to_be_bytes())?;
        }
    }
    Ok(())
}

/// Read one STC block file. Returns `(vertices, data, tmin, tstep)` with
/// times in seconds.
pub fn read_stc(path: &Path) -> Result<(Vec<u32>, Array2<f64>, f64, f64)> {
    let mut f = std::io::BufReader::new(std::fs::File::open(path)?);
    read_stc_from(&mut f).map_err(|e| match e {
        MinvError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            MinvError::InvalidInput(format!("truncated STC file {}", path.display()))
        }
        other => other,
    })
}

/// Read an STC block from any reader.
pub fn read_stc_from<R: Read>(r: &mut R) -> Result<(Vec<u32>, Array2<f64>, f64, f64)> {
    let tmin = read_f32_be(r)? as f64 * 1e-3;
    let tstep = read_f32_be(r)? as f64 * 1e-3;
    let n_vertices = read_u32_be(r)? as usize;
    let mut vertices = Vec::with_capacity(n_vertices);
    for _ in 0..n_vertices {
        vertices.push(read_u32_be(r)?);
    }
    let n_times = read_u32_be(r)? as usize;
    let mut data = Array2::<f64>::zeros((n_vertices, n_times));
    for t in 0..n_times {
        for i in 0..n_vertices {
            data[[i, t]] = read_f32_be(r)? as f64;
        }
    }
    Ok((vertices, data, tmin, tstep))
}

fn read_f32_be<R: Read>(r: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

fn read_u32_be<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;

    fn toy_stc() -> SourceEstimate {
        SourceEstimate::new(
            vec![vec![3, 7], vec![1]],
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            -0.1,
            0.004,
        )
        .unwrap()
    }

    #[test]
    fn times_axis() {
        let stc = toy_stc();
        let times = stc.times();
        approx::assert_abs_diff_eq!(times[0], -0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(times[1], -0.096, epsilon = 1e-12);
    }

    #[test]
    fn add_and_average() {
        let a = toy_stc();
        let b = toy_stc();
        let sum = a.add(&b).unwrap();
        approx::assert_abs_diff_eq!(sum.data[[0, 0]], 2.0, epsilon = 1e-12);
        let avg = SourceEstimate::average(&[a, b]).unwrap();
        approx::assert_abs_diff_eq!(avg.data[[2, 1]], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn add_rejects_different_vertices() {
        let a = toy_stc();
        let mut b = toy_stc();
        b.vertices[0][0] = 99;
        assert!(matches!(a.add(&b), Err(MinvError::IncompatibleEstimate(_))));
    }

    #[test]
    fn add_rejects_different_time_base() {
        let a = toy_stc();
        let mut b = toy_stc();
        b.tmin = 0.0;
        assert!(matches!(a.add(&b), Err(MinvError::IncompatibleEstimate(_))));
    }

    #[test]
    fn row_count_validated() {
        let err = SourceEstimate::new(
            vec![vec![0, 1, 2]],
            Array2::zeros((2, 5)),
            0.0,
            0.001,
        )
        .unwrap_err();
        assert!(matches!(err, MinvError::DimensionMismatch(_)));
    }

    #[test]
    fn stc_stream_round_trip() {
        let vertices = vec![0u32, 5, 9];
        let data = array![[0.5, -1.5], [2.0, 0.0], [1e-3, 3.25]];
        let mut buf = Vec::new();
        write_stc_to(&mut buf, &vertices, &data, -0.2, 0.001).unwrap();

        let (v2, d2, tmin, tstep) = read_stc_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(v2, vertices);
        approx::assert_abs_diff_eq!(tmin, -0.2, epsilon = 1e-7);
        approx::assert_abs_diff_eq!(tstep, 0.001, epsilon = 1e-9);
        for (&x, &y) in data.iter().zip(d2.iter()) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn weighted_vertex_mean_flips_signs() {
        let stc = SourceEstimate::new(
            vec![vec![0, 1]],
            array![[1.0, 2.0], [-1.0, -2.0]],
            0.0,
            0.001,
        )
        .unwrap();
        // Unsigned mean cancels, flip-weighted mean does not.
        let plain = stc.mean_over_vertices();
        approx::assert_abs_diff_eq!(plain[0], 0.0, epsilon = 1e-12);
        let flipped = stc.weighted_vertex_mean(&[1.0, -1.0]).unwrap();
        approx::assert_abs_diff_eq!(flipped[0], 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(flipped[1], 2.0, epsilon = 1e-12);
    }
}
