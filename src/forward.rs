//! Forward (lead-field) operator and source-space geometry.
//!
//! The forward solution is computed outside this crate (BEM / sphere
//! models) and loaded through [`crate::io::read_forward`]. This module
//! holds its in-memory form: the `[n_ch, n_src × n_comp]` lead field,
//! the source-space geometry it refers to, and the change of basis from
//! free x/y/z source orientations to the local cortical-normal frame
//! that the fixed and loose constraints are defined in.
use ndarray::{s, Array2};

use crate::channel::ChannelKind;
use crate::error::{MinvError, Result};

// ── Source space ──────────────────────────────────────────────────────────

/// One contiguous block of source points (a hemisphere, or a volume grid).
#[derive(Debug, Clone)]
pub struct SourceBlock {
    /// Vertex identifiers, ascending, unique within the block.
    pub vertices: Vec<u32>,
    /// `[n, 3]` source positions in head coordinates (metres).
    pub positions: Array2<f64>,
    /// `[n, 3]` unit surface normals (outward cortical normal; for
    /// volume grids an arbitrary but fixed unit direction).
    pub normals: Array2<f64>,
}

impl SourceBlock {
    pub fn n_sources(&self) -> usize {
        self.vertices.len()
    }
}

/// Ordered source blocks: `[lh, rh]` for surface spaces, one block for
/// volume grids. Source indices are global across blocks, block 0 first.
#[derive(Debug, Clone)]
pub struct SourceSpace {
    pub blocks: Vec<SourceBlock>,
}

impl SourceSpace {
    pub fn n_sources(&self) -> usize {
        self.blocks.iter().map(|b| b.n_sources()).sum()
    }

    /// Global row offset of the given block.
    pub fn block_offset(&self, block: usize) -> usize {
        self.blocks[..block].iter().map(|b| b.n_sources()).sum()
    }

    /// Per-block vertex id lists, the shape a `SourceEstimate` carries.
    pub fn vertex_lists(&self) -> Vec<Vec<u32>> {
        self.blocks.iter().map(|b| b.vertices.clone()).collect()
    }

    /// Normal of the global source index `k`.
    pub fn normal(&self, k: usize) -> [f64; 3] {
        let mut rest = k;
        for b in &self.blocks {
            if rest < b.n_sources() {
                return [b.normals[[rest, 0]], b.normals[[rest, 1]], b.normals[[rest, 2]]];
            }
            rest -= b.n_sources();
        }
        panic!("source index {k} out of range ({} sources)", self.n_sources());
    }
}

// ── Forward operator ──────────────────────────────────────────────────────

/// Lead-field operator mapping source amplitudes to sensor measurements.
#[derive(Debug, Clone)]
pub struct ForwardOperator {
    /// Channel names, defining the row order of `leadfield`.
    pub ch_names: Vec<String>,
    /// Sensor kind per channel.
    pub kinds: Vec<ChannelKind>,
    /// `[n_ch, n_sources × n_components]` lead field. Columns of one
    /// source are adjacent; for 3 components the order is x/y/z in head
    /// coordinates, or tangent/tangent/normal once surface-oriented.
    pub leadfield: Array2<f64>,
    /// Geometry the columns refer to.
    pub src: SourceSpace,
    /// 1 (fixed) or 3 (free/loose) components per source.
    pub n_components: usize,
    /// Whether 3-component columns are already in the local surface frame.
    pub surface_oriented: bool,
}

impl ForwardOperator {
    pub fn new(
        ch_names: Vec<String>,
        kinds: Vec<ChannelKind>,
        leadfield: Array2<f64>,
        src: SourceSpace,
        n_components: usize,
        surface_oriented: bool,
    ) -> Result<Self> {
        if n_components != 1 && n_components != 3 {
            return Err(MinvError::InvalidParameter(format!(
                "forward must have 1 or 3 components per source, got {n_components}"
            )));
        }
        if ch_names.len() != kinds.len() {
            return Err(MinvError::DimensionMismatch(format!(
                "forward has {} channel names but {} kinds",
                ch_names.len(),
                kinds.len()
            )));
        }
        if leadfield.nrows() != ch_names.len() {
            return Err(MinvError::DimensionMismatch(format!(
                "lead field has {} rows but the channel list has {}",
                leadfield.nrows(),
                ch_names.len()
            )));
        }
        let expect = src.n_sources() * n_components;
        if leadfield.ncols() != expect {
            return Err(MinvError::DimensionMismatch(format!(
                "lead field has {} columns, expected {} ({} sources x {} components)",
                leadfield.ncols(),
                expect,
                src.n_sources(),
                n_components
            )));
        }
        Ok(Self { ch_names, kinds, leadfield, src, n_components, surface_oriented })
    }

    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    pub fn n_sources(&self) -> usize {
        self.src.n_sources()
    }

    /// Rotate each source's x/y/z columns into its local surface frame.
    ///
    /// The new column order per source is tangent/tangent/normal, normal
    /// last. Requires a 3-component lead field; a no-op (clone) if the
    /// columns are already surface-oriented.
    pub fn surface_orientation(&self) -> Result<ForwardOperator> {
        if self.surface_oriented {
            return Ok(self.clone());
        }
        if self.n_components != 3 {
            return Err(MinvError::InvalidInput(
                "surface orientation needs a 3-component (free-orientation) lead field".into(),
            ));
        }
        let n_src = self.n_sources();
        let mut lf = self.leadfield.clone();
        for k in 0..n_src {
            let rot = tangent_frame(self.src.normal(k));
            let cols = self.leadfield.slice(s![.., 3 * k..3 * k + 3]);
            lf.slice_mut(s![.., 3 * k..3 * k + 3]).assign(&cols.dot(&rot));
        }
        ForwardOperator::new(
            self.ch_names.clone(),
            self.kinds.clone(),
            lf,
            self.src.clone(),
            3,
            true,
        )
    }

    /// Collapse a surface-oriented lead field to the normal component
    /// only (one column per source). A no-op (clone) on an already
    /// fixed-orientation operator.
    pub fn fixed_orientation(&self) -> Result<ForwardOperator> {
        if self.n_components == 1 {
            return Ok(self.clone());
        }
        let surf = self.surface_orientation()?;
        let n_src = surf.n_sources();
        let mut lf = Array2::<f64>::zeros((surf.n_channels(), n_src));
        for k in 0..n_src {
            lf.column_mut(k)
                .assign(&surf.leadfield.column(3 * k + 2));
        }
        ForwardOperator::new(
            surf.ch_names,
            surf.kinds,
            lf,
            surf.src,
            1,
            true,
        )
    }
}

/// Orthonormal right-handed frame `[t1 t2 n]` (columns) completing the
/// unit normal `n`. The tangent pair is built by crossing against the
/// coordinate axis least aligned with `n`, so the frame is deterministic.
pub fn tangent_frame(n: [f64; 3]) -> Array2<f64> {
    let pick = {
        let ax = n[0].abs();
        let ay = n[1].abs();
        let az = n[2].abs();
        if ax <= ay && ax <= az {
            [1.0, 0.0, 0.0]
        } else if ay <= az {
            [0.0, 1.0, 0.0]
        } else {
            [0.0, 0.0, 1.0]
        }
    };
    let c = cross(n, pick);
    let norm = (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
    let t1 = [c[0] / norm, c[1] / norm, c[2] / norm];
    let t2 = cross(n, t1);
    let mut rot = Array2::<f64>::zeros((3, 3));
    for i in 0..3 {
        rot[[i, 0]] = t1[i];
        rot[[i, 1]] = t2[i];
        rot[[i, 2]] = n[i];
    }
    rot
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
