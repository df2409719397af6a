//! Inverse-operator construction.
//!
//! Combines a forward operator and a noise covariance into the
//! decomposition that every application reuses:
//!
//! ```text
//! G_scaled = G · D          D: per-column depth × orientation amplitude
//! G_w      = W · G_scaled   W: whitener from the noise covariance
//! G_w      = U · S · Vᵗ     thin SVD, full rank retained
//! ```
//!
//! Regularization (λ²) is *not* baked in here — it shrinks the singular
//! values at apply time, so one operator serves every SNR setting. The
//! result is immutable; rescaling for a different trial count happens as
//! a view inside the applicator, never as a mutation.
use log::{debug, info};
use ndarray::{Array1, Array2};
use std::path::Path;

use crate::channel::check_channels;
use crate::config::{DepthWeighting, InverseConfig, OrientationMode};
use crate::cov::NoiseCovariance;
use crate::error::{MinvError, Result};
use crate::forward::{ForwardOperator, SourceBlock, SourceSpace};
use crate::io::{StFile, StWriter};
use crate::linalg::thin_svd;

/// Regularized linear inverse operator, built once and applied many times.
#[derive(Debug, Clone)]
pub struct InverseOperator {
    /// Channel names the operator expects, in order.
    pub ch_names: Vec<String>,
    /// `[n_ch, n_ch]` whitening transform.
    pub whitener: Array2<f64>,
    /// `[n_ch, r]` left singular basis of the whitened scaled lead field.
    pub u: Array2<f64>,
    /// `[r]` singular values, descending, untruncated.
    pub sing: Array1<f64>,
    /// `[n_cols, r]` right singular basis.
    pub v: Array2<f64>,
    /// `[n_cols]` per-column amplitude scale (depth weight × orientation
    /// prior) mapping decomposition space back to physical sources.
    pub source_scale: Array1<f64>,
    /// Orientation constraint the operator was built under.
    pub orientation: OrientationMode,
    /// Depth weighting used, if any.
    pub depth: Option<DepthWeighting>,
    /// Source-space geometry, copied from the forward operator.
    pub src: SourceSpace,
    /// Components per source (1 or 3).
    pub n_components: usize,
    /// Whether 3-component columns live in the local surface frame
    /// (normal last); always true for fixed/loose operators.
    pub surface_oriented: bool,
    /// Trial count assumed at build time.
    pub nave: usize,
}

impl InverseOperator {
    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    pub fn n_sources(&self) -> usize {
        self.src.n_sources()
    }
}

/// Per-source depth weights from a lead field.
///
/// `d_k` is the summed squared column norm of source `k`'s sub-block;
/// weights are `d_k^(-exponent)` capped at `limit² × min_k(w)` so deep,
/// weakly seen sources cannot be boosted beyond `limit` in amplitude
/// relative to the most sensitive source.
fn depth_weights(
    leadfield: &Array2<f64>,
    n_components: usize,
    depth: &DepthWeighting,
) -> Result<Array1<f64>> {
    if !(0.0..=1.0).contains(&depth.exponent) {
        return Err(MinvError::InvalidParameter(format!(
            "depth exponent must lie in [0, 1], got {}",
            depth.exponent
        )));
    }
    if depth.limit < 1.0 {
        return Err(MinvError::InvalidParameter(format!(
            "depth limit must be >= 1, got {}",
            depth.limit
        )));
    }
    let n_src = leadfield.ncols() / n_components;
    let mut w = Array1::<f64>::zeros(n_src);
    for k in 0..n_src {
        let mut d = 0.0;
        for c in 0..n_components {
            let col = leadfield.column(k * n_components + c);
            d += col.dot(&col);
        }
        if d <= 0.0 {
            return Err(MinvError::Numerical(format!(
                "source {k} has a zero lead field; depth weighting is undefined"
            )));
        }
        w[k] = d.powf(-depth.exponent);
    }
    let w_min = w.iter().cloned().fold(f64::INFINITY, f64::min);
    let cap = depth.limit * depth.limit * w_min;
    let n_capped = w.iter().filter(|&&x| x > cap).count();
    if n_capped > 0 {
        debug!("depth weighting: {n_capped}/{n_src} sources capped at limit {}", depth.limit);
    }
    w.mapv_inplace(|x| x.min(cap));
    Ok(w)
}

/// Build an [`InverseOperator`] from a forward solution and a noise
/// covariance.
///
/// The covariance should already be regularized
/// ([`NoiseCovariance::regularize`]); this function whitens with it as
/// given. Channel lists must agree exactly in count and order.
pub fn make_inverse_operator(
    fwd: &ForwardOperator,
    cov: &NoiseCovariance,
    cfg: &InverseConfig,
) -> Result<InverseOperator> {
    check_channels(&fwd.ch_names, &cov.ch_names, "forward", "noise covariance")?;

    if let OrientationMode::Loose(loose) = cfg.orientation {
        if !(loose > 0.0 && loose <= 1.0) {
            return Err(MinvError::InvalidParameter(format!(
                "loose orientation value must lie in (0, 1], got {loose}"
            )));
        }
        if fwd.n_components != 3 {
            return Err(MinvError::InvalidInput(
                "loose orientation needs a 3-component forward solution".into(),
            ));
        }
    }
    if cfg.orientation == OrientationMode::Free && fwd.n_components != 3 {
        return Err(MinvError::InvalidInput(
            "free orientation needs a 3-component forward solution".into(),
        ));
    }

    // Depth weights come from the unoriented lead field so the weighting
    // is independent of the constraint applied afterwards.
    let depth_w = match &cfg.depth {
        Some(d) => Some(depth_weights(&fwd.leadfield, fwd.n_components, d)?),
        None => None,
    };

    // Orientation handling. Fixed and Loose are defined in the surface
    // frame; Free honours the surface_orientation flag (a pure change of
    // per-source basis).
    let oriented = match cfg.orientation {
        OrientationMode::Fixed => {
            if fwd.n_components == 1 {
                fwd.clone()
            } else {
                fwd.fixed_orientation()?
            }
        }
        OrientationMode::Loose(_) => fwd.surface_orientation()?,
        OrientationMode::Free => {
            if cfg.surface_orientation && fwd.n_components == 3 {
                fwd.surface_orientation()?
            } else {
                fwd.clone()
            }
        }
    };

    let n_src = oriented.n_sources();
    let n_comp = oriented.n_components;
    let n_cols = n_src * n_comp;

    // Per-column amplitude scale: sqrt(depth weight) × orientation prior.
    let mut scale = Array1::<f64>::ones(n_cols);
    for k in 0..n_src {
        let dw = depth_w.as_ref().map_or(1.0, |w| w[k].sqrt());
        for c in 0..n_comp {
            let prior = match cfg.orientation {
                OrientationMode::Loose(loose) if c < 2 => loose.sqrt(),
                _ => 1.0,
            };
            scale[k * n_comp + c] = dw * prior;
        }
    }

    let mut g = oriented.leadfield.clone();
    for (j, mut col) in g.columns_mut().into_iter().enumerate() {
        col *= scale[j];
    }

    let whitener = cov.whitener()?;
    let g_w = whitener.dot(&g);

    debug!("decomposing whitened lead field [{} x {}]", g_w.nrows(), g_w.ncols());
    let (u, sing, v) = thin_svd(&g_w)?;
    info!(
        "inverse operator: {} channels, {} sources x {} components, condition {:.3e}",
        oriented.n_channels(),
        n_src,
        n_comp,
        sing[0] / sing[sing.len() - 1].max(f64::MIN_POSITIVE)
    );

    Ok(InverseOperator {
        ch_names: oriented.ch_names,
        whitener,
        u,
        sing,
        v,
        source_scale: scale,
        orientation: cfg.orientation,
        depth: cfg.depth,
        src: oriented.src,
        n_components: n_comp,
        surface_oriented: oriented.surface_oriented,
        nave: 1,
    })
}

// ── Persistence ───────────────────────────────────────────────────────────

// Orientation mode codes in the serialized form.
const ORI_FIXED: i32 = 1;
const ORI_FREE: i32 = 2;
const ORI_LOOSE: i32 = 3;

impl InverseOperator {
    /// Serialize every field to an f64 safetensors file; the round trip
    /// through [`InverseOperator::load`] is bit-exact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        w.add_str("ch_names", &self.ch_names.join("\n"));
        w.add_f64_arr2("whitener", &self.whitener);
        w.add_f64_arr2("u", &self.u);
        let sing = self.sing.to_vec();
        w.add_f64("sing", &sing, &[sing.len()]);
        w.add_f64_arr2("v", &self.v);
        let scale = self.source_scale.to_vec();
        w.add_f64("source_scale", &scale, &[scale.len()]);

        let (ori, loose) = match self.orientation {
            OrientationMode::Fixed => (ORI_FIXED, 0.0),
            OrientationMode::Free => (ORI_FREE, 0.0),
            OrientationMode::Loose(l) => (ORI_LOOSE, l),
        };
        w.add_i32("orientation", &[ori], &[1]);
        w.add_f64("loose", &[loose], &[1]);
        match &self.depth {
            Some(d) => w.add_f64("depth", &[d.exponent, d.limit], &[2]),
            None => w.add_f64("depth", &[], &[0]),
        }
        w.add_i32(
            "meta",
            &[
                self.n_components as i32,
                self.nave as i32,
                self.src.blocks.len() as i32,
                self.surface_oriented as i32,
            ],
            &[4],
        );
        for (b, block) in self.src.blocks.iter().enumerate() {
            let verts: Vec<i32> = block.vertices.iter().map(|&v| v as i32).collect();
            w.add_i32(&format!("src{b}_vertices"), &verts, &[verts.len()]);
            w.add_f64_arr2(&format!("src{b}_positions"), &block.positions);
            w.add_f64_arr2(&format!("src{b}_normals"), &block.normals);
        }
        w.write(path)
    }

    /// Load an operator saved with [`InverseOperator::save`].
    pub fn load(path: &Path) -> Result<InverseOperator> {
        let f = StFile::open(path)?;
        let ch_names: Vec<String> = f
            .str_field("ch_names")?
            .split('\n')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let meta = f.i32_arr("meta")?;
        if meta.len() != 4 {
            return Err(MinvError::InvalidInput(format!(
                "operator file {}: malformed meta record",
                path.display()
            )));
        }
        let (n_components, nave, n_blocks) =
            (meta[0] as usize, meta[1] as usize, meta[2] as usize);
        let surface_oriented = meta[3] != 0;

        let orientation = match f.i32_arr("orientation")?.first().copied() {
            Some(ORI_FIXED) => OrientationMode::Fixed,
            Some(ORI_FREE) => OrientationMode::Free,
            Some(ORI_LOOSE) => OrientationMode::Loose(f.f64_arr("loose")?[0]),
            other => {
                return Err(MinvError::InvalidInput(format!(
                    "operator file {}: unknown orientation code {other:?}",
                    path.display()
                )))
            }
        };
        let depth_raw = f.f64_arr("depth")?;
        let depth = match depth_raw.len() {
            0 => None,
            2 => Some(DepthWeighting { exponent: depth_raw[0], limit: depth_raw[1] }),
            n => {
                return Err(MinvError::InvalidInput(format!(
                    "operator file {}: depth record has {n} values",
                    path.display()
                )))
            }
        };

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

        Ok(InverseOperator {
            ch_names,
            whitener: f.f64_arr2("whitener")?,
            u: f.f64_arr2("u")?,
            sing: Array1::from_vec(f.f64_arr("sing")?),
            v: f.f64_arr2("v")?,
            source_scale: Array1::from_vec(f.f64_arr("source_scale")?),
            orientation,
            depth,
            src: SourceSpace { blocks },
            n_components,
            surface_oriented,
            nave,
        })
    }
}
