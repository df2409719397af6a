//! Applying an inverse operator to sensor data.
//!
//! Three entry points, one per input shape:
//!
//! * [`apply_inverse`] — a single averaged trial ([`Evoked`]),
//! * [`apply_inverse_raw`] — a `[start, stop)` window of a continuous
//!   recording, optionally streamed through fixed-size chunks,
//! * [`apply_inverse_epochs`] — a lazy iterator producing one estimate
//!   per epoch.
//!
//! Each call assembles the effective kernel for the requested λ² from
//! the operator's stored decomposition:
//!
//! ```text
//! γ_i = s_i / (s_i² + λ²)
//! K   = D · V · diag(γ) · Uᵗ · W
//! ```
//!
//! and is a pure function of `(operator, data, config)` — the operator
//! is shared read-only and never mutated.
use log::debug;
use ndarray::{s, Array1, Array2};

use crate::channel::check_channels;
use crate::config::{ApplyConfig, Method};
use crate::data::{Epochs, Evoked, RawSource};
use crate::error::{MinvError, Result};
use crate::estimate::SourceEstimate;
use crate::operator::InverseOperator;

// ── Kernel assembly ───────────────────────────────────────────────────────

/// The fully assembled operator for one (λ², config) setting.
struct Kernel {
    /// `[n_rows, n_ch]`, whitener included.
    k: Array2<f64>,
    /// Per-output-row inverse noise standard deviation (dSPM only).
    noise_norm: Option<Array1<f64>>,
    /// Output vertex lists (post label restriction).
    vertices: Vec<Vec<u32>>,
    n_comp: usize,
    pick_normal: bool,
    method: Method,
}

impl Kernel {
    fn n_out(&self) -> usize {
        self.k.nrows() / self.n_comp
    }

    /// Apply to one `[n_ch, n_t]` block and combine components.
    ///
    /// `nave_factor` is `sqrt(nave_eff / nave_build)`; it rescales the
    /// raw current estimate only — in dSPM both signal and noise carry
    /// it, so it cancels.
    fn apply(&self, data: &Array2<f64>, nave_factor: f64) -> Array2<f64> {
        let sol = self.k.dot(data);
        let n_out = self.n_out();
        let n_t = sol.ncols();

        let mut out = if self.n_comp == 1 {
            sol
        } else if self.pick_normal {
            let mut picked = Array2::<f64>::zeros((n_out, n_t));
            for k in 0..n_out {
                picked.row_mut(k).assign(&sol.row(k * self.n_comp + 2));
            }
            picked
        } else {
            // Vector norm across the components of each source.
            let mut combined = Array2::<f64>::zeros((n_out, n_t));
            for k in 0..n_out {
                for t in 0..n_t {
                    let mut acc = 0.0;
                    for c in 0..self.n_comp {
                        let v = sol[[k * self.n_comp + c, t]];
                        acc += v * v;
                    }
                    combined[[k, t]] = acc.sqrt();
                }
            }
            combined
        };

        match self.method {
            Method::Mne => out *= nave_factor,
            Method::Dspm => {
                let norm = self.noise_norm.as_ref().expect("dSPM kernel has noise norm");
                for (k, mut row) in out.rows_mut().into_iter().enumerate() {
                    row *= norm[k];
                }
            }
        }
        out
    }
}

/// Resolve the label (if any) to global source indices and output vertex
/// lists.
fn select_sources(
    inv: &InverseOperator,
    cfg: &ApplyConfig,
) -> Result<(Vec<usize>, Vec<Vec<u32>>)> {
    match &cfg.label {
        None => Ok(((0..inv.n_sources()).collect(), inv.src.vertex_lists())),
        Some(label) => {
            let block_idx = label.hemi.block_index();
            let block = inv.src.blocks.get(block_idx).ok_or_else(|| {
                MinvError::InvalidInput(format!(
                    "label {:?} needs source block {block_idx}, operator has {}",
                    label.name,
                    inv.src.blocks.len()
                ))
            })?;
            let offset = inv.src.block_offset(block_idx);
            let mut sel = Vec::new();
            let mut verts = Vec::new();
            for &v in &label.vertices {
                if let Ok(row) = block.vertices.binary_search(&v) {
                    sel.push(offset + row);
                    verts.push(v);
                }
            }
            if sel.is_empty() {
                return Err(MinvError::InvalidInput(format!(
                    "label {:?} shares no vertices with the source space",
                    label.name
                )));
            }
            let mut lists = vec![Vec::new(); inv.src.blocks.len()];
            lists[block_idx] = verts;
            Ok((sel, lists))
        }
    }
}

fn assemble_kernel(
    inv: &InverseOperator,
    lambda2: f64,
    cfg: &ApplyConfig,
) -> Result<Kernel> {
    if !(lambda2.is_finite() && lambda2 > 0.0) {
        return Err(MinvError::InvalidParameter(format!(
            "lambda2 must be finite and > 0, got {lambda2}"
        )));
    }
    if cfg.pick_normal && inv.n_components == 3 && !inv.surface_oriented {
        return Err(MinvError::InvalidParameter(
            "pick_normal needs a surface-oriented operator; \
             this one was built with free orientation in head coordinates"
                .into(),
        ));
    }

    let (sel, vertices) = select_sources(inv, cfg)?;
    let n_comp = inv.n_components;
    let r = inv.sing.len();

    let gamma: Array1<f64> =
        inv.sing.mapv(|s| s / (s * s + lambda2));

    // Rows of D·V·diag(γ) for the selected sources.
    let n_rows = sel.len() * n_comp;
    let mut reduced = Array2::<f64>::zeros((n_rows, r));
    for (i, &src_idx) in sel.iter().enumerate() {
        for c in 0..n_comp {
            let col = src_idx * n_comp + c;
            let scale = inv.source_scale[col];
            for j in 0..r {
                reduced[[i * n_comp + c, j]] = scale * inv.v[[col, j]] * gamma[j];
            }
        }
    }

    // Whitened sensor noise is identity and Uᵗ has orthonormal rows, so
    // the estimate's noise variance per row is that row's squared norm.
    let noise_norm = match cfg.method {
        Method::Mne => None,
        Method::Dspm => {
            let mut norm = Array1::<f64>::zeros(sel.len());
            for (i, _) in sel.iter().enumerate() {
                let var: f64 = if n_comp == 3 && cfg.pick_normal {
                    let row = reduced.row(i * n_comp + 2);
                    row.dot(&row)
                } else {
                    (0..n_comp)
                        .map(|c| {
                            let row = reduced.row(i * n_comp + c);
                            row.dot(&row)
                        })
                        .sum()
                };
                if var <= 0.0 {
                    return Err(MinvError::Numerical(format!(
                        "source {i} has zero noise gain; dSPM is undefined"
                    )));
                }
                norm[i] = 1.0 / var.sqrt();
            }
            Some(norm)
        }
    };

    let ut_w = inv.u.t().dot(&inv.whitener);
    let k = reduced.dot(&ut_w);
    debug!(
        "kernel assembled: [{} x {}], lambda2 {lambda2:.3e}, {} sources",
        k.nrows(),
        k.ncols(),
        sel.len()
    );

    Ok(Kernel {
        k,
        noise_norm,
        vertices,
        n_comp,
        pick_normal: cfg.pick_normal,
        method: cfg.method,
    })
}

fn nave_factor(inv: &InverseOperator, nave_eff: usize) -> Result<f64> {
    if nave_eff == 0 {
        return Err(MinvError::InvalidParameter(
            "nave must be >= 1".into(),
        ));
    }
    Ok((nave_eff as f64 / inv.nave as f64).sqrt())
}

// ── Entry points ──────────────────────────────────────────────────────────

/// Apply an inverse operator to an averaged trial.
///
/// `lambda2` is the Tikhonov regularization strength, conventionally
/// `1 / SNR²`. The evoked channel list must match the operator's exactly
/// in count and order.
pub fn apply_inverse(
    evoked: &Evoked,
    inv: &InverseOperator,
    lambda2: f64,
    cfg: &ApplyConfig,
) -> Result<SourceEstimate> {
    check_channels(&evoked.ch_names, &inv.ch_names, "evoked data", "inverse operator")?;
    let kernel = assemble_kernel(inv, lambda2, cfg)?;
    let factor = nave_factor(inv, cfg.nave.unwrap_or(evoked.nave))?;
    let sol = kernel.apply(&evoked.data, factor);
    SourceEstimate::new(kernel.vertices, sol, evoked.tmin, 1.0 / evoked.sfreq)
}

/// Apply an inverse operator to the `[start, stop)` sample window of a
/// continuous recording.
///
/// `stop` is exclusive; both bounds are relative to the start of the
/// recording. With `cfg.buffer_size`, the window is streamed through
/// chunks of that many samples — same result, bounded peak memory.
pub fn apply_inverse_raw(
    raw: &impl RawSource,
    inv: &InverseOperator,
    lambda2: f64,
    start: usize,
    stop: usize,
    cfg: &ApplyConfig,
) -> Result<SourceEstimate> {
    check_channels(raw.ch_names(), &inv.ch_names, "raw data", "inverse operator")?;
    if start >= stop || stop > raw.n_times() {
        return Err(MinvError::Range(format!(
            "window [{start}, {stop}) of a recording with {} samples",
            raw.n_times()
        )));
    }
    let kernel = assemble_kernel(inv, lambda2, cfg)?;
    let factor = nave_factor(inv, cfg.nave.unwrap_or(1))?;

    let n_t = stop - start;
    let chunk = cfg.buffer_size.unwrap_or(n_t).max(1);
    let mut sol = Array2::<f64>::zeros((kernel.n_out(), n_t));
    let mut pos = start;
    while pos < stop {
        let end = (pos + chunk).min(stop);
        let block = raw.read_slice(pos, end)?;
        sol.slice_mut(s![.., pos - start..end - start])
            .assign(&kernel.apply(&block, factor));
        pos = end;
    }

    let sfreq = raw.sfreq();
    let tmin = (raw.first_samp() + start) as f64 / sfreq;
    SourceEstimate::new(kernel.vertices, sol, tmin, 1.0 / sfreq)
}

/// Lazily apply an inverse operator to each epoch in turn.
///
/// The kernel is assembled once up front (any parameter problem fails
/// here); iteration then yields one `Result<SourceEstimate>` per epoch.
/// Consumers may stop early; re-invoke with the same epochs to restart.
pub fn apply_inverse_epochs<'a>(
    epochs: &'a Epochs,
    inv: &InverseOperator,
    lambda2: f64,
    cfg: &ApplyConfig,
) -> Result<EpochInverse<'a>> {
    check_channels(&epochs.ch_names, &inv.ch_names, "epochs", "inverse operator")?;
    let kernel = assemble_kernel(inv, lambda2, cfg)?;
    let factor = nave_factor(inv, cfg.nave.unwrap_or(1))?;
    Ok(EpochInverse {
        kernel,
        factor,
        tstep: 1.0 / epochs.sfreq,
        n_ch: epochs.ch_names.len(),
        iter: epochs.epochs.iter(),
    })
}

/// Iterator returned by [`apply_inverse_epochs`].
pub struct EpochInverse<'a> {
    kernel: Kernel,
    factor: f64,
    tstep: f64,
    n_ch: usize,
    iter: std::slice::Iter<'a, crate::data::Epoch>,
}

impl Iterator for EpochInverse<'_> {
    type Item = Result<SourceEstimate>;

    fn next(&mut self) -> Option<Self::Item> {
        let epoch = self.iter.next()?;
        if epoch.data.nrows() != self.n_ch {
            return Some(Err(MinvError::DimensionMismatch(format!(
                "epoch has {} channels, expected {}",
                epoch.data.nrows(),
                self.n_ch
            ))));
        }
        let sol = self.kernel.apply(&epoch.data, self.factor);
        Some(SourceEstimate::new(
            self.kernel.vertices.clone(),
            sol,
            epoch.tmin,
            self.tstep,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl ExactSizeIterator for EpochInverse<'_> {}
