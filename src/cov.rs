//! Sensor noise covariance: per-type regularization and whitening.
//!
//! The covariance is estimated outside this crate (typically from
//! pre-stimulus baseline or empty-room data) and loaded through
//! [`crate::io::read_cov`]. Here it is regularized per channel type and
//! turned into the whitening transform `W` with `W·C·Wᵗ ≈ I` that the
//! operator builder and the dSPM normalization both depend on.
use log::debug;
use ndarray::Array2;

use crate::channel::ChannelKind;
use crate::error::{MinvError, Result};
use crate::linalg::eigh;

/// Relative floor under which covariance eigenvalues are treated as zero:
/// anything below `λ_max × EIG_RTOL` is clipped and excluded from the
/// whitener instead of being inverted into numerical noise.
pub const EIG_RTOL: f64 = 1e-15;

/// Per-channel-type diagonal loading factors for [`NoiseCovariance::regularize`].
///
/// A `Some(factor)` requests regularization of that type's sub-block;
/// requesting a type that is absent from the covariance is an error.
/// `RegularizeFactors::all(0.1)` matches the conventional default loading.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegularizeFactors {
    pub grad: Option<f64>,
    pub mag: Option<f64>,
    pub eeg: Option<f64>,
}

impl RegularizeFactors {
    /// The same loading factor for all three channel types.
    pub fn all(factor: f64) -> Self {
        Self { grad: Some(factor), mag: Some(factor), eeg: Some(factor) }
    }

    fn for_kind(&self, kind: ChannelKind) -> Option<f64> {
        match kind {
            ChannelKind::Grad => self.grad,
            ChannelKind::Mag => self.mag,
            ChannelKind::Eeg => self.eeg,
        }
    }
}

/// Sensor-noise covariance matrix indexed by channel order.
#[derive(Debug, Clone)]
pub struct NoiseCovariance {
    /// Channel names, defining row/column order of `data`.
    pub ch_names: Vec<String>,
    /// Sensor kind per channel, same order as `ch_names`.
    pub kinds: Vec<ChannelKind>,
    /// `[n_ch, n_ch]` symmetric covariance.
    pub data: Array2<f64>,
}

impl NoiseCovariance {
    /// Build a covariance, validating shape against the channel list.
    pub fn new(
        ch_names: Vec<String>,
        kinds: Vec<ChannelKind>,
        data: Array2<f64>,
    ) -> Result<Self> {
        let n = ch_names.len();
        if kinds.len() != n {
            return Err(MinvError::DimensionMismatch(format!(
                "covariance has {n} channel names but {} kinds",
                kinds.len()
            )));
        }
        if data.dim() != (n, n) {
            return Err(MinvError::DimensionMismatch(format!(
                "covariance matrix is {:?} but the channel list has {n} entries",
                data.dim()
            )));
        }
        Ok(Self { ch_names, kinds, data })
    }

    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    /// Diagonal loading per channel-type sub-block.
    ///
    /// For each requested type, adds `factor × trace(block)/dim(block)`
    /// to that block's diagonal entries and returns a new covariance.
    /// Requesting a type with no channels fails with `InvalidInput`.
    pub fn regularize(&self, factors: &RegularizeFactors) -> Result<NoiseCovariance> {
        let mut out = self.data.clone();
        for kind in [ChannelKind::Grad, ChannelKind::Mag, ChannelKind::Eeg] {
            let Some(factor) = factors.for_kind(kind) else { continue };
            if !(factor.is_finite() && factor >= 0.0) {
                return Err(MinvError::InvalidParameter(format!(
                    "regularization factor for {kind} must be finite and >= 0, got {factor}"
                )));
            }
            let idx: Vec<usize> = self
                .kinds
                .iter()
                .enumerate()
                .filter(|(_, &k)| k == kind)
                .map(|(i, _)| i)
                .collect();
            if idx.is_empty() {
                return Err(MinvError::InvalidInput(format!(
                    "regularization requested for {kind} channels but the covariance has none"
                )));
            }
            let trace: f64 = idx.iter().map(|&i| self.data[[i, i]]).sum();
            let load = factor * trace / idx.len() as f64;
            debug!("regularize {kind}: {} channels, diagonal load {load:.3e}", idx.len());
            for &i in &idx {
                out[[i, i]] += load;
            }
        }
        Ok(NoiseCovariance {
            ch_names: self.ch_names.clone(),
            kinds: self.kinds.clone(),
            data: out,
        })
    }

    /// Compute the whitening matrix `W` with `W·C·Wᵗ ≈ I`.
    ///
    /// Eigendecomposes the covariance and scales eigenvectors by
    /// `1/√λ`. Eigenvalues below `λ_max ×` [`EIG_RTOL`] are clipped:
    /// their rows of `W` are zero, so a rank-deficient covariance yields
    /// a whitener onto its non-degenerate subspace. Fails with
    /// `Numerical` when no eigenvalue survives the floor.
    pub fn whitener(&self) -> Result<Array2<f64>> {
        let n = self.n_channels();
        let (vals, vecs) = eigh(&self.data)?;
        let floor = vals[0] * EIG_RTOL;
        if !(vals[0].is_finite() && vals[0] > 0.0) {
            return Err(MinvError::Numerical(format!(
                "covariance is not positive semi-definite: largest eigenvalue {:.3e}",
                vals[0]
            )));
        }

        let n_valid = vals.iter().filter(|&&v| v > floor).count();
        if n_valid == 0 {
            return Err(MinvError::Numerical(
                "all covariance eigenvalues fall below the clipping floor".into(),
            ));
        }
        debug!("whitener: rank {n_valid}/{n}, eigenvalue floor {floor:.3e}");

        // W[k, :] = vecs[:, k]ᵗ / sqrt(λ_k) for valid k, zero otherwise.
        let mut w = Array2::<f64>::zeros((n, n));
        for k in 0..n_valid {
            let scale = 1.0 / vals[k].sqrt();
            for j in 0..n {
                w[[k, j]] = vecs[[j, k]] * scale;
            }
        }
        Ok(w)
    }
}
