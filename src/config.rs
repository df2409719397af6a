//! Build- and apply-time configuration.
//!
//! [`InverseConfig`] holds every tunable of the operator builder,
//! [`ApplyConfig`] everything that varies per application. Defaults match
//! the conventional loose/depth settings for cortically constrained
//! MEG/EEG source estimation.

use crate::label::Label;

/// Source-orientation constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrientationMode {
    /// One component per source, along the cortical normal.
    Fixed,
    /// Three unconstrained components per source.
    Free,
    /// Three components with tangential ones down-weighted by `√value`;
    /// `value` must lie in `(0, 1]` (1.0 degenerates to `Free`).
    Loose(f64),
}

/// Depth-weighting parameters compensating the superficial bias of
/// minimum-norm estimates.
#[derive(Debug, Clone, Copy)]
pub struct DepthWeighting {
    /// Exponent on the inverse per-source lead-field power. `0.0`
    /// disables weighting, `1.0` fully normalizes source sensitivity.
    pub exponent: f64,
    /// Amplitude cap on the relative boost a weak (deep) source may
    /// receive over the most sensitive one.
    pub limit: f64,
}

impl Default for DepthWeighting {
    fn default() -> Self {
        Self { exponent: 0.8, limit: 10.0 }
    }
}

/// Configuration of [`crate::operator::make_inverse_operator`].
///
/// All fields are `pub` so you can construct one with struct-update
/// syntax:
///
/// ```
/// use minv::{InverseConfig, OrientationMode};
///
/// let cfg = InverseConfig {
///     orientation: OrientationMode::Fixed,
///     ..InverseConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct InverseConfig {
    /// Orientation constraint.
    ///
    /// Default: `Loose(0.2)`.
    pub orientation: OrientationMode,

    /// Depth weighting; `None` disables it.
    ///
    /// Default: exponent `0.8`, amplitude limit `10.0`.
    pub depth: Option<DepthWeighting>,

    /// Re-project free-orientation lead-field columns into the local
    /// surface frame before decomposition. Implied (and required) by
    /// `Fixed` and `Loose`; under `Free` it only changes the component
    /// basis, not the span.
    ///
    /// Default: `true`.
    pub surface_orientation: bool,
}

impl Default for InverseConfig {
    /// `Loose(0.2)`, depth `0.8` limited at `10.0`, surface orientation on.
    fn default() -> Self {
        Self {
            orientation: OrientationMode::Loose(0.2),
            depth: Some(DepthWeighting::default()),
            surface_orientation: true,
        }
    }
}

/// Output semantics of an inverse application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Raw minimum-norm current estimate (Am).
    Mne,
    /// Noise-normalized dSPM statistic (dimensionless).
    Dspm,
}

/// Per-application options shared by the evoked/raw/epochs entry points.
#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Output semantics.
    ///
    /// Default: [`Method::Mne`].
    pub method: Method,

    /// Keep only the signed cortical-normal component instead of the
    /// three-component vector norm. Only meaningful for surface-oriented
    /// free/loose operators; a no-op on fixed ones.
    ///
    /// Default: `false`.
    pub pick_normal: bool,

    /// Restrict the estimate to this label's vertices (intersected with
    /// the source space, order preserved).
    ///
    /// Default: `None`.
    pub label: Option<Label>,

    /// Trial count of the incoming data, overriding what the data
    /// carries (`Evoked::nave`, or 1 for raw segments and epochs).
    ///
    /// Default: `None`.
    pub nave: Option<usize>,

    /// Chunk length in samples for streaming raw segments; bounds peak
    /// memory without changing the result. `None` processes the segment
    /// as one block.
    ///
    /// Default: `None`.
    pub buffer_size: Option<usize>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            method: Method::Mne,
            pick_normal: false,
            label: None,
            nave: None,
            buffer_size: None,
        }
    }
}

impl ApplyConfig {
    /// dSPM noise normalization, all else default.
    pub fn dspm() -> Self {
        Self { method: Method::Dspm, ..Self::default() }
    }
}
