//! # minv — minimum-norm inverse solutions for MEG/EEG in pure Rust
//!
//! `minv` reconstructs cortical source activity from MEG/EEG sensor
//! recordings. The estimation pipeline is ported from
//! [MNE-Python](https://mne.tools)'s minimum-norm module and runs on
//! pure Rust numerics — no Python, no BLAS, no C libraries.
//!
//! ## Pipeline overview
//!
//! ```text
//! forward.safetensors     cov.safetensors
//!        │                      │
//!        │   regularize(grad/mag/eeg)  diagonal loading per sensor type
//!        │                      │
//!        └──► make_inverse_operator()  depth weighting, orientation prior,
//!                      │               whitening, SVD of the lead field
//!                      ▼
//!              InverseOperator         immutable; save()/load() round-trips
//!                      │
//!        ┌─────────────┼───────────────┐
//!        ▼             ▼               ▼
//!  apply_inverse  apply_inverse_raw  apply_inverse_epochs
//!   (evoked)      ([start, stop))     (lazy, one per epoch)
//!        │             │               │
//!        └─────────────┴───────────────┘
//!                      ▼
//!               SourceEstimate         MNE (Am) or dSPM; STC persistence
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use minv::{apply_inverse, make_inverse_operator, ApplyConfig, InverseConfig};
//! use minv::{io, RegularizeFactors};
//!
//! # fn main() -> minv::Result<()> {
//! // 1. Load the collaborator-produced inputs.
//! let fwd = io::read_forward(Path::new("data/sample-fwd.safetensors"))?;
//! let cov = io::read_cov(Path::new("data/sample-cov.safetensors"))?;
//! let evoked = io::read_evoked(Path::new("data/sample-ave.safetensors"))?;
//!
//! // 2. Build the operator once (loose 0.2, depth 0.8 defaults).
//! let cov = cov.regularize(&RegularizeFactors::all(0.1))?;
//! let inv = make_inverse_operator(&fwd, &cov, &InverseConfig::default())?;
//!
//! // 3. Apply at SNR 3 and write the result as STC.
//! let lambda2 = 1.0 / (3.0_f64 * 3.0);
//! let stc = apply_inverse(&evoked, &inv, lambda2, &ApplyConfig::dspm())?;
//! stc.save(Path::new("out/sample_audvis"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design notes
//!
//! * The operator stores the SVD of the whitened, depth-weighted lead
//!   field; λ² shrinks the singular values at *apply* time, so one
//!   operator serves every SNR setting.
//! * Every apply call is a pure function of `(operator, data, config)`;
//!   operators and estimates are immutable value objects, safe to share
//!   across threads read-only.
//! * Raw segments can be streamed chunk-by-chunk
//!   ([`ApplyConfig::buffer_size`]) to bound peak memory.

pub mod apply;
pub mod channel;
pub mod config;
pub mod cov;
pub mod data;
pub mod error;
pub mod estimate;
pub mod forward;
pub mod io;
pub mod label;
pub mod linalg;
pub mod operator;

use log::debug;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `minv::Foo` without having to know the internal module layout.

// error
pub use error::{MinvError, Result};

// channel
pub use channel::{check_channels, kind_from_name, ChannelKind};

// cov
pub use cov::{NoiseCovariance, RegularizeFactors};

// forward
pub use forward::{ForwardOperator, SourceBlock, SourceSpace};

// config
pub use config::{ApplyConfig, DepthWeighting, InverseConfig, Method, OrientationMode};

// operator
pub use operator::{make_inverse_operator, InverseOperator};

// apply
pub use apply::{apply_inverse, apply_inverse_epochs, apply_inverse_raw, EpochInverse};

// estimate
pub use estimate::{read_stc, write_stc, SourceEstimate};

// label
pub use label::{label_sign_flip, read_label, Hemisphere, Label};

// data
pub use data::{extract_epochs, Epoch, Epochs, Evoked, RawData, RawSource, RejectCriteria};

/// Build an inverse operator and apply it to one evoked average in a
/// single call.
///
/// Convenience wrapper over [`make_inverse_operator`] followed by
/// [`apply_inverse`]. Use the two-step form when the same operator is
/// applied more than once — construction does the expensive SVD, and the
/// operator is built to be reused.
///
/// # Arguments
///
/// * `evoked`  – Averaged trial whose channels match `fwd` and `cov`.
/// * `fwd`     – Forward solution.
/// * `cov`     – Noise covariance, already regularized as desired.
/// * `lambda2` – Tikhonov regularization, conventionally `1 / SNR²`.
/// * `build`   – Orientation/depth configuration for the operator.
/// * `apply`   – Output configuration (method, label, pick_normal, …).
///
/// # Errors
///
/// Anything [`make_inverse_operator`] or [`apply_inverse`] can fail
/// with: channel mismatches, invalid parameters, decomposition failure.
pub fn minimum_norm(
    evoked: &Evoked,
    fwd: &ForwardOperator,
    cov: &NoiseCovariance,
    lambda2: f64,
    build: &InverseConfig,
    apply: &ApplyConfig,
) -> Result<SourceEstimate> {
    debug!("one-shot minimum norm: building operator for {} channels", fwd.n_channels());
    let inv = make_inverse_operator(fwd, cov, build)?;
    apply_inverse(evoked, &inv, lambda2, apply)
}
