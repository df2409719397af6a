//! Channel typing and channel-order validation.
//!
//! Sensor kinds matter in two places: per-type covariance regularization
//! and per-type epoch rejection thresholds. Everything else treats
//! channels as an ordered, opaque name list — and that order is an
//! invariant checked whenever two objects must agree on it.
use crate::error::{MinvError, Result};

/// Sensor type of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Planar gradiometer (T/m).
    Grad,
    /// Magnetometer (T).
    Mag,
    /// EEG electrode (V).
    Eeg,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Grad => write!(f, "grad"),
            ChannelKind::Mag => write!(f, "mag"),
            ChannelKind::Eeg => write!(f, "eeg"),
        }
    }
}

/// Guess a channel's kind from its Neuromag-convention name.
///
/// `"MEG 1234"`: trailing digit 1 → magnetometer, 2/3 → planar
/// gradiometer. `"EEG 012"` → EEG. Anything else is unknown.
pub fn kind_from_name(name: &str) -> Option<ChannelKind> {
    let upper = name.trim().to_uppercase();
    if let Some(rest) = upper.strip_prefix("MEG") {
        return match rest.trim().chars().last()? {
            '1' => Some(ChannelKind::Mag),
            '2' | '3' => Some(ChannelKind::Grad),
            _ => None,
        };
    }
    if upper.starts_with("EEG") {
        return Some(ChannelKind::Eeg);
    }
    None
}

/// Require two channel lists to match exactly in count and order.
///
/// `left_what`/`right_what` name the two objects in the error message
/// (e.g. `"forward"` vs `"noise covariance"`).
pub fn check_channels(
    left: &[String],
    right: &[String],
    left_what: &str,
    right_what: &str,
) -> Result<()> {
    if left.len() != right.len() {
        return Err(MinvError::DimensionMismatch(format!(
            "{left_what} has {} channels but {right_what} has {}",
            left.len(),
            right.len()
        )));
    }
    for (i, (a, b)) in left.iter().zip(right.iter()).enumerate() {
        if a != b {
            return Err(MinvError::DimensionMismatch(format!(
                "channel {i} differs between {left_what} ({a:?}) and {right_what} ({b:?})"
            )));
        }
    }
    Ok(())
}
