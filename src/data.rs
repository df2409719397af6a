//! Sensor-data contracts consumed by the inverse applicator.
//!
//! Recordings are produced and serialized elsewhere; the applicator only
//! needs three shapes of input: a pre-averaged trial ([`Evoked`]), a
//! random-access continuous recording (the [`RawSource`] trait, with an
//! in-memory [`RawData`] implementation), and per-trial windows
//! ([`Epoch`], cut from a raw source by [`extract_epochs`] with optional
//! peak-to-peak rejection).
use log::debug;
use ndarray::{s, Array2};

use crate::channel::ChannelKind;
use crate::error::{MinvError, Result};

// ── Evoked ────────────────────────────────────────────────────────────────

/// One averaged trial.
#[derive(Debug, Clone)]
pub struct Evoked {
    /// Channel names, defining the row order of `data`.
    pub ch_names: Vec<String>,
    /// `[n_ch, n_times]` in sensor units (T, T/m, V).
    pub data: Array2<f64>,
    /// Time of the first sample (seconds, usually negative).
    pub tmin: f64,
    /// Sampling rate (Hz).
    pub sfreq: f64,
    /// Number of trials averaged into `data`.
    pub nave: usize,
}

impl Evoked {
    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }
}

// ── Raw source ────────────────────────────────────────────────────────────

/// Random-access continuous recording.
///
/// `read_slice` returns the half-open sample window `[start, stop)`
/// relative to the start of the recording, shaped `[n_ch, stop - start]`
/// in the same channel order as `ch_names`.
pub trait RawSource {
    fn ch_names(&self) -> &[String];
    fn kinds(&self) -> &[ChannelKind];
    fn sfreq(&self) -> f64;
    fn n_times(&self) -> usize;
    /// Index of the first sample in acquisition time; only affects the
    /// time axis of derived estimates.
    fn first_samp(&self) -> usize {
        0
    }
    fn read_slice(&self, start: usize, stop: usize) -> Result<Array2<f64>>;
}

/// An in-memory recording; the reference `RawSource` implementation used
/// by fixtures and tests.
#[derive(Debug, Clone)]
pub struct RawData {
    pub ch_names: Vec<String>,
    pub kinds: Vec<ChannelKind>,
    /// `[n_ch, n_times]`.
    pub data: Array2<f64>,
    pub sfreq: f64,
    pub first_samp: usize,
}

impl RawSource for RawData {
    fn ch_names(&self) -> &[String] {
        &self.ch_names
    }

    fn kinds(&self) -> &[ChannelKind] {
        &self.kinds
    }

    fn sfreq(&self) -> f64 {
        self.sfreq
    }

    fn n_times(&self) -> usize {
        self.data.ncols()
    }

    fn first_samp(&self) -> usize {
        self.first_samp
    }

    fn read_slice(&self, start: usize, stop: usize) -> Result<Array2<f64>> {
        if start >= stop || stop > self.n_times() {
            return Err(MinvError::Range(format!(
                "slice [{start}, {stop}) of a recording with {} samples",
                self.n_times()
            )));
        }
        Ok(self.data.slice(s![.., start..stop]).to_owned())
    }
}

// ── Epochs ────────────────────────────────────────────────────────────────

/// One trial's worth of sensor data, cut around an event.
#[derive(Debug, Clone)]
pub struct Epoch {
    /// `[n_ch, n_times]`.
    pub data: Array2<f64>,
    /// Time of the first sample relative to the event (seconds).
    pub tmin: f64,
}

/// Epochs cut from one recording: shared channel metadata plus the
/// per-trial windows that survived rejection.
#[derive(Debug, Clone)]
pub struct Epochs {
    pub ch_names: Vec<String>,
    pub kinds: Vec<ChannelKind>,
    pub sfreq: f64,
    pub epochs: Vec<Epoch>,
}

impl Epochs {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Peak-to-peak rejection thresholds, per sensor kind, plus a flatness
/// floor. A threshold only applies to channels of its kind; `flat`
/// applies to every channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectCriteria {
    /// Max peak-to-peak for gradiometers (T/m).
    pub grad: Option<f64>,
    /// Max peak-to-peak for magnetometers (T).
    pub mag: Option<f64>,
    /// Max peak-to-peak for EEG (V).
    pub eeg: Option<f64>,
    /// Min peak-to-peak on any channel; guards against dead channels.
    pub flat: Option<f64>,
}

impl RejectCriteria {
    fn max_for(&self, kind: ChannelKind) -> Option<f64> {
        match kind {
            ChannelKind::Grad => self.grad,
            ChannelKind::Mag => self.mag,
            ChannelKind::Eeg => self.eeg,
        }
    }

    /// Whether an epoch survives: no channel above its kind's
    /// peak-to-peak ceiling, none below the flatness floor.
    fn accepts(&self, data: &Array2<f64>, kinds: &[ChannelKind]) -> bool {
        for (ch, &kind) in kinds.iter().enumerate() {
            let row = data.row(ch);
            let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
            for &v in row.iter() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            let p2p = hi - lo;
            if let Some(limit) = self.max_for(kind) {
                if p2p > limit {
                    return false;
                }
            }
            if let Some(floor) = self.flat {
                if p2p < floor {
                    return false;
                }
            }
        }
        true
    }
}

/// Cut `[tmin, tmax]` windows around event sample indices.
///
/// Events whose window falls outside the recording are dropped, as are
/// epochs failing `reject`; both are logged, neither is an error. With
/// `baseline`, the per-channel mean over the pre-stimulus samples
/// (t ≤ 0) is subtracted before rejection is evaluated.
pub fn extract_epochs(
    raw: &impl RawSource,
    events: &[usize],
    tmin: f64,
    tmax: f64,
    baseline: bool,
    reject: Option<&RejectCriteria>,
) -> Result<Epochs> {
    if tmax < tmin {
        return Err(MinvError::InvalidParameter(format!(
            "epoch window has tmax {tmax} < tmin {tmin}"
        )));
    }
    let sfreq = raw.sfreq();
    let offset_lo = (tmin * sfreq).round() as i64;
    let offset_hi = (tmax * sfreq).round() as i64;
    let n_samp = (offset_hi - offset_lo + 1) as usize;
    let win_tmin = offset_lo as f64 / sfreq;
    // Pre-stimulus sample count within the window (t <= 0).
    let n_base = (-offset_lo + 1).clamp(0, n_samp as i64) as usize;

    let mut epochs = Vec::with_capacity(events.len());
    for &ev in events {
        let start = ev as i64 + offset_lo;
        let stop = ev as i64 + offset_hi + 1;
        if start < 0 || stop as usize > raw.n_times() {
            debug!("event at sample {ev}: window outside recording, dropped");
            continue;
        }
        let mut data = raw.read_slice(start as usize, stop as usize)?;

        if baseline && n_base > 0 {
            for mut row in data.rows_mut() {
                let mean = row.slice(s![..n_base]).mean().unwrap_or(0.0);
                row -= mean;
            }
        }

        if let Some(criteria) = reject {
            if !criteria.accepts(&data, raw.kinds()) {
                debug!("event at sample {ev}: epoch rejected");
                continue;
            }
        }
        epochs.push(Epoch { data, tmin: win_tmin });
    }
    debug!("extracted {}/{} epochs", epochs.len(), events.len());
    Ok(Epochs {
        ch_names: raw.ch_names().to_vec(),
        kinds: raw.kinds().to_vec(),
        sfreq,
        epochs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn toy_raw() -> RawData {
        // Two channels, 100 samples at 100 Hz: ch0 is a ramp, ch1 a
        // large-amplitude ramp that trips the rejection threshold.
        let data = Array2::from_shape_fn((2, 100), |(c, t)| {
            if c == 0 {
                t as f64 * 1e-6
            } else {
                t as f64 * 1e-3
            }
        });
        RawData {
            ch_names: vec!["EEG 001".into(), "EEG 002".into()],
            kinds: vec![ChannelKind::Eeg; 2],
            data,
            sfreq: 100.0,
            first_samp: 0,
        }
    }

    #[test]
    fn read_slice_bounds() {
        let raw = toy_raw();
        assert!(raw.read_slice(0, 10).is_ok());
        assert!(matches!(raw.read_slice(90, 101), Err(MinvError::Range(_))));
        assert!(matches!(raw.read_slice(10, 10), Err(MinvError::Range(_))));
    }

    #[test]
    fn epochs_window_shape_and_count() {
        let raw = toy_raw();
        let epochs =
            extract_epochs(&raw, &[20, 50, 99], -0.1, 0.1, false, None).unwrap();
        // The event at 99 cannot fit a +0.1 s window.
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs.epochs[0].data.dim(), (2, 21));
        approx::assert_abs_diff_eq!(epochs.epochs[0].tmin, -0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(epochs.sfreq, 100.0, epsilon = 1e-12);
    }

    #[test]
    fn baseline_zeroes_prestimulus_mean() {
        let raw = toy_raw();
        let epochs = extract_epochs(&raw, &[50], -0.05, 0.05, true, None).unwrap();
        let pre = epochs.epochs[0].data.slice(s![0, ..6]);
        approx::assert_abs_diff_eq!(pre.mean().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejection_filters_high_amplitude() {
        let raw = toy_raw();
        // ch1 p2p over 0.2 s is ~20e-3; set ceiling between ch0 and ch1.
        let reject = RejectCriteria { eeg: Some(1e-4), ..Default::default() };
        let kept =
            extract_epochs(&raw, &[20, 50], -0.1, 0.1, false, Some(&reject)).unwrap();
        assert!(kept.is_empty());

        let loose = RejectCriteria { eeg: Some(1.0), ..Default::default() };
        let kept =
            extract_epochs(&raw, &[20, 50], -0.1, 0.1, false, Some(&loose)).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn flat_rejection() {
        let mut raw = toy_raw();
        raw.data.row_mut(0).fill(1.0); // dead channel
        let reject = RejectCriteria { flat: Some(1e-9), ..Default::default() };
        let kept =
            extract_epochs(&raw, &[50], -0.1, 0.1, false, Some(&reject)).unwrap();
        assert!(kept.is_empty());
    }
}
