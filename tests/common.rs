/// Shared synthetic fixtures for the inverse-solution tests.
///
/// Geometry and lead fields are deterministic (trig-pattern based), so
/// every test sees the same well-conditioned problem without shipping
/// binary fixtures. Reference-data regression tests live behind
/// [`sample_dir`] and run only when the MNE sample exports exist.
use std::path::PathBuf;

use ndarray::Array2;

use minv::{ChannelKind, ForwardOperator, NoiseCovariance, SourceBlock, SourceSpace};

#[allow(unused)]
/// Directory with exported MNE sample-data fixtures, if present.
pub fn sample_dir() -> Option<PathBuf> {
    let p = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data");
    if p.join("sample-fwd.safetensors").exists() {
        Some(p)
    } else {
        None
    }
}

#[allow(unused)]
/// Two-hemisphere surface source space with mixed normal orientations.
///
/// lh holds 4 sources with normals alternating between +z and -z (the
/// sulcal-wall situation sign flips exist for); rh holds 2 sources
/// pointing along +x.
pub fn surface_src() -> SourceSpace {
    let lh_normals = ndarray::array![
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, 1.0]
    ];
    let rh_normals = ndarray::array![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
    SourceSpace {
        blocks: vec![
            SourceBlock {
                vertices: vec![3, 10, 21, 33],
                positions: Array2::zeros((4, 3)),
                normals: lh_normals,
            },
            SourceBlock {
                vertices: vec![5, 17],
                positions: Array2::zeros((2, 3)),
                normals: rh_normals,
            },
        ],
    }
}

#[allow(unused)]
/// Free-orientation forward operator over [`surface_src`].
///
/// 8 EEG channels, 6 sources x 3 components; the diagonal boost keeps
/// the whitened lead field full rank and well conditioned.
pub fn surface_forward() -> ForwardOperator {
    let src = surface_src();
    let n_cols = src.n_sources() * 3;
    let lf = Array2::from_shape_fn((8, n_cols), |(i, j)| {
        0.3 * ((i * n_cols + j) as f64 * 0.71).sin()
            + if i == j % 8 { 1.0 } else { 0.0 }
    });
    ForwardOperator::new(
        ch_names(8),
        vec![ChannelKind::Eeg; 8],
        lf,
        src,
        3,
        false,
    )
    .unwrap()
}

#[allow(unused)]
/// Diagonal-dominant noise covariance matching [`surface_forward`].
pub fn surface_cov() -> NoiseCovariance {
    let mut data = Array2::<f64>::eye(8) * 0.04;
    for i in 0..7 {
        data[[i, i + 1]] = 0.004;
        data[[i + 1, i]] = 0.004;
    }
    NoiseCovariance::new(ch_names(8), vec![ChannelKind::Eeg; 8], data).unwrap()
}

#[allow(unused)]
pub fn ch_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("EEG {:03}", i + 1)).collect()
}

#[allow(unused)]
/// Maximum absolute value of an array.
pub fn peak(a: &ndarray::Array1<f64>) -> f64 {
    a.iter().fold(0.0_f64, |m, &v| m.max(v.abs()))
}
