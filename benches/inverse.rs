use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;

use minv::{
    apply_inverse, make_inverse_operator, ApplyConfig, ChannelKind, Evoked,
    ForwardOperator, InverseConfig, NoiseCovariance, SourceBlock, SourceSpace,
};

/// Synthetic problem: 60 channels, 300 sources x 3 components.
fn fixture() -> (ForwardOperator, NoiseCovariance, Evoked) {
    let n_ch = 60;
    let n_src = 300;
    let normals = Array2::from_shape_fn((n_src, 3), |(k, c)| {
        let v = [(k as f64 * 0.13).sin(), (k as f64 * 0.29).cos(), 1.0];
        let norm = (v[0] * v[0] + v[1] * v[1] + 1.0).sqrt();
        v[c] / norm
    });
    let src = SourceSpace {
        blocks: vec![SourceBlock {
            vertices: (0..n_src as u32).collect(),
            positions: Array2::zeros((n_src, 3)),
            normals,
        }],
    };
    let n_cols = n_src * 3;
    let lf = Array2::from_shape_fn((n_ch, n_cols), |(i, j)| {
        0.2 * ((i * n_cols + j) as f64 * 0.37).sin() + if i == j % n_ch { 1.0 } else { 0.0 }
    });
    let names: Vec<String> = (0..n_ch).map(|i| format!("EEG {:03}", i + 1)).collect();
    let fwd = ForwardOperator::new(
        names.clone(),
        vec![ChannelKind::Eeg; n_ch],
        lf,
        src,
        3,
        false,
    )
    .unwrap();
    let cov =
        NoiseCovariance::new(names.clone(), vec![ChannelKind::Eeg; n_ch], Array2::eye(n_ch))
            .unwrap();
    let evoked = Evoked {
        ch_names: names,
        data: Array2::from_shape_fn((n_ch, 100), |(i, t)| {
            ((i + 1) as f64 * 0.05 * (t as f64 * 0.2).sin()) * 1e-12
        }),
        tmin: -0.1,
        sfreq: 600.0,
        nave: 100,
    };
    (fwd, cov, evoked)
}

fn bench_make_operator(c: &mut Criterion) {
    let (fwd, cov, _) = fixture();
    c.bench_function("make_inverse_operator [60 ch x 900 cols]", |b| {
        b.iter(|| {
            let inv =
                make_inverse_operator(black_box(&fwd), &cov, &InverseConfig::default())
                    .unwrap();
            black_box(inv.sing[0])
        })
    });
}

fn bench_apply_mne(c: &mut Criterion) {
    let (fwd, cov, evoked) = fixture();
    let inv = make_inverse_operator(&fwd, &cov, &InverseConfig::default()).unwrap();
    c.bench_function("apply_inverse MNE [300 src x 100 t]", |b| {
        b.iter(|| {
            let stc =
                apply_inverse(black_box(&evoked), &inv, 1.0 / 9.0, &ApplyConfig::default())
                    .unwrap();
            black_box(stc.data[[0, 0]])
        })
    });
}

fn bench_apply_dspm(c: &mut Criterion) {
    let (fwd, cov, evoked) = fixture();
    let inv = make_inverse_operator(&fwd, &cov, &InverseConfig::default()).unwrap();
    c.bench_function("apply_inverse dSPM [300 src x 100 t]", |b| {
        b.iter(|| {
            let stc =
                apply_inverse(black_box(&evoked), &inv, 1.0 / 9.0, &ApplyConfig::dspm())
                    .unwrap();
            black_box(stc.data[[0, 0]])
        })
    });
}

criterion_group!(benches, bench_make_operator, bench_apply_mne, bench_apply_dspm);
criterion_main!(benches);
