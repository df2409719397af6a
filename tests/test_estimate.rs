mod common;

use ndarray::Array2;

use minv::{MinvError, SourceEstimate};

fn surface_estimate() -> SourceEstimate {
    let data = Array2::from_shape_fn((6, 12), |(i, t)| {
        ((i + 1) as f64 * 0.7 + t as f64 * 0.31).sin() * 1e-10
    });
    SourceEstimate::new(
        vec![vec![3, 10, 21, 33], vec![5, 17]],
        data,
        -0.1,
        0.005,
    )
    .unwrap()
}

fn volume_estimate() -> SourceEstimate {
    let data = Array2::from_shape_fn((5, 7), |(i, t)| (i as f64) - (t as f64) * 0.5);
    SourceEstimate::new(vec![vec![0, 4, 8, 15, 16]], data, 0.0, 0.002).unwrap()
}

#[test]
fn surface_round_trip_through_stc_files() {
    let stc = surface_estimate();
    let stem = std::env::temp_dir().join("minv-inttest-surf");
    stc.save(&stem).unwrap();
    let back = SourceEstimate::load(&stem).unwrap();
    for suffix in ["-lh.stc", "-rh.stc"] {
        let mut p = stem.as_os_str().to_os_string();
        p.push(suffix);
        std::fs::remove_file(p).ok();
    }

    assert_eq!(back.vertices, stc.vertices);
    approx::assert_abs_diff_eq!(back.tmin, stc.tmin, epsilon = 1e-7);
    approx::assert_abs_diff_eq!(back.tstep, stc.tstep, epsilon = 1e-9);
    assert_eq!(back.data.dim(), stc.data.dim());
    for (&a, &b) in back.data.iter().zip(stc.data.iter()) {
        // Payload is f32 on disk.
        approx::assert_relative_eq!(a, b, max_relative = 1e-6);
    }
}

#[test]
fn volume_round_trip_through_stc_file() {
    let stc = volume_estimate();
    let stem = std::env::temp_dir().join("minv-inttest-vol");
    stc.save(&stem).unwrap();
    let back = SourceEstimate::load(&stem).unwrap();
    let mut p = stem.as_os_str().to_os_string();
    p.push("-vl.stc");
    std::fs::remove_file(p).ok();

    assert_eq!(back.vertices, stc.vertices);
    assert_eq!(back.vertices.len(), 1);
    approx::assert_abs_diff_eq!(back.tmin, 0.0, epsilon = 1e-9);
    for (&a, &b) in back.data.iter().zip(stc.data.iter()) {
        approx::assert_relative_eq!(a, b, max_relative = 1e-6);
    }
}

#[test]
fn load_missing_stem_fails_cleanly() {
    let stem = std::env::temp_dir().join("minv-inttest-does-not-exist");
    assert!(matches!(
        SourceEstimate::load(&stem),
        Err(MinvError::InvalidInput(_))
    ));
}

#[test]
fn truncated_stc_is_invalid_input() {
    let stc = volume_estimate();
    let stem = std::env::temp_dir().join("minv-inttest-trunc");
    stc.save(&stem).unwrap();
    let mut path = stem.as_os_str().to_os_string();
    path.push("-vl.stc");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    let res = SourceEstimate::load(&stem);
    std::fs::remove_file(&path).ok();
    assert!(matches!(res, Err(MinvError::InvalidInput(_))));
}

#[test]
fn averaging_preserves_time_base() {
    let a = surface_estimate();
    let b = surface_estimate();
    let avg = SourceEstimate::average(&[a.clone(), b]).unwrap();
    assert_eq!(avg.tmin, a.tmin);
    assert_eq!(avg.tstep, a.tstep);
    for (&x, &y) in avg.data.iter().zip(a.data.iter()) {
        approx::assert_abs_diff_eq!(x, y, epsilon = 1e-18);
    }
}

#[test]
fn arithmetic_between_surface_and_volume_fails() {
    let a = surface_estimate();
    let b = volume_estimate();
    assert!(matches!(a.add(&b), Err(MinvError::IncompatibleEstimate(_))));
}
