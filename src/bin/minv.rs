use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use minv::{
    apply_inverse, io, make_inverse_operator, read_label, ApplyConfig, DepthWeighting,
    InverseConfig, Method, OrientationMode, RegularizeFactors,
};

#[derive(Parser)]
#[command(name = "minv", about = "Minimum-norm source estimation (MNE/dSPM)")]
struct Args {
    /// forward solution (safetensors)
    #[arg(long)]
    forward: PathBuf,

    /// noise covariance (safetensors)
    #[arg(long)]
    cov: PathBuf,

    /// evoked average (safetensors)
    #[arg(long)]
    evoked: PathBuf,

    /// output STC stem (writes <stem>-lh.stc/<stem>-rh.stc or <stem>-vl.stc)
    #[arg(long)]
    output: PathBuf,

    /// assumed SNR; lambda2 = 1/SNR^2
    #[arg(long, default_value_t = 3.0)]
    snr: f64,

    /// loose orientation value in (0, 1]
    #[arg(long, default_value_t = 0.2)]
    loose: f64,

    /// fixed (normal-only) orientation instead of loose
    #[arg(long)]
    fixed: bool,

    /// depth-weighting exponent; negative disables depth weighting
    #[arg(long, default_value_t = 0.8)]
    depth: f64,

    /// diagonal-loading factor applied to every sensor type present
    #[arg(long, default_value_t = 0.1)]
    reg: f64,

    /// dSPM noise normalization instead of raw current estimates
    #[arg(long)]
    dspm: bool,

    /// keep only the signed cortical-normal component
    #[arg(long)]
    pick_normal: bool,

    /// restrict the estimate to a FreeSurfer label file
    #[arg(long)]
    label: Option<PathBuf>,

    /// also save the built operator here (safetensors)
    #[arg(long)]
    save_operator: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let fwd = io::read_forward(&args.forward)?;
    let cov = io::read_cov(&args.cov)?;
    let evoked = io::read_evoked(&args.evoked)?;
    println!(
        "Loaded forward {} ch x {} sources, evoked {} samples @ {} Hz (nave {})",
        fwd.n_channels(),
        fwd.n_sources(),
        evoked.n_times(),
        evoked.sfreq,
        evoked.nave
    );

    // Regularize only the sensor types actually present.
    let mut factors = RegularizeFactors::default();
    for &kind in &cov.kinds {
        match kind {
            minv::ChannelKind::Grad => factors.grad = Some(args.reg),
            minv::ChannelKind::Mag => factors.mag = Some(args.reg),
            minv::ChannelKind::Eeg => factors.eeg = Some(args.reg),
        }
    }
    let cov = cov.regularize(&factors)?;

    let build = InverseConfig {
        orientation: if args.fixed {
            OrientationMode::Fixed
        } else {
            OrientationMode::Loose(args.loose)
        },
        depth: (args.depth >= 0.0)
            .then(|| DepthWeighting { exponent: args.depth, ..Default::default() }),
        ..InverseConfig::default()
    };
    let inv = make_inverse_operator(&fwd, &cov, &build)?;
    if let Some(path) = &args.save_operator {
        inv.save(path)?;
        println!("Operator → {}", path.display());
    }

    let apply = ApplyConfig {
        method: if args.dspm { Method::Dspm } else { Method::Mne },
        pick_normal: args.pick_normal,
        label: args.label.as_deref().map(read_label).transpose()?,
        ..ApplyConfig::default()
    };
    let lambda2 = 1.0 / (args.snr * args.snr);
    let stc = apply_inverse(&evoked, &inv, lambda2, &apply)?;
    println!(
        "Estimated {} vertices x {} samples (tmin {:.3} s)",
        stc.n_vertices(),
        stc.n_times(),
        stc.tmin
    );

    stc.save(&args.output)?;
    println!("Written → {}", args.output.display());
    Ok(())
}
