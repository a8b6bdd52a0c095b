//! Piecewise-affine surrogates of moisture loss and enzyme activity.
//!
//! Run with `RUST_LOG=debug` to follow the clustering iterations.

use fmeans::pwa::{process::SampleBounds, PwaParams, PwaSurrogate, Target};
use rand::prelude::*;

fn main() -> fmeans::Result<()> {
    env_logger::init();

    // Continuous states: whole-number draws repeat samples, and a window holding
    // a repeat has a rank-deficient local design.
    let mut rng = StdRng::seed_from_u64(0);
    let samples = SampleBounds::default().sample_continuous(200, &mut rng);

    for target in Target::ALL {
        let targets = target.rates(&samples);
        let model = PwaSurrogate::new(PwaParams::default()).fit(&samples, &targets)?;

        let fit = model.clustering();
        println!(
            "=== {} ({} iterations, converged: {}) ===",
            target.name(),
            fit.iterations(),
            fit.converged()
        );
        println!("  [intercept, T, H, Enz]");
        for (j, m) in model.local_models().iter().enumerate() {
            println!(
                "  region {}: {:3} windows => [{:>10.4}, {:>10.4}, {:>10.4}, {:>10.4}]",
                j,
                m.members.len(),
                m.coefficients[0],
                m.coefficients[1],
                m.coefficients[2],
                m.coefficients[3]
            );
        }
    }
    Ok(())
}
