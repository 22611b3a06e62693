use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use he_ccfd::{CnnBuilder, Dataset, FitConfig, Loss};

/// Imbalanced toy data: positives carry a bump in the middle of the window.
fn synthetic(n: usize, len: usize, seed: u64) -> he_ccfd::Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ds = Dataset::new(len)?;
    for _ in 0..n {
        let positive = rng.gen_bool(0.2);
        let row: Vec<f64> = (0..len)
            .map(|j| {
                let noise = rng.gen_range(-0.3..0.3);
                let d = j as f64 - len as f64 / 2.0;
                if positive { noise + (-d * d / 8.0).exp() } else { noise }
            })
            .collect();
        ds.push(&row, if positive { 1.0 } else { 0.0 })?;
    }
    Ok(ds)
}

fn main() -> he_ccfd::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let len = 30;
    let data = synthetic(600, len, 0)?;
    let (train, val) = data.split(0.2, 0)?;

    let mut model = CnnBuilder::new(len)?.build_with_seed(0)?;
    let report = model.fit(
        &train,
        Some(&val),
        &FitConfig {
            epochs: 10,
            lr: 1e-3,
            loss: Loss::BceWithLogits { pos_weight: 2.0 },
            ..FitConfig::default()
        },
    )?;

    if let Some(best) = report.best_snapshot() {
        let eval = best.model().evaluate(&val, Loss::BceWithLogits { pos_weight: 2.0 })?;
        println!(
            "best epoch {}: val loss {:.4}, accuracy {:.3}, f1 {:.3}",
            best.epoch() + 1,
            eval.loss,
            eval.accuracy(),
            eval.f1()
        );
    }
    Ok(())
}
