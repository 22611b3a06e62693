use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use he_ccfd::activation::{relu, swish};
use he_ccfd::fit::{self, PolynomialFitter};
use he_ccfd::{Cnn, Confusion, Dataset, Error, ExperimentConfig, Result};

#[derive(Parser)]
#[command(
    name = "he-ccfd",
    version,
    about = "Fit polynomial activations, train the HE-friendly CNN and export it"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Relu,
    Swish,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a polynomial approximation and print its coefficients
    Fit {
        #[arg(long, value_enum, default_value = "relu")]
        target: Target,
        #[arg(long, default_value_t = 4)]
        degree: usize,
        /// Lower bound of the normalized fitting domain
        #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
        lo: f64,
        /// Upper bound of the normalized fitting domain
        #[arg(long, default_value_t = 1.0)]
        hi: f64,
        /// Input scale the polynomial is evaluated at
        #[arg(long, default_value_t = 30.0)]
        scale: f64,
        /// Seed for the operating-range sampler
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Train a model and save the best epoch as a JSON artifact
    Train {
        /// Experiment config (JSON); defaults are used when omitted
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Training data: {"features": [[...]], "labels": [...]}
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
        /// Validation data; otherwise split off the training data
        #[arg(long, value_name = "PATH")]
        validation: Option<PathBuf>,
        /// Where to write the model artifact
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Print the metadata and parameter shapes of a model artifact
    Inspect {
        model: PathBuf,
    },
    /// Run a model artifact over a dataset
    Predict {
        #[arg(long, value_name = "PATH")]
        model: PathBuf,
        #[arg(long, value_name = "PATH")]
        data: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Fit {
            target,
            degree,
            lo,
            hi,
            scale,
            seed,
        } => run_fit(target, degree, [lo, hi], scale, seed),
        Command::Train {
            config,
            data,
            validation,
            output,
        } => run_train(config, data, validation, output),
        Command::Inspect { model } => run_inspect(model),
        Command::Predict { model, data } => run_predict(model, data),
    }
}

fn run_fit(target: Target, degree: usize, domain: [f64; 2], scale: f64, seed: u64) -> Result<()> {
    let f: fn(f64) -> f64 = match target {
        Target::Relu => relu,
        Target::Swish => swish,
    };
    let fitter = PolynomialFitter::new(degree, domain)?.with_scale(scale)?;
    let xs = fit::operating_range_samples(domain, seed)?;
    let p = fitter.fit_fn(f, &xs)?;

    let scaled: Vec<f64> = xs.iter().map(|&t| t * scale).collect();
    info!(
        "fitted degree {degree} on [{}, {}] at scale {scale}: mean abs error {:.6}",
        domain[0],
        domain[1],
        fit::mean_abs_error(&p, f, &scaled)
    );

    let out = serde_json::json!({
        "coefficients": p.coefficients(),
        "scale": p.scale(),
        "monomial": p.to_monomial(),
    });
    let s = serde_json::to_string_pretty(&out)
        .map_err(|e| Error::InvalidData(format!("failed to serialize coefficients: {e}")))?;
    println!("{s}");
    Ok(())
}

fn run_train(
    config: Option<PathBuf>,
    data: PathBuf,
    validation: Option<PathBuf>,
    output: PathBuf,
) -> Result<()> {
    let cfg = match config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    let all = Dataset::load_json(&data)?;
    let (train, val) = match validation {
        Some(path) => (all, Some(Dataset::load_json(path)?)),
        None if cfg.training.validation_fraction > 0.0 => {
            let (train, val) = all.split(cfg.training.validation_fraction, cfg.model.seed)?;
            (train, Some(val))
        }
        None => (all, None),
    };
    info!(
        "training on {} samples ({} positive), validating on {}",
        train.len(),
        train.positives(),
        val.as_ref().map_or(0, Dataset::len)
    );

    let mut model = cfg.builder()?.build_with_seed(cfg.model.seed)?;
    let mut report = model.fit(&train, val.as_ref(), &cfg.training.fit_config())?;

    if let Some(best) = report.best_snapshot() {
        info!("best epoch {} with f1 {:.4}", best.epoch() + 1, best.score());
    }
    if !report.best.persist(&output)? {
        model.save_json(&output)?;
    }
    println!("{}", output.display());
    Ok(())
}

fn run_inspect(path: PathBuf) -> Result<()> {
    let model = Cnn::load_json(&path)?;
    println!("input length: {}", model.input_len());
    println!("activation:   {}", model.activation().kind());
    if let Some(p) = model.activation().coefficients() {
        println!("  coefficients: {:?}", p.coefficients());
        println!("  scale:        {}", p.scale());
    }
    println!("precision:    {:?}", model.precision());
    println!("output:       {:?}", model.output_mode());
    for (name, t) in model.named_parameters() {
        println!("{name:<14} {:?}", t.shape());
    }
    println!("parameters:   {}", model.num_parameters());
    Ok(())
}

fn run_predict(model: PathBuf, data: PathBuf) -> Result<()> {
    let model = Cnn::load_json(&model)?;
    let data = Dataset::load_json(&data)?;
    let outputs = model.predict(&data)?;
    for y in &outputs {
        println!("{y}");
    }
    let c = Confusion::from_outputs(&outputs, data.labels(), model.output_mode());
    info!(
        "accuracy {:.4}, precision {:.4}, recall {:.4}, f1 {:.4}",
        c.accuracy(),
        c.precision(),
        c.recall(),
        c.f1()
    );
    Ok(())
}
