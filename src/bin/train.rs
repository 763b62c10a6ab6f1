//! Offline model tooling.
//!
//! ```text
//! train generate --out data/training.csv --rows 2000
//! train consolidate --data-dir data --out data/training.csv [--city Recife]
//! train fit --data data/training.csv --out models/iqv_model.json
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use city_sense::config::TelemetryConfig;
use city_sense::error::TrainError;
use city_sense::forest::ForestParams;
use city_sense::sources::normalize_city_name;
use city_sense::store::FileStore;
use city_sense::telemetry;
use city_sense::trainer::{self, SyntheticSpec, TrainConfig};

#[derive(Parser)]
#[command(name = "train", about = "Generate data and fit the IQV model")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write a synthetic training CSV.
    Generate {
        #[arg(long, default_value = "data/training.csv")]
        out: PathBuf,
        #[arg(long, default_value_t = 2000)]
        rows: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 3.0)]
        noise: f64,
    },
    /// Turn persisted pipeline records into a training CSV.
    Consolidate {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "data/training.csv")]
        out: PathBuf,
        /// Only this city's records.
        #[arg(long)]
        city: Option<String>,
    },
    /// Fit a random forest on a CSV and write the model artifact.
    Fit {
        #[arg(long, default_value = "data/training.csv")]
        data: PathBuf,
        #[arg(long, default_value = "models/iqv_model.json")]
        out: PathBuf,
        #[arg(long, default_value_t = 100)]
        trees: usize,
        #[arg(long, default_value_t = 12)]
        max_depth: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Target scale (10 or 100). Inferred from the data when omitted.
        #[arg(long)]
        target_scale: Option<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init(&TelemetryConfig::default());

    match Cli::parse().cmd {
        Cmd::Generate {
            out,
            rows,
            seed,
            noise,
        } => {
            let spec = SyntheticSpec {
                n: rows,
                seed,
                noise_sd: noise,
                ..SyntheticSpec::new(chrono::Local::now().date_naive())
            };
            let data = trainer::generate_synthetic(&spec);
            trainer::write_dataset(&out, &data)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {} rows to {}", data.len(), out.display());
        }
        Cmd::Consolidate {
            data_dir,
            out,
            city,
        } => {
            let store = FileStore::new(&data_dir);
            let city = city.as_deref().map(normalize_city_name);
            let rows = trainer::consolidate(&store, city.as_deref())
                .with_context(|| format!("consolidating records in {}", data_dir.display()))?;
            trainer::write_dataset(&out, &rows)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {} rows to {}", rows.len(), out.display());
        }
        Cmd::Fit {
            data,
            out,
            trees,
            max_depth,
            seed,
            target_scale,
        } => {
            let rows = match trainer::read_dataset(&data) {
                Ok(rows) => rows,
                Err(TrainError::MissingColumns(cols)) => {
                    anyhow::bail!("dataset is missing required columns: {}", cols.join(", "))
                }
                Err(e) => return Err(e).with_context(|| format!("reading {}", data.display())),
            };
            let cfg = TrainConfig {
                forest: ForestParams {
                    n_trees: trees,
                    max_depth,
                    seed,
                    ..ForestParams::default()
                },
                seed,
                target_scale,
                ..TrainConfig::default()
            };
            let report = trainer::train(&rows, &cfg)?;
            report
                .artifact
                .write(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            match report.test_rmse {
                Some(rmse) => println!("test RMSE: {rmse:.3}"),
                None => println!("test RMSE: n/a (no held-out rows)"),
            }
            println!(
                "train RMSE: {:.3} ({} train / {} test rows)",
                report.train_rmse, report.n_train, report.n_test
            );
            println!("model written to {}", out.display());
        }
    }
    Ok(())
}
