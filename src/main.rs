use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use analog_forecast::config::{parse_date, Config};
use analog_forecast::forecast::{ForecastEngine, ForecastReport};
use analog_forecast::guard::{GuardInputs, GuardKey, GuardService, SqliteGuardStore};
use analog_forecast::model::{PriceSeries, PriceSeriesFile};

/// A guard input file holds either one observation or a dated history.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GuardInputFile {
    Many(Vec<GuardInputs>),
    One(GuardInputs),
}

impl GuardInputFile {
    fn into_history(self) -> Vec<GuardInputs> {
        match self {
            Self::Many(mut history) => {
                history.sort_by_key(|inputs| inputs.as_of);
                history
            }
            Self::One(inputs) => vec![inputs],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(
        args.first().map(String::as_str),
        None | Some("help" | "--help" | "-h")
    ) {
        print_usage();
        return Ok(());
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set ANALOG_FORECAST_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    let log_file = std::fs::File::create(&config.logging.file)
        .with_context(|| format!("failed to create {}", config.logging.file.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();

    tracing::info!(
        command = %args[0],
        window_len = config.forecast.window_len,
        environment = %config.guard.environment,
        "Starting analog-forecast"
    );

    run_cli(&config, &args).await
}

async fn run_cli(config: &Config, args: &[String]) -> Result<()> {
    match args[0].as_str() {
        "forecast" => {
            let split = args
                .iter()
                .position(|a| a == "--as-of")
                .unwrap_or(args.len());
            let paths = &args[1..split];
            if paths.is_empty() {
                bail!("`forecast` requires at least one series file argument");
            }
            let as_of = parse_as_of_flag(&args[split..])?;
            run_forecast(config, paths, as_of).await
        }
        "guard" => {
            let asset = args
                .get(1)
                .ok_or_else(|| anyhow!("`guard` requires an asset argument"))?;
            let path = args
                .get(2)
                .ok_or_else(|| anyhow!("`guard` requires an inputs file argument"))?;
            run_guard(config, asset, Path::new(path))
        }
        other => bail!(
            "unknown subcommand `{}`. expected one of: forecast|guard|help",
            other
        ),
    }
}

fn parse_as_of_flag(rest: &[String]) -> Result<Option<NaiveDate>> {
    match rest {
        [] => Ok(None),
        [flag, value] if flag == "--as-of" => parse_date(value).map(Some),
        _ => bail!("expected `--as-of YYYY-MM-DD`, got `{}`", rest.join(" ")),
    }
}

fn load_series(path: &Path) -> Result<PriceSeries> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: PriceSeriesFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse series {}", path.display()))?;
    Ok(PriceSeries::from_file(file)?)
}

/// One blocking task per series; each scans once and reports every horizon.
async fn run_forecast(
    config: &Config,
    paths: &[String],
    as_of: Option<NaiveDate>,
) -> Result<()> {
    let engine = Arc::new(ForecastEngine::new(config.forecast_settings())?);
    let horizons: Arc<[usize]> = config.forecast.horizons.clone().into();

    let mut tasks = Vec::with_capacity(paths.len());
    for path in paths {
        let series = load_series(Path::new(path))?;
        let engine = Arc::clone(&engine);
        let horizons = Arc::clone(&horizons);
        tasks.push(tokio::task::spawn_blocking(move || {
            engine.forecast_horizons(&series, &horizons, as_of)
        }));
    }

    let mut reports: Vec<ForecastReport> = Vec::with_capacity(tasks.len() * horizons.len());
    for (path, task) in paths.iter().zip(tasks) {
        let per_series = task
            .await
            .context("forecast task panicked")?
            .with_context(|| format!("forecast failed for {}", path))?;
        reports.extend(per_series);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn run_guard(config: &Config, asset: &str, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let history = serde_json::from_str::<GuardInputFile>(&raw)
        .with_context(|| format!("failed to parse guard inputs {}", path.display()))?
        .into_history();

    let store = SqliteGuardStore::open(&config.store.guard_db_path)?;
    let service = GuardService::new(store, config.thresholds())?;
    let key = GuardKey::new(asset, &config.guard.environment);

    let mut decisions = Vec::with_capacity(history.len());
    for inputs in &history {
        decisions.push(service.evaluate(&key, inputs)?);
    }
    println!("{}", serde_json::to_string_pretty(&decisions)?);
    Ok(())
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  analog-forecast forecast <series.json>... [--as-of YYYY-MM-DD]");
    eprintln!("  analog-forecast guard <asset> <inputs.json>");
    eprintln!("  analog-forecast help");
}
