use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::forecast::ForecastSettings;
use crate::guard::{LevelBand, LevelThresholds};
use crate::scanner::{RetrievalMode, TwoStageParams};
use crate::vector::NormalizationMode;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub forecast: ForecastConfig,
    pub diversity: DiversityConfig,
    pub guard: GuardConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    pub window_len: usize,
    pub min_gap_days: usize,
    pub candidate_pool: usize,
    pub horizons: Vec<usize>,
    pub normalization: NormalizationMode,
    #[serde(default)]
    pub retrieval: RetrievalMode,
    #[serde(default)]
    pub two_stage: TwoStageParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiversityConfig {
    pub max_per_phase: usize,
    pub max_total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    pub environment: String,
    pub cooldown_days: u32,
    pub warn: LevelBand,
    pub crisis: LevelBand,
    pub block: LevelBand,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub guard_db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("analog-forecast.log")
}

/// Parse a `YYYY-MM-DD` date argument.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        bail!("invalid date '': expected format like '2024-03-15'");
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected format like '2024-03-15'", s))
}

impl Config {
    /// Load from `ANALOG_FORECAST_CONFIG` or `config/default.toml`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("ANALOG_FORECAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("failed to parse config toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forecast.horizons.is_empty() {
            bail!("forecast.horizons must list at least one horizon");
        }
        if self.forecast.horizons.iter().any(|h| *h == 0) {
            bail!("forecast.horizons must all be > 0");
        }
        if self.guard.environment.trim().is_empty() {
            bail!("guard.environment must not be empty");
        }
        self.forecast_settings()
            .validate()
            .context("forecast settings are invalid")?;
        self.thresholds()
            .validate()
            .context("guard thresholds are invalid")?;
        Ok(())
    }

    pub fn forecast_settings(&self) -> ForecastSettings {
        ForecastSettings {
            window_len: self.forecast.window_len,
            min_gap_days: self.forecast.min_gap_days,
            candidate_pool: self.forecast.candidate_pool,
            mode: self.forecast.normalization,
            retrieval: self.forecast.retrieval,
            two_stage: self.forecast.two_stage,
            max_per_phase: self.diversity.max_per_phase,
            max_total: self.diversity.max_total,
        }
    }

    pub fn thresholds(&self) -> LevelThresholds {
        LevelThresholds {
            warn: self.guard.warn,
            crisis: self.guard.crisis,
            block: self.guard.block,
            cooldown_days: self.guard.cooldown_days,
        }
    }
}
