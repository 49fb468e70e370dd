use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

use crate::exchange::MarginMode;
use crate::execution::{schedule, EngineSettings};
use crate::risk::RiskParams;
use crate::strategy::MeanReversionConfig;

/// Runtime configuration, loaded from the environment (and .env via
/// dotenvy). Validated before the first cycle runs; an out-of-range value
/// stops the process from starting at all.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub api_key: String,
    pub api_secret: String,

    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_margin_asset")]
    pub margin_asset: String,

    #[serde(default = "default_z_score_window")]
    pub z_score_window: usize,
    #[serde(default = "default_adx_window")]
    pub adx_window: usize,
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,

    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
}

fn default_symbol() -> String {
    "BNBUSDT".to_string()
}
fn default_timeframe() -> String {
    "15m".to_string()
}
fn default_margin_asset() -> String {
    "USDT".to_string()
}
fn default_z_score_window() -> usize {
    30
}
fn default_adx_window() -> usize {
    14
}
fn default_entry_threshold() -> f64 {
    2.0
}
fn default_exit_threshold() -> f64 {
    0.5
}
fn default_adx_threshold() -> f64 {
    25.0
}
fn default_risk_per_trade() -> f64 {
    0.01
}
fn default_stop_loss_pct() -> f64 {
    0.02
}
fn default_max_leverage() -> u32 {
    10
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        let loaded: BotConfig = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()
            .context("reading environment")?
            .try_deserialize()
            .context("parsing configuration (API_KEY and API_SECRET are required)")?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            bail!("API_KEY and API_SECRET must not be empty");
        }
        if self.symbol.is_empty() {
            bail!("SYMBOL must not be empty");
        }
        if schedule::timeframe_secs(&self.timeframe).is_none() {
            bail!("TIMEFRAME {:?} is not a valid interval", self.timeframe);
        }
        if self.z_score_window < 2 {
            bail!(
                "Z_SCORE_WINDOW must be at least 2, got {}",
                self.z_score_window
            );
        }
        if self.adx_window < 1 {
            bail!("ADX_WINDOW must be at least 1");
        }
        if self.entry_threshold <= 0.0 {
            bail!("ENTRY_THRESHOLD must be positive, got {}", self.entry_threshold);
        }
        if self.exit_threshold < 0.0 || self.exit_threshold >= self.entry_threshold {
            bail!(
                "EXIT_THRESHOLD must be in [0, ENTRY_THRESHOLD), got {}",
                self.exit_threshold
            );
        }
        if self.adx_threshold <= 0.0 {
            bail!("ADX_THRESHOLD must be positive, got {}", self.adx_threshold);
        }
        if self.risk_per_trade <= 0.0 || self.risk_per_trade > 1.0 {
            bail!(
                "RISK_PER_TRADE must be in (0, 1], got {}",
                self.risk_per_trade
            );
        }
        if self.stop_loss_pct <= 0.0 || self.stop_loss_pct >= 1.0 {
            bail!(
                "STOP_LOSS_PCT must be in (0, 1), got {}",
                self.stop_loss_pct
            );
        }
        if self.max_leverage < 1 {
            bail!("MAX_LEVERAGE must be at least 1");
        }
        Ok(())
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            risk_per_trade: self.risk_per_trade,
            stop_loss_pct: self.stop_loss_pct,
            max_leverage: self.max_leverage,
        }
    }

    pub fn strategy_config(&self) -> MeanReversionConfig {
        MeanReversionConfig {
            z_score_window: self.z_score_window,
            adx_window: self.adx_window,
            entry_threshold: self.entry_threshold,
            exit_threshold: self.exit_threshold,
            adx_threshold: self.adx_threshold,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            margin_asset: self.margin_asset.clone(),
            leverage: self.max_leverage,
            margin_mode: MarginMode::Isolated,
            risk: self.risk_params(),
        }
    }
}
