use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use market_runtime::{Behavior, REPLY_OFFSET};
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_SIMULATION_CONFIG: &str = include_str!("data/simulation_config.json");

/// Environment variable naming a JSON file that replaces the builtin config.
pub const SIMULATION_CONFIG_ENV: &str = "MARKET_SIM_CONFIG";

/// Top-level configuration for one simulation run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub city: CityConfig,
    pub weather: WeatherConfig,
    pub market: MarketConfig,
    pub sentiment: SentimentConfig,
    pub shocks: ShockConfig,
    pub pacer: PacerConfig,
    pub control_bind: SocketAddr,
    pub metrics_history_limit: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 24_301,
            city: CityConfig::default(),
            weather: WeatherConfig::default(),
            market: MarketConfig::default(),
            sentiment: SentimentConfig::default(),
            shocks: ShockConfig::default(),
            pacer: PacerConfig::default(),
            control_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
            metrics_history_limit: 256,
        }
    }
}

impl SimulationConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_SIMULATION_CONFIG)
            .expect("builtin simulation config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimulationConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulationConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| SimulationConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        SimulationConfig::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        if self.city.house_count == 0 {
            return Err(invalid("city.house_count", "at least one household is required"));
        }
        if u64::from(self.city.house_count) >= REPLY_OFFSET {
            return Err(invalid(
                "city.house_count",
                format!("household ids must stay below the reply offset {REPLY_OFFSET}"),
            ));
        }
        if self.market.workers == 0 {
            return Err(invalid("market.workers", "settlement needs at least one worker"));
        }
        if self.shocks.politics_max_delay_ms == 0 || self.shocks.economy_max_delay_ms == 0 {
            return Err(invalid("shocks", "maximum shock delay must be positive"));
        }
        if self.sentiment.floor == 0 || self.sentiment.floor > self.sentiment.cap {
            return Err(invalid(
                "sentiment.floor",
                format!("floor must lie in 1..={}", self.sentiment.cap),
            ));
        }
        if self.pacer.mode == PacerMode::Auto && self.pacer.interval_ms == 0 {
            return Err(invalid("pacer.interval_ms", "auto pacing needs a positive interval"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SimulationConfigError {
    SimulationConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Error)]
pub enum SimulationConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid simulation config field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CityConfig {
    pub house_count: u32,
    pub average_consumption: f64,
    /// Upper bound of each household's drawn average production.
    pub max_production: f64,
    /// Pins every household to one behavior instead of drawing it at random.
    pub behavior_mix: Option<Behavior>,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            house_count: 10,
            average_consumption: 70.0,
            max_production: 80.0,
            behavior_mix: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub temperature: i32,
    pub cloud_cover: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            temperature: 18,
            cloud_cover: 35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub price: f64,
    pub politics: u32,
    pub economy: u32,
    pub workers: usize,
    pub pricing: PricingConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price: 0.15,
            politics: 100,
            economy: 100,
            workers: 5,
            pricing: PricingConfig::default(),
        }
    }
}

/// Coefficients of the price update applied in the market's write step.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub gamma: f64,
    /// Temperature, cloud cover and aggregate consumption weights.
    pub alpha: [f64; 3],
    /// Politics and economy weights, applied to the inverse scores.
    pub beta: [f64; 2],
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.98,
            alpha: [0.0001, 0.0001, 0.000001],
            beta: [0.025, 0.025],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub floor: u32,
    pub cap: u32,
    pub shock_penalty: u32,
    pub recovery: u32,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            floor: 1,
            cap: 100,
            shock_penalty: 30,
            recovery: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShockConfig {
    pub politics_max_delay_ms: u64,
    pub economy_max_delay_ms: u64,
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self {
            politics_max_delay_ms: 6_000,
            economy_max_delay_ms: 7_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacerMode {
    /// Turns advance on a fixed wall-clock interval.
    Auto,
    /// Turns advance only on an explicit trigger.
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    pub mode: PacerMode,
    pub interval_ms: u64,
}

impl PacerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            mode: PacerMode::Auto,
            interval_ms: 1_000,
        }
    }
}

/// Loads the configuration named by [`SIMULATION_CONFIG_ENV`], falling back to
/// the builtin document when the variable is unset or the file is unusable.
pub fn load_simulation_config_from_env() -> (SimulationConfig, Option<PathBuf>) {
    let Some(path) = env::var(SIMULATION_CONFIG_ENV).ok().map(PathBuf::from) else {
        tracing::info!(
            target: "power_market::config",
            "simulation_config.loaded=builtin"
        );
        return (SimulationConfig::builtin(), None);
    };

    match SimulationConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "power_market::config",
                path = %path.display(),
                "simulation_config.loaded=file"
            );
            (config, Some(path))
        }
        Err(err) => {
            tracing::warn!(
                target: "power_market::config",
                path = %path.display(),
                error = %err,
                "simulation_config.load_failed"
            );
            (SimulationConfig::builtin(), None)
        }
    }
}
