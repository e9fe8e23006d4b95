//! Configuration file support for loopctl.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/loopctl/config.toml`.
//! Every tuned constant of the engine lives in [`AlgorithmSettings`] so it can
//! be reviewed and overridden without a rebuild. Durations are in minutes.

use crate::time::serde_minutes;
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub algorithm: AlgorithmSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tunable parameters of the forecasting and dosing engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlgorithmSettings {
    /// Discretization step of every effect curve
    #[serde(default = "default_delta", with = "serde_minutes")]
    pub delta: Duration,

    #[serde(default)]
    pub carbs: CarbSettings,

    #[serde(default)]
    pub momentum: MomentumSettings,

    #[serde(default)]
    pub retrospective: RetrospectiveSettings,

    #[serde(default)]
    pub dosing: DosingSettings,
}

impl Default for AlgorithmSettings {
    fn default() -> Self {
        Self {
            delta: default_delta(),
            carbs: CarbSettings::default(),
            momentum: MomentumSettings::default(),
            retrospective: RetrospectiveSettings::default(),
            dosing: DosingSettings::default(),
        }
    }
}

/// Carb absorption parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbSettings {
    /// Time before carbs start to raise glucose
    #[serde(with = "serde_minutes")]
    pub delay: Duration,

    /// Absorption time for entries that declare none
    #[serde(with = "serde_minutes")]
    pub default_absorption_time: Duration,

    /// Multiplier giving the longest an entry may take to absorb
    pub absorption_time_overrun: f64,

    /// How far before the decision time carb history (and insulin effects) reach
    #[serde(with = "serde_minutes")]
    pub maximum_absorption_window: Duration,
}

impl Default for CarbSettings {
    fn default() -> Self {
        Self {
            delay: Duration::minutes(10),
            default_absorption_time: Duration::minutes(180),
            absorption_time_overrun: 1.5,
            maximum_absorption_window: Duration::minutes(600),
        }
    }
}

/// Momentum projection parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumSettings {
    /// Lookback over which recent glucose is regressed
    #[serde(with = "serde_minutes")]
    pub data_interval: Duration,

    /// Horizon of the momentum projection
    #[serde(with = "serde_minutes")]
    pub duration: Duration,

    /// Expected spacing between consecutive glucose samples
    #[serde(with = "serde_minutes")]
    pub continuity_interval: Duration,
}

impl Default for MomentumSettings {
    fn default() -> Self {
        Self {
            data_interval: Duration::minutes(15),
            duration: Duration::minutes(30),
            continuity_interval: Duration::minutes(5),
        }
    }
}

/// Retrospective correction parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrospectiveSettings {
    /// Size of the buckets discrepancies are summed into
    #[serde(with = "serde_minutes")]
    pub grouping_interval: Duration,

    /// Tuned stretch applied to the grouping interval
    pub grouping_interval_multiplier: f64,

    /// The newest bucket must end this close to the latest glucose
    #[serde(with = "serde_minutes")]
    pub recency_interval: Duration,

    /// How far back discrepancies are collected
    #[serde(with = "serde_minutes")]
    pub integration_interval: Duration,

    /// Duration of the correction effect
    #[serde(with = "serde_minutes")]
    pub effect_duration: Duration,

    pub current_discrepancy_gain: f64,
    pub persistent_discrepancy_gain: f64,

    #[serde(with = "serde_minutes")]
    pub correction_time_constant: Duration,

    pub differential_gain: f64,

    #[serde(with = "serde_minutes")]
    pub maximum_correction_effect_duration: Duration,
}

impl Default for RetrospectiveSettings {
    fn default() -> Self {
        Self {
            grouping_interval: Duration::minutes(30),
            grouping_interval_multiplier: 1.01,
            recency_interval: Duration::minutes(15),
            integration_interval: Duration::minutes(180),
            effect_duration: Duration::minutes(60),
            current_discrepancy_gain: 1.0,
            persistent_discrepancy_gain: 2.0,
            correction_time_constant: Duration::minutes(60),
            differential_gain: 2.0,
            maximum_correction_effect_duration: Duration::minutes(180),
        }
    }
}

/// Dose translation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DosingSettings {
    #[serde(with = "serde_minutes")]
    pub temp_basal_duration: Duration,

    /// A matching temp basal with more than this left is left running
    #[serde(with = "serde_minutes")]
    pub continuation_interval: Duration,

    /// Share of the needed correction delivered by an automatic bolus
    pub automatic_bolus_application_factor: f64,

    /// Fraction of the insulin effect duration during which the correction
    /// target stays at the suspend threshold
    pub use_min_until_percent: f64,
}

impl Default for DosingSettings {
    fn default() -> Self {
        Self {
            temp_basal_duration: Duration::minutes(30),
            continuation_interval: Duration::minutes(11),
            automatic_bolus_application_factor: 0.4,
            use_min_until_percent: 0.5,
        }
    }
}

// Default value functions
fn default_delta() -> Duration {
    Duration::minutes(5)
}

fn default_log_level() -> String {
    "info".into()
}

impl AlgorithmSettings {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("delta", self.delta),
            ("carbs.default_absorption_time", self.carbs.default_absorption_time),
            ("carbs.maximum_absorption_window", self.carbs.maximum_absorption_window),
            ("momentum.data_interval", self.momentum.data_interval),
            ("momentum.duration", self.momentum.duration),
            ("momentum.continuity_interval", self.momentum.continuity_interval),
            ("retrospective.grouping_interval", self.retrospective.grouping_interval),
            ("retrospective.recency_interval", self.retrospective.recency_interval),
            ("retrospective.integration_interval", self.retrospective.integration_interval),
            ("retrospective.correction_time_constant", self.retrospective.correction_time_constant),
            ("dosing.temp_basal_duration", self.dosing.temp_basal_duration),
        ];
        for (name, duration) in durations {
            if duration <= Duration::zero() {
                return Err(Error::Config(format!("{} must be positive, got {} min", name, duration.num_minutes())));
            }
        }

        if self.carbs.delay < Duration::zero() {
            return Err(Error::Config("carbs.delay must not be negative".into()));
        }
        if self.retrospective.effect_duration <= self.delta {
            return Err(Error::Config(format!(
                "retrospective.effect_duration must exceed delta, got {} min",
                self.retrospective.effect_duration.num_minutes()
            )));
        }
        if self.carbs.absorption_time_overrun < 1.0 {
            return Err(Error::Config(format!(
                "carbs.absorption_time_overrun must be >= 1, got {}",
                self.carbs.absorption_time_overrun
            )));
        }
        if self.retrospective.grouping_interval_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retrospective.grouping_interval_multiplier must be >= 1, got {}",
                self.retrospective.grouping_interval_multiplier
            )));
        }

        let factors = [
            ("dosing.automatic_bolus_application_factor", self.dosing.automatic_bolus_application_factor),
            ("dosing.use_min_until_percent", self.dosing.use_min_until_percent),
        ];
        for (name, factor) in factors {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(Error::Config(format!("{} must be in (0, 1], got {}", name, factor)));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.algorithm.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("loopctl").join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
