//! Engine configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file yields a
//! heuristic-only engine. Validation failures are fatal at startup.

use crate::decision::ThresholdRule;
use crate::oracle::OracleError;
use crate::window::{FeatureLayout, PacketFeature};
use crate::{DEFAULT_WINDOW_SIZE, PADDING_SENTINEL};
use censor_common::Action;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Model classifier selected without a model name
    #[error("classifier kind is \"model\" but no model is named")]
    MissingModel,

    /// Classifier names a model with no `[models.<name>]` section or oracle entry
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Rule reads a channel the model does not produce
    #[error("model {model}: rule {rule} reads channel {channel} but the model has {channels} output channels")]
    ChannelOutOfRange {
        /// Model name
        model: String,
        /// Rule index
        rule: usize,
        /// Requested channel
        channel: usize,
        /// Channels produced
        channels: usize,
    },

    /// Window geometry does not match the model input
    #[error("model {model}: window produces {actual} values but the model expects {expected}")]
    InputLengthMismatch {
        /// Model name
        model: String,
        /// Model input length
        expected: usize,
        /// Window size times features per packet
        actual: usize,
    },

    /// Threshold is NaN or infinite
    #[error("model {model}: rule {rule} threshold is not finite")]
    NonFiniteThreshold {
        /// Model name
        model: String,
        /// Rule index
        rule: usize,
    },

    /// Model file failed to load
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// `[window]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    /// Packets per window (K)
    pub size: usize,
    /// Value for slots no packet filled
    pub padding: f32,
    /// Score a short window when its flow closes
    pub score_partial_on_close: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_WINDOW_SIZE,
            padding: PADDING_SENTINEL,
            score_partial_on_close: false,
        }
    }
}

/// `[heuristic]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeuristicConfig {
    /// Exclusive popcount band that always passes
    pub popcount_band: [f64; 2],
    /// Ports never blocked by the heuristic
    pub exempt_ports: Vec<u16>,
    /// Action for a detection: drop or reset
    pub on_detect: Action,
    /// Run the detector on packets without payload
    pub inspect_empty_payloads: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            popcount_band: [3.4, 4.6],
            exempt_ports: vec![80, 443],
            on_detect: Action::Drop,
            inspect_empty_payloads: false,
        }
    }
}

/// `[flows]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Evict flows idle for longer than this (milliseconds)
    pub idle_timeout_ms: u64,
    /// Sweeper cadence (milliseconds)
    pub sweep_interval_ms: u64,
    /// Evict flows on FIN/RST
    pub evict_on_close: bool,
    /// Flow map shard count (power of two)
    pub shards: Option<usize>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            sweep_interval_ms: 1_000,
            evict_on_close: true,
            shards: None,
        }
    }
}

impl FlowConfig {
    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// `[oracle]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleConfig {
    /// Per-call budget (milliseconds)
    pub timeout_ms: u64,
    /// Worker threads evaluating models
    pub workers: usize,
    /// Pending request capacity
    pub queue_depth: usize,
    /// Keep a flow unclassified after a failed call instead of passing it
    pub rescore_on_failure: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 50,
            workers: 1,
            queue_depth: 256,
            rescore_on_failure: false,
        }
    }
}

impl OracleConfig {
    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which classifier runs on tracked flows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Single-packet heuristic
    #[default]
    Heuristic,
    /// Windowed model scored by the oracle
    Model,
}

/// `[classifier]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Classifier kind
    pub kind: ClassifierKind,
    /// Model name for `kind = "model"`
    pub model: Option<String>,
}

/// `[models.<name>]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model file, relative to the config file
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Per-packet features, in model input order
    #[serde(default = "default_features")]
    pub features: Vec<PacketFeature>,
    /// How the window is flattened
    #[serde(default)]
    pub layout: FeatureLayout,
    /// Threshold rules, first match wins
    #[serde(default)]
    pub rules: Vec<ThresholdRule>,
}

fn default_features() -> Vec<PacketFeature> {
    vec![PacketFeature::PayloadLen, PacketFeature::Direction]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            features: default_features(),
            layout: FeatureLayout::default(),
            rules: Vec::new(),
        }
    }
}

/// `[ports]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortConfig {
    /// Ports that trigger `blocklist_action`
    pub blocklist: Vec<u16>,
    /// Action for a blocklisted port
    pub blocklist_action: Action,
    /// When non-empty, flows touching none of these ports get `allowlist_action`
    pub allowlist: Vec<u16>,
    /// Action for flows outside the allowlist
    pub allowlist_action: Action,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            blocklist: Vec::new(),
            blocklist_action: Action::Drop,
            allowlist: Vec::new(),
            allowlist_action: Action::Drop,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Window geometry
    pub window: WindowConfig,
    /// Heuristic detector
    pub heuristic: HeuristicConfig,
    /// Flow table
    pub flows: FlowConfig,
    /// Oracle worker pool
    pub oracle: OracleConfig,
    /// Active classifier
    pub classifier: ClassifierConfig,
    /// Model table
    pub models: BTreeMap<String, ModelConfig>,
    /// Port allow/block lists
    pub ports: PortConfig,
}

impl EngineConfig {
    /// Load and validate a TOML file
    ///
    /// Relative model paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Make relative model paths absolute against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for model in self.models.values_mut() {
            if let Some(path) = model.path.as_mut() {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }

    /// The model selected by `[classifier]`, if the classifier is a model
    pub fn active_model(&self) -> Result<Option<(&str, &ModelConfig)>, ConfigError> {
        match self.classifier.kind {
            ClassifierKind::Heuristic => Ok(None),
            ClassifierKind::Model => {
                let name = self.classifier.model.as_deref().ok_or(ConfigError::MissingModel)?;
                let model = self
                    .models
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?;
                Ok(Some((name, model)))
            }
        }
    }

    /// Check every value that does not depend on a loaded model
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.size == 0 {
            return Err(ConfigError::Invalid("window.size must be at least 1".into()));
        }
        if !self.window.padding.is_finite() {
            return Err(ConfigError::Invalid("window.padding must be finite".into()));
        }

        let [low, high] = self.heuristic.popcount_band;
        if !(low.is_finite() && high.is_finite()) || low >= high {
            return Err(ConfigError::Invalid(format!(
                "heuristic.popcount_band [{}, {}] must satisfy low < high",
                low, high
            )));
        }
        if self.heuristic.on_detect == Action::Pass {
            return Err(ConfigError::Invalid(
                "heuristic.on_detect must be \"drop\" or \"reset\"".into(),
            ));
        }

        if self.flows.idle_timeout_ms == 0 || self.flows.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flows.idle_timeout_ms and flows.sweep_interval_ms must be positive".into(),
            ));
        }
        if let Some(shards) = self.flows.shards {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(ConfigError::Invalid(format!(
                    "flows.shards = {} must be a power of two greater than 1",
                    shards
                )));
            }
        }

        if self.oracle.timeout_ms == 0 || self.oracle.workers == 0 || self.oracle.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "oracle.timeout_ms, oracle.workers and oracle.queue_depth must be positive".into(),
            ));
        }

        for (name, model) in &self.models {
            if model.features.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "model {}: feature list is empty",
                    name
                )));
            }
            for (idx, rule) in model.rules.iter().enumerate() {
                if !rule.threshold.is_finite() {
                    return Err(ConfigError::NonFiniteThreshold {
                        model: name.clone(),
                        rule: idx,
                    });
                }
            }
        }

        self.active_model()?;
        Ok(())
    }
}
