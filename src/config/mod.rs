//! Guard configuration.
//!
//! [`GuardConfig`] is a flat options record — presets, thresholds, timeouts,
//! per-detector enables, normalizer toggles, cache and judge knobs.  The
//! [`ConfigBuilder`] resolves it from multiple sources (later wins):
//!
//! 1. Compiled defaults (the Standard preset)
//! 2. A config file (`.yaml`, `.yml`, `.toml`, or `.json`)
//! 3. Environment variables (`GUARDPOST_*`)
//!
//! A builder is a convenience only — `Guardrails::from_config` accepts the
//! plain record.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration.
    #[error("failed to parse {format} config: {source}")]
    Parse {
        /// Format that failed to parse (YAML, TOML, JSON).
        format: String,
        /// Underlying parse error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unrecognised configuration file extension.
    #[error("unsupported config file format: {message}")]
    UnsupportedFormat {
        /// Description of the problem.
        message: String,
    },

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// Environment variable key.
        key: String,
        /// Error message.
        message: String,
    },
}

// ── FailMode / Preset ──────────────────────────────────────────────────

/// Behavior when a detector or dependency fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Failure passes the request through, logged at warning.
    #[default]
    Open,
    /// Failure blocks the request with Critical severity.
    Closed,
}

/// Detector bundle and threshold defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Injection and jailbreak checks only.
    Minimal,
    /// The full L1 set, plus L2/L3 when backends are wired.
    #[default]
    Standard,
    /// Standard with lowered thresholds (0.8 / 0.5 / 0.3).
    Strict,
}

// ── JudgeSettings ──────────────────────────────────────────────────────

/// Remote-judge knobs, nested in [`GuardConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct JudgeSettings {
    /// Model identifier.
    pub model: String,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    /// Confidence at or above which a judgment blocks.
    #[validate(range(min = 0.0, max = 1.0))]
    pub block_threshold: f32,
    /// Confidence used to derive `is_safe` when the judge omits it.
    #[validate(range(min = 0.0, max = 1.0))]
    pub flag_threshold: f32,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            max_tokens: 512,
            temperature: 0.0,
            block_threshold: 0.85,
            flag_threshold: 0.6,
        }
    }
}

// ── GuardConfig ────────────────────────────────────────────────────────

/// The flat configuration record the pipeline is built from.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
#[validate(schema(function = validate_threshold_order))]
pub struct GuardConfig {
    /// Detector bundle and threshold defaults.
    pub preset: Preset,
    /// On detector error: pass (Open) or block (Closed).
    pub fail_mode: FailMode,

    /// Aggregate score at or above which the decision is Block.
    #[validate(range(min = 0.0, max = 1.0))]
    pub block_threshold: f32,
    /// Aggregate score at or above which the decision is Flag.
    #[validate(range(min = 0.0, max = 1.0))]
    pub flag_threshold: f32,
    /// Aggregate score at or above which escalation is considered.
    #[validate(range(min = 0.0, max = 1.0))]
    pub escalation_threshold: f32,

    /// Per-detector check budget in milliseconds.
    pub guard_timeout_ms: u64,
    /// Remote-judge budget during escalation, in milliseconds.
    pub escalation_timeout_ms: u64,
    /// Per-pattern regex match budget in milliseconds.
    pub match_timeout_ms: u64,
    /// Retries after a failed judge attempt.
    pub max_retries: u32,

    /// Enable the L1 prompt-injection detector.
    pub prompt_injection_enabled: bool,
    /// Enable the L1 jailbreak detector.
    pub jailbreak_enabled: bool,
    /// Enable the L1 encoding-bypass detector.
    pub encoding_bypass_enabled: bool,
    /// Enable the L1 PII detectors (both sides).
    pub pii_enabled: bool,
    /// Enable the L1 refusal detector (output side).
    pub refusal_enabled: bool,
    /// Enable the L2 injection classifier (needs a classifier backend).
    pub classifier_enabled: bool,
    /// Enable the L2 toxicity classifier (needs a classifier backend).
    pub toxicity_enabled: bool,
    /// Enable the L3 RAG document security detector.
    pub rag_security_enabled: bool,
    /// Enable the L3 groundedness detector (needs a judge).
    pub groundedness_enabled: bool,
    /// Whether Escalate decisions may invoke the remote judge at all.
    pub escalation_enabled: bool,

    /// Locale tags selecting PII banks (e.g. `["us", "ko"]`).
    pub supported_languages: Vec<String>,

    /// Normalizer: apply NFKC.
    pub nfkc_enabled: bool,
    /// Normalizer: drop invisible characters.
    pub strip_invisible_enabled: bool,
    /// Normalizer: fold homoglyphs.
    pub fold_homoglyphs_enabled: bool,

    /// Semantic cache master switch.
    pub cache_enabled: bool,
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_seconds: u64,
    /// Cache capacity before eviction.
    pub cache_max_entries: usize,

    /// Remote-judge knobs.
    #[validate(nested)]
    pub judge: JudgeSettings,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            preset: Preset::Standard,
            fail_mode: FailMode::Open,
            block_threshold: 0.9,
            flag_threshold: 0.7,
            escalation_threshold: 0.5,
            guard_timeout_ms: 5_000,
            escalation_timeout_ms: 5_000,
            match_timeout_ms: 100,
            max_retries: 1,
            prompt_injection_enabled: true,
            jailbreak_enabled: true,
            encoding_bypass_enabled: true,
            pii_enabled: true,
            refusal_enabled: true,
            classifier_enabled: true,
            toxicity_enabled: true,
            rag_security_enabled: true,
            groundedness_enabled: true,
            escalation_enabled: true,
            supported_languages: vec!["us".into()],
            nfkc_enabled: true,
            strip_invisible_enabled: true,
            fold_homoglyphs_enabled: true,
            cache_enabled: true,
            cache_ttl_seconds: 3_600,
            cache_max_entries: 10_000,
            judge: JudgeSettings::default(),
        }
    }
}

fn validate_threshold_order(config: &GuardConfig) -> Result<(), ValidationError> {
    if config.escalation_threshold <= config.flag_threshold
        && config.flag_threshold <= config.block_threshold
    {
        Ok(())
    } else {
        // escalation <= flag <= block must hold
        Err(ValidationError::new("threshold_order"))
    }
}

impl GuardConfig {
    /// The Standard preset (the `Default` impl).
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// The Minimal preset: injection and jailbreak only.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            preset: Preset::Minimal,
            encoding_bypass_enabled: false,
            pii_enabled: false,
            refusal_enabled: false,
            classifier_enabled: false,
            toxicity_enabled: false,
            rag_security_enabled: false,
            groundedness_enabled: false,
            escalation_enabled: false,
            ..Self::default()
        }
    }

    /// The Strict preset: everything on, thresholds lowered to
    /// 0.8 / 0.5 / 0.3.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            preset: Preset::Strict,
            block_threshold: 0.8,
            flag_threshold: 0.5,
            escalation_threshold: 0.3,
            ..Self::default()
        }
    }

    /// Construct the config for a preset.
    #[must_use]
    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Minimal => Self::minimal(),
            Preset::Standard => Self::standard(),
            Preset::Strict => Self::strict(),
        }
    }
}

// ── ConfigBuilder ──────────────────────────────────────────────────────

/// Resolves a [`GuardConfig`] from defaults, a file, and the environment.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base: GuardConfig,
    use_env: bool,
}

impl ConfigBuilder {
    /// Start from the Standard preset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit base config.
    #[must_use]
    pub fn from(base: GuardConfig) -> Self {
        Self {
            base,
            use_env: false,
        }
    }

    /// Load the config from a YAML, TOML, or JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        self.base = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                    format: "YAML".into(),
                    source: Box::new(e),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "TOML".into(),
                source: Box::new(e),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "JSON".into(),
                source: Box::new(e),
            })?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    message: "file extension must be .yaml, .yml, .toml, or .json".into(),
                });
            }
        };
        Ok(self)
    }

    /// Enable `GUARDPOST_*` environment overrides.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Resolve and validate the final config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an environment variable is malformed or
    /// validation fails.
    pub fn build(mut self) -> Result<GuardConfig, ConfigError> {
        if self.use_env {
            dotenvy::dotenv().ok();
            self.apply_env()?;
        }
        self.base.validate()?;
        Ok(self.base)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(preset) = std::env::var("GUARDPOST_PRESET") {
            // A preset override rebases the whole config on that preset's
            // defaults; the remaining env vars still apply on top.
            self.base = match preset.to_lowercase().as_str() {
                "minimal" => GuardConfig::minimal(),
                "standard" => GuardConfig::standard(),
                "strict" => GuardConfig::strict(),
                _ => {
                    return Err(ConfigError::EnvParse {
                        key: "GUARDPOST_PRESET".into(),
                        message: "must be 'minimal', 'standard', or 'strict'".into(),
                    });
                }
            };
        }

        if let Ok(mode) = std::env::var("GUARDPOST_FAIL_MODE") {
            self.base.fail_mode = match mode.to_lowercase().as_str() {
                "open" => FailMode::Open,
                "closed" => FailMode::Closed,
                _ => {
                    return Err(ConfigError::EnvParse {
                        key: "GUARDPOST_FAIL_MODE".into(),
                        message: "must be 'open' or 'closed'".into(),
                    });
                }
            };
        }

        for (key, target) in [
            ("GUARDPOST_BLOCK_THRESHOLD", &mut self.base.block_threshold),
            ("GUARDPOST_FLAG_THRESHOLD", &mut self.base.flag_threshold),
            (
                "GUARDPOST_ESCALATION_THRESHOLD",
                &mut self.base.escalation_threshold,
            ),
        ] {
            if let Ok(raw) = std::env::var(key) {
                *target = raw.parse().map_err(|_| ConfigError::EnvParse {
                    key: key.into(),
                    message: "must be a number in [0, 1]".into(),
                })?;
            }
        }

        if let Ok(enabled) = std::env::var("GUARDPOST_CACHE_ENABLED") {
            self.base.cache_enabled = enabled.parse().map_err(|_| ConfigError::EnvParse {
                key: "GUARDPOST_CACHE_ENABLED".into(),
                message: "must be 'true' or 'false'".into(),
            })?;
        }

        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
