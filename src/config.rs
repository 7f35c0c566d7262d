//! Configuration for the safety layer
//!
//! Defaults, a builder, and one-shot loading from environment variables or a
//! TOML file. Environment state is read exactly once, when the caller asks
//! for it; nothing in the crate consults ambient state at call time.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::{chars_per_token_estimator, TokenEstimator};
use crate::error::{Result, SafetyError};
use crate::safe_mode::StaticSafeMode;
use crate::sanitize::SanitizeOptions;

/// Hard cap on sanitized input length (grapheme clusters).
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 16_000;

/// Heuristic estimator ratio: roughly four characters per token.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

const ENABLED_FLAG_VALUES: [&str; 4] = ["1", "true", "on", "yes"];

/// Top-level configuration for the safety layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Maximum sanitized input length in grapheme clusters
    pub max_input_length: usize,

    /// Characters-per-token ratio used by the default estimator
    pub chars_per_token: f64,

    /// Safe-mode snapshot; project into a provider with [`Self::safe_mode_provider`]
    pub safe_mode: bool,

    /// Retry schedule for the orchestrator
    pub retry: RetryConfig,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            safe_mode: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: usize,

    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Ceiling on any single backoff delay
    pub max_delay: Duration,

    /// Proportional jitter applied to each delay; 0 disables jitter
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter_ratio: 0.25,
        }
    }
}

impl SafetyConfig {
    /// Sanitizer options derived from this config.
    pub fn sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions {
            max_length: self.max_input_length,
            ..SanitizeOptions::default()
        }
    }

    /// Token estimator derived from this config's character ratio.
    pub fn estimator(&self) -> Arc<TokenEstimator> {
        chars_per_token_estimator(self.chars_per_token)
    }

    /// Safe-mode capability built from the config snapshot.
    pub fn safe_mode_provider(&self) -> StaticSafeMode {
        StaticSafeMode::new(self.safe_mode)
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: SafetyConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SafetyConfig::default(),
        }
    }

    pub fn max_input_length(mut self, length: usize) -> Self {
        self.config.max_input_length = length.max(1);
        self
    }

    pub fn chars_per_token(mut self, ratio: f64) -> Self {
        if ratio.is_finite() && ratio > 0.0 {
            self.config.chars_per_token = ratio;
        }
        self
    }

    pub fn safe_mode(mut self, active: bool) -> Self {
        self.config.safe_mode = active;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.retry.max_attempts = attempts.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        if ratio.is_finite() && ratio >= 0.0 {
            self.config.retry.jitter_ratio = ratio;
        }
        self
    }

    pub fn build(self) -> SafetyConfig {
        self.config
    }
}

/// Load configuration from environment variables.
///
/// Recognized names: `AI_MAX_INPUT_LENGTH`, `AI_CHARS_PER_TOKEN` (legacy
/// aliases `AI_TOKENS_PER_CHAR`, `AI_TOKENS_PER_CHARACTER`), and `SAFE_MODE`
/// (`1`/`true`/`on`/`yes`). Invalid or out-of-range values fall back to the
/// defaults. This is a snapshot: call it once while composing the
/// application, then pass the result around.
pub fn from_env() -> SafetyConfig {
    let mut config = SafetyConfig::default();

    if let Some(length) = numeric_env(&["AI_MAX_INPUT_LENGTH"]) {
        if length >= 1.0 {
            config.max_input_length = length.trunc() as usize;
        }
    }

    if let Some(ratio) = numeric_env(&[
        "AI_CHARS_PER_TOKEN",
        "AI_TOKENS_PER_CHAR",
        "AI_TOKENS_PER_CHARACTER",
    ]) {
        if ratio > 0.0 {
            config.chars_per_token = ratio;
        }
    }

    if let Ok(raw) = std::env::var("SAFE_MODE") {
        config.safe_mode = flag_enabled(&raw);
    }

    config
}

/// Load configuration from a TOML file.
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<SafetyConfig> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| SafetyError::Config(format!("{}: {e}", path.as_ref().display())))?;
    toml::from_str(&contents).map_err(|e| SafetyError::Config(e.to_string()))
}

fn numeric_env(names: &[&str]) -> Option<f64> {
    for name in names {
        let Ok(raw) = std::env::var(name) else {
            continue;
        };
        let normalized = raw.trim();
        if normalized.is_empty() {
            continue;
        }
        if let Ok(parsed) = normalized.parse::<f64>() {
            if parsed.is_finite() {
                return Some(parsed);
            }
        }
    }
    None
}

fn flag_enabled(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    ENABLED_FLAG_VALUES.contains(&normalized.as_str())
}
