//! Safe-mode parameter and tool guard (pure).
//!
//! What this module provides
//! - `apply_guard` to clamp generation parameters and filter the candidate
//!   tool set while safe mode is active
//! - `effective_stop_sequences` to normalize stop sequences, honoring
//!   safe-mode overrides
//!
//! The guard never rejects: a disallowed configuration is downgraded to the
//! nearest safe one, and anything dropped is reported back through
//! [`Guarded::removed_tools`] so the caller can log it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::safe_mode::{SafeMode, SAFE_MODE_MAX_TOOL_CALLS, SAFE_MODE_TEMPERATURE_CAP};

/// Sampling temperature used when the requested value is absent or invalid.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;

/// Tool invocation policy requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolChoice {
    pub mode: ToolChoiceMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}

impl Default for ToolChoice {
    fn default() -> Self {
        Self {
            mode: ToolChoiceMode::Auto,
            max_tool_calls: None,
        }
    }
}

/// Generation parameters subject to the guard. Built by the caller, mutated
/// only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyParams {
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Whether the guard ran with safe mode active.
    #[serde(default)]
    pub safe_mode: bool,
}

impl Default for SafetyParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: None,
            tool_choice: ToolChoice::default(),
            safe_mode: false,
        }
    }
}

/// A tool offered to the model: name, description, and parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Outcome of [`apply_guard`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guarded {
    pub params: SafetyParams,
    pub tools: Vec<ToolSpec>,

    /// Tools dropped by the allowlist, surfaced so the caller can log them.
    pub removed_tools: Vec<ToolSpec>,
}

/// Clamp parameters and filter tools under safe mode.
///
/// Out-of-range inputs are normalized regardless of mode: temperature is
/// clamped into `[0, 2]` (defaulting when non-finite) and `top_p` into
/// `(0, 1]` or dropped. With safe mode inactive everything else passes
/// through untouched. Active, the temperature is capped at
/// [`SAFE_MODE_TEMPERATURE_CAP`], the tool choice is forced to `Auto` with a
/// single permitted call — overriding stricter and looser requests alike —
/// and tools absent from the allowlist are moved to `removed_tools`.
pub fn apply_guard(
    requested: SafetyParams,
    tools: Vec<ToolSpec>,
    allowlist: Option<&[String]>,
    safe_mode: &dyn SafeMode,
) -> Guarded {
    let mut params = SafetyParams {
        temperature: normalize_temperature(requested.temperature),
        top_p: normalize_top_p(requested.top_p),
        tool_choice: requested.tool_choice,
        safe_mode: false,
    };

    if !safe_mode.is_active() {
        return Guarded {
            params,
            tools,
            removed_tools: Vec::new(),
        };
    }

    params.safe_mode = true;
    params.temperature = params.temperature.min(SAFE_MODE_TEMPERATURE_CAP);
    params.tool_choice = ToolChoice {
        mode: ToolChoiceMode::Auto,
        max_tool_calls: Some(SAFE_MODE_MAX_TOOL_CALLS),
    };

    let (tools, removed_tools) = match allowlist {
        None => (tools, Vec::new()),
        Some(names) => tools
            .into_iter()
            .partition(|tool| names.iter().any(|name| name == &tool.name)),
    };
    if !removed_tools.is_empty() {
        let dropped: Vec<&str> = removed_tools.iter().map(|t| t.name.as_str()).collect();
        debug!(?dropped, "safe mode removed tools outside the allowlist");
    }

    Guarded {
        params,
        tools,
        removed_tools,
    }
}

/// Normalize stop sequences: drop blanks, dedupe preserving first
/// occurrence, and substitute the safe-mode override set when active.
pub fn effective_stop_sequences(
    base: &[String],
    safe_mode_overrides: Option<&[String]>,
    safe_mode: &dyn SafeMode,
) -> Vec<String> {
    let source = if safe_mode.is_active() {
        safe_mode_overrides.unwrap_or(base)
    } else {
        base
    };
    let mut out: Vec<String> = Vec::with_capacity(source.len());
    for sequence in source {
        if sequence.trim().is_empty() {
            continue;
        }
        if !out.contains(sequence) {
            out.push(sequence.clone());
        }
    }
    out
}

fn normalize_temperature(value: f32) -> f32 {
    if !value.is_finite() {
        return DEFAULT_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

fn normalize_top_p(value: Option<f32>) -> Option<f32> {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(f32::EPSILON, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_and_write() -> Vec<ToolSpec> {
        vec![ToolSpec::new("search"), ToolSpec::new("write")]
    }

    #[test]
    fn passes_through_when_safe_mode_is_inactive() {
        let requested = SafetyParams {
            temperature: 0.9,
            tool_choice: ToolChoice {
                mode: ToolChoiceMode::Required,
                max_tool_calls: Some(3),
            },
            ..SafetyParams::default()
        };

        let result = apply_guard(requested, search_and_write(), None, &false);

        assert!(!result.params.safe_mode);
        assert_eq!(result.params.temperature, 0.9);
        assert_eq!(result.params.tool_choice.mode, ToolChoiceMode::Required);
        assert_eq!(result.params.tool_choice.max_tool_calls, Some(3));
        assert_eq!(result.tools.len(), 2);
        assert!(result.removed_tools.is_empty());
    }

    #[test]
    fn clamps_temperature_and_tool_usage_in_safe_mode() {
        let requested = SafetyParams {
            temperature: 0.9,
            tool_choice: ToolChoice {
                mode: ToolChoiceMode::Required,
                max_tool_calls: Some(4),
            },
            ..SafetyParams::default()
        };

        let result = apply_guard(requested, Vec::new(), None, &true);

        assert!(result.params.safe_mode);
        assert!(result.params.temperature <= SAFE_MODE_TEMPERATURE_CAP);
        assert_eq!(result.params.tool_choice.mode, ToolChoiceMode::Auto);
        assert_eq!(result.params.tool_choice.max_tool_calls, Some(1));
    }

    #[test]
    fn filters_tools_by_allowlist_and_reports_removals() {
        let allowlist = vec!["search".to_string()];

        let result = apply_guard(
            SafetyParams::default(),
            search_and_write(),
            Some(&allowlist),
            &true,
        );

        assert_eq!(result.tools, vec![ToolSpec::new("search")]);
        assert_eq!(result.removed_tools, vec![ToolSpec::new("write")]);
    }

    #[test]
    fn allowlist_is_ignored_when_safe_mode_is_inactive() {
        let allowlist = vec!["search".to_string()];

        let result = apply_guard(
            SafetyParams::default(),
            search_and_write(),
            Some(&allowlist),
            &false,
        );

        assert_eq!(result.tools.len(), 2);
        assert!(result.removed_tools.is_empty());
    }

    #[test]
    fn normalizes_out_of_range_inputs() {
        let requested = SafetyParams {
            temperature: f32::NAN,
            top_p: Some(3.0),
            ..SafetyParams::default()
        };

        let result = apply_guard(requested, Vec::new(), None, &false);

        assert_eq!(result.params.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(result.params.top_p, Some(1.0));

        let requested = SafetyParams {
            temperature: 5.0,
            top_p: Some(f32::NAN),
            ..SafetyParams::default()
        };

        let result = apply_guard(requested, Vec::new(), None, &false);

        assert_eq!(result.params.temperature, MAX_TEMPERATURE);
        assert_eq!(result.params.top_p, None);
    }

    #[test]
    fn stop_sequences_are_deduped_and_filtered() {
        let base = vec![
            "END".to_string(),
            String::new(),
            "END".to_string(),
            "DONE".to_string(),
        ];
        let result = effective_stop_sequences(&base, None, &false);
        assert_eq!(result, vec!["END".to_string(), "DONE".to_string()]);
    }

    #[test]
    fn stop_sequences_honor_safe_mode_overrides() {
        let base = vec!["END".to_string()];
        let overrides = vec!["SAFE".to_string()];

        let active = effective_stop_sequences(&base, Some(&overrides), &true);
        assert_eq!(active, vec!["SAFE".to_string()]);

        let inactive = effective_stop_sequences(&base, Some(&overrides), &false);
        assert_eq!(inactive, vec!["END".to_string()]);
    }
}
