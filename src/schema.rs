//! Response schema validation (pure).
//!
//! What this module provides
//! - `ResponseSchema<T>`, the capability interface any schema engine can
//!   implement
//! - `TypedSchema<T>`, a serde-backed implementation for types deriving
//!   `Deserialize` and `JsonSchema`
//! - `schema_fn` to lift a closure into a schema
//! - `validate`, converting any failure into a single [`ValidationError`]
//!   with a readable field-path diagnostic
//!
//! Validation is structural only: no network, no I/O, and validating the
//! same payload twice yields the same outcome.

use std::fmt;
use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SafetyError};

/// Label used when neither the caller nor the schema supplies one.
pub const DEFAULT_LABEL: &str = "response";

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    /// Field path, e.g. `items[2].name`; `$` for the payload root
    pub path: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl SchemaIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: None,
        }
    }

    /// An issue anchored at the payload root.
    pub fn root(message: impl Into<String>) -> Self {
        Self::new("$", message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Schema mismatch, carrying every violation found.
///
/// Renders as `"<label> failed validation: <path>: <message>[, ...]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub label: String,
    pub issues: Vec<SchemaIssue>,
}

impl ValidationError {
    pub fn new(label: impl Into<String>, issues: Vec<SchemaIssue>) -> Self {
        Self {
            label: label.into(),
            issues,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed validation", self.label)?;
        for (index, issue) in self.issues.iter().enumerate() {
            let separator = if index == 0 { ": " } else { ", " };
            write!(f, "{separator}{}: {}", issue.path, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Capability interface for schema engines.
pub trait ResponseSchema<T> {
    /// Check `payload` against this schema, producing the typed value or
    /// the list of violations.
    fn validate(&self, payload: &Value) -> std::result::Result<T, Vec<SchemaIssue>>;

    /// Label describing what this schema validates, used in diagnostics.
    fn label(&self) -> Option<&str> {
        None
    }
}

/// Serde-backed schema for any `Deserialize + JsonSchema` type.
pub struct TypedSchema<T> {
    label: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + JsonSchema> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            label: T::schema_name(),
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + JsonSchema> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSchema")
            .field("label", &self.label)
            .finish()
    }
}

impl<T: DeserializeOwned + JsonSchema> ResponseSchema<T> for TypedSchema<T> {
    fn validate(&self, payload: &Value) -> std::result::Result<T, Vec<SchemaIssue>> {
        serde_json::from_value(payload.clone())
            .map_err(|error| vec![SchemaIssue::root(error.to_string()).with_code("deserialize")])
    }

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }
}

/// Schema for a type deriving `Deserialize` and `JsonSchema`.
pub fn typed<T: DeserializeOwned + JsonSchema>() -> TypedSchema<T> {
    TypedSchema::new()
}

/// A schema built from a closure.
pub struct SchemaFn<F>(F);

impl<F> fmt::Debug for SchemaFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchemaFn")
    }
}

/// Lift `Fn(&Value) -> Result<T, Vec<SchemaIssue>>` into a schema.
pub fn schema_fn<T, F>(f: F) -> SchemaFn<F>
where
    F: Fn(&Value) -> std::result::Result<T, Vec<SchemaIssue>>,
{
    SchemaFn(f)
}

impl<T, F> ResponseSchema<T> for SchemaFn<F>
where
    F: Fn(&Value) -> std::result::Result<T, Vec<SchemaIssue>>,
{
    fn validate(&self, payload: &Value) -> std::result::Result<T, Vec<SchemaIssue>> {
        (self.0)(payload)
    }
}

/// Validate a payload, converting failure into [`SafetyError::Validation`].
///
/// The diagnostic label is, in order of preference: the `label` argument,
/// the schema's own label, then [`DEFAULT_LABEL`].
pub fn validate<T>(
    payload: &Value,
    schema: &dyn ResponseSchema<T>,
    label: Option<&str>,
) -> Result<T> {
    schema.validate(payload).map_err(|issues| {
        let label = label
            .or_else(|| schema.label())
            .unwrap_or(DEFAULT_LABEL)
            .to_string();
        SafetyError::Validation(ValidationError::new(label, issues))
    })
}
