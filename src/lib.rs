//! # llm-guard
//!
//! A request-safety and resilience layer that sits between an application
//! and a remote model-completion backend. Every outbound request is bounded,
//! sanitized, schema-checked, retried safely, and cancellable — independent
//! of any particular backend's API shape. The crate performs no I/O itself:
//! it decides whether and how a caller's I/O should proceed.
//!
//! ## Core Concepts
//!
//! - **Sanitizer**: normalizes and escapes untrusted text before it enters a
//!   request
//! - **Token budget**: decides which content blocks survive a context
//!   ceiling, evicting the stalest unpinned blocks first
//! - **Schema validation**: checks a hydrated response against a
//!   caller-supplied schema capability
//! - **Safe-mode guard**: clamps generation parameters and filters tools
//!   when the injected safe-mode capability is active
//! - **Retry orchestration**: exponential backoff with jitter, cancellation
//!   aware at every suspension point
//! - **Cancellation**: one coordinator per logical request, propagating to
//!   listeners and linked streams exactly once
//!
//! ## Getting Started
//!
//! ```rust
//! use llm_guard::{
//!     prepare_request, BudgetConfig, ContentBlock, PrepareOptions, SafetyParams, ToolSpec,
//! };
//!
//! let blocks = vec![
//!     ContentBlock::pinned("You are a weekly planner assistant."),
//!     ContentBlock::new("Draft a plan for my <i>week</i>"),
//! ];
//!
//! let options = PrepareOptions::new(BudgetConfig::new(8_192).reserved(512))
//!     .params(SafetyParams {
//!         temperature: 0.9,
//!         ..SafetyParams::default()
//!     })
//!     .tools(vec![ToolSpec::new("search")]);
//!
//! // Safe mode is an injected capability; plain booleans work for fixed state.
//! let prepared = prepare_request(blocks, &options, &false);
//!
//! assert_eq!(prepared.budget.removed_count, 0);
//! assert!(prepared.sanitized_prompt.contains("&lt;i&gt;week&lt;/i&gt;"));
//! ```
//!
//! Wrapping the actual network call:
//!
//! ```rust,no_run
//! use llm_guard::{retry_with_jitter, Canceller, RetryPolicy, SafetyError};
//!
//! # async fn example() -> Result<(), SafetyError> {
//! let canceller = Canceller::new();
//! let signal = canceller.signal();
//!
//! let response = retry_with_jitter(&RetryPolicy::default(), Some(&signal), |ctx| {
//!     let signal = ctx.signal.clone();
//!     async move {
//!         signal.check()?;
//!         // ... perform the backend call here ...
//!         Ok::<_, SafetyError>("response body")
//!     }
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cancel;
pub mod config;
pub mod error;
pub mod guard;
pub mod prepare;
pub mod resilience;
pub mod retry;
pub mod safe_mode;
pub mod sanitize;
pub mod schema;
pub mod usage;

pub use budget::{
    cap_text, chars_per_token_estimator, enforce_budget, BudgetConfig, ContentBlock, Role,
    TextCapResult, TokenBudgetResult, TokenEstimator,
};
pub use cancel::{
    link_signals, CancelReason, CancelSignal, CancellableStream, Canceller, ListenerGuard, Unlink,
};
pub use config::{ConfigBuilder, RetryConfig, SafetyConfig};
pub use error::{is_retryable, BoxError, Result, SafetyError};
pub use guard::{
    apply_guard, effective_stop_sequences, Guarded, SafetyParams, ToolChoice, ToolChoiceMode,
    ToolSpec,
};
pub use prepare::{prepare_prompt, prepare_request, PrepareOptions, PreparedRequest};
pub use resilience::RetryLayer;
pub use retry::{retry_with_jitter, AttemptContext, RetryBuilder, RetryPolicy};
pub use safe_mode::{
    SafeMode, StaticSafeMode, SAFE_MODE_MAX_TOOL_CALLS, SAFE_MODE_RESPONSE_RESERVE,
    SAFE_MODE_TEMPERATURE_CAP, SAFE_MODE_TOKEN_CEILING,
};
pub use sanitize::{sanitize, SanitizeOptions};
pub use schema::{
    schema_fn, typed, validate, ResponseSchema, SchemaIssue, TypedSchema, ValidationError,
};
pub use usage::{AgentMetadata, AgentUsage, TokenUsageStats};

// Re-export the Tower traits callers need to compose the retry layer.
pub use tower::{Layer, Service, ServiceExt};
