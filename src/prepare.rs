//! Request preparation: sanitize, budget, and guard in one call.
//!
//! The convenience surface for the common case. Each content block is
//! sanitized, the set is trimmed to the token budget, and generation
//! parameters plus the tool set pass through the safe-mode guard. Like its
//! parts, `prepare_request` never errors — it degrades (truncates, evicts,
//! clamps, drops) and reports what it did in the returned value.

use crate::budget::{enforce_budget, BudgetConfig, ContentBlock, TokenBudgetResult};
use crate::guard::{apply_guard, Guarded, SafetyParams, ToolSpec};
use crate::safe_mode::SafeMode;
use crate::sanitize::{sanitize, SanitizeOptions};

/// Inputs for [`prepare_request`].
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub sanitize: SanitizeOptions,
    pub budget: BudgetConfig,
    pub params: SafetyParams,
    pub tools: Vec<ToolSpec>,

    /// Tool names permitted under safe mode
    pub allowlist: Option<Vec<String>>,
}

impl PrepareOptions {
    pub fn new(budget: BudgetConfig) -> Self {
        Self {
            sanitize: SanitizeOptions::default(),
            budget,
            params: SafetyParams::default(),
            tools: Vec::new(),
            allowlist: None,
        }
    }

    pub fn sanitize(mut self, options: SanitizeOptions) -> Self {
        self.sanitize = options;
        self
    }

    pub fn params(mut self, params: SafetyParams) -> Self {
        self.params = params;
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn allowlist(mut self, names: Vec<String>) -> Self {
        self.allowlist = Some(names);
        self
    }
}

/// A request ready to hand to the caller's transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Surviving sanitized blocks joined by blank lines
    pub sanitized_prompt: String,

    pub budget: TokenBudgetResult,
    pub params: SafetyParams,
    pub tools: Vec<ToolSpec>,
    pub removed_tools: Vec<ToolSpec>,
}

/// Sanitize each block, enforce the token budget, and apply the guard.
pub fn prepare_request(
    blocks: Vec<ContentBlock>,
    options: &PrepareOptions,
    safe_mode: &dyn SafeMode,
) -> PreparedRequest {
    let sanitized: Vec<ContentBlock> = blocks
        .into_iter()
        .map(|block| ContentBlock {
            content: sanitize(&block.content, &options.sanitize),
            ..block
        })
        .collect();

    let budget = enforce_budget(sanitized, &options.budget, safe_mode);

    let Guarded {
        params,
        tools,
        removed_tools,
    } = apply_guard(
        options.params.clone(),
        options.tools.clone(),
        options.allowlist.as_deref(),
        safe_mode,
    );

    let sanitized_prompt = budget
        .blocks
        .iter()
        .map(|block| block.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    PreparedRequest {
        sanitized_prompt,
        budget,
        params,
        tools,
        removed_tools,
    }
}

/// Single-prompt form of [`prepare_request`].
pub fn prepare_prompt(
    prompt: &str,
    options: &PrepareOptions,
    safe_mode: &dyn SafeMode,
) -> PreparedRequest {
    prepare_request(vec![ContentBlock::new(prompt)], options, safe_mode)
}
