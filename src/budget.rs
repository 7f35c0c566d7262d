//! Token budgets: accounting and message trimming (pure).
//!
//! What this module provides
//! - `ContentBlock`, one unit of prompt material with a `pinned` exemption
//! - `enforce_budget` to decide which blocks survive a token budget
//! - `cap_text` for the single-string case
//!
//! Trimming favors recency: when the budget is exceeded, the earliest
//! non-pinned blocks are evicted first, approximating the discard of stale
//! conversational context. Pinned blocks (system instructions) always
//! survive and always cost tokens, so an all-pinned set can legitimately
//! exceed the budget — `TokenBudgetResult::overflowed` reports that instead
//! of an error.
//!
//! Safe mode tightens the ceiling and the response reserve before any
//! accounting runs, consulted through the injected [`SafeMode`] capability.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::DEFAULT_CHARS_PER_TOKEN;
use crate::safe_mode::{SafeMode, SAFE_MODE_RESPONSE_RESERVE, SAFE_MODE_TOKEN_CEILING};
use crate::sanitize::grapheme_count;
use crate::usage::AgentMetadata;

/// Conversational role of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One unit of prompt material. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub content: String,

    /// Pinned blocks are never dropped by trimming.
    #[serde(default)]
    pub pinned: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl ContentBlock {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            pinned: false,
            role: None,
        }
    }

    /// A block exempt from budget-driven eviction.
    pub fn pinned(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            pinned: true,
            role: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// Injectable token estimator; defaults to a character-ratio heuristic.
pub type TokenEstimator = dyn Fn(&ContentBlock) -> usize + Send + Sync;

/// Estimator counting `ceil(graphemes / chars_per_token)`.
pub fn chars_per_token_estimator(chars_per_token: f64) -> Arc<TokenEstimator> {
    let ratio = if chars_per_token.is_finite() && chars_per_token > 0.0 {
        chars_per_token
    } else {
        DEFAULT_CHARS_PER_TOKEN
    };
    Arc::new(move |block: &ContentBlock| {
        let characters = grapheme_count(&block.content);
        if characters == 0 {
            0
        } else {
            (characters as f64 / ratio).ceil() as usize
        }
    })
}

/// Budget configuration for [`enforce_budget`].
#[derive(Clone)]
pub struct BudgetConfig {
    /// Model context ceiling for this request
    pub max_tokens: usize,

    /// Tokens held back for the response
    pub reserved_for_response: usize,

    /// Estimator override; `None` uses the character-ratio heuristic
    pub estimator: Option<Arc<TokenEstimator>>,

    /// Attribution for usage accounting, recorded by the caller
    pub agent: Option<AgentMetadata>,
}

impl BudgetConfig {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            reserved_for_response: 0,
            estimator: None,
            agent: None,
        }
    }

    pub fn reserved(mut self, tokens: usize) -> Self {
        self.reserved_for_response = tokens;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_agent(mut self, agent: AgentMetadata) -> Self {
        self.agent = Some(agent);
        self
    }
}

impl fmt::Debug for BudgetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetConfig")
            .field("max_tokens", &self.max_tokens)
            .field("reserved_for_response", &self.reserved_for_response)
            .field("estimator", &self.estimator.as_ref().map(|_| "custom"))
            .field("agent", &self.agent)
            .finish()
    }
}

/// Outcome of budget enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBudgetResult {
    /// Surviving blocks, in their original relative order
    pub blocks: Vec<ContentBlock>,

    /// Estimated tokens of the surviving blocks
    pub total_tokens: usize,

    /// Ceiling the survivors were admitted against
    pub available_tokens: usize,

    /// Number of evicted blocks
    pub removed_count: usize,
}

impl TokenBudgetResult {
    /// True when pinned content alone exceeds the budget. Reportable: the
    /// caller should surface it, not absorb it.
    pub fn overflowed(&self) -> bool {
        self.total_tokens > self.available_tokens
    }
}

/// Decide which blocks fit the budget.
///
/// `available = max(0, max_tokens - reserved_for_response)`, tightened first
/// when safe mode is active (`max_tokens` capped at
/// [`SAFE_MODE_TOKEN_CEILING`], reserve raised to at least
/// [`SAFE_MODE_RESPONSE_RESERVE`]). Blocks are admitted newest-first:
/// pinned blocks unconditionally, non-pinned blocks only while the running
/// total stays within `available` — so the earliest non-pinned blocks are
/// the first to go. Never errors; an empty input returns a zeroed result.
pub fn enforce_budget(
    blocks: Vec<ContentBlock>,
    config: &BudgetConfig,
    safe_mode: &dyn SafeMode,
) -> TokenBudgetResult {
    let active = safe_mode.is_active();
    let max_tokens = if active {
        config.max_tokens.min(SAFE_MODE_TOKEN_CEILING)
    } else {
        config.max_tokens
    };
    let reserved = if active {
        config.reserved_for_response.max(SAFE_MODE_RESPONSE_RESERVE)
    } else {
        config.reserved_for_response
    };
    let available_tokens = max_tokens.saturating_sub(reserved);

    let estimate = |block: &ContentBlock| match &config.estimator {
        Some(estimator) => estimator(block),
        None => default_estimate(block),
    };

    let mut kept: Vec<ContentBlock> = Vec::with_capacity(blocks.len());
    let mut used = 0usize;
    let mut removed = 0usize;

    for (index, block) in blocks.into_iter().enumerate().rev() {
        let tokens = estimate(&block);
        if block.pinned {
            used += tokens;
            kept.push(block);
            continue;
        }
        if used + tokens > available_tokens {
            trace!(index, tokens, used, available_tokens, "evicting block");
            removed += 1;
            continue;
        }
        used += tokens;
        kept.push(block);
    }
    kept.reverse();

    TokenBudgetResult {
        blocks: kept,
        total_tokens: used,
        available_tokens,
        removed_count: removed,
    }
}

fn default_estimate(block: &ContentBlock) -> usize {
    let characters = grapheme_count(&block.content);
    if characters == 0 {
        0
    } else {
        (characters as f64 / DEFAULT_CHARS_PER_TOKEN).ceil() as usize
    }
}

/// Outcome of capping a single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextCapResult {
    /// The text, or `None` when it did not fit
    pub content: Option<String>,
    pub removed: bool,
    pub total_tokens: usize,
    pub available_tokens: usize,
}

/// Single-string form of [`enforce_budget`].
pub fn cap_text(
    content: impl Into<String>,
    pinned: bool,
    config: &BudgetConfig,
    safe_mode: &dyn SafeMode,
) -> TextCapResult {
    let block = if pinned {
        ContentBlock::pinned(content)
    } else {
        ContentBlock::new(content)
    };
    let result = enforce_budget(vec![block], config, safe_mode);
    let kept = result.blocks.into_iter().next();
    TextCapResult {
        removed: kept.is_none(),
        content: kept.map(|block| block.content),
        total_tokens: result.total_tokens,
        available_tokens: result.available_tokens,
    }
}
