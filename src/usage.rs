//! Token usage accounting.
//!
//! A caller-owned aggregate of estimated token consumption, broken down by
//! agent. Nothing here is global: the budget allocator reports totals in its
//! result, and whoever owns a [`TokenUsageStats`] decides what to record.

use serde::{Deserialize, Serialize};

use crate::budget::TokenBudgetResult;

/// Attribution for a logical agent issuing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AgentMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn labeled(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: Some(label.into()),
        }
    }
}

/// Usage attributed to a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentUsage {
    pub id: String,
    pub label: Option<String>,
    pub tokens: usize,
}

/// Aggregated token usage across agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsageStats {
    pub total_tokens: usize,
    agents: Vec<AgentUsage>,
}

impl TokenUsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record tokens for an agent, merging with any prior entry by id.
    pub fn record(&mut self, agent: &AgentMetadata, tokens: usize) {
        self.total_tokens += tokens;
        if let Some(entry) = self.agents.iter_mut().find(|entry| entry.id == agent.id) {
            entry.tokens += tokens;
            if entry.label.is_none() {
                entry.label = agent.label.clone();
            }
            return;
        }
        self.agents.push(AgentUsage {
            id: agent.id.clone(),
            label: agent.label.clone(),
            tokens,
        });
    }

    /// Record a budget outcome against the given agent.
    pub fn record_budget(&mut self, agent: &AgentMetadata, result: &TokenBudgetResult) {
        self.record(agent, result.total_tokens);
    }

    pub fn agents(&self) -> &[AgentUsage] {
        &self.agents
    }

    pub fn reset(&mut self) {
        self.total_tokens = 0;
        self.agents.clear();
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        if self.agents.is_empty() {
            return format!("{} tokens", self.total_tokens);
        }
        let breakdown: Vec<String> = self
            .agents
            .iter()
            .map(|entry| {
                let name = entry.label.as_deref().unwrap_or(&entry.id);
                format!("{} ({})", name, entry.tokens)
            })
            .collect();
        format!(
            "{} tokens across {} agents: {}",
            self.total_tokens,
            self.agents.len(),
            breakdown.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_merges_by_agent_id() {
        let mut stats = TokenUsageStats::new();
        let planner = AgentMetadata::labeled("planner", "Planner");
        let chat = AgentMetadata::new("chat");

        stats.record(&planner, 900);
        stats.record(&chat, 300);
        stats.record(&planner, 100);

        assert_eq!(stats.total_tokens, 1_300);
        assert_eq!(stats.agents().len(), 2);
        assert_eq!(stats.agents()[0].tokens, 1_000);
        assert_eq!(stats.agents()[0].label.as_deref(), Some("Planner"));
    }

    #[test]
    fn summary_names_agents() {
        let mut stats = TokenUsageStats::new();
        stats.record(&AgentMetadata::labeled("planner", "Planner"), 9);
        assert_eq!(stats.summary(), "9 tokens across 1 agents: Planner (9)");
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = TokenUsageStats::new();
        stats.record(&AgentMetadata::new("a"), 5);
        stats.reset();
        assert_eq!(stats.total_tokens, 0);
        assert!(stats.agents().is_empty());
    }
}
