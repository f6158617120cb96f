use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Capability, Priority};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub provider: String,
    pub model: String,
}

impl Target {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTier {
    Primary,
    Fallback,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteContext {
    pub agent_id: String,
    pub task_kind: String,
    #[serde(default)]
    pub required_capabilities: HashSet<Capability>,
    pub estimated_input_tokens: u64,
    pub priority: Priority,
    #[serde(default)]
    pub budget_ceiling_micros: Option<i64>,
    #[serde(default)]
    pub excluded_targets: HashSet<Target>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub target: Target,
    pub tier: RouteTier,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
    pub route_context: RouteContext,
}
