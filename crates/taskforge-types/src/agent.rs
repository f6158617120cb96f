use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Designer,
    Implementer,
    Validator,
    Documenter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Tools,
    StructuredJson,
    ComputerUse,
    ImageInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
    #[serde(default, rename = "use-worktree")]
    pub use_worktree: bool,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl AgentDefinition {
    pub fn requires(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// The roster cloned onto every new Pipeline at submit time.
pub fn default_agent_roster() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            id: "orchestrator".into(),
            name: "Orchestrator".into(),
            agent_type: AgentType::Orchestrator,
            capabilities: [Capability::StructuredJson].into_iter().collect(),
            use_worktree: false,
            max_output_tokens: 2_000,
            max_retries: 1,
            timeout_ms: 30_000,
        },
        AgentDefinition {
            id: "designer".into(),
            name: "Designer".into(),
            agent_type: AgentType::Designer,
            capabilities: [Capability::StructuredJson].into_iter().collect(),
            use_worktree: false,
            max_output_tokens: 4_000,
            max_retries: 2,
            timeout_ms: 60_000,
        },
        AgentDefinition {
            id: "implementer".into(),
            name: "Implementer".into(),
            agent_type: AgentType::Implementer,
            capabilities: [Capability::Tools].into_iter().collect(),
            use_worktree: true,
            max_output_tokens: 8_000,
            max_retries: 3,
            timeout_ms: 300_000,
        },
        AgentDefinition {
            id: "validator".into(),
            name: "Validator".into(),
            agent_type: AgentType::Validator,
            capabilities: [Capability::Tools].into_iter().collect(),
            use_worktree: true,
            max_output_tokens: 4_000,
            max_retries: 2,
            timeout_ms: 180_000,
        },
        AgentDefinition {
            id: "documenter".into(),
            name: "Documenter".into(),
            agent_type: AgentType::Documenter,
            capabilities: [Capability::StructuredJson].into_iter().collect(),
            use_worktree: false,
            max_output_tokens: 2_000,
            max_retries: 1,
            timeout_ms: 60_000,
        },
    ]
}
