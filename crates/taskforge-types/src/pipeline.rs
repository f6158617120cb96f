use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentDefinition, RouteDecision, Target, WorktreeChangeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatePolicy {
    AutoAdvance,
    RequireApproval,
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub agent: AgentDefinition,
    pub gate_policy: GatePolicy,
    pub stage_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Queued,
    Running,
    AwaitingApproval,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn is_resumable(self) -> bool {
        matches!(self, PipelineStatus::Queued | PipelineStatus::Paused)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub agent_id: String,
    pub selected_target: Target,
    pub request_fingerprint: String,
    pub response_summary: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_micros: i64,
    pub latency_ms: u64,
    #[serde(default)]
    pub decisions: Vec<RouteDecision>,
    #[serde(default)]
    pub worktree_changes: Option<WorktreeChangeSet>,
    pub best_effort_skipped: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_micros: i64,
    pub wall_clock_ms: u64,
    pub per_provider_call_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Config,
    ProviderRateLimit,
    ProviderTransient,
    ProviderAuth,
    ProviderValidation,
    BudgetExceeded,
    NoTarget,
    StageTimeout,
    WorktreeFailure,
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderRateLimit | ErrorKind::ProviderTransient | ErrorKind::StageTimeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub target: Option<Target>,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    #[serde(default = "crate::default_schema_version")]
    pub schema_version: u32,
    pub task_id: String,
    pub stages: Vec<Stage>,
    pub current_stage_index: usize,
    #[serde(default)]
    pub stage_results: HashMap<usize, StageResult>,
    #[serde(default)]
    pub metrics: PipelineMetrics,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<PipelineError>,
}

impl Pipeline {
    pub fn new(task_id: impl Into<String>, stages: Vec<Stage>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("pipeline-{}", uuid::Uuid::new_v4()),
            schema_version: crate::SCHEMA_VERSION,
            task_id: task_id.into(),
            stages,
            current_stage_index: 0,
            stage_results: HashMap::new(),
            metrics: PipelineMetrics::default(),
            status: PipelineStatus::Queued,
            started_at: now,
            last_checkpoint_at: now,
            last_error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_stage_index >= self.stages.len()
    }
}

