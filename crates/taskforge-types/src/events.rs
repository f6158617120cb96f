use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RouteDecision, Target};

/// Best-effort, one-shot per transition; published on the orchestrator's
/// broadcast bus and mirrored into structured logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PipelineStarted {
        pipeline_id: String,
        task_id: String,
        at: DateTime<Utc>,
    },
    PipelineStageSucceeded {
        pipeline_id: String,
        stage_index: usize,
        agent_id: String,
        at: DateTime<Utc>,
    },
    PipelineStageFailed {
        pipeline_id: String,
        stage_index: usize,
        agent_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    PipelineAwaitingApproval {
        pipeline_id: String,
        stage_index: usize,
        at: DateTime<Utc>,
    },
    PipelineCompleted {
        pipeline_id: String,
        at: DateTime<Utc>,
    },
    PipelineCancelled {
        pipeline_id: String,
        at: DateTime<Utc>,
    },
    RouterFallback {
        pipeline_id: String,
        from: Target,
        decision: RouteDecision,
    },
    BudgetThresholdCrossed {
        provider: String,
        level: BudgetAlertLevel,
        cap_micros: i64,
        spent_micros: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAlertLevel {
    Warning,
    Error,
}
