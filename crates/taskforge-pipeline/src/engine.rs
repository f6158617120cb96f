use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use taskforge_providers::{CompletionRequest, ProviderRegistry};
use taskforge_router::{DenyReason, InvocationOutcome, Router};
use taskforge_types::{
    ErrorKind, GatePolicy, OrchestratorError, Pipeline, PipelineError, PipelineStatus, Priority,
    RouteContext, StageResult,
};
use taskforge_worktree::WorktreeManager;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;

/// Drives one pipeline through its ordered stage list. Mirrors the
/// event-in/state-out shape of a reducer, but owns the I/O (routing,
/// invocation, worktree lifecycle) a pure reducer would leave to its caller.
#[derive(Clone)]
pub struct PipelineEngine {
    router: Arc<Router>,
    registry: Arc<ProviderRegistry>,
    worktrees: Option<Arc<WorktreeManager>>,
    checkpoints: CheckpointStore,
    cancellations: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl PipelineEngine {
    pub fn new(
        router: Arc<Router>,
        registry: Arc<ProviderRegistry>,
        worktrees: Option<Arc<WorktreeManager>>,
        checkpoint_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            router,
            registry,
            worktrees,
            checkpoints: CheckpointStore::new(checkpoint_root),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn cancellation_token(&self, pipeline_id: &str) -> CancellationToken {
        let mut tokens = self.cancellations.write().await;
        tokens.entry(pipeline_id.to_string()).or_insert_with(CancellationToken::new).clone()
    }

    pub async fn cancel(&self, pipeline: &mut Pipeline) -> Result<(), OrchestratorError> {
        self.cancellation_token(&pipeline.id).await.cancel();
        pipeline.status = PipelineStatus::Cancelled;
        pipeline.last_checkpoint_at = Utc::now();
        self.checkpoints.save(pipeline).await
    }

    /// Executes exactly the current stage. Handles retries, worktree setup,
    /// and the stage's own timeout internally; does not advance past a
    /// `require-approval` gate.
    pub async fn advance(
        &self,
        pipeline: &mut Pipeline,
        prompt: &str,
        budget_ceiling_micros: Option<i64>,
    ) -> Result<(), OrchestratorError> {
        if pipeline.is_complete() {
            pipeline.status = PipelineStatus::Succeeded;
            return self.checkpoints.save(pipeline).await;
        }
        if pipeline.status.is_terminal() {
            return Err(OrchestratorError::Validation(format!(
                "pipeline {} is already in a terminal state",
                pipeline.id
            )));
        }

        let token = self.cancellation_token(&pipeline.id).await;
        if token.is_cancelled() {
            pipeline.status = PipelineStatus::Cancelled;
            return self.checkpoints.save(pipeline).await;
        }

        if let Some(ceiling) = budget_ceiling_micros {
            if pipeline.metrics.total_cost_micros >= ceiling {
                let error = PipelineError {
                    kind: ErrorKind::BudgetExceeded,
                    message: "daily/task budget already exhausted".to_string(),
                    target: None,
                    attempt: 0,
                };
                return self.fail_stage(pipeline, error).await;
            }
        }

        pipeline.status = PipelineStatus::Running;
        let stage_index = pipeline.current_stage_index;
        let stage = pipeline.stages[stage_index].clone();

        // Acquired once per stage, before the retry loop, and reused across
        // retries of this same stage (per §4.6 step 2); a deterministic name
        // keyed on (agent, task, stage) lets a later `acquire` for the same
        // stage find and reuse this same worktree instead of leaking one per
        // attempt.
        let worktree_name = if stage.agent.use_worktree {
            match &self.worktrees {
                Some(manager) => match manager.acquire(&stage.agent.id, &pipeline.task_id, stage_index).await {
                    Ok(info) => Some(info.name),
                    Err(err) => {
                        let error = PipelineError {
                            kind: ErrorKind::WorktreeFailure,
                            message: err.to_string(),
                            target: None,
                            attempt: 0,
                        };
                        return self.fail_stage(pipeline, error).await;
                    }
                },
                None => {
                    let error = PipelineError {
                        kind: ErrorKind::WorktreeFailure,
                        message: "stage requires a worktree but none is configured".to_string(),
                        target: None,
                        attempt: 0,
                    };
                    return self.fail_stage(pipeline, error).await;
                }
            }
        } else {
            None
        };

        let mut ctx = RouteContext {
            agent_id: stage.agent.id.clone(),
            task_kind: format!("stage-{stage_index}"),
            required_capabilities: stage.agent.capabilities.clone(),
            estimated_input_tokens: estimate_tokens(prompt),
            priority: Priority::Normal,
            budget_ceiling_micros,
            excluded_targets: Default::default(),
            tags: Vec::new(),
        };

        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..=stage.agent.max_retries {
            if token.is_cancelled() {
                pipeline.status = PipelineStatus::Cancelled;
                return self.checkpoints.save(pipeline).await;
            }

            let decision = match self.router.route(&ctx).await {
                Ok(decision) => decision,
                Err(reason) => {
                    let kind = match reason {
                        DenyReason::SpendCapExceeded => ErrorKind::BudgetExceeded,
                        _ => ErrorKind::NoTarget,
                    };
                    let error = PipelineError {
                        kind,
                        message: reason.to_string(),
                        target: None,
                        attempt,
                    };
                    last_error = Some(error);
                    break;
                }
            };

            let request = CompletionRequest {
                model: decision.target.model.clone(),
                prompt: prompt.to_string(),
                max_output_tokens: stage.agent.max_output_tokens,
            };

            let started = Instant::now();
            let timeout = Duration::from_millis(stage.stage_timeout_ms);
            let outcome = tokio::time::timeout(timeout, self.registry.invoke(&decision.target.provider, &request)).await;

            let result = match outcome {
                Ok(inner) => inner,
                Err(_) => Err(OrchestratorError::StageTimeout {
                    stage_index,
                    timeout_ms: stage.stage_timeout_ms,
                }),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    let cost_micros = self.registry.pricing_for(&decision.target.provider, &decision.target.model).await.map(|price| {
                        taskforge_providers::estimate_cost_micros(&price, response.input_tokens, response.output_tokens as u32)
                    }).unwrap_or(0);

                    self.router
                        .record_outcome(&decision.target, InvocationOutcome::Success { latency_ms: latency_ms as f64, cost_micros })
                        .await;

                    let worktree_changes = if let (Some(manager), Some(name)) = (&self.worktrees, &worktree_name) {
                        let changes = manager.capture_changes(name).await.ok();
                        manager.commit(name, &format!("{}: stage {stage_index}", stage.agent.id)).await.ok();
                        manager.cleanup(name).await.ok();
                        changes
                    } else {
                        None
                    };

                    let stage_result = StageResult {
                        agent_id: stage.agent.id.clone(),
                        selected_target: decision.target.clone(),
                        request_fingerprint: fingerprint(prompt),
                        response_summary: truncate(&response.text, 2_000),
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                        cost_micros,
                        latency_ms,
                        decisions: vec![decision.clone()],
                        worktree_changes,
                        best_effort_skipped: false,
                    };

                    pipeline.metrics.total_input_tokens += response.input_tokens;
                    pipeline.metrics.total_output_tokens += response.output_tokens;
                    pipeline.metrics.total_cost_micros += cost_micros;
                    *pipeline.metrics.per_provider_call_counts.entry(decision.target.provider.clone()).or_insert(0) += 1;
                    pipeline.stage_results.insert(stage_index, stage_result);
                    pipeline.last_error = None;

                    match stage.gate_policy {
                        GatePolicy::RequireApproval => {
                            pipeline.status = PipelineStatus::AwaitingApproval;
                        }
                        GatePolicy::AutoAdvance | GatePolicy::BestEffort => {
                            pipeline.current_stage_index += 1;
                            pipeline.status = if pipeline.is_complete() {
                                PipelineStatus::Succeeded
                            } else {
                                PipelineStatus::Running
                            };
                        }
                    }
                    pipeline.last_checkpoint_at = Utc::now();
                    return self.checkpoints.save(pipeline).await;
                }
                Err(err) => {
                    let kind = err.kind();
                    let error = PipelineError {
                        kind,
                        message: err.to_string(),
                        target: Some(decision.target.clone()),
                        attempt,
                    };

                    if kind.is_retryable() && attempt < stage.agent.max_retries {
                        let retry_after_ms = match &err {
                            OrchestratorError::ProviderRateLimit { retry_after_ms, .. } => *retry_after_ms,
                            _ => None,
                        };
                        self.router
                            .record_outcome(&decision.target, InvocationOutcome::Retryable { retry_after_ms })
                            .await;
                        ctx.excluded_targets.insert(decision.target.clone());
                        let wait = self.router.backoff_remaining(&decision.target).await.unwrap_or(Duration::from_millis(250));
                        warn!(pipeline_id = %pipeline.id, stage_index, attempt, "stage invocation failed, retrying after backoff");
                        tokio::time::sleep(wait).await;
                        last_error = Some(error);
                        continue;
                    }

                    self.router.record_outcome(&decision.target, InvocationOutcome::NonRetryable).await;
                    last_error = Some(error);
                    break;
                }
            }
        }

        if let (Some(manager), Some(name)) = (&self.worktrees, &worktree_name) {
            manager.cleanup(name).await.ok();
        }

        let error = last_error.unwrap_or(PipelineError {
            kind: ErrorKind::NoTarget,
            message: "stage exhausted all attempts".to_string(),
            target: None,
            attempt: stage.agent.max_retries,
        });

        if stage.gate_policy == GatePolicy::BestEffort {
            let stage_result = StageResult {
                agent_id: stage.agent.id.clone(),
                selected_target: error.target.clone().unwrap_or_else(|| taskforge_types::Target::new("none", "none")),
                request_fingerprint: fingerprint(prompt),
                response_summary: format!("skipped: {}", error.message),
                input_tokens: 0,
                output_tokens: 0,
                cost_micros: 0,
                latency_ms: 0,
                decisions: Vec::new(),
                worktree_changes: None,
                best_effort_skipped: true,
            };
            pipeline.stage_results.insert(stage_index, stage_result);
            pipeline.current_stage_index += 1;
            pipeline.status = if pipeline.is_complete() { PipelineStatus::Succeeded } else { PipelineStatus::Running };
            pipeline.last_error = Some(error);
            pipeline.last_checkpoint_at = Utc::now();
            info!(pipeline_id = %pipeline.id, stage_index, "best-effort stage failed, continuing");
            return self.checkpoints.save(pipeline).await;
        }

        self.fail_stage(pipeline, error).await
    }

    async fn fail_stage(&self, pipeline: &mut Pipeline, error: PipelineError) -> Result<(), OrchestratorError> {
        pipeline.status = PipelineStatus::Failed;
        pipeline.last_error = Some(error);
        pipeline.last_checkpoint_at = Utc::now();
        self.checkpoints.save(pipeline).await
    }

    /// Operator decision on a `require-approval` gate. Denial fails the
    /// pipeline rather than silently retrying the same stage output.
    pub async fn approve(&self, pipeline: &mut Pipeline, approved: bool, reason: Option<String>) -> Result<(), OrchestratorError> {
        if pipeline.status != PipelineStatus::AwaitingApproval {
            return Err(OrchestratorError::Validation(format!(
                "pipeline {} is not awaiting approval",
                pipeline.id
            )));
        }
        if approved {
            pipeline.current_stage_index += 1;
            pipeline.status = if pipeline.is_complete() { PipelineStatus::Succeeded } else { PipelineStatus::Running };
        } else {
            pipeline.status = PipelineStatus::Failed;
            pipeline.last_error = Some(PipelineError {
                kind: ErrorKind::Validation,
                message: reason.unwrap_or_else(|| "approval denied".to_string()),
                target: None,
                attempt: 0,
            });
        }
        pipeline.last_checkpoint_at = Utc::now();
        self.checkpoints.save(pipeline).await
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }
}

fn estimate_tokens(prompt: &str) -> u64 {
    (prompt.len() as u64 / 4).max(1)
}

fn fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}…", &text[..max_len])
    }
}
