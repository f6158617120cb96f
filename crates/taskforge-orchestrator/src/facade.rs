use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use taskforge_pipeline::PipelineEngine;
use taskforge_providers::{CapabilityDescriptor, HttpProvider, ProviderRegistry};
use taskforge_router::{ChainEntry, Router, RouterConfig};
use taskforge_store::{decompose, DecomposeProposal, Store};
use taskforge_types::{
    default_agent_roster, BudgetAlertLevel, Epic, EngineEvent, GatePolicy, OrchestratorError, Pipeline,
    Priority, RouteTier, Stage, Target, Task,
};
use taskforge_worktree::WorktreeManager;
use tokio::sync::{broadcast, Semaphore};
use tracing::info;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct BudgetAlert {
    pub provider: String,
    pub level: BudgetAlertLevel,
    pub cap_micros: i64,
    pub spent_micros: i64,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub active_pipeline_ids: Vec<String>,
    pub daily_spend_micros: HashMap<String, i64>,
    pub daily_cap_micros: HashMap<String, i64>,
    pub recent_decisions: Vec<taskforge_types::RouteDecision>,
    pub alerts: Vec<BudgetAlert>,
}

/// One process-wide bundle of `Arc`-wrapped subsystem handles, owned by
/// `main` and passed by reference into every call — no ambient singletons.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    router: Arc<Router>,
    worktrees: Option<Arc<WorktreeManager>>,
    store: Arc<Store>,
    engine: Arc<PipelineEngine>,
    events: broadcast::Sender<EngineEvent>,
    pool: Arc<Semaphore>,
    active_pipelines: Arc<tokio::sync::RwLock<HashMap<String, Pipeline>>>,
}

impl Orchestrator {
    pub async fn new(
        config: Config,
        state_root: impl Into<std::path::PathBuf>,
        repo_root: impl Into<std::path::PathBuf>,
    ) -> Result<Self, OrchestratorError> {
        let state_root = state_root.into();
        let registry = Arc::new(ProviderRegistry::new());

        for (name, provider_cfg) in &config.providers {
            let provider_config = config.provider_config(name).expect("just iterated");
            let provider = Arc::new(HttpProvider::new(name.clone(), &provider_config));
            let mut pricing = HashMap::new();
            for model in provider_cfg.models.keys() {
                if let Some(price) = config.pricing_for(name, model) {
                    pricing.insert(model.clone(), price);
                }
            }
            registry
                .register(name.clone(), provider, provider_config, CapabilityDescriptor::default(), pricing)
                .await;
        }
        registry.validate_all().await?;

        let router_config = RouterConfig {
            chain: build_chain(&config),
            daily_cap_micros: config.daily_cap_micros(),
            ..RouterConfig::default()
        };
        let router = Arc::new(Router::new(router_config, registry.clone()));

        let store = Arc::new(Store::load(state_root.clone()).await?);

        let worktrees = Some(Arc::new(WorktreeManager::new(repo_root.into(), state_root.join(".worktrees"))));
        if let Some(manager) = &worktrees {
            manager.recover_orphans().await.ok();
        }

        let engine = Arc::new(PipelineEngine::new(router.clone(), registry.clone(), worktrees.clone(), state_root.clone()));

        let (tx, _rx) = broadcast::channel(2048);
        let pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));

        Ok(Self {
            config: Arc::new(config),
            registry,
            router,
            worktrees,
            store,
            engine,
            events: tx,
            pool,
            active_pipelines: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn propose_decomposition(&self, epic: &Epic) -> DecomposeProposal {
        decompose(epic)
    }

    /// Runs a fresh pipeline for `task` to its first gate or terminal state.
    /// The worker-pool semaphore bounds how many pipelines run concurrently;
    /// excess submissions wait here rather than spawning unbounded tasks.
    pub async fn process_task(&self, task: &Task, stages: Vec<Stage>, prompt: &str) -> Result<Pipeline, OrchestratorError> {
        let _permit = self.pool.acquire().await.map_err(|_| OrchestratorError::Cancelled)?;

        let mut pipeline = Pipeline::new(task.id.clone(), stages);
        self.publish(EngineEvent::PipelineStarted {
            pipeline_id: pipeline.id.clone(),
            task_id: task.id.clone(),
            at: Utc::now(),
        });

        let budget_ceiling = task_budget_ceiling(&self.config, task);
        self.engine.advance(&mut pipeline, prompt, budget_ceiling).await?;
        self.emit_transition_events(&pipeline);
        self.track(pipeline.clone()).await;
        Ok(pipeline)
    }

    pub async fn resume(&self, pipeline_id: &str, prompt: &str) -> Result<Pipeline, OrchestratorError> {
        let mut pipeline = self
            .engine
            .checkpoints()
            .load(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(pipeline_id.to_string()))?;
        if !pipeline.status.is_resumable() {
            return Err(OrchestratorError::Validation(format!("pipeline {pipeline_id} is not resumable")));
        }
        self.engine.advance(&mut pipeline, prompt, None).await?;
        self.emit_transition_events(&pipeline);
        self.track(pipeline.clone()).await;
        Ok(pipeline)
    }

    pub async fn approve(&self, pipeline_id: &str, approved: bool, reason: Option<String>) -> Result<Pipeline, OrchestratorError> {
        let mut pipeline = self
            .engine
            .checkpoints()
            .load(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(pipeline_id.to_string()))?;
        self.engine.approve(&mut pipeline, approved, reason).await?;
        self.emit_transition_events(&pipeline);
        self.track(pipeline.clone()).await;
        Ok(pipeline)
    }

    pub async fn cancel(&self, pipeline_id: &str) -> Result<Pipeline, OrchestratorError> {
        let mut pipeline = self
            .engine
            .checkpoints()
            .load(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(pipeline_id.to_string()))?;
        self.engine.cancel(&mut pipeline).await?;
        self.publish(EngineEvent::PipelineCancelled { pipeline_id: pipeline.id.clone(), at: Utc::now() });
        self.track(pipeline.clone()).await;
        Ok(pipeline)
    }

    pub async fn get_ready_tasks(&self, priority: Option<Priority>) -> Vec<Task> {
        self.store.ready_tasks(priority).await
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        let active = self.active_pipelines.read().await;
        let active_pipeline_ids = active
            .values()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.id.clone())
            .collect();
        drop(active);

        let daily_cap_micros = self.config.daily_cap_micros();
        let snapshot = self.registry.snapshot().await;
        let spend_by_provider = self.router.daily_spend_snapshot().await;
        let mut daily_spend_micros = HashMap::new();
        let mut alerts = Vec::new();
        for entry in &snapshot {
            let spent = spend_by_provider.get(&entry.name).copied().unwrap_or(0);
            daily_spend_micros.insert(entry.name.clone(), spent);
            if let Some(cap) = daily_cap_micros.get(&entry.name) {
                let ratio = if *cap > 0 { spent as f64 / *cap as f64 } else { 0.0 };
                if ratio >= 1.0 {
                    alerts.push(BudgetAlert { provider: entry.name.clone(), level: BudgetAlertLevel::Error, cap_micros: *cap, spent_micros: spent });
                } else if ratio >= 0.8 {
                    alerts.push(BudgetAlert { provider: entry.name.clone(), level: BudgetAlertLevel::Warning, cap_micros: *cap, spent_micros: spent });
                }
            }
        }

        StatusSnapshot {
            active_pipeline_ids,
            daily_spend_micros,
            daily_cap_micros,
            recent_decisions: self.router.recent_decisions().await,
            alerts,
        }
    }

    /// Stashes and releases every active worktree. Called once at graceful
    /// shutdown.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        if let Some(manager) = &self.worktrees {
            for info in manager.list().await {
                manager.cleanup(&info.name).await.ok();
            }
        }
        info!("orchestrator shutdown complete");
        Ok(())
    }

    async fn track(&self, pipeline: Pipeline) {
        self.active_pipelines.write().await.insert(pipeline.id.clone(), pipeline);
    }

    fn emit_transition_events(&self, pipeline: &Pipeline) {
        use taskforge_types::PipelineStatus::*;
        let at = Utc::now();
        match pipeline.status {
            AwaitingApproval => self.publish(EngineEvent::PipelineAwaitingApproval {
                pipeline_id: pipeline.id.clone(),
                stage_index: pipeline.current_stage_index,
                at,
            }),
            Succeeded => self.publish(EngineEvent::PipelineCompleted { pipeline_id: pipeline.id.clone(), at }),
            Failed => {
                if let Some(error) = &pipeline.last_error {
                    self.publish(EngineEvent::PipelineStageFailed {
                        pipeline_id: pipeline.id.clone(),
                        stage_index: pipeline.current_stage_index,
                        agent_id: pipeline
                            .stages
                            .get(pipeline.current_stage_index)
                            .map(|s| s.agent.id.clone())
                            .unwrap_or_default(),
                        reason: error.message.clone(),
                        at,
                    });
                }
            }
            Running | Queued | Paused | Cancelled => {
                if let Some(result) = pipeline.stage_results.get(&pipeline.current_stage_index.saturating_sub(1)) {
                    self.publish(EngineEvent::PipelineStageSucceeded {
                        pipeline_id: pipeline.id.clone(),
                        stage_index: pipeline.current_stage_index.saturating_sub(1),
                        agent_id: result.agent_id.clone(),
                        at,
                    });
                }
            }
        }
    }

    pub fn default_agent_roster_stages(&self, gate_policy_for: impl Fn(&str) -> GatePolicy) -> Vec<Stage> {
        default_agent_roster()
            .into_iter()
            .map(|agent| Stage {
                gate_policy: gate_policy_for(&agent.id),
                stage_timeout_ms: agent.timeout_ms,
                agent,
            })
            .collect()
    }
}

fn task_budget_ceiling(config: &Config, task: &Task) -> Option<i64> {
    let _ = task;
    let total: i64 = config.daily_cap_micros().values().sum();
    if total > 0 {
        Some(total)
    } else {
        None
    }
}

fn parse_target(key: &str) -> Option<Target> {
    let (provider, model) = key.split_once(':')?;
    Some(Target::new(provider, model))
}

/// Walks `routing.fallbacks` to build the primary -> fallback -> emergency
/// chain per stage §4.3: each map key is a primary target, its list the
/// ordered fallback chain with the last entry treated as the emergency tier.
/// `routing.default` is appended as a bare primary if it names a target with
/// no fallbacks configured. Providers with no routing config at all fall
/// back to every configured model being a primary target.
fn build_chain(config: &Config) -> Vec<ChainEntry> {
    let mut chain = Vec::new();
    let mut seen_primaries = std::collections::HashSet::new();

    for (primary_key, fallback_keys) in &config.routing.fallbacks {
        if seen_primaries.insert(primary_key.clone()) {
            if let Some(target) = parse_target(primary_key) {
                chain.push(ChainEntry { tier: RouteTier::Primary, target });
            }
        }
        let last_index = fallback_keys.len().saturating_sub(1);
        for (index, key) in fallback_keys.iter().enumerate() {
            if let Some(target) = parse_target(key) {
                let tier = if index == last_index { RouteTier::Emergency } else { RouteTier::Fallback };
                chain.push(ChainEntry { tier, target });
            }
        }
    }

    if let Some(default_key) = &config.routing.default {
        if seen_primaries.insert(default_key.clone()) {
            if let Some(target) = parse_target(default_key) {
                chain.push(ChainEntry { tier: RouteTier::Primary, target });
            }
        }
    }

    if chain.is_empty() {
        for (name, provider_cfg) in &config.providers {
            for model in provider_cfg.models.keys() {
                chain.push(ChainEntry { tier: RouteTier::Primary, target: Target::new(name.clone(), model.clone()) });
            }
        }
    }

    chain
}
