use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use taskforge_providers::{PricingEntry, ProviderRegistry};
use taskforge_types::{OrchestratorError, RouteContext, RouteDecision, Target};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backoff::next_backoff;
use crate::config::RouterConfig;
use crate::policy::{pick, DenyReason};
use crate::state::{today_key, RouterState};

/// Outcome a caller reports back after invoking the picked target, so the
/// router can update spend, latency, and backoff state.
pub enum InvocationOutcome {
    Success { latency_ms: f64, cost_micros: i64 },
    Retryable { retry_after_ms: Option<u64> },
    NonRetryable,
}

#[derive(Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    registry: Arc<ProviderRegistry>,
    state: Arc<RwLock<RouterState>>,
}

impl Router {
    pub fn new(config: RouterConfig, registry: Arc<ProviderRegistry>) -> Self {
        let capacity = config.decision_history_capacity;
        Self {
            config: Arc::new(config),
            registry,
            state: Arc::new(RwLock::new(RouterState::new(capacity))),
        }
    }

    /// Entry point for a fresh stage attempt. Excludes nothing by default;
    /// retries re-enter via `route` with a context whose `excluded_targets`
    /// has grown.
    pub async fn route(&self, ctx: &RouteContext) -> Result<RouteDecision, DenyReason> {
        let snapshot = self.registry.snapshot().await;

        let mut pricing: HashMap<String, PricingEntry> = HashMap::new();
        for entry in &self.config.chain {
            if let Some(price) = self.registry.pricing_for(&entry.target.provider, &entry.target.model).await {
                pricing.insert(entry.target.key(), price);
            }
        }

        let today = today_key(self.config.timezone);
        let (daily_spend, avg_latency) = {
            let state = self.state.read().await;
            (state.spend_snapshot(&today), state.avg_latency_ms.clone())
        };

        let decision = pick(
            &self.config.chain,
            ctx,
            &snapshot,
            &pricing,
            &daily_spend,
            &self.config.daily_cap_micros,
            &avg_latency,
        )?;

        let mut state = self.state.write().await;
        state.increment_call_count(&decision.target.provider);
        state.record_decision(decision.clone());
        Ok(decision)
    }

    /// Re-enters `route` with `failing` appended to the excluded set, up to
    /// `maxFallbackAttempts`. Returns `Ok(None)` once the chain is exhausted
    /// or the attempt budget runs out without retrying further.
    pub async fn fallback(
        &self,
        ctx: &RouteContext,
        failing: Target,
        attempt: u32,
    ) -> Result<Option<RouteDecision>, DenyReason> {
        if attempt >= self.config.max_fallback_attempts {
            warn!(attempt, "fallback attempts exhausted");
            return Ok(None);
        }
        let mut next_ctx = ctx.clone();
        next_ctx.excluded_targets.insert(failing);
        match self.route(&next_ctx).await {
            Ok(decision) => Ok(Some(decision)),
            Err(DenyReason::ChainExhausted) | Err(DenyReason::NoValidProvider) => Ok(None),
            Err(other) => Err(other),
        }
    }

    pub async fn record_outcome(&self, target: &Target, outcome: InvocationOutcome) {
        let mut state = self.state.write().await;
        match outcome {
            InvocationOutcome::Success { latency_ms, cost_micros } => {
                state.record_latency(&target.key(), latency_ms);
                state.add_spend(&target.provider, cost_micros, &today_key(self.config.timezone));
            }
            InvocationOutcome::Retryable { retry_after_ms } => {
                let attempt = state.call_counts.get(&target.provider).copied().unwrap_or(0) as u32;
                let wait = next_backoff(self.config.backoff_base, self.config.backoff_cap, attempt, retry_after_ms);
                state.set_backoff(&target.key(), Instant::now() + wait);
                info!(target = %target, wait_ms = wait.as_millis() as u64, "backing off before retry");
            }
            InvocationOutcome::NonRetryable => {}
        }
    }

    pub async fn backoff_remaining(&self, target: &Target) -> Option<std::time::Duration> {
        self.state.read().await.backoff_remaining(&target.key())
    }

    pub async fn recent_decisions(&self) -> Vec<RouteDecision> {
        self.state.read().await.decisions.iter().cloned().collect()
    }

    /// Per-provider spend accumulated so far today, for status reporting.
    pub async fn daily_spend_snapshot(&self) -> HashMap<String, i64> {
        let today = today_key(self.config.timezone);
        self.state.read().await.spend_snapshot(&today)
    }
}

impl From<DenyReason> for OrchestratorError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::SpendCapExceeded => OrchestratorError::BudgetExceeded {
                cap_micros: 0,
                accumulated_micros: 0,
                estimated_micros: 0,
            },
            DenyReason::NoValidProvider | DenyReason::ChainExhausted | DenyReason::CapabilityUnsupported | DenyReason::Excluded => {
                OrchestratorError::NoTarget
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainEntry;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use taskforge_providers::{CapabilityDescriptor, CompletionRequest, CompletionResponse, Provider, ProviderConfig};
    use taskforge_types::{Priority, RouteTier};

    struct Echo(&'static str);

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            self.0
        }
        async fn validate_credentials(&self) -> bool {
            true
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, OrchestratorError> {
            Ok(CompletionResponse {
                text: format!("{}:{}", self.0, request.prompt),
                input_tokens: 10,
                output_tokens: 10,
            })
        }
    }

    async fn ctx() -> RouteContext {
        RouteContext {
            agent_id: "implementer".into(),
            task_kind: "implement".into(),
            required_capabilities: HashSet::new(),
            estimated_input_tokens: 100,
            priority: Priority::Normal,
            budget_ceiling_micros: None,
            excluded_targets: HashSet::new(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn route_picks_primary_when_valid() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register(
                "primary",
                Arc::new(Echo("primary")),
                ProviderConfig::default(),
                CapabilityDescriptor::default(),
                HashMap::new(),
            )
            .await;
        registry.validate("primary").await.unwrap();

        let config = RouterConfig {
            chain: vec![ChainEntry { tier: RouteTier::Primary, target: Target::new("primary", "m") }],
            ..RouterConfig::default()
        };
        let router = Router::new(config, registry);
        let decision = router.route(&ctx().await).await.unwrap();
        assert_eq!(decision.target.provider, "primary");
        assert_eq!(router.recent_decisions().await.len(), 1);
    }

    #[tokio::test]
    async fn fallback_excludes_failing_target_and_tries_next() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register("primary", Arc::new(Echo("primary")), ProviderConfig::default(), CapabilityDescriptor::default(), HashMap::new())
            .await;
        registry
            .register("fallback", Arc::new(Echo("fallback")), ProviderConfig::default(), CapabilityDescriptor::default(), HashMap::new())
            .await;
        registry.validate("primary").await.unwrap();
        registry.validate("fallback").await.unwrap();
        let config = RouterConfig {
            chain: vec![
                ChainEntry { tier: RouteTier::Primary, target: Target::new("primary", "m") },
                ChainEntry { tier: RouteTier::Fallback, target: Target::new("fallback", "m") },
            ],
            ..RouterConfig::default()
        };
        let router = Router::new(config, registry);
        let decision = router
            .fallback(&ctx().await, Target::new("primary", "m"), 0)
            .await
            .unwrap()
            .expect("fallback target available");
        assert_eq!(decision.target.provider, "fallback");
    }
}
