mod checkpoint;
mod engine;

pub use checkpoint::CheckpointStore;
pub use engine::PipelineEngine;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use taskforge_providers::{CapabilityDescriptor, CompletionRequest, CompletionResponse, Provider, ProviderConfig, ProviderRegistry};
    use taskforge_router::{ChainEntry, Router, RouterConfig};
    use taskforge_types::{AgentDefinition, AgentType, GatePolicy, OrchestratorError, Pipeline, PipelineStatus, RouteTier, Stage, Target};

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn validate_credentials(&self) -> bool {
            true
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, OrchestratorError> {
            Ok(CompletionResponse {
                text: format!("done: {}", request.prompt),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn agent(id: &str, retries: u32) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            name: id.to_string(),
            agent_type: AgentType::Implementer,
            capabilities: Default::default(),
            use_worktree: false,
            max_output_tokens: 100,
            max_retries: retries,
            timeout_ms: 5_000,
        }
    }

    async fn engine_with_echo(dir: &std::path::Path) -> PipelineEngine {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register("echo", Arc::new(Echo), ProviderConfig::default(), CapabilityDescriptor::default(), HashMap::new())
            .await;
        registry.validate("echo").await.unwrap();
        let router_config = RouterConfig {
            chain: vec![ChainEntry { tier: RouteTier::Primary, target: Target::new("echo", "m") }],
            ..RouterConfig::default()
        };
        let router = Arc::new(Router::new(router_config, registry.clone()));
        PipelineEngine::new(router, registry, None, dir.to_path_buf())
    }

    #[tokio::test]
    async fn auto_advance_stage_completes_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_echo(dir.path()).await;
        let stage = Stage { agent: agent("a1", 1), gate_policy: GatePolicy::AutoAdvance, stage_timeout_ms: 2_000 };
        let mut pipeline = Pipeline::new("task-1", vec![stage]);

        engine.advance(&mut pipeline, "do the thing", None).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Succeeded);
        assert!(pipeline.stage_results.contains_key(&0));
    }

    #[tokio::test]
    async fn require_approval_gate_halts_until_approved() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_echo(dir.path()).await;
        let stages = vec![
            Stage { agent: agent("a1", 1), gate_policy: GatePolicy::RequireApproval, stage_timeout_ms: 2_000 },
            Stage { agent: agent("a2", 1), gate_policy: GatePolicy::AutoAdvance, stage_timeout_ms: 2_000 },
        ];
        let mut pipeline = Pipeline::new("task-1", stages);

        engine.advance(&mut pipeline, "design it", None).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::AwaitingApproval);

        engine.approve(&mut pipeline, true, None).await.unwrap();
        assert_eq!(pipeline.current_stage_index, 1);
        assert_eq!(pipeline.status, PipelineStatus::Running);
    }

    #[tokio::test]
    async fn approval_denial_fails_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_echo(dir.path()).await;
        let stage = Stage { agent: agent("a1", 1), gate_policy: GatePolicy::RequireApproval, stage_timeout_ms: 2_000 };
        let mut pipeline = Pipeline::new("task-1", vec![stage]);

        engine.advance(&mut pipeline, "design it", None).await.unwrap();
        engine.approve(&mut pipeline, false, Some("needs rework".to_string())).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn budget_ceiling_already_exhausted_fails_before_invoking() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_echo(dir.path()).await;
        let stage = Stage { agent: agent("a1", 1), gate_policy: GatePolicy::AutoAdvance, stage_timeout_ms: 2_000 };
        let mut pipeline = Pipeline::new("task-1", vec![stage]);
        pipeline.metrics.total_cost_micros = 1_000;

        engine.advance(&mut pipeline, "anything", Some(500)).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_marks_pipeline_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_echo(dir.path()).await;
        let stage = Stage { agent: agent("a1", 1), gate_policy: GatePolicy::AutoAdvance, stage_timeout_ms: 2_000 };
        let mut pipeline = Pipeline::new("task-1", vec![stage]);

        engine.cancel(&mut pipeline).await.unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Cancelled);
    }
}
