mod cost;
mod http_provider;
mod registry;

pub use cost::*;
pub use http_provider::HttpProvider;
pub use registry::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskforge_types::OrchestratorError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub supports_tools: bool,
    pub supports_structured_json: bool,
    pub supports_streaming: bool,
    pub supports_computer_use: bool,
    pub supports_image_input: bool,
    pub max_output_tokens: u32,
    pub max_tool_calls_per_response: u32,
    pub max_image_bytes: u64,
}

impl CapabilityDescriptor {
    pub fn supports(&self, capability: taskforge_types::Capability) -> bool {
        use taskforge_types::Capability::*;
        match capability {
            Tools => self.supports_tools,
            StructuredJson => self.supports_structured_json,
            ComputerUse => self.supports_computer_use,
            ImageInput => self.supports_image_input,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input_per_1k_micros: i64,
    pub output_per_1k_micros: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Opaque passthrough to a concrete language-model client. Implementations
/// must normalise transport/HTTP failures into the shared error taxonomy
/// rather than leaking their own error types.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap, local credential round-trip. Must not panic; a failed
    /// round-trip just marks the provider invalid for this run.
    async fn validate_credentials(&self) -> bool;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, OrchestratorError>;
}
