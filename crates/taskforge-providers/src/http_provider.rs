use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use taskforge_types::{OrchestratorError, Target};

use crate::{CompletionRequest, CompletionResponse, Provider, ProviderConfig};

/// Generic OpenAI-compatible chat-completions client, usable for any
/// provider whose API shape follows that convention. Real vendor SDKs are
/// an explicit non-goal; this single adapter is what "pluggable provider"
/// means in this codebase.
pub struct HttpProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, config: &ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: config.api_key.clone(),
            client,
        }
    }

    fn target(&self, model: &str) -> Target {
        Target::new(&self.name, model)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_credentials(&self) -> bool {
        let Some(api_key) = &self.api_key else {
            return false;
        };
        let url = format!("{}/models", self.base_url);
        match self.client.get(url).bearer_auth(api_key).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, OrchestratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_output_tokens,
            "stream": false,
        }));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req.send().await.map_err(|err| {
            if err.is_timeout() {
                OrchestratorError::StageTimeout {
                    stage_index: 0,
                    timeout_ms: 0,
                }
            } else {
                OrchestratorError::ProviderTransient {
                    target: self.target(&request.model),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1_000);
        let value: serde_json::Value = response.json().await.map_err(|err| {
            OrchestratorError::ProviderTransient {
                target: self.target(&request.model),
                message: err.to_string(),
            }
        })?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(OrchestratorError::ProviderAuth {
                    target: self.target(&request.model),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(OrchestratorError::ProviderRateLimit {
                    target: self.target(&request.model),
                    retry_after_ms,
                });
            }
            status if status.is_server_error() => {
                return Err(OrchestratorError::ProviderTransient {
                    target: self.target(&request.model),
                    message: extract_error_message(&value)
                        .unwrap_or_else(|| format!("server error {status}")),
                });
            }
            status if !status.is_success() => {
                return Err(OrchestratorError::ProviderValidation {
                    target: self.target(&request.model),
                    message: extract_error_message(&value)
                        .unwrap_or_else(|| format!("request rejected with status {status}")),
                });
            }
            _ => {}
        }

        if let Some(detail) = extract_error_message(&value) {
            return Err(OrchestratorError::ProviderValidation {
                target: self.target(&request.model),
                message: detail,
            });
        }

        let text = extract_text(&value).ok_or_else(|| OrchestratorError::ProviderValidation {
            target: self.target(&request.model),
            message: "provider returned no completion content".to_string(),
        })?;

        let usage = value.get("usage");
        let input_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(CompletionResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

fn collect_text_fragments(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    let mut out = String::new();
    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
    }
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn extract_error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_walks_choices_message_content() {
        let value = json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(extract_text(&value), Some("hello".to_string()));
    }

    #[test]
    fn extract_error_message_reads_openai_shape() {
        let value = json!({"error": {"message": "bad request"}});
        assert_eq!(extract_error_message(&value), Some("bad request".to_string()));
    }
}
