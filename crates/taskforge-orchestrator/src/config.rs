use std::collections::HashMap;

use serde::Deserialize;
use taskforge_providers::{PricingEntry, ProviderConfig};
use taskforge_types::OrchestratorError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricingConfig {
    pub input_per_1k: i64,
    pub output_per_1k: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntryConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub models: HashMap<String, ModelPricingConfig>,
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerProviderLimit {
    pub daily_budget_usd: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default)]
    pub per_provider: HashMap<String, PerProviderLimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub fallbacks: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertThresholds {
    #[serde(default)]
    pub daily_cost: Option<f64>,
    #[serde(default)]
    pub monthly_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    #[serde(default)]
    pub thresholds: AlertThresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub providers: HashMap<String, ProviderEntryConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_worker_pool_size() -> usize {
    4
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> Result<Self, OrchestratorError> {
        let mut config: Config =
            serde_yaml::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    /// `{PROVIDER}_API_KEY` env vars overlay the file's `api_key`, so
    /// deployments never need to commit a secret into the config document.
    fn apply_env_overlay(&mut self) {
        for (name, provider) in self.providers.iter_mut() {
            let env_key = format!("{}_API_KEY", name.to_ascii_uppercase().replace('-', "_"));
            if let Ok(value) = std::env::var(&env_key) {
                provider.api_key = Some(value);
            }
        }
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.providers.is_empty() {
            return Err(OrchestratorError::Config("at least one provider must be configured".to_string()));
        }
        for (name, provider) in &self.providers {
            if provider.models.is_empty() {
                return Err(OrchestratorError::Config(format!("provider {name} has no priced models")));
            }
        }
        for (name, limit) in &self.limits.per_provider {
            if limit.daily_budget_usd <= 0.0 {
                return Err(OrchestratorError::Config(format!(
                    "provider {name} has a non-positive daily budget ({})",
                    limit.daily_budget_usd
                )));
            }
        }
        if let Some(default_key) = &self.routing.default {
            if !self.target_exists(default_key) {
                return Err(OrchestratorError::Config(format!(
                    "routing.default references unknown provider/model {default_key}"
                )));
            }
        }
        for (primary_key, fallback_keys) in &self.routing.fallbacks {
            if !self.target_exists(primary_key) {
                return Err(OrchestratorError::Config(format!(
                    "routing.fallbacks references unknown provider/model {primary_key}"
                )));
            }
            for key in fallback_keys {
                if !self.target_exists(key) {
                    return Err(OrchestratorError::Config(format!(
                        "routing.fallbacks references unknown provider/model {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `"provider:model"` names a provider and a priced model that
    /// both actually exist in `self.providers`.
    fn target_exists(&self, key: &str) -> bool {
        let Some((provider, model)) = key.split_once(':') else {
            return false;
        };
        self.providers.get(provider).map(|p| p.models.contains_key(model)).unwrap_or(false)
    }

    pub fn provider_config(&self, name: &str) -> Option<ProviderConfig> {
        let entry = self.providers.get(name)?;
        Some(ProviderConfig {
            api_key: entry.api_key.clone(),
            base_url: entry.base_url.clone(),
            timeout_ms: entry.timeout_ms,
            max_retries: entry.max_retries,
            headers: entry.headers.clone(),
        })
    }

    pub fn pricing_for(&self, provider: &str, model: &str) -> Option<PricingEntry> {
        let entry = self.providers.get(provider)?.models.get(model)?;
        Some(PricingEntry {
            input_per_1k_micros: usd_to_micros(entry.input_per_1k),
            output_per_1k_micros: usd_to_micros(entry.output_per_1k),
        })
    }

    pub fn daily_cap_micros(&self) -> HashMap<String, i64> {
        self.limits
            .per_provider
            .iter()
            .map(|(name, limit)| (name.clone(), (limit.daily_budget_usd * 1_000_000.0) as i64))
            .collect()
    }
}

fn usd_to_micros(amount: i64) -> i64 {
    amount * 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
providers:
  openai:
    base_url: "https://api.openai.com/v1"
    models:
      gpt-4o:
        input_per_1k: 5
        output_per_1k: 15
limits:
  per_provider:
    openai:
      daily_budget_usd: 25.0
routing:
  default: "openai:gpt-4o"
"#;

    #[test]
    fn parses_minimal_valid_document() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.routing.default.as_deref(), Some("openai:gpt-4o"));
        assert_eq!(config.daily_cap_micros().get("openai").copied(), Some(25_000_000));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let bad = SAMPLE.replace("base_url:", "bogus_field: 1\n    base_url:");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        let bad = "providers: {}\n";
        assert!(Config::from_yaml_str(bad).is_err());
    }

    #[test]
    fn non_positive_daily_budget_is_rejected() {
        let bad = SAMPLE.replace("daily_budget_usd: 25.0", "daily_budget_usd: -5.0");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn dangling_routing_default_is_rejected() {
        let bad = SAMPLE.replace("default: \"openai:gpt-4o\"", "default: \"openai:gpt-5\"");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn dangling_routing_fallback_is_rejected() {
        let bad = format!(
            "{SAMPLE}  fallbacks:\n    \"openai:gpt-4o\":\n      - \"anthropic:claude\"\n"
        );
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn valid_routing_fallback_chain_is_accepted() {
        let good = format!(
            "{SAMPLE}  fallbacks:\n    \"openai:gpt-4o\":\n      - \"openai:gpt-4o\"\n"
        );
        assert!(Config::from_yaml_str(&good).is_ok());
    }
}
