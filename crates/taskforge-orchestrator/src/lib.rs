mod config;
mod facade;

pub use config::{AlertsConfig, AlertThresholds, Config, LimitsConfig, ModelPricingConfig, PerProviderLimit, ProviderEntryConfig, RoutingConfig};
pub use facade::{BudgetAlert, Orchestrator, StatusSnapshot};
