use taskforge_types::{RouteTier, Target};

#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub tier: RouteTier,
    pub target: Target,
}

/// Static routing policy: which targets sit at which tier, the spend ceiling
/// per provider per day, and fallback/backoff limits.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub chain: Vec<ChainEntry>,
    pub daily_cap_micros: std::collections::HashMap<String, i64>,
    pub max_fallback_attempts: u32,
    pub backoff_base: std::time::Duration,
    pub backoff_cap: std::time::Duration,
    pub decision_history_capacity: usize,
    /// Daily spend counters reset at local midnight in this timezone.
    pub timezone: chrono_tz::Tz,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            chain: Vec::new(),
            daily_cap_micros: std::collections::HashMap::new(),
            max_fallback_attempts: 3,
            backoff_base: std::time::Duration::from_secs(1),
            backoff_cap: std::time::Duration::from_secs(10),
            decision_history_capacity: 256,
            timezone: chrono_tz::UTC,
        }
    }
}
