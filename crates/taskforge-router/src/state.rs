use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use chrono::Utc;
use taskforge_types::RouteDecision;

/// Spend/telemetry state the router accumulates across calls. Guarded by a
/// single `RwLock` the same way the provider registry guards its map — reads
/// (snapshotting for `pick`) never block each other, only mutation does.
#[derive(Default)]
pub struct RouterState {
    pub call_counts: HashMap<String, u64>,
    pub avg_latency_ms: HashMap<String, f64>,
    daily_spend: HashMap<String, (String, i64)>,
    pub decisions: VecDeque<RouteDecision>,
    decisions_capacity: usize,
    backoff_until: HashMap<String, Instant>,
}

impl RouterState {
    pub fn new(decisions_capacity: usize) -> Self {
        Self {
            decisions_capacity,
            ..Default::default()
        }
    }

    pub fn record_decision(&mut self, decision: RouteDecision) {
        if self.decisions.len() >= self.decisions_capacity {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    pub fn increment_call_count(&mut self, provider: &str) {
        *self.call_counts.entry(provider.to_string()).or_insert(0) += 1;
    }

    /// Exponential moving average; cheap and good enough for a latency tie-break.
    pub fn record_latency(&mut self, target_key: &str, latency_ms: f64) {
        let entry = self.avg_latency_ms.entry(target_key.to_string()).or_insert(latency_ms);
        *entry = *entry * 0.7 + latency_ms * 0.3;
    }

    /// Local-date-keyed spend; crossing midnight resets the bucket for new
    /// calls without touching calls already in flight, since each call reads
    /// its own date key once at estimate time.
    pub fn add_spend(&mut self, provider: &str, amount_micros: i64, today: &str) {
        let entry = self
            .daily_spend
            .entry(provider.to_string())
            .or_insert_with(|| (today.to_string(), 0));
        if entry.0 != today {
            *entry = (today.to_string(), 0);
        }
        entry.1 += amount_micros;
    }

    pub fn spend_snapshot(&self, today: &str) -> HashMap<String, i64> {
        self.daily_spend
            .iter()
            .filter(|(_, (date, _))| date == today)
            .map(|(provider, (_, spent))| (provider.clone(), *spent))
            .collect()
    }

    pub fn set_backoff(&mut self, target_key: &str, until: Instant) {
        self.backoff_until.insert(target_key.to_string(), until);
    }

    pub fn backoff_remaining(&self, target_key: &str) -> Option<std::time::Duration> {
        let until = *self.backoff_until.get(target_key)?;
        until.checked_duration_since(Instant::now())
    }
}

pub fn today_key(tz: chrono_tz::Tz) -> String {
    Utc::now().with_timezone(&tz).format("%Y-%m-%d").to_string()
}
