use std::collections::HashMap;

use chrono::Utc;
use taskforge_providers::{PricingEntry, ProviderSnapshot};
use taskforge_types::{Priority, RouteContext, RouteDecision, RouteTier, Target};

use crate::config::ChainEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoValidProvider,
    CapabilityUnsupported,
    Excluded,
    SpendCapExceeded,
    ChainExhausted,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            DenyReason::NoValidProvider => "no valid provider available for this target",
            DenyReason::CapabilityUnsupported => "target does not support a required capability",
            DenyReason::Excluded => "target already excluded in this route context",
            DenyReason::SpendCapExceeded => "spend cap would be exceeded",
            DenyReason::ChainExhausted => "every configured target was denied",
        };
        write!(f, "{msg}")
    }
}

struct Candidate<'a> {
    entry: &'a ChainEntry,
    estimated_cost_micros: i64,
}

/// Pure function: evaluates a fixed-priority deny chain over a point-in-time
/// snapshot. No I/O, no locking — the caller is responsible for assembling
/// `snapshot`/`pricing`/`daily_spend` beforehand.
#[allow(clippy::too_many_arguments)]
pub fn pick(
    chain: &[ChainEntry],
    ctx: &RouteContext,
    snapshot: &[ProviderSnapshot],
    pricing: &HashMap<String, PricingEntry>,
    daily_spend: &HashMap<String, i64>,
    daily_cap: &HashMap<String, i64>,
    avg_latency_ms: &HashMap<String, f64>,
) -> Result<RouteDecision, DenyReason> {
    let mut first_reason: Option<DenyReason> = None;
    let mut note_reason = |reason: DenyReason| {
        if first_reason.is_none() {
            first_reason = Some(reason);
        }
    };

    for tier in [RouteTier::Primary, RouteTier::Fallback, RouteTier::Emergency] {
        let mut candidates: Vec<Candidate> = Vec::new();

        for entry in chain.iter().filter(|e| e.tier == tier) {
            let target = &entry.target;

            let snap = match snapshot.iter().find(|s| s.name == target.provider) {
                Some(s) if s.valid => s,
                Some(_) => {
                    note_reason(DenyReason::NoValidProvider);
                    continue;
                }
                None => {
                    note_reason(DenyReason::NoValidProvider);
                    continue;
                }
            };

            if ctx
                .required_capabilities
                .iter()
                .any(|cap| !snap.capabilities.supports(*cap))
            {
                note_reason(DenyReason::CapabilityUnsupported);
                continue;
            }

            if ctx.excluded_targets.contains(target) {
                note_reason(DenyReason::Excluded);
                continue;
            }

            let price = pricing.get(&target.key()).cloned().unwrap_or_default();
            let estimated_cost_micros = estimate_input_cost_micros(&price, ctx.estimated_input_tokens);

            let spent = daily_spend.get(&target.provider).copied().unwrap_or(0);
            let cap = daily_cap.get(&target.provider).copied().unwrap_or(i64::MAX);
            if spent + estimated_cost_micros > cap {
                note_reason(DenyReason::SpendCapExceeded);
                continue;
            }
            if let Some(ceiling) = ctx.budget_ceiling_micros {
                if estimated_cost_micros > ceiling {
                    note_reason(DenyReason::SpendCapExceeded);
                    continue;
                }
            }

            candidates.push(Candidate { entry, estimated_cost_micros });
        }

        if candidates.is_empty() {
            continue;
        }

        let winner = select_tiebreak(candidates, ctx.priority, avg_latency_ms);
        return Ok(RouteDecision {
            target: winner.entry.target.clone(),
            tier: winner.entry.tier,
            reason: format!("selected at tier {:?} via deny-chain", winner.entry.tier),
            decided_at: Utc::now(),
            route_context: ctx.clone(),
        });
    }

    Err(first_reason.unwrap_or(DenyReason::ChainExhausted))
}

fn select_tiebreak<'a>(
    mut candidates: Vec<Candidate<'a>>,
    priority: Priority,
    avg_latency_ms: &HashMap<String, f64>,
) -> Candidate<'a> {
    let cost_first = matches!(priority, Priority::Low | Priority::Normal);
    candidates.sort_by(|a, b| {
        if cost_first {
            a.estimated_cost_micros
                .cmp(&b.estimated_cost_micros)
                .then_with(|| latency_of(a.entry, avg_latency_ms).partial_cmp(&latency_of(b.entry, avg_latency_ms)).unwrap_or(std::cmp::Ordering::Equal))
        } else {
            latency_of(a.entry, avg_latency_ms)
                .partial_cmp(&latency_of(b.entry, avg_latency_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.estimated_cost_micros.cmp(&b.estimated_cost_micros))
        }
    });
    candidates.remove(0)
}

fn latency_of(entry: &ChainEntry, avg_latency_ms: &HashMap<String, f64>) -> f64 {
    avg_latency_ms.get(&entry.target.key()).copied().unwrap_or(0.0)
}

fn estimate_input_cost_micros(price: &PricingEntry, input_tokens: u64) -> i64 {
    let tokens_in_thousands = (input_tokens as f64 / 1000.0).ceil();
    ((tokens_in_thousands * price.input_per_1k_micros as f64) as i64).max(0)
}

pub fn target_key(target: &Target) -> String {
    target.key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_providers::CapabilityDescriptor;
    use std::collections::HashSet;

    fn ctx(priority: Priority) -> RouteContext {
        RouteContext {
            agent_id: "implementer".into(),
            task_kind: "implement".into(),
            required_capabilities: HashSet::new(),
            estimated_input_tokens: 1000,
            priority,
            budget_ceiling_micros: None,
            excluded_targets: HashSet::new(),
            tags: Vec::new(),
        }
    }

    fn snap(name: &str, valid: bool) -> ProviderSnapshot {
        ProviderSnapshot {
            name: name.to_string(),
            capabilities: CapabilityDescriptor::default(),
            valid,
        }
    }

    #[test]
    fn falls_back_when_primary_invalid() {
        let chain = vec![
            ChainEntry { tier: RouteTier::Primary, target: Target::new("a", "m") },
            ChainEntry { tier: RouteTier::Fallback, target: Target::new("b", "m") },
        ];
        let snapshot = vec![snap("a", false), snap("b", true)];
        let decision = pick(&chain, &ctx(Priority::Normal), &snapshot, &HashMap::new(), &HashMap::new(), &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(decision.target.provider, "b");
        assert_eq!(decision.tier, RouteTier::Fallback);
    }

    #[test]
    fn excluded_target_is_skipped() {
        let chain = vec![ChainEntry { tier: RouteTier::Primary, target: Target::new("a", "m") }];
        let snapshot = vec![snap("a", true)];
        let mut context = ctx(Priority::Normal);
        context.excluded_targets.insert(Target::new("a", "m"));
        let err = pick(&chain, &context, &snapshot, &HashMap::new(), &HashMap::new(), &HashMap::new(), &HashMap::new()).unwrap_err();
        assert_eq!(err, DenyReason::Excluded);
    }

    #[test]
    fn spend_cap_exceeded_is_denied() {
        let chain = vec![ChainEntry { tier: RouteTier::Primary, target: Target::new("a", "m") }];
        let snapshot = vec![snap("a", true)];
        let mut pricing = HashMap::new();
        pricing.insert("a:m".to_string(), PricingEntry { input_per_1k_micros: 1_000_000, output_per_1k_micros: 0 });
        let mut cap = HashMap::new();
        cap.insert("a".to_string(), 500_000);
        let err = pick(&chain, &ctx(Priority::Normal), &snapshot, &pricing, &HashMap::new(), &cap, &HashMap::new()).unwrap_err();
        assert_eq!(err, DenyReason::SpendCapExceeded);
    }

    #[test]
    fn low_priority_prefers_lower_cost_candidate() {
        let chain = vec![
            ChainEntry { tier: RouteTier::Primary, target: Target::new("expensive", "m") },
            ChainEntry { tier: RouteTier::Primary, target: Target::new("cheap", "m") },
        ];
        let snapshot = vec![snap("expensive", true), snap("cheap", true)];
        let mut pricing = HashMap::new();
        pricing.insert("expensive:m".to_string(), PricingEntry { input_per_1k_micros: 10_000_000, output_per_1k_micros: 0 });
        pricing.insert("cheap:m".to_string(), PricingEntry { input_per_1k_micros: 100, output_per_1k_micros: 0 });
        let decision = pick(&chain, &ctx(Priority::Low), &snapshot, &pricing, &HashMap::new(), &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(decision.target.provider, "cheap");
    }
}
