use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
};

use serde::Serialize;

use {crate::pricing::PricingTable, porter_common::now_ms};

pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Input for one recorded API call.
#[derive(Debug, Clone, Default)]
pub struct ApiCall {
    pub provider: String,
    pub model: String,
    pub session_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    /// Millisecond epoch.
    pub timestamp: u64,
    pub provider: String,
    pub model: String,
    pub session_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// USD, derived from the pricing table at insertion.
    pub cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub calls: u64,
    pub tokens: u64,
    pub cost: f64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub mean_latency_ms: f64,
    pub by_provider: HashMap<String, ProviderStats>,
}

/// Bounded FIFO of usage records. When the cap is reached the oldest
/// records are discarded.
pub struct UsageTracker {
    max_records: usize,
    pricing: PricingTable,
    records: RwLock<VecDeque<UsageRecord>>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl UsageTracker {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            pricing: PricingTable::new(),
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record(&self, call: ApiCall) -> UsageRecord {
        self.record_at(call, now_ms())
    }

    pub fn record_at(&self, call: ApiCall, timestamp: u64) -> UsageRecord {
        let cost = self
            .pricing
            .cost(&call.model, call.input_tokens, call.output_tokens);
        let record = UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            provider: call.provider,
            model: call.model,
            session_id: call.session_id,
            input_tokens: call.input_tokens,
            output_tokens: call.output_tokens,
            total_tokens: call.input_tokens + call.output_tokens,
            cost,
            latency_ms: call.latency_ms,
            success: call.success,
            error_code: call.error_code,
        };
        if let Ok(mut records) = self.records.write() {
            records.push_back(record.clone());
            while records.len() > self.max_records {
                records.pop_front();
            }
        }
        record
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate stats, optionally filtered to `[from, to]` inclusive.
    pub fn stats(&self, time_range: Option<(u64, u64)>) -> UsageStats {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(_) => return UsageStats::default(),
        };

        let mut stats = UsageStats::default();
        let mut latency_sum: u64 = 0;
        let mut provider_latency: HashMap<String, u64> = HashMap::new();

        for record in records.iter() {
            if let Some((from, to)) = time_range
                && (record.timestamp < from || record.timestamp > to)
            {
                continue;
            }

            stats.total_calls += 1;
            stats.total_tokens += record.total_tokens;
            stats.total_cost += record.cost;
            if record.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            latency_sum += record.latency_ms;

            let bucket = stats
                .by_provider
                .entry(record.provider.clone())
                .or_default();
            bucket.calls += 1;
            bucket.tokens += record.total_tokens;
            bucket.cost += record.cost;
            *provider_latency.entry(record.provider.clone()).or_default() +=
                record.latency_ms;
        }

        if stats.total_calls > 0 {
            stats.mean_latency_ms = latency_sum as f64 / stats.total_calls as f64;
        }
        for (provider, bucket) in stats.by_provider.iter_mut() {
            let sum = provider_latency.get(provider).copied().unwrap_or(0);
            if bucket.calls > 0 {
                bucket.mean_latency_ms = sum as f64 / bucket.calls as f64;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(provider: &str, model: &str, tokens: (u64, u64), latency: u64, ok: bool) -> ApiCall {
        ApiCall {
            provider: provider.into(),
            model: model.into(),
            session_id: "cli:local:chat".into(),
            input_tokens: tokens.0,
            output_tokens: tokens.1,
            latency_ms: latency,
            success: ok,
            error_code: if ok { None } else { Some("AGT-API-001".into()) },
        }
    }

    #[test]
    fn empty_store_yields_zero_stats() {
        let tracker = UsageTracker::default();
        let stats = tracker.stats(None);
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.mean_latency_ms, 0.0);
        assert!(stats.by_provider.is_empty());
    }

    #[test]
    fn cost_is_derived_at_insertion() {
        let tracker = UsageTracker::default();
        let record = tracker.record(call("openai", "gpt-4o", (1_000, 500), 200, true));
        assert!((record.cost - 0.0075).abs() < 1e-9);
        assert_eq!(record.total_tokens, 1_500);
    }

    #[test]
    fn oldest_records_are_discarded_at_cap() {
        let tracker = UsageTracker::new(3);
        for i in 0..5u64 {
            tracker.record_at(call("openai", "gpt-4o", (i, 0), 1, true), i);
        }
        assert_eq!(tracker.len(), 3);
        // Only timestamps 2..=4 survive.
        let stats = tracker.stats(Some((0, 1)));
        assert_eq!(stats.total_calls, 0);
        let stats = tracker.stats(Some((2, 4)));
        assert_eq!(stats.total_calls, 3);
    }

    #[test]
    fn stats_aggregate_and_bucket_by_provider() {
        let tracker = UsageTracker::default();
        tracker.record_at(call("openai", "gpt-4o", (1_000, 500), 100, true), 10);
        tracker.record_at(call("openai", "gpt-4o", (1_000, 500), 300, true), 20);
        tracker.record_at(call("anthropic", "claude-3-5-sonnet", (2_000, 0), 50, false), 30);

        let stats = tracker.stats(None);
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.total_tokens, 5_000);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert!((stats.mean_latency_ms - 150.0).abs() < 1e-9);

        let openai = &stats.by_provider["openai"];
        assert_eq!(openai.calls, 2);
        assert_eq!(openai.tokens, 3_000);
        assert!((openai.mean_latency_ms - 200.0).abs() < 1e-9);
        assert!((stats.by_provider["anthropic"].cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn time_filter_is_inclusive_on_both_ends() {
        let tracker = UsageTracker::default();
        for ts in [10u64, 20, 30] {
            tracker.record_at(call("openai", "gpt-4o", (1, 1), 1, true), ts);
        }
        assert_eq!(tracker.stats(Some((10, 30))).total_calls, 3);
        assert_eq!(tracker.stats(Some((11, 29))).total_calls, 1);
        assert_eq!(tracker.stats(Some((20, 20))).total_calls, 1);
    }
}
