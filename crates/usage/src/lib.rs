//! API usage accounting.
//!
//! A bounded in-memory ring of per-call records with advisory cost
//! attribution. The authoritative billing source is the worker's usage
//! payload attached to each turn response; the tracker exists for the
//! operator dashboard and alerting.

pub mod pricing;
pub mod tracker;

pub use {
    pricing::PricingTable,
    tracker::{ApiCall, ProviderStats, UsageRecord, UsageStats, UsageTracker},
};
