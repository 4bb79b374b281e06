//! Asynchronous cost accounting and budget enforcement.
//!
//! `track()` appends to an in-memory channel and returns immediately; a
//! background task prices each record from the immutable pricing table,
//! persists it, and evaluates the monthly budget. The evaluation is
//! debounced naturally: the worker drains every queued record before
//! checking thresholds once.
//!
//! Threshold behaviour:
//! - spend ≥ 80% of budget → `warning` alert
//! - spend ≥ budget → `limit_reached` alert + process-wide fallback mode
//!   (embedding forced to Ollama, re-ranking forced local, contradiction
//!   detection disabled)
//!
//! Both alerts are de-duplicated against un-acknowledged alerts from the
//! last 24 hours. Fallback mode is an atomic flag; it sticks until cleared
//! manually or the calendar month rolls over, and is re-derived from stored
//! spend on startup.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Result, SynthesisError};
use crate::models::{AlertKind, ApiUsage, UsageOperation};
use crate::storage::Storage;

/// Pricing unit for a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnit {
    /// USD per 1M tokens.
    PerMillionTokens,
    /// USD per request (rerank providers).
    PerRequest,
}

/// One pricing table entry. The table is immutable after construction.
#[derive(Debug, Clone)]
pub struct Price {
    pub provider: &'static str,
    pub model: &'static str,
    pub unit: PriceUnit,
    pub rate_usd: f64,
}

/// Pricing for every paid provider/model pair. Local providers are listed
/// at zero so breakdowns still count their traffic.
pub const PRICING: &[Price] = &[
    Price {
        provider: "openai",
        model: "text-embedding-3-large",
        unit: PriceUnit::PerMillionTokens,
        rate_usd: 0.13,
    },
    Price {
        provider: "openai",
        model: "text-embedding-3-small",
        unit: PriceUnit::PerMillionTokens,
        rate_usd: 0.02,
    },
    Price {
        provider: "openai",
        model: "gpt-4o-mini",
        unit: PriceUnit::PerMillionTokens,
        rate_usd: 0.15,
    },
    Price {
        provider: "voyage",
        model: "voyage-code-2",
        unit: PriceUnit::PerMillionTokens,
        rate_usd: 0.12,
    },
    Price {
        provider: "voyage",
        model: "rerank-2",
        unit: PriceUnit::PerRequest,
        rate_usd: 0.001,
    },
    Price {
        provider: "ollama",
        model: "*",
        unit: PriceUnit::PerMillionTokens,
        rate_usd: 0.0,
    },
    Price {
        provider: "local",
        model: "*",
        unit: PriceUnit::PerRequest,
        rate_usd: 0.0,
    },
];

/// Price a usage record. Unknown pairs cost zero and are logged, so a new
/// model never silently drops records.
pub fn cost_for(provider: &str, model: Option<&str>, units: i64) -> f64 {
    let model = model.unwrap_or("*");
    let entry = PRICING
        .iter()
        .find(|p| p.provider == provider && (p.model == model || p.model == "*"));
    match entry {
        Some(p) => match p.unit {
            PriceUnit::PerMillionTokens => p.rate_usd * units as f64 / 1_000_000.0,
            PriceUnit::PerRequest => p.rate_usd * units as f64,
        },
        None => {
            warn!(provider, model, "no pricing entry; recording zero cost");
            0.0
        }
    }
}

#[derive(Debug)]
struct UsageEvent {
    provider: String,
    operation: UsageOperation,
    model: Option<String>,
    units: i64,
    collection_id: Option<String>,
    created_at: i64,
}

/// Month key (year × 12 + month) for fallback stickiness.
fn current_month_key() -> i64 {
    let now = Utc::now();
    now.year() as i64 * 12 + now.month() as i64 - 1
}

pub struct CostTracker {
    storage: Storage,
    budget_usd: f64,
    fallback: AtomicBool,
    fallback_month: AtomicI64,
    tx: mpsc::UnboundedSender<UsageEvent>,
}

impl CostTracker {
    /// Start the tracker and its background writer. Re-derives fallback mode
    /// from the current month's stored spend.
    pub async fn start(storage: Storage, budget_usd: f64) -> Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<UsageEvent>();

        let tracker = Arc::new(Self {
            storage: storage.clone(),
            budget_usd,
            fallback: AtomicBool::new(false),
            fallback_month: AtomicI64::new(0),
            tx,
        });

        if budget_usd > 0.0 {
            let spend = storage.monthly_spend().await?;
            if spend >= budget_usd {
                tracker.enter_fallback();
                info!(spend, budget_usd, "budget already exhausted at startup; fallback mode on");
            }
        }

        let worker = Arc::clone(&tracker);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = worker.persist(event).await {
                    warn!(error = %e, "failed to persist usage record");
                }
                // Drain whatever queued up, then evaluate once.
                while let Ok(event) = rx.try_recv() {
                    if let Err(e) = worker.persist(event).await {
                        warn!(error = %e, "failed to persist usage record");
                    }
                }
                if let Err(e) = worker.evaluate_budget().await {
                    warn!(error = %e, "budget evaluation failed");
                }
            }
        });

        Ok(tracker)
    }

    /// Record one paid API call. Never blocks beyond the channel send.
    pub fn track(
        &self,
        provider: &str,
        operation: UsageOperation,
        units: i64,
        model: Option<&str>,
        collection_id: Option<&str>,
    ) {
        let event = UsageEvent {
            provider: provider.to_string(),
            operation,
            model: model.map(|s| s.to_string()),
            units,
            collection_id: collection_id.map(|s| s.to_string()),
            created_at: Utc::now().timestamp(),
        };
        // Receiver lives as long as the tracker; a send failure means
        // shutdown, where dropping the record is acceptable.
        let _ = self.tx.send(event);
    }

    /// Synchronous variant used by tests and by the worker: persist the
    /// record and evaluate thresholds immediately.
    pub async fn track_now(
        &self,
        provider: &str,
        operation: UsageOperation,
        units: i64,
        model: Option<&str>,
        collection_id: Option<&str>,
    ) -> Result<()> {
        self.persist(UsageEvent {
            provider: provider.to_string(),
            operation,
            model: model.map(|s| s.to_string()),
            units,
            collection_id: collection_id.map(|s| s.to_string()),
            created_at: Utc::now().timestamp(),
        })
        .await?;
        self.evaluate_budget().await
    }

    async fn persist(&self, event: UsageEvent) -> Result<()> {
        let cost_usd = cost_for(&event.provider, event.model.as_deref(), event.units);
        self.storage
            .insert_usage(&ApiUsage {
                provider: event.provider,
                operation: event.operation,
                model: event.model,
                units: event.units,
                cost_usd,
                collection_id: event.collection_id,
                created_at: event.created_at,
            })
            .await
    }

    async fn evaluate_budget(&self) -> Result<()> {
        if self.budget_usd <= 0.0 {
            return Ok(());
        }
        let spend = self.storage.monthly_spend().await?;

        if spend >= self.budget_usd {
            if !self
                .storage
                .has_recent_unacknowledged_alert(AlertKind::LimitReached)
                .await?
            {
                self.storage
                    .insert_alert(AlertKind::LimitReached, self.budget_usd, spend, "monthly")
                    .await?;
                warn!(spend, budget = self.budget_usd, "monthly budget limit reached");
            }
            self.enter_fallback();
        } else if spend >= 0.8 * self.budget_usd
            && !self
                .storage
                .has_recent_unacknowledged_alert(AlertKind::Warning)
                .await?
        {
            self.storage
                .insert_alert(AlertKind::Warning, 0.8 * self.budget_usd, spend, "monthly")
                .await?;
            warn!(spend, budget = self.budget_usd, "monthly budget warning threshold crossed");
        }
        Ok(())
    }

    fn enter_fallback(&self) {
        self.fallback.store(true, Ordering::SeqCst);
        self.fallback_month
            .store(current_month_key(), Ordering::SeqCst);
    }

    /// True while fallback mode is in force. Expires automatically when the
    /// calendar month rolls over.
    pub fn fallback_active(&self) -> bool {
        if !self.fallback.load(Ordering::SeqCst) {
            return false;
        }
        if self.fallback_month.load(Ordering::SeqCst) != current_month_key() {
            self.fallback.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Manual operator override.
    pub fn clear_fallback(&self) {
        self.fallback.store(false, Ordering::SeqCst);
    }

    /// Error for operations that cannot proceed without a paid provider.
    pub async fn ensure_paid_allowed(&self) -> Result<()> {
        if self.fallback_active() {
            let spend = self.storage.monthly_spend().await.unwrap_or(self.budget_usd);
            return Err(SynthesisError::QuotaExceeded {
                quota_limit: self.budget_usd,
                quota_used: spend,
            });
        }
        Ok(())
    }

    pub fn budget_usd(&self) -> f64 {
        self.budget_usd
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_million_token_pricing() {
        let cost = cost_for("openai", Some("text-embedding-3-large"), 1_000_000);
        assert!((cost - 0.13).abs() < 1e-9);
    }

    #[test]
    fn per_request_pricing_for_rerank() {
        let cost = cost_for("voyage", Some("rerank-2"), 3);
        assert!((cost - 0.003).abs() < 1e-9);
    }

    #[test]
    fn ollama_is_free() {
        assert_eq!(cost_for("ollama", Some("nomic-embed-text"), 50_000), 0.0);
    }

    #[test]
    fn unknown_provider_costs_zero() {
        assert_eq!(cost_for("acme", Some("mystery"), 1_000_000), 0.0);
    }
}
