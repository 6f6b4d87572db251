//! In-process query metrics.
//!
//! [`QueryMetrics`] counts request outcomes, rejected SQL, generator calls
//! and database executions, and accumulates their latencies. It is shared by
//! reference like the resilience kit and can be read at any time through
//! [`QueryMetrics::snapshot`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::ErrorKind;

/// Count, sum and maximum of one latency series.
#[derive(Debug, Default)]
struct LatencyStat {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStat {
    fn record(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .total_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(ms))
            });
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_ms: self.total_ms.load(Ordering::Relaxed),
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one latency series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    /// Observations recorded
    pub count: u64,
    /// Sum of all observations
    pub total_ms: u64,
    /// Largest observation
    pub max_ms: u64,
}

impl LatencySnapshot {
    /// Mean latency, or zero without observations.
    pub fn mean_ms(&self) -> u64 {
        self.total_ms.checked_div(self.count).unwrap_or(0)
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests answered successfully
    pub queries_succeeded: u64,
    /// Failed requests by error kind
    pub queries_failed: BTreeMap<ErrorKind, u64>,
    /// Successful requests that carried a low-confidence warning
    pub low_confidence_warnings: u64,
    /// Generated statements rejected by the validator, by error kind
    pub sql_rejected: BTreeMap<ErrorKind, u64>,
    /// Generator calls that returned SQL
    pub llm_calls: u64,
    /// Generator calls that failed
    pub llm_failures: u64,
    /// Tokens reported by the generator
    pub llm_tokens: u64,
    /// Statements that returned rows
    pub db_queries: u64,
    /// Statements that failed
    pub db_failures: u64,
    /// Whole-request latency
    pub query_duration: LatencySnapshot,
    /// Latency of individual generator calls
    pub llm_latency: LatencySnapshot,
    /// Latency of individual statement executions
    pub db_latency: LatencySnapshot,
}

impl MetricsSnapshot {
    /// Requests seen, successful or not.
    pub fn queries_total(&self) -> u64 {
        self.queries_failed
            .values()
            .fold(self.queries_succeeded, |total, n| total.saturating_add(*n))
    }
}

/// Shared query counters. Safe to update from concurrent requests.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    queries_succeeded: AtomicU64,
    queries_failed: Mutex<BTreeMap<ErrorKind, u64>>,
    low_confidence_warnings: AtomicU64,
    sql_rejected: Mutex<BTreeMap<ErrorKind, u64>>,
    llm_calls: AtomicU64,
    llm_failures: AtomicU64,
    llm_tokens: AtomicU64,
    db_queries: AtomicU64,
    db_failures: AtomicU64,
    query_duration: LatencyStat,
    llm_latency: LatencyStat,
    db_latency: LatencyStat,
}

impl QueryMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished request.
    pub fn record_query(&self, outcome: Option<ErrorKind>, elapsed: Duration) {
        self.query_duration.record(elapsed);
        match outcome {
            None => {
                self.queries_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(kind) => increment(&self.queries_failed, kind),
        }
    }

    /// Records a low-confidence result returned with a warning.
    pub fn record_low_confidence_warning(&self) {
        self.low_confidence_warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Records generated SQL rejected by the validator.
    pub fn record_sql_rejected(&self, kind: ErrorKind) {
        increment(&self.sql_rejected, kind);
    }

    /// Records one generator call.
    pub fn record_llm_call(&self, succeeded: bool, elapsed: Duration, tokens: Option<u32>) {
        self.llm_latency.record(elapsed);
        if succeeded {
            self.llm_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.llm_failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(tokens) = tokens {
            self.llm_tokens
                .fetch_add(u64::from(tokens), Ordering::Relaxed);
        }
    }

    /// Records one statement execution.
    pub fn record_db_query(&self, succeeded: bool, elapsed: Duration) {
        self.db_latency.record(elapsed);
        if succeeded {
            self.db_queries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.db_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copies the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_succeeded: self.queries_succeeded.load(Ordering::Relaxed),
            queries_failed: read(&self.queries_failed),
            low_confidence_warnings: self.low_confidence_warnings.load(Ordering::Relaxed),
            sql_rejected: read(&self.sql_rejected),
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_failures: self.llm_failures.load(Ordering::Relaxed),
            llm_tokens: self.llm_tokens.load(Ordering::Relaxed),
            db_queries: self.db_queries.load(Ordering::Relaxed),
            db_failures: self.db_failures.load(Ordering::Relaxed),
            query_duration: self.query_duration.snapshot(),
            llm_latency: self.llm_latency.snapshot(),
            db_latency: self.db_latency.snapshot(),
        }
    }
}

fn increment(counts: &Mutex<BTreeMap<ErrorKind, u64>>, kind: ErrorKind) {
    let mut counts = counts.lock().unwrap_or_else(PoisonError::into_inner);
    let count = counts.entry(kind).or_insert(0);
    *count = count.saturating_add(1);
}

fn read(counts: &Mutex<BTreeMap<ErrorKind, u64>>) -> BTreeMap<ErrorKind, u64> {
    counts
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
