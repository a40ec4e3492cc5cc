//! In-memory metrics: counters, phase timers, rolling snapshots, status digest.
//!
//! One registry is shared across the query orchestrator, reranker client,
//! and ingest worker. Every mutation goes through a single `Mutex<Inner>` —
//! this is a low-frequency, low-cardinality sink, not a hot path, so a plain
//! mutex is enough (see `reranking::RerankerPool`'s engine mutexes for the
//! same choice) rather than anything lock-free.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

const DEFAULT_HISTORY_LEN: usize = 30;
const MAX_PHASE_SAMPLES: usize = 2_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseStats {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub counters: HashMap<String, u64>,
    pub phases: HashMap<String, PhaseStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Green,
    Amber,
    Red,
}

/// Threshold for turning one snapshot value into a `Status`. `higher_is_worse`
/// covers both directions (e.g. error counters vs. a healthy hit-rate ratio).
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub amber_at: f64,
    pub red_at: f64,
    pub higher_is_worse: bool,
}

impl Threshold {
    pub fn classify(&self, value: f64) -> Status {
        let breach = |bound: f64| {
            if self.higher_is_worse {
                value >= bound
            } else {
                value <= bound
            }
        };
        if breach(self.red_at) {
            Status::Red
        } else if breach(self.amber_at) {
            Status::Amber
        } else {
            Status::Green
        }
    }
}

struct Inner {
    counters: HashMap<String, u64>,
    phases: HashMap<String, Vec<f64>>,
    history: VecDeque<MetricsSnapshot>,
}

pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    history_limit: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl MetricsRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: HashMap::new(),
                phases: HashMap::new(),
                history: VecDeque::new(),
            }),
            history_limit,
        }
    }

    pub async fn increment_counter(&self, name: &str, amount: u64) {
        let mut inner = self.inner.lock().await;
        *inner.counters.entry(name.to_string()).or_insert(0) += amount;
    }

    pub async fn record_phase(&self, name: &str, ms: f64) {
        let mut inner = self.inner.lock().await;
        let samples = inner.phases.entry(name.to_string()).or_default();
        samples.push(ms);
        if samples.len() > MAX_PHASE_SAMPLES {
            let overflow = samples.len() - MAX_PHASE_SAMPLES;
            samples.drain(0..overflow);
        }
    }

    /// Builds a snapshot from the current counters/phase samples, pushes it
    /// onto the bounded history ring, and returns it.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let mut inner = self.inner.lock().await;

        let phases = inner
            .phases
            .iter()
            .map(|(name, samples)| (name.clone(), percentiles(samples)))
            .collect();

        let snapshot = MetricsSnapshot {
            taken_at: Utc::now(),
            counters: inner.counters.clone(),
            phases,
        };

        inner.history.push_back(snapshot.clone());
        while inner.history.len() > self.history_limit {
            inner.history.pop_front();
        }

        snapshot
    }

    pub async fn history(&self) -> Vec<MetricsSnapshot> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    /// Maps each `(metric, value)` pair against its configured threshold.
    /// Metrics with no configured threshold are omitted, not defaulted to
    /// green — an unconfigured metric says nothing about health.
    pub fn status_digest(
        values: &HashMap<String, f64>,
        thresholds: &HashMap<String, Threshold>,
    ) -> HashMap<String, Status> {
        values
            .iter()
            .filter_map(|(metric, value)| {
                thresholds
                    .get(metric)
                    .map(|threshold| (metric.clone(), threshold.classify(*value)))
            })
            .collect()
    }
}

fn percentiles(samples: &[f64]) -> PhaseStats {
    if samples.is_empty() {
        return PhaseStats::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    PhaseStats {
        count: sorted.len() as u64,
        p50_ms: percentile_at(&sorted, 0.50),
        p95_ms: percentile_at(&sorted, 0.95),
    }
}

fn percentile_at(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * fraction).round() as usize;
    sorted.get(idx).copied().unwrap_or(0.0)
}
