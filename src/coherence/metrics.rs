use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::error::EngineResult;

const LATENCY_BUCKETS: [f64; 10] = [
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.15, 0.5,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub samples: usize,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Observability for the projector. Nothing here feeds back into results.
pub struct ProjectionMetrics {
    registry: Registry,
    solver_seconds: Histogram,
    projections_total: IntCounter,
    fallbacks_total: IntCounter,
    history: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl ProjectionMetrics {
    pub fn new(capacity: usize) -> EngineResult<Self> {
        let registry = Registry::new();

        let solver_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "projection_solver_seconds",
                "Wall time of one coherence projection",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let projections_total =
            IntCounter::new("projections_total", "Coherence projections performed")?;
        let fallbacks_total = IntCounter::new(
            "projection_fallbacks_total",
            "Projections that fell back to the unprojected aggregates",
        )?;

        registry.register(Box::new(solver_seconds.clone()))?;
        registry.register(Box::new(projections_total.clone()))?;
        registry.register(Box::new(fallbacks_total.clone()))?;

        let capacity = capacity.max(1);
        Ok(Self {
            registry,
            solver_seconds,
            projections_total,
            fallbacks_total,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    pub fn record(&self, elapsed: Duration, fell_back: bool) {
        self.solver_seconds.observe(elapsed.as_secs_f64());
        self.projections_total.inc();
        if fell_back {
            self.fallbacks_total.inc();
        }

        // History is observational; a poisoned lock still holds valid samples.
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(elapsed);
        if history.len() > self.capacity {
            history.pop_front();
        }
    }

    pub fn projections(&self) -> u64 {
        self.projections_total.get()
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks_total.get()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let mut sorted: Vec<f64> = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
        };
        if sorted.is_empty() {
            return LatencySnapshot::default();
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let percentile = |p: f64| {
            let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
            sorted[idx]
        };

        LatencySnapshot {
            samples: sorted.len(),
            average_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            max_ms: sorted[sorted.len() - 1],
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of the collectors.
    pub fn render(&self) -> EngineResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn log_report(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            "📈 Projection latency: samples={} avg={:.3}ms p50={:.3}ms p95={:.3}ms p99={:.3}ms max={:.3}ms fallbacks={}",
            snapshot.samples,
            snapshot.average_ms,
            snapshot.p50_ms,
            snapshot.p95_ms,
            snapshot.p99_ms,
            snapshot.max_ms,
            self.fallbacks()
        );
    }
}

impl std::fmt::Debug for ProjectionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionMetrics")
            .field("projections", &self.projections())
            .field("fallbacks", &self.fallbacks())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = ProjectionMetrics::new(10).unwrap();
        assert_eq!(metrics.snapshot(), LatencySnapshot::default());
        assert_eq!(metrics.projections(), 0);
    }

    #[test]
    fn test_record_and_percentiles() {
        let metrics = ProjectionMetrics::new(100).unwrap();
        for ms in 1..=20 {
            metrics.record(Duration::from_millis(ms), ms == 20);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples, 20);
        assert!((snapshot.average_ms - 10.5).abs() < 1e-9);
        assert!((snapshot.p50_ms - 11.0).abs() < 1e-9);
        assert!((snapshot.p95_ms - 20.0).abs() < 1e-9);
        assert_eq!(metrics.projections(), 20);
        assert_eq!(metrics.fallbacks(), 1);
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let metrics = ProjectionMetrics::new(3).unwrap();
        for ms in [100, 1, 2, 3] {
            metrics.record(Duration::from_millis(ms), false);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples, 3);
        assert!((snapshot.max_ms - 3.0).abs() < 1e-9);
        assert_eq!(metrics.projections(), 4);
    }

    #[test]
    fn test_render_exposes_collectors() {
        let metrics = ProjectionMetrics::new(3).unwrap();
        metrics.record(Duration::from_micros(800), false);
        let text = metrics.render().unwrap();
        assert!(text.contains("projection_solver_seconds"));
        assert!(text.contains("projections_total 1"));
    }
}
