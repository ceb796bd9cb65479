//! Aggregated run statistics
//!
//! Computes latency percentiles and per-metric statistics over the
//! completed sessions of an environment run.

use std::collections::HashMap;

use serde::Serialize;

use crate::environment::Results;

/// Latency percentiles (p50, p90, p95, p99)
#[derive(Clone, Debug, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Read the standard latency quantiles off a sorted sample buffer
    pub fn of_sorted(sorted: &[f64]) -> Self {
        Self {
            p50: quantile(sorted, 0.50),
            p90: quantile(sorted, 0.90),
            p95: quantile(sorted, 0.95),
            p99: quantile(sorted, 0.99),
        }
    }
}

/// Quantile of a sorted buffer, interpolating between neighboring ranks
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let pos = q * (sorted.len() - 1) as f64;
            let below = pos as usize;
            let above = (below + 1).min(sorted.len() - 1);
            let weight = pos - below as f64;
            sorted[below] + (sorted[above] - sorted[below]) * weight
        }
    }
}

/// Statistics over one metric's samples
#[derive(Clone, Debug, Default, Serialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub percentiles: Percentiles,
    pub count: usize,
}

impl LatencyStats {
    /// Summarize a batch of samples (in milliseconds)
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let Some((&min, &max)) = sorted.first().zip(sorted.last()) else {
            return Self::default();
        };

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let spread = sorted.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / count as f64;

        Self {
            min,
            max,
            mean,
            std_dev: spread.sqrt(),
            percentiles: Percentiles::of_sorted(&sorted),
            count,
        }
    }

    /// One-line form for run logs
    pub fn format_summary(&self) -> String {
        format!(
            "{} samples, mean {:.2}ms (min {:.2} / max {:.2}), p95 {:.2}ms, p99 {:.2}ms",
            self.count, self.mean, self.min, self.max, self.percentiles.p95, self.percentiles.p99
        )
    }
}

/// Per-metric statistics across every completed session of a run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub environment: String,
    pub duration_ms: u64,
    pub sessions: usize,
    pub metrics: HashMap<String, LatencyStats>,
}

impl RunSummary {
    /// Aggregate the numeric metric samples of all sessions, keyed by metric
    ///
    /// Provenance tags are stripped, so merged and raw sessions aggregate
    /// the same way.
    pub fn from_results(results: &Results) -> Self {
        let mut samples: HashMap<String, Vec<f64>> = HashMap::new();

        for session in &results.sessions {
            for (key, values) in session.metrics() {
                let entry = samples.entry(key.to_string()).or_default();
                entry.extend(values.iter().filter_map(|v| v.as_f64()));
            }
        }

        let metrics = samples
            .into_iter()
            .map(|(key, samples)| (key, LatencyStats::from_samples(&samples)))
            .collect();

        Self {
            environment: results.environment.clone(),
            duration_ms: results.duration_ms,
            sessions: results.sessions.len(),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::session_named;
    use crate::value::{MetricKey, Value};

    #[test]
    fn test_percentiles() {
        let data: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let p = Percentiles::of_sorted(&data);

        assert!((p.p50 - 50.0).abs() < 1.0);
        assert!((p.p90 - 90.0).abs() < 1.0);
        assert!((p.p99 - 99.0).abs() < 1.0);
    }

    #[test]
    fn test_quantile_interpolates_between_ranks() {
        assert_eq!(quantile(&[10.0, 20.0], 0.5), 15.0);
        assert_eq!(quantile(&[7.0], 0.99), 7.0);
        assert_eq!(quantile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_latency_stats() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let stats = LatencyStats::from_samples(&samples);

        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.count, 5);
    }

    #[test]
    fn test_empty_samples() {
        let stats = LatencyStats::from_samples(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.percentiles.p99, 0.0);
    }

    #[tokio::test]
    async fn test_run_summary_strips_tags() {
        let mut a = session_named("a");
        let mut b = session_named("b");
        let key = MetricKey::Http {
            path: "/x".to_string(),
        };
        a.add_metric(key.clone(), Value::Float(10.0));
        b.add_metric(key.clone(), Value::Float(20.0));

        let results = Results {
            environment: "test".to_string(),
            start_ms: 0,
            end_ms: 100,
            duration_ms: 100,
            sessions: vec![a, b],
        };

        let summary = RunSummary::from_results(&results);
        let stats = summary.metrics.get("http /x").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 20.0);
    }
}
