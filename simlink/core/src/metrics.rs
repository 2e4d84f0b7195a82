//! Episode Metrics
//!
//! Simulations may attach a `metrics` object to each agent report (visited
//! regions, search scores, and so on). The session collects every non-null
//! value into a per-episode series keyed by metric name.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::messages::Response;

/// One metric observation
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSample {
    /// Agent that reported it
    pub agent: String,
    /// Zero-based step within the episode
    pub step: u64,
    /// Reported value
    pub value: Value,
}

/// Metric series accumulated over one episode
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EpisodeMetrics {
    steps: u64,
    series: BTreeMap<String, Vec<MetricSample>>,
}

impl EpisodeMetrics {
    /// Empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; called when a new episode starts
    pub fn clear(&mut self) {
        self.steps = 0;
        self.series.clear();
    }

    /// Record the metrics carried by one step response
    pub fn record(&mut self, response: &Response) {
        let step = self.steps;
        self.steps += 1;

        for report in &response.states_data {
            let Some(metrics) = &report.metrics else {
                continue;
            };
            for (key, value) in metrics {
                if value.is_null() {
                    continue;
                }
                self.series.entry(key.clone()).or_default().push(MetricSample {
                    agent: report.name.clone(),
                    step,
                    value: value.clone(),
                });
            }
        }
    }

    /// Number of step responses recorded this episode
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Whether no samples were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Metric names seen this episode, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// All samples of one metric, in arrival order
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[MetricSample]> {
        self.series.get(key).map(Vec::as_slice)
    }

    /// Most recent value of one metric
    #[must_use]
    pub fn latest(&self, key: &str) -> Option<&Value> {
        self.series.get(key).and_then(|s| s.last()).map(|s| &s.value)
    }

    /// Compact summary: sample count and latest value per metric
    #[must_use]
    pub fn summary(&self) -> Value {
        let metrics: serde_json::Map<String, Value> = self
            .series
            .iter()
            .map(|(key, samples)| {
                let latest = samples.last().map_or(Value::Null, |s| s.value.clone());
                (key.clone(), json!({"samples": samples.len(), "latest": latest}))
            })
            .collect();
        json!({"steps": self.steps, "metrics": metrics})
    }
}
