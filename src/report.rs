use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cost::Recommendation;
use crate::harness::BenchmarkSample;
use crate::models::DerivedScore;
use crate::strategy::ComplexityClass;

/// Per-strategy record handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub title: String,
    pub strategy_id: u8,
    pub scenario: String,
    pub refresh_latency_ms: Option<f64>,
    pub average_read_latency_ms: Option<f64>,
    pub complexity_class: ComplexityClass,
    pub sample_rows: Vec<DerivedScore>,
    pub error: Option<String>,
}

impl StrategyReport {
    pub fn from_sample(sample: &BenchmarkSample) -> Self {
        Self {
            title: sample.strategy.title().to_string(),
            strategy_id: sample.strategy.id(),
            scenario: sample.scenario.clone(),
            refresh_latency_ms: sample.refresh_latency_ms(),
            average_read_latency_ms: sample.average_read_latency_ms(),
            complexity_class: sample.strategy.complexity_class(),
            sample_rows: sample.sample_rows.clone(),
            error: sample.error.as_ref().map(|err| err.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub generated_at: DateTime<Utc>,
    pub strategies: Vec<StrategyReport>,
    pub recommendation: Option<Recommendation>,
}

impl BenchmarkReport {
    pub fn new(samples: &[BenchmarkSample], recommendation: Option<Recommendation>) -> Self {
        Self {
            generated_at: Utc::now(),
            strategies: samples.iter().map(StrategyReport::from_sample).collect(),
            recommendation,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Failed measurements read "N/A", never zero.
pub fn format_latency(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{ms:.2} ms"),
        None => "N/A".to_string(),
    }
}

pub fn build_report(report: &BenchmarkReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Risk Score Maintenance Benchmark");
    let _ = writeln!(
        output,
        "Generated {} across {} strategy runs",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.strategies.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Results");

    if report.strategies.is_empty() {
        let _ = writeln!(output, "No strategies were benchmarked.");
    }

    for strategy in &report.strategies {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "### {} ({}, scenario {})",
            strategy.title,
            strategy.complexity_class.as_str(),
            strategy.scenario
        );
        let _ = writeln!(
            output,
            "- Refresh latency: {}",
            format_latency(strategy.refresh_latency_ms)
        );
        let _ = writeln!(
            output,
            "- Avg read latency: {}",
            format_latency(strategy.average_read_latency_ms)
        );
        if let Some(error) = &strategy.error {
            let _ = writeln!(output, "- Error: {error}");
        }
        for row in &strategy.sample_rows {
            let _ = writeln!(
                output,
                "  - record {} ({}) score {:.3}",
                row.record_id, row.university, row.score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendation");

    match &report.recommendation {
        None => {
            let _ = writeln!(output, "No strategy produced a usable sample.");
        }
        Some(recommendation) => {
            let _ = writeln!(
                output,
                "Use {} for {} reads per definition window.",
                recommendation.strategy.title(),
                recommendation.reads_per_window
            );
            for estimate in &recommendation.estimates {
                let _ = writeln!(
                    output,
                    "- {}: total {:.2} ms (refresh {:.2} ms + read {:.3} ms each)",
                    estimate.strategy.title(),
                    estimate.total_ms,
                    estimate.refresh_ms,
                    estimate.read_ms
                );
            }
            for excluded in &recommendation.excluded {
                let _ = writeln!(
                    output,
                    "- {}: excluded ({})",
                    excluded.strategy.title(),
                    excluded.reason
                );
            }
        }
    }

    output
}
