//! Deterministic metric extraction from a request monitor summary.
//!
//! Metrics are never produced by a model. Both output forms are emitted in
//! one fixed order (duration, cpu, memory, gpu, samples, violations, then
//! the peaks) so two extractions of the same summary are byte-identical.

use serde::{Deserialize, Serialize};

use helm_sensors::MonitorSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Metric {
    fn new(name: &str, value: f64, unit: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.map(str::to_string),
        }
    }
}

/// Extract the metric strings and typed metrics from a summary.
pub fn extract_metrics_from_summary(
    summary: Option<&MonitorSummary>,
) -> (Vec<String>, Vec<Metric>) {
    let Some(summary) = summary else {
        return (Vec::new(), Vec::new());
    };

    let mut strings = Vec::new();
    let mut metrics = Vec::new();

    strings.push(format!("duration: {:.1}s", summary.duration_seconds));
    metrics.push(Metric::new("duration_seconds", summary.duration_seconds, Some("s")));

    if let Some(cpu) = summary.cpu_avg {
        strings.push(format!("cpu: {cpu:.1}%"));
        metrics.push(Metric::new("cpu_avg", cpu, Some("%")));
    }
    if let Some(memory) = summary.memory_avg {
        strings.push(format!("memory: {memory:.1}%"));
        metrics.push(Metric::new("memory_avg", memory, Some("%")));
    }
    if let Some(gpu) = summary.gpu_avg {
        strings.push(format!("gpu: {gpu:.1}%"));
        metrics.push(Metric::new("gpu_avg", gpu, Some("%")));
    }

    strings.push(format!("samples: {}", summary.samples_collected));
    metrics.push(Metric::new("samples_collected", summary.samples_collected as f64, None));

    strings.push(format!("violations: {}", summary.threshold_violations.len()));
    metrics.push(Metric::new(
        "threshold_violations",
        summary.threshold_violations.len() as f64,
        None,
    ));

    if let Some(cpu_max) = summary.cpu_max {
        strings.push(format!("cpu_peak: {cpu_max:.1}%"));
        metrics.push(Metric::new("cpu_peak", cpu_max, Some("%")));
    }
    if let Some(memory_max) = summary.memory_max {
        strings.push(format!("memory_peak: {memory_max:.1}%"));
        metrics.push(Metric::new("memory_peak", memory_max, Some("%")));
    }
    if let Some(gpu_max) = summary.gpu_max {
        strings.push(format!("gpu_peak: {gpu_max:.1}%"));
        metrics.push(Metric::new("gpu_peak", gpu_max, Some("%")));
    }

    (strings, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> MonitorSummary {
        MonitorSummary {
            duration_seconds: 2.5,
            samples_collected: 3,
            threshold_violations: vec!["CPU high: 87.0% (ALERT threshold)".into()],
            cpu_min: Some(8.0),
            cpu_max: Some(12.0),
            cpu_avg: Some(9.3),
            memory_min: Some(58.0),
            memory_max: Some(61.0),
            memory_avg: Some(60.1),
            gpu_min: None,
            gpu_max: None,
            gpu_avg: None,
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let summary = summary();
        let first = extract_metrics_from_summary(Some(&summary));
        let second = extract_metrics_from_summary(Some(&summary));
        assert_eq!(first, second);
    }

    #[test]
    fn fixed_order_duration_first_peaks_last() {
        let (strings, metrics) = extract_metrics_from_summary(Some(&summary()));
        assert_eq!(
            strings,
            vec![
                "duration: 2.5s",
                "cpu: 9.3%",
                "memory: 60.1%",
                "samples: 3",
                "violations: 1",
                "cpu_peak: 12.0%",
                "memory_peak: 61.0%",
            ]
        );
        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "duration_seconds",
                "cpu_avg",
                "memory_avg",
                "samples_collected",
                "threshold_violations",
                "cpu_peak",
                "memory_peak",
            ]
        );
    }

    #[test]
    fn gpu_appears_between_memory_and_samples_when_present() {
        let mut with_gpu = summary();
        with_gpu.gpu_avg = Some(15.0);
        with_gpu.gpu_max = Some(20.0);
        let (strings, _) = extract_metrics_from_summary(Some(&with_gpu));
        assert_eq!(strings[3], "gpu: 15.0%");
        assert_eq!(*strings.last().unwrap(), "gpu_peak: 20.0%");
    }

    #[test]
    fn none_summary_extracts_nothing() {
        let (strings, metrics) = extract_metrics_from_summary(None);
        assert!(strings.is_empty());
        assert!(metrics.is_empty());
    }

    #[test]
    fn units_are_attached() {
        let (_, metrics) = extract_metrics_from_summary(Some(&summary()));
        assert_eq!(metrics[0].unit.as_deref(), Some("s"));
        assert_eq!(metrics[1].unit.as_deref(), Some("%"));
        let samples = metrics.iter().find(|m| m.name == "samples_collected").unwrap();
        assert!(samples.unit.is_none());
    }
}
