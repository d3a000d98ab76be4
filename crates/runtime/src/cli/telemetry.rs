//! `helmsman telemetry`: query and trace reconstruction over the local
//! JSONL event log, plus aggregate reports from the search index.

use serde_json::Value;

use helm_domain::config::Settings;
use helm_telemetry::analytics;
use helm_telemetry::{EventQuery, HttpSearchIndex, TelemetryReader};

pub fn query(
    settings: &Settings,
    event: Option<String>,
    component: Option<String>,
    window: Option<String>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let reader = TelemetryReader::new(settings.log_dir());
    let entries = reader.query_events(&EventQuery {
        event,
        component,
        window,
        limit: Some(limit),
    })?;

    if json {
        for entry in &entries {
            println!("{entry}");
        }
        return Ok(());
    }

    println!(
        "{:<27} {:<8} {:<16} {}",
        "timestamp", "level", "component", "event"
    );
    println!("{}", "-".repeat(78));
    for entry in &entries {
        println!(
            "{:<27} {:<8} {:<16} {}",
            field(entry, "timestamp"),
            field(entry, "level"),
            field(entry, "component"),
            field(entry, "event"),
        );
    }
    eprintln!("({} events)", entries.len());
    Ok(())
}

pub fn trace(settings: &Settings, trace_id: &str) -> anyhow::Result<()> {
    let reader = TelemetryReader::new(settings.log_dir());
    let entries = reader.trace_events(trace_id);
    if entries.is_empty() {
        anyhow::bail!("no events found for trace {trace_id}");
    }

    println!("Timeline for trace {trace_id}:");
    for entry in &entries {
        let mut line = format!(
            "  {} [{}] {}",
            field(entry, "timestamp"),
            field(entry, "component"),
            field(entry, "event"),
        );
        for key in ["from", "to", "tool_name", "role", "error"] {
            let value = field(entry, key);
            if !value.is_empty() {
                line.push_str(&format!(" {key}={value}"));
            }
        }
        println!("{line}");
    }

    let breakdown = reader.latency_breakdown(trace_id);
    if !breakdown.is_empty() {
        println!("\nLatency breakdown:");
        for phase in &breakdown {
            match phase.duration_ms {
                Some(ms) => println!("  {:<24} {ms:>10.1} ms", phase.phase),
                None => println!("  {:<24} (in progress)", phase.phase),
            }
        }
    }
    Ok(())
}

/// Run the canned aggregation bodies against the daily log indices and
/// print the three report sections.
pub async fn report(settings: &Settings, window: &str, json: bool) -> anyhow::Result<()> {
    let Some(url) = &settings.telemetry.index_url else {
        anyhow::bail!("no search index configured (set AGENT_INDEX_URL)");
    };
    let index = HttpSearchIndex::new(url.clone())?;
    let pattern = format!("{}-*", settings.telemetry.log_index_prefix);

    let latency = index
        .search(&pattern, &analytics::model_latency_body(window))
        .await?;
    let failures = index
        .search(&pattern, &analytics::tool_failures_body(window))
        .await?;
    let volume = index
        .search(&pattern, &analytics::event_volume_body(window))
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "window": window,
                "model_latency": latency.get("aggregations"),
                "tool_failures": failures.get("aggregations"),
                "event_volume": volume.get("aggregations"),
            })
        );
        return Ok(());
    }

    println!("Model latency by role (last {window}):");
    for bucket in buckets(&latency, "by_role") {
        let values = &bucket["latency"]["values"];
        println!(
            "  {:<12} calls={:<6} p50={} p90={} p99={}",
            field(bucket, "key"),
            bucket["doc_count"],
            percentile(values, "50.0"),
            percentile(values, "90.0"),
            percentile(values, "99.0"),
        );
    }

    println!("\nTool failures (last {window}):");
    let failure_buckets = buckets(&failures, "by_tool");
    if failure_buckets.is_empty() {
        println!("  none");
    }
    for bucket in failure_buckets {
        println!("  {:<20} {}", field(bucket, "key"), bucket["doc_count"]);
    }

    println!("\nEvent volume per day (last {window}):");
    for day in buckets(&volume, "per_day") {
        let top: Vec<String> = day["by_event"]["buckets"]
            .as_array()
            .map(|events| {
                events
                    .iter()
                    .take(3)
                    .map(|b| format!("{}={}", field(b, "key"), b["doc_count"]))
                    .collect()
            })
            .unwrap_or_default();
        println!(
            "  {:<12} {:<8} top: {}",
            field(day, "key_as_string"),
            day["doc_count"],
            top.join(", "),
        );
    }
    Ok(())
}

fn buckets<'a>(response: &'a Value, agg: &str) -> Vec<&'a Value> {
    response["aggregations"][agg]["buckets"]
        .as_array()
        .map(|buckets| buckets.iter().collect())
        .unwrap_or_default()
}

fn percentile(values: &Value, key: &str) -> String {
    match values.get(key).and_then(Value::as_f64) {
        Some(ms) => format!("{ms:.0}ms"),
        None => "-".into(),
    }
}

fn field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}
