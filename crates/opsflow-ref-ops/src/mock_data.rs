//! Mock monitoring data for the reference scenarios.
//!
//! Everything here is fictional and hardcoded: one production region, a
//! three-tier service chain (web → api → database) and canned log lines per
//! incident category. No external API calls are made.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use opsflow_contracts::incident::{Alert, Severity};

// ── Environment ───────────────────────────────────────────────────────────────

/// Deployment facts every oracle may consult.
pub fn environment() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("environment".to_string(), json!("production")),
        ("region".to_string(), json!("us-east-1")),
        ("topology".to_string(), topology()),
    ])
}

/// The service dependency chain.
pub fn topology() -> Value {
    json!({
        "web": { "depends_on": ["api"], "hosts": ["web-1", "web-2"] },
        "api": { "depends_on": ["database"], "hosts": ["api-1", "api-2", "api-3"] },
        "database": { "depends_on": [], "hosts": ["db-primary", "db-replica"] }
    })
}

/// Which service a host belongs to, by name prefix.
pub fn service_of(host: &str) -> &'static str {
    if host.starts_with("web") {
        "web"
    } else if host.starts_with("db") {
        "database"
    } else {
        "api"
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Baseline host metrics, as fractions of capacity.
///
/// `api-2` is the unhealthy host in every scenario.
pub fn host_metrics(host: &str) -> BTreeMap<String, f64> {
    let (cpu, memory) = match host {
        "api-2" => (0.95, 0.93),
        _ => (0.75, 0.60),
    };
    BTreeMap::from([
        ("cpu_usage".to_string(), cpu),
        ("memory_usage".to_string(), memory),
        ("disk_usage".to_string(), 0.42),
    ])
}

// ── Logs ──────────────────────────────────────────────────────────────────────

/// Recent log lines for an incident category.
pub fn recent_logs(category: &str) -> Vec<String> {
    let lines: &[&str] = match category {
        "performance" => &[
            "api-2 worker[4411]: request /checkout exceeded 5000ms",
            "api-2 worker[4411]: thread pool saturated (64/64 busy)",
            "web-1 nginx: upstream api timed out while reading response header",
        ],
        "resource" => &[
            "api-2 kernel: Out of memory: Killed process 4411 (api-worker)",
            "api-2 api-worker: heap usage 7.4GiB after 36h uptime",
            "api-2 systemd: api-worker.service: Main process exited, code=killed",
        ],
        "storage" => &[
            "db-primary postgres: could not write to file pg_wal: No space left on device",
            "db-primary logrotate: skipped /var/log/app/*.log (in use)",
        ],
        "application" => &[
            "api-1 api: 500 Internal Server Error on POST /orders",
            "api-3 api: NullReferenceError in OrderService.submit (release 2.3.0)",
        ],
        _ => &["no recent anomalies in aggregated logs"],
    };
    lines.iter().map(|l| l.to_string()).collect()
}

// ── Alerts ────────────────────────────────────────────────────────────────────

/// A critical CPU alert on `api-2`.
pub fn cpu_alert() -> Alert {
    Alert::new(Severity::Critical, "CPU 95% on api-2")
        .with_source("prometheus")
        .with_metric("cpu_usage", host_metrics("api-2")["cpu_usage"])
        .with_tag("host:api-2")
}

/// A high memory alert on `api-2` with OOM kills.
pub fn memory_alert() -> Alert {
    Alert::new(Severity::High, "Memory usage 93% on api-2, OOM kills observed")
        .with_source("prometheus")
        .with_metric("memory_usage", host_metrics("api-2")["memory_usage"])
        .with_tag("host:api-2")
}
