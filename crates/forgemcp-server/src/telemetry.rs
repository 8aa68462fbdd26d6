//! Metrics and tracing bridge.
//!
//! Counters, histograms and gauges are recorded through the `metrics`
//! facade and rendered as Prometheus text exposition 0.0.4 for
//! `GET /metrics`. The recorder is installed once per process; the render
//! handle lives on the server instance, not in a global.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install (once) and return the Prometheus render handle.
///
/// If another recorder was installed first — e.g. the embedding
/// application brought its own — a detached handle is returned so
/// `/metrics` still renders, just without this process's counters.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            describe_metrics();
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

fn describe_metrics() {
    describe_counter!("mcp_requests_total", "Total JSON-RPC requests processed");
    describe_histogram!(
        "mcp_request_duration_seconds",
        "JSON-RPC request processing time in seconds"
    );
    describe_counter!("mcp_tool_calls_total", "Total tool invocations");
    describe_histogram!(
        "mcp_tool_duration_seconds",
        "Tool handler execution time in seconds"
    );
    describe_counter!("mcp_rate_limited_total", "Requests refused by a rate limiter");
    describe_counter!("mcp_auth_events_total", "Auth verify/reject/cache events");
    describe_counter!("mcp_sessions_expired_total", "Sessions removed by the reaper");
    describe_gauge!("mcp_sessions_active", "Currently tracked sessions");
    describe_gauge!("mcp_sse_clients_active", "Currently connected SSE clients");
    describe_gauge!("mcp_requests_in_flight", "Requests holding a backpressure slot");
}

/// Record a processed JSON-RPC request.
pub fn record_request(method: &str, status: &str, duration_seconds: f64) {
    counter!(
        "mcp_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mcp_request_duration_seconds", "method" => method.to_string())
        .record(duration_seconds);
}

/// Record a tool invocation.
pub fn record_tool_call(tool: &str, success: bool, duration_seconds: f64) {
    let status = if success { "success" } else { "error" };
    counter!(
        "mcp_tool_calls_total",
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mcp_tool_duration_seconds", "tool" => tool.to_string())
        .record(duration_seconds);
}

/// Record a rate-limit refusal. `scope` is `"tool"`, `"ip"` or `"initialize"`.
pub fn record_rate_limited(scope: &str) {
    counter!("mcp_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

/// Record an auth event: `"verify"`, `"reject"` or `"cache_hit"`.
pub fn record_auth_event(event: &str) {
    counter!("mcp_auth_events_total", "event" => event.to_string()).increment(1);
}

/// Record sessions removed by the reaper.
pub fn record_sessions_expired(count: usize) {
    counter!("mcp_sessions_expired_total").increment(count as u64);
}

/// Update the active-session gauge.
pub fn set_sessions_active(count: usize) {
    gauge!("mcp_sessions_active").set(count as f64);
}

/// Update the connected-SSE-clients gauge.
pub fn set_sse_clients_active(count: usize) {
    gauge!("mcp_sse_clients_active").set(count as f64);
}

/// Update the in-flight-request gauge.
pub fn set_requests_in_flight(count: usize) {
    gauge!("mcp_requests_in_flight").set(count as f64);
}

/// Initialize the tracing subscriber from `RUST_LOG`, defaulting to `info`.
/// For binaries; the library never installs a subscriber on its own.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
