use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: intent, status.
pub const REQUESTS_TOTAL: &str = "hostel_requests_total";

/// Histogram: request latency in seconds. Labels: intent.
pub const REQUEST_DURATION_SECONDS: &str = "hostel_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hostel_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hostel_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hostel_connections_rejected_total";

/// Counter: transactions re-run after an optimistic conflict. Labels: op.
pub const TX_RETRIES_TOTAL: &str = "hostel_tx_retries_total";

/// Counter: transactions that gave up after the last attempt. Labels: op.
pub const TX_EXHAUSTED_TOTAL: &str = "hostel_tx_exhausted_total";

/// Histogram: WAL append + fsync duration per commit, in seconds.
pub const WAL_COMMIT_DURATION_SECONDS: &str = "hostel_wal_commit_duration_seconds";

/// Counter: WAL compactions run.
pub const WAL_COMPACTIONS_TOTAL: &str = "hostel_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
