use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── Allocation ──────────────────────────────────────────────────

/// Counter: finished allocation requests. Labels: outcome.
pub const ALLOCATIONS_TOTAL: &str = "seatd_allocations_total";

/// Counter: query/select/commit rounds started, across all requests.
pub const ALLOCATION_ATTEMPTS_TOTAL: &str = "seatd_allocation_attempts_total";

/// Counter: conditional inserts lost to a concurrent writer.
pub const COMMIT_CONFLICTS_TOTAL: &str = "seatd_commit_conflicts_total";

/// Counter: cancel calls. Labels: found.
pub const CANCELLATIONS_TOTAL: &str = "seatd_cancellations_total";

// ── Queries ─────────────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "seatd_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "seatd_query_duration_seconds";

// ── Connections ─────────────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "seatd_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatd_connections_total";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatd_connections_rejected_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatd_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. Does nothing without a port.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Reserve { .. } => "reserve",
        Command::Cancel { .. } => "cancel",
        Command::SelectReservations => "select_reservations",
        Command::SelectFreeTables { .. } => "select_free_tables",
        Command::SelectTables => "select_tables",
    }
}
