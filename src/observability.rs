use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotbook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotbook_request_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings admitted.
pub const BOOKINGS_CREATED: &str = "slotbook_bookings_created_total";

/// Counter: booking attempts refused. Labels: reason (error kind).
pub const BOOKINGS_REJECTED: &str = "slotbook_bookings_rejected_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED: &str = "slotbook_bookings_cancelled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Histogram: time spent waiting for a row write lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "slotbook_lock_wait_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the fmt subscriber at `level`.
pub fn init_tracing(level: tracing::Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Health => "health",
        Request::RegisterUser(_) => "register_user",
        Request::GetUser { .. } => "get_user",
        Request::CreateResource(_) => "create_resource",
        Request::UpdateResource { .. } => "update_resource",
        Request::DeleteResource { .. } => "delete_resource",
        Request::ListResources { .. } => "list_resources",
        Request::GetResource { .. } => "get_resource",
        Request::CreateTimeSlot { .. } => "create_time_slot",
        Request::SetTimeSlotAvailability { .. } => "set_time_slot_availability",
        Request::GetTimeSlot { .. } => "get_time_slot",
        Request::GetAvailability { .. } => "get_availability",
        Request::CreateBooking { .. } => "create_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::CheckConflicts { .. } => "check_conflicts",
        Request::ListUserBookings { .. } => "list_user_bookings",
        Request::GetBooking { .. } => "get_booking",
    }
}
