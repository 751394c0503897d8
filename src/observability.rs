//! Metric names recorded by the engine. This crate is a library, so it
//! installs no exporter; without a recorder in the host application every
//! record is a no-op.

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: committed events. Labels: kind.
pub const EVENTS_TOTAL: &str = "turno_events_total";

/// Counter: bookings admitted.
pub const BOOKINGS_TOTAL: &str = "turno_bookings_total";

/// Counter: booking/reschedule attempts rejected by the capacity ceiling.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "turno_capacity_rejections_total";

/// Counter: nearest-slot searches run.
pub const NEAREST_SLOT_SCANS_TOTAL: &str = "turno_nearest_slot_scans_total";

/// Counter: past-due appointments cancelled by the sweep.
pub const EXPIRED_TOTAL: &str = "turno_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: ledger group-commit flush duration in seconds.
pub const LEDGER_FLUSH_DURATION_SECONDS: &str = "turno_ledger_flush_duration_seconds";

/// Histogram: ledger group-commit batch size (events per flush).
pub const LEDGER_FLUSH_BATCH_SIZE: &str = "turno_ledger_flush_batch_size";

/// Map an event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::Booked { .. } => "booked",
        Event::Approved { .. } => "approved",
        Event::Claimed { .. } => "claimed",
        Event::Completed { .. } => "completed",
        Event::Cancelled { .. } => "cancelled",
        Event::Rescheduled { .. } => "rescheduled",
        Event::Expired { .. } => "expired",
    }
}
