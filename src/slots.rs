//! The slot clock: the bookable time grid and its wire/display formats.

use chrono::{NaiveTime, TimeDelta};

/// Ordered sequence of bookable times from `open` to `close` inclusive,
/// stepping by `step_minutes`. Drives both the booking form's choice list
/// and the allocator's forward search.
pub fn slot_times(open: NaiveTime, close: NaiveTime, step_minutes: u32) -> Vec<NaiveTime> {
    let step = TimeDelta::minutes(step_minutes as i64);
    let mut times = Vec::new();
    let mut current = open;
    while current <= close {
        times.push(current);
        match current.overflowing_add_signed(step) {
            (next, 0) => current = next,
            _ => break, // stepped past midnight
        }
    }
    times
}

/// Parse the wire representation `HH:MM`. Range checks against the
/// operating window happen downstream in the conflict detector, not here.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Wire representation `HH:MM`.
pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Display form shown to residents, e.g. `9:00 AM`. Round-trips through
/// [`parse_display`].
pub fn format_display(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

pub fn parse_display(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%I:%M %p").ok()
}

/// True when `time` sits exactly on the step grid anchored at `open`.
pub fn on_grid(time: NaiveTime, open: NaiveTime, step_minutes: u32) -> bool {
    if time < open {
        return false;
    }
    let elapsed = time.signed_duration_since(open).num_seconds();
    elapsed % (step_minutes as i64 * 60) == 0
}
