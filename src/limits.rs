//! Hard input-size guards. Tunable scheduling knobs live in
//! [`crate::model::SchedulePolicy`]; these are fixed ceilings on what the
//! engine will accept at all.

pub const MAX_PURPOSE_LEN: usize = 200;
pub const MAX_REASON_LEN: usize = 200;
pub const MAX_RESIDENT_REF_LEN: usize = 64;

/// Upper bound on records a single date will hold, independent of the
/// per-window capacity ceiling.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 512;

/// Hard cap on the nearest-slot search horizon.
pub const MAX_HORIZON_DAYS: u32 = 60;
