use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Preferred date is today or in the past.
    DateNotBookable(NaiveDate),
    /// Preferred time outside the operating window.
    TimeOutsideWindow(NaiveTime),
    /// Preferred time does not sit on the booking grid.
    TimeOffGrid(NaiveTime),
    /// Wire time value that does not parse as `HH:MM`.
    UnparsableTime(String),
    /// "Other" purpose selected without a detail.
    MissingPurposeDetail,
    /// The buffered window already holds the maximum number of bookings.
    CapacityExceeded(usize),
    /// Staff action not permitted from the record's current status.
    InvalidTransition {
        id: Ulid,
        status: AppointmentStatus,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    LedgerError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::DateNotBookable(date) => {
                write!(f, "cannot book a date today or in the past: {date}")
            }
            EngineError::TimeOutsideWindow(time) => {
                write!(f, "time {time} is outside the operating window")
            }
            EngineError::TimeOffGrid(time) => {
                write!(f, "time {time} is not on the booking grid")
            }
            EngineError::UnparsableTime(raw) => {
                write!(f, "unparsable time (expected HH:MM): {raw}")
            }
            EngineError::MissingPurposeDetail => {
                write!(f, "purpose detail required when selecting other")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: interval already fully booked")
            }
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} appointment {id} while {status}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::LedgerError(e) => write!(f, "ledger error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
