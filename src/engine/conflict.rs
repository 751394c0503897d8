use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use ulid::Ulid;

use crate::model::{DaySchedule, SchedulePolicy};
use crate::slots;

use super::EngineError;

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Reject slots the booking form would never offer: today/past dates,
/// times outside the operating window, off-grid times. Runs before any
/// conflict check or persistence attempt.
pub(crate) fn validate_slot(
    date: NaiveDate,
    time: NaiveTime,
    today: NaiveDate,
    policy: &SchedulePolicy,
) -> Result<(), EngineError> {
    if date <= today {
        return Err(EngineError::DateNotBookable(date));
    }
    if time < policy.open || time > policy.close {
        return Err(EngineError::TimeOutsideWindow(time));
    }
    if !slots::on_grid(time, policy.open, policy.step_minutes) {
        return Err(EngineError::TimeOffGrid(time));
    }
    Ok(())
}

/// Symmetric buffered window around `time`, clamped to the operating
/// window. Clamping keeps the count on the candidate's own date: the
/// window never reaches below open time or past close time, and it cannot
/// leak across midnight into a neighboring date's capacity.
pub fn buffered_window(
    date: NaiveDate,
    time: NaiveTime,
    policy: &SchedulePolicy,
) -> (NaiveTime, NaiveTime) {
    let buffer = TimeDelta::minutes(policy.buffer_minutes as i64);
    let center = date.and_time(time);
    let start = center - buffer;
    let end = center + buffer;

    let start_time = if start.date() < date || start.time() < policy.open {
        policy.open
    } else {
        start.time()
    };
    let end_time = if end.date() > date || end.time() > policy.close {
        policy.close
    } else {
        end.time()
    };
    (start_time, end_time)
}

/// Count non-cancelled appointments on the day whose time falls inside the
/// buffered window, excluding `exclude` (a record being rescheduled does
/// not conflict with itself).
pub fn window_count(
    day: &DaySchedule,
    window: (NaiveTime, NaiveTime),
    exclude: Option<Ulid>,
) -> usize {
    day.in_window(window.0, window.1)
        .filter(|a| a.status.counts_toward_capacity())
        .filter(|a| exclude != Some(a.id))
        .count()
}

/// ADMIT/REJECT decision for a candidate slot. Callers must hold the day's
/// write lock across this check and the subsequent insert.
pub(crate) fn check_capacity(
    day: &DaySchedule,
    time: NaiveTime,
    policy: &SchedulePolicy,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let window = buffered_window(day.date, time, policy);
    if window_count(day, window, exclude) >= policy.window_capacity {
        metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
        return Err(EngineError::CapacityExceeded(policy.window_capacity));
    }
    Ok(())
}
