use chrono::{Days, NaiveDate, NaiveTime, TimeDelta};
use ulid::Ulid;

use crate::limits::MAX_HORIZON_DAYS;
use crate::model::*;
use crate::observability;
use crate::slots;

use super::conflict::{buffered_window, window_count};
use super::{Engine, SharedDaySchedule};

impl Engine {
    pub async fn get(&self, id: &Ulid) -> Option<Appointment> {
        let date = self.appointment_dates.get(id).map(|e| *e.value())?;
        let day = self.get_day(&date)?;
        let guard = day.read().await;
        guard.get(*id).cloned()
    }

    /// A resident's appointments, newest slot first.
    pub async fn list_for_resident(&self, resident_ref: &str) -> Vec<Appointment> {
        let mut out = Vec::new();
        for day in self.day_partitions() {
            let guard = day.read().await;
            out.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.resident_ref == resident_ref)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.scheduled_at().cmp(&a.scheduled_at()));
        out
    }

    /// Appointments in a given status, soonest slot first. Staff worklists
    /// (pending review, approved pickups, cancellations) all read this.
    pub async fn list_by_status(&self, status: AppointmentStatus) -> Vec<Appointment> {
        let mut out = Vec::new();
        for day in self.day_partitions() {
            let guard = day.read().await;
            out.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.status == status)
                    .cloned(),
            );
        }
        out.sort_by_key(|a| a.scheduled_at());
        out
    }

    /// Every appointment on a date, in time order.
    pub async fn appointments_on(&self, date: NaiveDate) -> Vec<Appointment> {
        match self.get_day(&date) {
            Some(day) => day.read().await.appointments.clone(),
            None => Vec::new(),
        }
    }

    /// Occupancy of every grid slot on `date`: non-cancelled bookings
    /// inside each slot's buffered window and how many more it can admit.
    /// Drives the booking form's availability display.
    pub async fn slot_occupancy(&self, date: NaiveDate) -> Vec<SlotOccupancy> {
        let times = slots::slot_times(self.policy.open, self.policy.close, self.policy.step_minutes);
        let day = self.get_day(&date);
        let guard = match &day {
            Some(d) => Some(d.read().await),
            None => None,
        };
        times
            .into_iter()
            .map(|time| {
                let booked = match &guard {
                    Some(g) => window_count(g, buffered_window(date, time, &self.policy), None),
                    None => 0,
                };
                SlotOccupancy {
                    time,
                    booked,
                    remaining: self.policy.window_capacity.saturating_sub(booked),
                }
            })
            .collect()
    }

    /// Forward scan for the nearest admissible slot. Day 0 starts strictly
    /// after the preferred time (never recommending the slot that just
    /// failed); every later day starts at the open time. Stops at the
    /// first hit. `None` means every slot inside the horizon is saturated —
    /// a valid outcome, not an error.
    pub async fn find_nearest_available(
        &self,
        preferred_date: NaiveDate,
        preferred_time: NaiveTime,
    ) -> Option<Slot> {
        metrics::counter!(observability::NEAREST_SLOT_SCANS_TOTAL).increment(1);
        let step = TimeDelta::minutes(self.policy.step_minutes as i64);
        let horizon = self.policy.horizon_days.min(MAX_HORIZON_DAYS);

        for day_offset in 0..=horizon {
            let date = preferred_date + Days::new(day_offset as u64);
            let mut candidate = if day_offset == 0 {
                match preferred_time.overflowing_add_signed(step) {
                    (next, 0) => next.max(self.policy.open),
                    _ => continue, // preferred time at the end of the day
                }
            } else {
                self.policy.open
            };

            let day = self.get_day(&date);
            let guard = match &day {
                Some(d) => Some(d.read().await),
                None => None,
            };
            while candidate <= self.policy.close {
                let admissible = match &guard {
                    Some(g) => {
                        window_count(g, buffered_window(date, candidate, &self.policy), None)
                            < self.policy.window_capacity
                    }
                    None => true, // nothing booked on this date yet
                };
                if admissible {
                    return Some(Slot {
                        date,
                        time: candidate,
                    });
                }
                match candidate.overflowing_add_signed(step) {
                    (next, 0) => candidate = next,
                    _ => break,
                }
            }
        }
        None
    }

    fn day_partitions(&self) -> Vec<SharedDaySchedule> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }
}
