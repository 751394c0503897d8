use chrono::NaiveDateTime;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::slots;

use super::conflict::{check_capacity, now, today, validate_slot};
use super::{Engine, EngineError, apply_reschedule};

/// Resolve the purpose choice into the stored free-text value. "Other"
/// requires the specify detail.
fn resolve_purpose(purpose: Purpose, specify: Option<&str>) -> Result<String, EngineError> {
    let text = match purpose {
        Purpose::Employment => "Employment".to_string(),
        Purpose::BusinessPermit => "Business Permit".to_string(),
        Purpose::GovernmentBenefits => "Government Benefits".to_string(),
        Purpose::Other => {
            let detail = specify.map(str::trim).unwrap_or_default();
            if detail.is_empty() {
                return Err(EngineError::MissingPurposeDetail);
            }
            detail.to_string()
        }
    };
    if text.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(text)
}

impl Engine {
    /// Validate a booking request and commit it under the date's write
    /// lock. The conflict count and the insert happen inside that lock, so
    /// two concurrent bookers for one window cannot both observe a free
    /// seat — the loser sees `CapacityExceeded`, never a silent overwrite.
    pub async fn book(&self, request: &BookingRequest) -> Result<Appointment, EngineError> {
        if request.resident_ref.is_empty() || request.resident_ref.len() > MAX_RESIDENT_REF_LEN {
            return Err(EngineError::LimitExceeded("resident ref length"));
        }
        let time = slots::parse_hhmm(&request.preferred_time)
            .ok_or_else(|| EngineError::UnparsableTime(request.preferred_time.clone()))?;
        validate_slot(request.preferred_date, time, today(), &self.policy)?;
        let purpose = resolve_purpose(request.purpose, request.specify_purpose.as_deref())?;

        let day = self.day(request.preferred_date);
        let mut guard = day.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this date"));
        }
        check_capacity(&guard, time, &self.policy, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            resident_ref: request.resident_ref.clone(),
            certificate_type: request.certificate_type,
            preferred_date: request.preferred_date,
            preferred_time: time,
            purpose,
            status: if self.policy.auto_approve {
                AppointmentStatus::Approved
            } else {
                AppointmentStatus::Pending
            },
            cancellation_reason: None,
            reschedule_reason: None,
            rescheduled_at: None,
            created_at: now(),
        };
        let event = Event::Booked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        info!(
            "booked {} for {} on {} {}",
            appointment.id,
            appointment.resident_ref,
            appointment.preferred_date,
            slots::format_hhmm(appointment.preferred_time)
        );
        Ok(appointment)
    }

    /// Staff approval: pending → approved.
    pub async fn approve(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Pending, "approve", |id| {
            Event::Approved { id }
        })
        .await
    }

    /// Certificate handed over at the counter: approved → claimed.
    pub async fn claim(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Approved, "claim", |id| {
            Event::Claimed { id }
        })
        .await
    }

    /// Resident confirmed receipt: claimed → completed.
    pub async fn complete(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Claimed, "complete", |id| {
            Event::Completed { id }
        })
        .await
    }

    async fn transition(
        &self,
        id: Ulid,
        expected: AppointmentStatus,
        action: &'static str,
        event: fn(Ulid) -> Event,
    ) -> Result<Appointment, EngineError> {
        let (_date, mut guard) = self.resolve_appointment_write(&id).await?;
        let status = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
        if status != expected {
            return Err(EngineError::InvalidTransition { id, status, action });
        }
        self.persist_and_apply(&mut guard, &event(id)).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Cancel a pending or approved appointment, stamping the reason.
    /// Cancelled records stop counting toward window capacity immediately.
    pub async fn cancel(&self, id: Ulid, reason: &str) -> Result<Appointment, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let (_date, mut guard) = self.resolve_appointment_write(&id).await?;
        let status = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
        if !status.is_open() {
            return Err(EngineError::InvalidTransition {
                id,
                status,
                action: "cancel",
            });
        }
        let event = Event::Cancelled {
            id,
            reason: reason.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("cancelled {id}: {reason}");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Move a pending/approved appointment to a new slot. The new slot is
    /// conflict-checked with the appointment itself excluded from its own
    /// window count; audit fields are stamped and the record mutates in
    /// place rather than being recreated. Cross-date moves take both day
    /// locks in date order so concurrent reschedules cannot deadlock.
    pub async fn reschedule(&self, request: &RescheduleRequest) -> Result<Appointment, EngineError> {
        if request.reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reschedule reason too long"));
        }
        let new_time = slots::parse_hhmm(&request.new_time)
            .ok_or_else(|| EngineError::UnparsableTime(request.new_time.clone()))?;
        validate_slot(request.new_date, new_time, today(), &self.policy)?;

        let id = request.appointment_id;
        let old_date = self
            .appointment_dates
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;

        if old_date == request.new_date {
            let day = self.get_day(&old_date).ok_or(EngineError::NotFound(id))?;
            let mut guard = day.write().await;
            let status = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
            if !status.is_open() {
                return Err(EngineError::InvalidTransition {
                    id,
                    status,
                    action: "reschedule",
                });
            }
            check_capacity(&guard, new_time, &self.policy, Some(id))?;

            let at = now();
            let event = Event::Rescheduled {
                id,
                date: request.new_date,
                time: new_time,
                reason: request.reason.clone(),
                at,
            };
            self.ledger_append(&event).await?;
            metrics::counter!(
                observability::EVENTS_TOTAL,
                "kind" => observability::event_label(&event)
            )
            .increment(1);
            apply_reschedule(
                &mut guard,
                None,
                id,
                request.new_date,
                new_time,
                &request.reason,
                at,
                &self.appointment_dates,
            );
            self.notify.send(old_date, &event);
            guard.get(id).cloned().ok_or(EngineError::NotFound(id))
        } else {
            let source = self.get_day(&old_date).ok_or(EngineError::NotFound(id))?;
            let target = self.day(request.new_date);
            let (mut source_guard, mut target_guard) = if old_date < request.new_date {
                let s = source.write_owned().await;
                let t = target.write_owned().await;
                (s, t)
            } else {
                let t = target.write_owned().await;
                let s = source.write_owned().await;
                (s, t)
            };

            let status = source_guard.get(id).ok_or(EngineError::NotFound(id))?.status;
            if !status.is_open() {
                return Err(EngineError::InvalidTransition {
                    id,
                    status,
                    action: "reschedule",
                });
            }
            if target_guard.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many appointments on this date"));
            }
            check_capacity(&target_guard, new_time, &self.policy, Some(id))?;

            let at = now();
            let event = Event::Rescheduled {
                id,
                date: request.new_date,
                time: new_time,
                reason: request.reason.clone(),
                at,
            };
            self.ledger_append(&event).await?;
            metrics::counter!(
                observability::EVENTS_TOTAL,
                "kind" => observability::event_label(&event)
            )
            .increment(1);
            apply_reschedule(
                &mut source_guard,
                Some(&mut target_guard),
                id,
                request.new_date,
                new_time,
                &request.reason,
                at,
                &self.appointment_dates,
            );
            self.notify.send(old_date, &event);
            self.notify.send(request.new_date, &event);
            info!(
                "rescheduled {id} from {old_date} to {} {}",
                request.new_date,
                slots::format_hhmm(new_time)
            );
            target_guard.get(id).cloned().ok_or(EngineError::NotFound(id))
        }
    }

    /// Ids of pending/approved appointments whose slot has passed `now`.
    pub fn collect_past_due(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.days.iter() {
            let day = entry.value().clone();
            if let Ok(guard) = day.try_read() {
                for appointment in &guard.appointments {
                    if appointment.is_past_due(now) {
                        due.push(appointment.id);
                    }
                }
            }
        }
        due
    }

    /// Cancel one past-due appointment. The due check re-runs under the
    /// write lock, so a sweep racing staff actions (or a second sweep of
    /// the same set) is a no-op. Returns whether the record was cancelled.
    pub async fn expire(&self, id: Ulid, now: NaiveDateTime) -> Result<bool, EngineError> {
        let (_date, mut guard) = self.resolve_appointment_write(&id).await?;
        let appointment = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !appointment.is_past_due(now) {
            return Ok(false);
        }
        let event = Event::Expired { id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Run one expiry pass over every partition. Returns how many records
    /// were cancelled; a second pass with the same `now` returns 0.
    pub async fn sweep_past_due(&self, now: NaiveDateTime) -> usize {
        let mut cancelled = 0;
        for id in self.collect_past_due(now) {
            match self.expire(id, now).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => tracing::debug!("sweep skip {id}: {e}"),
            }
        }
        cancelled
    }
}
