use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Certificate kinds a resident can book an appointment for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    BarangayClearance,
    CertificateOfIndigency,
    CommunityTaxCertificate,
    SoloParentCertificate,
}

impl CertificateType {
    pub fn display_name(&self) -> &'static str {
        match self {
            CertificateType::BarangayClearance => "Barangay Clearance",
            CertificateType::CertificateOfIndigency => "Certificate of Indigency",
            CertificateType::CommunityTaxCertificate => "Community Tax Certificate",
            CertificateType::SoloParentCertificate => "Solo Parent Certificate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Claimed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Cancelled records never count toward window capacity.
    pub fn counts_toward_capacity(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    /// Pending and approved records are the only ones the expiry sweep may
    /// cancel and the only ones staff may cancel or reschedule.
    pub fn is_open(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Approved)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Approved => "approved",
            AppointmentStatus::Claimed => "claimed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Purpose choice offered by the booking form. `Other` carries its detail
/// in the request's `specify_purpose` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Employment,
    BusinessPermit,
    GovernmentBenefits,
    Other,
}

/// A bookable (date, time) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// One committed booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// Identifier of the requesting resident, owned by the accounts
    /// subsystem and opaque here.
    pub resident_ref: String,
    pub certificate_type: CertificateType,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    /// Resolved free-text purpose.
    pub purpose: String,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub reschedule_reason: Option<String>,
    pub rescheduled_at: Option<NaiveDateTime>,
    /// Set once at booking time.
    pub created_at: NaiveDateTime,
}

impl Appointment {
    pub fn slot(&self) -> Slot {
        Slot {
            date: self.preferred_date,
            time: self.preferred_time,
        }
    }

    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.preferred_date.and_time(self.preferred_time)
    }

    /// An open record whose slot has already passed.
    pub fn is_past_due(&self, now: NaiveDateTime) -> bool {
        self.status.is_open() && self.scheduled_at() < now
    }
}

/// Inbound booking request as submitted by the certification form.
/// `preferred_time` uses the wire format `HH:MM`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub resident_ref: String,
    pub certificate_type: CertificateType,
    pub preferred_date: NaiveDate,
    pub preferred_time: String,
    pub purpose: Purpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specify_purpose: Option<String>,
}

/// Staff request to move an open appointment to a new slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub appointment_id: Ulid,
    pub new_date: NaiveDate,
    pub new_time: String,
    pub reason: String,
}

/// Booking policy: the operating window, grid step, conflict buffer, the
/// per-window capacity ceiling, and the nearest-slot search horizon.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub step_minutes: u32,
    pub buffer_minutes: u32,
    /// Max non-cancelled bookings inside one buffered window.
    pub window_capacity: usize,
    pub horizon_days: u32,
    /// Commit resident bookings as approved instead of pending.
    pub auto_approve: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
            step_minutes: 30,
            buffer_minutes: 30,
            window_capacity: 5,
            horizon_days: 14,
            auto_approve: true,
        }
    }
}

/// All appointments sharing one calendar date, sorted by preferred time.
/// The engine wraps each `DaySchedule` in an async `RwLock`; holding the
/// write lock across the conflict count and the insert is what makes a
/// booking atomic.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub appointments: Vec<Appointment>,
}

impl DaySchedule {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by preferred time.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.preferred_time, |a| a.preferred_time)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        if let Some(pos) = self.appointments.iter().position(|a| a.id == id) {
            Some(self.appointments.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose time lies in `[start, end]`, both ends inclusive.
    /// Uses binary search to skip records outside the window.
    pub fn in_window(&self, start: NaiveTime, end: NaiveTime) -> impl Iterator<Item = &Appointment> {
        let lo = self
            .appointments
            .partition_point(|a| a.preferred_time < start);
        let hi = self
            .appointments
            .partition_point(|a| a.preferred_time <= end);
        self.appointments[lo..hi.max(lo)].iter()
    }
}

/// The event types — flat, no nesting. This is the ledger record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Booked {
        appointment: Appointment,
    },
    Approved {
        id: Ulid,
    },
    Claimed {
        id: Ulid,
    },
    Completed {
        id: Ulid,
    },
    Cancelled {
        id: Ulid,
        reason: String,
    },
    Rescheduled {
        id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        reason: String,
        at: NaiveDateTime,
    },
    Expired {
        id: Ulid,
    },
}

impl Event {
    pub fn appointment_id(&self) -> Ulid {
        match self {
            Event::Booked { appointment } => appointment.id,
            Event::Approved { id }
            | Event::Claimed { id }
            | Event::Completed { id }
            | Event::Cancelled { id, .. }
            | Event::Rescheduled { id, .. }
            | Event::Expired { id } => *id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Occupancy of one grid slot: non-cancelled bookings inside its buffered
/// window, and how many more it can admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotOccupancy {
    pub time: NaiveTime,
    pub booked: usize,
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn appointment(time: NaiveTime, status: AppointmentStatus) -> Appointment {
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        Appointment {
            id: Ulid::new(),
            resident_ref: "res-1".into(),
            certificate_type: CertificateType::BarangayClearance,
            preferred_date: date,
            preferred_time: time,
            purpose: "Employment".into(),
            status,
            cancellation_reason: None,
            reschedule_reason: None,
            rescheduled_at: None,
            created_at: date.and_time(t(8, 0)),
        }
    }

    #[test]
    fn day_schedule_keeps_time_order() {
        let mut day = DaySchedule::new(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        day.insert(appointment(t(14, 0), AppointmentStatus::Pending));
        day.insert(appointment(t(9, 0), AppointmentStatus::Pending));
        day.insert(appointment(t(10, 30), AppointmentStatus::Pending));
        let times: Vec<_> = day.appointments.iter().map(|a| a.preferred_time).collect();
        assert_eq!(times, vec![t(9, 0), t(10, 30), t(14, 0)]);
    }

    #[test]
    fn day_schedule_remove_preserves_order() {
        let mut day = DaySchedule::new(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        let a = appointment(t(9, 0), AppointmentStatus::Pending);
        let b = appointment(t(10, 0), AppointmentStatus::Pending);
        let c = appointment(t(11, 0), AppointmentStatus::Pending);
        let b_id = b.id;
        day.insert(a);
        day.insert(b);
        day.insert(c);
        assert!(day.remove(b_id).is_some());
        assert!(day.remove(b_id).is_none());
        let times: Vec<_> = day.appointments.iter().map(|a| a.preferred_time).collect();
        assert_eq!(times, vec![t(9, 0), t(11, 0)]);
    }

    #[test]
    fn in_window_is_inclusive_on_both_ends() {
        let mut day = DaySchedule::new(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        day.insert(appointment(t(9, 30), AppointmentStatus::Pending));
        day.insert(appointment(t(10, 0), AppointmentStatus::Pending));
        day.insert(appointment(t(10, 30), AppointmentStatus::Pending));
        day.insert(appointment(t(11, 0), AppointmentStatus::Pending));

        let hits: Vec<_> = day.in_window(t(9, 30), t(10, 30)).collect();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].preferred_time, t(9, 30));
        assert_eq!(hits[2].preferred_time, t(10, 30));
    }

    #[test]
    fn in_window_empty_range() {
        let mut day = DaySchedule::new(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        day.insert(appointment(t(9, 0), AppointmentStatus::Pending));
        assert_eq!(day.in_window(t(12, 0), t(13, 0)).count(), 0);
    }

    #[test]
    fn past_due_only_for_open_statuses() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 11)
            .unwrap()
            .and_time(t(9, 0));
        for (status, due) in [
            (AppointmentStatus::Pending, true),
            (AppointmentStatus::Approved, true),
            (AppointmentStatus::Claimed, false),
            (AppointmentStatus::Completed, false),
            (AppointmentStatus::Cancelled, false),
        ] {
            assert_eq!(appointment(t(10, 0), status).is_past_due(now), due);
        }
    }

    #[test]
    fn future_slot_is_not_past_due() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 9)
            .unwrap()
            .and_time(t(9, 0));
        assert!(!appointment(t(10, 0), AppointmentStatus::Pending).is_past_due(now));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::Booked {
            appointment: appointment(t(10, 0), AppointmentStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&AppointmentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let back: AppointmentStatus = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(back, AppointmentStatus::Approved);
    }

    #[test]
    fn certificate_display_names() {
        assert_eq!(
            CertificateType::CertificateOfIndigency.display_name(),
            "Certificate of Indigency"
        );
        let json = serde_json::to_string(&CertificateType::SoloParentCertificate).unwrap();
        assert_eq!(json, "\"solo_parent_certificate\"");
    }
}
