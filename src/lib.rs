//! Appointment slot engine for barangay certificate requests.
//!
//! Day-partitioned booking state with a per-window capacity ceiling,
//! buffered conflict detection, a forward nearest-slot search, and an
//! append-only event ledger for durability. The surrounding application
//! (accounts, rendering, mail) talks to this crate through [`Engine`] and
//! the [`notify::NotifyHub`] event feed.

pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod slots;
pub mod sweeper;

pub use engine::{Engine, EngineError};
pub use model::{
    Appointment, AppointmentStatus, BookingRequest, CertificateType, Purpose, RescheduleRequest,
    SchedulePolicy, Slot, SlotOccupancy,
};
