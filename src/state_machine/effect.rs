//! Effects requested by state transitions
//!
//! The engine never touches storage for bookings; it emits these and the
//! turn runtime executes them, feeding structured outcomes back in as
//! events.

use crate::booking::CancelDenied;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the booking transactor to create an appointment.
    BookAppointment {
        employee_id: String,
        date: NaiveDate,
        slot: NaiveTime,
    },

    /// Ask the booking transactor for a queue entry for today.
    JoinQueue { employee_id: Option<String> },

    /// Ask the booking transactor to cancel one of the caller's appointments.
    CancelAppointment { appointment_id: String },

    /// Surface a one-shot notice in the next composed reply.
    Notify(Notice),
}

/// One-shot notices the composer folds into the reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SessionExpired,
    Help,
    /// The business has no active staff to book with.
    NoStaff,
    /// The chosen slot was gone at commit time.
    SlotTaken,
    /// The caller already holds an appointment on the chosen day.
    SameDayConflict,
    Booked {
        approved: bool,
        starts_at: DateTime<Utc>,
    },
    Queued {
        position: i64,
        already_queued: bool,
    },
    CancelConfirmed,
    CancelRejected(CancelDenied),
}
