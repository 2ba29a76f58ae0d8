//! Conversation states and per-session context

use crate::db::{Appointment, BookingSettings, Employee};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Conversation state, persisted per session as tagged JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Welcome,
    EmployeeSelect,
    DateSelect,
    TimeSelect,
    Confirm,
    QueueConfirm,
    MyAppointments,
    AppointmentAction,
    ConfirmCancelAppointment,
    Done,
    Cancelled,
}

impl ChatState {
    /// Terminal for a turn: the next inbound event re-enters `Welcome`
    /// before being interpreted.
    pub fn is_terminal(self) -> bool {
        matches!(self, ChatState::Done | ChatState::Cancelled)
    }

    /// Static predecessor for the `back` command and `back` selections.
    pub fn predecessor(self) -> ChatState {
        match self {
            ChatState::Confirm => ChatState::TimeSelect,
            ChatState::TimeSelect => ChatState::DateSelect,
            ChatState::DateSelect => ChatState::EmployeeSelect,
            ChatState::AppointmentAction => ChatState::MyAppointments,
            ChatState::ConfirmCancelAppointment => ChatState::AppointmentAction,
            ChatState::Welcome
            | ChatState::EmployeeSelect
            | ChatState::QueueConfirm
            | ChatState::MyAppointments
            | ChatState::Done
            | ChatState::Cancelled => ChatState::Welcome,
        }
    }
}

/// What the user is in the middle of booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Appointment,
    Queue,
}

/// Free-form per-session context, persisted as JSON next to the state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    pub intent: Option<Intent>,
    pub selected_employee_id: Option<String>,
    pub selected_date: Option<NaiveDate>,
    pub selected_slot: Option<NaiveTime>,
    pub cancel_target_id: Option<String>,
    /// Set once when idle expiry reset the session; cleared after the
    /// expiry notice has been composed.
    pub timed_out: bool,
}

impl SessionContext {
    pub fn clear(&mut self) {
        *self = SessionContext::default();
    }
}

/// Immutable per-turn snapshot the transition function reads. Gathered once
/// by the runtime so transitions stay pure.
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    pub today: NaiveDate,
    pub employees: Vec<Employee>,
    pub settings: BookingSettings,
    /// The caller's own upcoming, non-cancelled appointments. Selection ids
    /// in `MY_APPOINTMENTS` are validated against this set.
    pub my_appointments: Vec<Appointment>,
}

impl TurnSnapshot {
    pub fn has_employee(&self, id: &str) -> bool {
        self.employees.iter().any(|e| e.id == id)
    }

    pub fn has_appointment(&self, id: &str) -> bool {
        self.my_appointments.iter().any(|a| a.id == id)
    }
}
