//! Database schema and record types

pub use crate::state_machine::state::{ChatState, SessionContext};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS businesses (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS employees (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_employees_business ON employees(business_id, is_active);

CREATE TABLE IF NOT EXISTS working_hours (
    id TEXT PRIMARY KEY,
    employee_id TEXT NOT NULL,
    weekday INTEGER NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    breaks TEXT NOT NULL DEFAULT '[]',

    FOREIGN KEY (employee_id) REFERENCES employees(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_working_hours_employee ON working_hours(employee_id, weekday);

CREATE TABLE IF NOT EXISTS channel_users (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    display_name TEXT,
    phone_e164 TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_users_identity ON channel_users(business_id, external_id);
CREATE INDEX IF NOT EXISTS idx_channel_users_phone ON channel_users(business_id, phone_e164);

CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    phone_e164 TEXT NOT NULL,
    name TEXT,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers(business_id, phone_e164);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT '{"type":"welcome"}',
    context TEXT NOT NULL DEFAULT '{}',
    last_activity_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_identity ON sessions(business_id, external_id);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    employee_id TEXT NOT NULL,
    channel_user_id TEXT,
    customer_id TEXT,
    starts_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    approval_status TEXT NOT NULL DEFAULT 'pending',
    requested_at TEXT NOT NULL,
    approved_at TEXT,
    source_channel TEXT NOT NULL,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE,
    FOREIGN KEY (employee_id) REFERENCES employees(id) ON DELETE RESTRICT
);

CREATE INDEX IF NOT EXISTS idx_appointments_employee_day ON appointments(business_id, employee_id, starts_at);
CREATE INDEX IF NOT EXISTS idx_appointments_channel_user ON appointments(business_id, channel_user_id);
CREATE INDEX IF NOT EXISTS idx_appointments_customer ON appointments(business_id, customer_id);

-- Backstop for concurrent confirmations of the same slot: commit-time
-- re-validation narrows the race window, this index closes it.
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_slot
    ON appointments(business_id, employee_id, starts_at)
    WHERE status != 'cancelled';

CREATE TABLE IF NOT EXISTS queue_entries (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL,
    employee_id TEXT,
    channel_user_id TEXT,
    customer_id TEXT,
    queue_date TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'waiting',
    source_channel TEXT NOT NULL,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE,
    FOREIGN KEY (employee_id) REFERENCES employees(id) ON DELETE SET NULL
);

-- Positions are append-only per (business, day); cancelled entries keep
-- their number.
CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_position
    ON queue_entries(business_id, queue_date, position);

CREATE TABLE IF NOT EXISTS booking_settings (
    business_id TEXT PRIMARY KEY,
    auto_approve BOOLEAN NOT NULL DEFAULT 0,
    queue_requires_employee BOOLEAN NOT NULL DEFAULT 0,

    FOREIGN KEY (business_id) REFERENCES businesses(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_log (
    business_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    logged_at TEXT NOT NULL,

    PRIMARY KEY (business_id, message_id)
);
"#;

/// A tenant. Management of these rows lives outside the core; the booking
/// flow only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub slug: String,
    pub name: String,
    /// Entitlement gate: inactive businesses get events acknowledged and dropped.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub role: Option<String>,
    pub is_active: bool,
}

/// A break inside a working-hours window. Stored as JSON in the rule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakInterval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Per-employee, per-weekday bookable window. Weekday is 0-6 with Sunday = 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursRule {
    pub id: String,
    pub employee_id: String,
    pub weekday: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub breaks: Vec<BreakInterval>,
}

/// Messaging-channel identity, upserted on every inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUser {
    pub id: String,
    pub business_id: String,
    pub external_id: String,
    pub display_name: Option<String>,
    pub phone_e164: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Web-channel identity. Created by the web portal collaborator; the core
/// only reads these for cross-channel correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub business_id: String,
    pub phone_e164: String,
    pub name: Option<String>,
}

/// Conversation state for one (business, external identity). Never deleted;
/// expiry resets it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub business_id: String,
    pub external_id: String,
    pub state: ChatState,
    pub context: SessionContext,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    Served,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::Served => "served",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueStatus::Waiting),
            "called" => Some(QueueStatus::Called),
            "served" => Some(QueueStatus::Served),
            "cancelled" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which surface created a booking row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Chat,
    Web,
}

impl SourceChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceChannel::Chat => "chat",
            SourceChannel::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(SourceChannel::Chat),
            "web" => Some(SourceChannel::Web),
            _ => None,
        }
    }
}

impl fmt::Display for SourceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booked appointment. Exactly one of `channel_user_id` / `customer_id`
/// is set; cross-channel duplicate detection goes through the normalized
/// phone, not these ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub business_id: String,
    pub employee_id: String,
    pub channel_user_id: Option<String>,
    pub customer_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub approval_status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub source_channel: SourceChannel,
}

/// A walk-in queue entry for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub business_id: String,
    pub employee_id: Option<String>,
    pub channel_user_id: Option<String>,
    pub customer_id: Option<String>,
    pub queue_date: NaiveDate,
    pub position: i64,
    pub status: QueueStatus,
    pub source_channel: SourceChannel,
}

/// Per-business booking knobs. Missing row means defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingSettings {
    pub auto_approve: bool,
    pub queue_requires_employee: bool,
}
