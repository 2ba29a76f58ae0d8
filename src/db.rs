//! Database access for the booking core
//!
//! One rusqlite connection behind a mutex; the booking transactor composes
//! its validate-then-write sequence over the same connection via
//! [`Database::with_conn`] so it runs as a single transaction.

mod schema;

pub use schema::*;

use crate::identity::normalize_e164;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run `f` with exclusive access to the connection. The transactor uses
    /// this to wrap its validate-then-write sequence in one transaction.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }

    // ==================== Business Operations ====================

    pub fn create_business(&self, slug: &str, name: &str) -> DbResult<Business> {
        let conn = self.conn.lock().unwrap();
        let business = Business {
            id: uuid::Uuid::new_v4().to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO businesses (id, slug, name, active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                business.id,
                business.slug,
                business.name,
                business.active,
                business.created_at.to_rfc3339()
            ],
        )?;
        Ok(business)
    }

    pub fn get_business_by_slug(&self, slug: &str) -> DbResult<Option<Business>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, slug, name, active, created_at FROM businesses WHERE slug = ?1",
            params![slug],
            parse_business_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    #[allow(dead_code)] // Tenant management surface
    pub fn set_business_active(&self, business_id: &str, active: bool) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE businesses SET active = ?1 WHERE id = ?2",
            params![active, business_id],
        )?;
        Ok(())
    }

    // ==================== Employee Operations ====================

    pub fn create_employee(
        &self,
        business_id: &str,
        name: &str,
        role: Option<&str>,
    ) -> DbResult<Employee> {
        let conn = self.conn.lock().unwrap();
        let employee = Employee {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            name: name.to_string(),
            role: role.map(str::to_string),
            is_active: true,
        };
        conn.execute(
            "INSERT INTO employees (id, business_id, name, role, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                employee.id,
                employee.business_id,
                employee.name,
                employee.role,
                employee.is_active
            ],
        )?;
        Ok(employee)
    }

    #[allow(dead_code)] // Staff management surface
    pub fn set_employee_active(&self, employee_id: &str, active: bool) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE employees SET is_active = ?1 WHERE id = ?2",
            params![active, employee_id],
        )?;
        Ok(())
    }

    pub fn get_employee(&self, business_id: &str, employee_id: &str) -> DbResult<Option<Employee>> {
        let conn = self.conn.lock().unwrap();
        queries::employee(&conn, business_id, employee_id)
    }

    pub fn get_active_employees(&self, business_id: &str) -> DbResult<Vec<Employee>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, business_id, name, role, is_active FROM employees
             WHERE business_id = ?1 AND is_active = 1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![business_id], parse_employee_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Working Hours ====================

    pub fn add_working_hours(
        &self,
        employee_id: &str,
        weekday: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
        breaks: Vec<BreakInterval>,
    ) -> DbResult<WorkingHoursRule> {
        let conn = self.conn.lock().unwrap();
        let rule = WorkingHoursRule {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: employee_id.to_string(),
            weekday,
            start_time,
            end_time,
            breaks,
        };
        conn.execute(
            "INSERT INTO working_hours (id, employee_id, weekday, start_time, end_time, breaks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.id,
                rule.employee_id,
                rule.weekday,
                fmt_time(rule.start_time),
                fmt_time(rule.end_time),
                serde_json::to_string(&rule.breaks).unwrap(),
            ],
        )?;
        Ok(rule)
    }

    pub fn get_working_hours(
        &self,
        employee_id: &str,
        weekday: u8,
    ) -> DbResult<Vec<WorkingHoursRule>> {
        let conn = self.conn.lock().unwrap();
        queries::working_hours(&conn, employee_id, weekday)
    }

    // ==================== Booking Settings ====================

    pub fn put_booking_settings(
        &self,
        business_id: &str,
        settings: &BookingSettings,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO booking_settings (business_id, auto_approve, queue_requires_employee)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(business_id) DO UPDATE SET
                 auto_approve = excluded.auto_approve,
                 queue_requires_employee = excluded.queue_requires_employee",
            params![
                business_id,
                settings.auto_approve,
                settings.queue_requires_employee
            ],
        )?;
        Ok(())
    }

    /// Missing row means defaults.
    pub fn get_booking_settings(&self, business_id: &str) -> DbResult<BookingSettings> {
        let conn = self.conn.lock().unwrap();
        queries::booking_settings(&conn, business_id)
    }

    // ==================== Channel Users & Customers ====================

    /// Upsert the messaging-channel identity on an inbound event. The
    /// normalized phone is derived from the provider id at first sight.
    pub fn upsert_channel_user(
        &self,
        business_id: &str,
        external_id: &str,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<ChannelUser> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT id, business_id, external_id, display_name, phone_e164, first_seen_at, last_seen_at
                 FROM channel_users WHERE business_id = ?1 AND external_id = ?2",
                params![business_id, external_id],
                parse_channel_user_row,
            )
            .optional()?;

        if let Some(mut user) = existing {
            user.display_name = display_name.map(str::to_string).or(user.display_name);
            user.last_seen_at = now;
            conn.execute(
                "UPDATE channel_users SET display_name = ?1, last_seen_at = ?2 WHERE id = ?3",
                params![user.display_name, now.to_rfc3339(), user.id],
            )?;
            return Ok(user);
        }

        let user = ChannelUser {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            external_id: external_id.to_string(),
            display_name: display_name.map(str::to_string),
            phone_e164: normalize_e164(external_id),
            first_seen_at: now,
            last_seen_at: now,
        };
        conn.execute(
            "INSERT INTO channel_users (id, business_id, external_id, display_name, phone_e164, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.business_id,
                user.external_id,
                user.display_name,
                user.phone_e164,
                user.first_seen_at.to_rfc3339(),
                user.last_seen_at.to_rfc3339()
            ],
        )?;
        Ok(user)
    }

    pub fn channel_user_ids_by_phone(
        &self,
        business_id: &str,
        phone_e164: &str,
    ) -> DbResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM channel_users WHERE business_id = ?1 AND phone_e164 = ?2",
        )?;
        let rows = stmt.query_map(params![business_id, phone_e164], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn customer_ids_by_phone(
        &self,
        business_id: &str,
        phone_e164: &str,
    ) -> DbResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id FROM customers WHERE business_id = ?1 AND phone_e164 = ?2")?;
        let rows = stmt.query_map(params![business_id, phone_e164], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// The web portal owns customer rows; this exists for the web-path
    /// collaborator and for tests exercising cross-channel correlation.
    #[allow(dead_code)] // Web-path collaborator surface
    pub fn create_customer(
        &self,
        business_id: &str,
        phone_e164: &str,
        name: Option<&str>,
    ) -> DbResult<Customer> {
        let conn = self.conn.lock().unwrap();
        let customer = Customer {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            phone_e164: phone_e164.to_string(),
            name: name.map(str::to_string),
        };
        conn.execute(
            "INSERT INTO customers (id, business_id, phone_e164, name) VALUES (?1, ?2, ?3, ?4)",
            params![
                customer.id,
                customer.business_id,
                customer.phone_e164,
                customer.name
            ],
        )?;
        Ok(customer)
    }

    // ==================== Appointments & Queue ====================

    pub fn booked_start_times(
        &self,
        business_id: &str,
        employee_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<NaiveTime>> {
        let conn = self.conn.lock().unwrap();
        queries::booked_start_times(&conn, business_id, employee_id, date)
    }

    /// The caller's upcoming non-cancelled appointments, across channels.
    pub fn upcoming_appointments_for(
        &self,
        business_id: &str,
        channel_user_ids: &[String],
        customer_ids: &[String],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        let conn = self.conn.lock().unwrap();
        queries::upcoming_appointments(&conn, business_id, channel_user_ids, customer_ids, now)
    }

    pub fn queue_entries_for_day(
        &self,
        business_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<QueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, business_id, employee_id, channel_user_id, customer_id, queue_date, position, status, source_channel
             FROM queue_entries WHERE business_id = ?1 AND queue_date = ?2 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![business_id, date.to_string()], parse_queue_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Status updates come from the business dashboard (called/served/
    /// cancelled); the chat flow never moves entries itself.
    #[allow(dead_code)] // Dashboard surface
    pub fn set_queue_status(&self, entry_id: &str, status: QueueStatus) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE queue_entries SET status = ?1 WHERE id = ?2",
            params![status.as_str(), entry_id],
        )?;
        Ok(())
    }

    // ==================== Sessions ====================

    pub fn get_session(
        &self,
        business_id: &str,
        external_id: &str,
    ) -> DbResult<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, business_id, external_id, state, context, last_activity_at, expires_at
             FROM sessions WHERE business_id = ?1 AND external_id = ?2",
            params![business_id, external_id],
            parse_session_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn save_session(&self, session: &SessionRecord) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, business_id, external_id, state, context, last_activity_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(business_id, external_id) DO UPDATE SET
                 state = excluded.state,
                 context = excluded.context,
                 last_activity_at = excluded.last_activity_at,
                 expires_at = excluded.expires_at",
            params![
                session.id,
                session.business_id,
                session.external_id,
                serde_json::to_string(&session.state).unwrap(),
                serde_json::to_string(&session.context).unwrap(),
                session.last_activity_at.to_rfc3339(),
                session.expires_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ==================== Message Log ====================

    /// Record an inbound message id. Returns false when the id was already
    /// seen for this business, i.e. a transport-level redelivery.
    pub fn record_inbound(
        &self,
        business_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO message_log (business_id, message_id, direction, logged_at)
             VALUES (?1, ?2, 'inbound', ?3)",
            params![business_id, message_id, now.to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    pub fn record_outbound(
        &self,
        business_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO message_log (business_id, message_id, direction, logged_at)
             VALUES (?1, ?2, 'outbound', ?3)",
            params![business_id, message_id, now.to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Connection-level queries, shared between the locking [`Database`]
/// methods and the transactor's single-transaction sequences.
pub(crate) mod queries {
    use super::*;

    pub fn employee(
        conn: &Connection,
        business_id: &str,
        employee_id: &str,
    ) -> DbResult<Option<Employee>> {
        conn.query_row(
            "SELECT id, business_id, name, role, is_active FROM employees
             WHERE business_id = ?1 AND id = ?2",
            params![business_id, employee_id],
            parse_employee_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn working_hours(
        conn: &Connection,
        employee_id: &str,
        weekday: u8,
    ) -> DbResult<Vec<WorkingHoursRule>> {
        let mut stmt = conn.prepare(
            "SELECT id, employee_id, weekday, start_time, end_time, breaks FROM working_hours
             WHERE employee_id = ?1 AND weekday = ?2 ORDER BY start_time ASC",
        )?;
        let rows = stmt.query_map(params![employee_id, weekday], parse_rule_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn booking_settings(conn: &Connection, business_id: &str) -> DbResult<BookingSettings> {
        conn.query_row(
            "SELECT auto_approve, queue_requires_employee FROM booking_settings WHERE business_id = ?1",
            params![business_id],
            |row| {
                Ok(BookingSettings {
                    auto_approve: row.get(0)?,
                    queue_requires_employee: row.get(1)?,
                })
            },
        )
        .optional()
        .map(Option::unwrap_or_default)
        .map_err(DbError::from)
    }

    pub fn booked_start_times(
        conn: &Connection,
        business_id: &str,
        employee_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<NaiveTime>> {
        let (day_start, day_end) = day_bounds(date);
        let mut stmt = conn.prepare(
            "SELECT starts_at FROM appointments
             WHERE business_id = ?1 AND employee_id = ?2 AND status != 'cancelled'
               AND starts_at >= ?3 AND starts_at < ?4",
        )?;
        let rows = stmt.query_map(
            params![business_id, employee_id, day_start, day_end],
            |row| row.get::<_, String>(0),
        )?;
        let mut times = vec![];
        for raw in rows {
            times.push(parse_datetime(&raw?).time());
        }
        Ok(times)
    }

    /// Non-cancelled appointments for any of the identity's ids on a day.
    pub fn appointments_on_day(
        conn: &Connection,
        business_id: &str,
        channel_user_ids: &[String],
        customer_ids: &[String],
        date: NaiveDate,
    ) -> DbResult<Vec<Appointment>> {
        let (day_start, day_end) = day_bounds(date);
        identity_appointments(
            conn,
            business_id,
            channel_user_ids,
            customer_ids,
            "starts_at >= ? AND starts_at < ?",
            &[day_start, day_end],
        )
    }

    pub fn upcoming_appointments(
        conn: &Connection,
        business_id: &str,
        channel_user_ids: &[String],
        customer_ids: &[String],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        identity_appointments(
            conn,
            business_id,
            channel_user_ids,
            customer_ids,
            "starts_at > ?",
            &[now.to_rfc3339()],
        )
    }

    fn identity_appointments(
        conn: &Connection,
        business_id: &str,
        channel_user_ids: &[String],
        customer_ids: &[String],
        time_clause: &str,
        time_params: &[String],
    ) -> DbResult<Vec<Appointment>> {
        let mut id_clauses = vec![];
        let mut bind: Vec<String> = vec![business_id.to_string()];
        if !channel_user_ids.is_empty() {
            id_clauses.push(format!(
                "channel_user_id IN ({})",
                placeholders(channel_user_ids.len())
            ));
            bind.extend(channel_user_ids.iter().cloned());
        }
        if !customer_ids.is_empty() {
            id_clauses.push(format!(
                "customer_id IN ({})",
                placeholders(customer_ids.len())
            ));
            bind.extend(customer_ids.iter().cloned());
        }
        if id_clauses.is_empty() {
            return Ok(vec![]);
        }
        bind.extend(time_params.iter().cloned());

        let sql = format!(
            "SELECT id, business_id, employee_id, channel_user_id, customer_id, starts_at,
                    status, approval_status, requested_at, approved_at, source_channel
             FROM appointments
             WHERE business_id = ? AND status != 'cancelled' AND ({}) AND {}
             ORDER BY starts_at ASC",
            id_clauses.join(" OR "),
            time_clause,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bind), parse_appointment_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn appointment(
        conn: &Connection,
        business_id: &str,
        appointment_id: &str,
    ) -> DbResult<Option<Appointment>> {
        conn.query_row(
            "SELECT id, business_id, employee_id, channel_user_id, customer_id, starts_at,
                    status, approval_status, requested_at, approved_at, source_channel
             FROM appointments WHERE business_id = ?1 AND id = ?2",
            params![business_id, appointment_id],
            parse_appointment_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    /// Insert a new appointment. Returns false when the partial unique
    /// index on (business, employee, starts_at) rejects it, i.e. the slot
    /// was taken by a concurrent writer.
    pub fn insert_appointment(conn: &Connection, appointment: &Appointment) -> DbResult<bool> {
        let result = conn.execute(
            "INSERT INTO appointments (id, business_id, employee_id, channel_user_id, customer_id,
                                       starts_at, status, approval_status, requested_at, approved_at, source_channel)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                appointment.id,
                appointment.business_id,
                appointment.employee_id,
                appointment.channel_user_id,
                appointment.customer_id,
                appointment.starts_at.to_rfc3339(),
                appointment.status.as_str(),
                appointment.approval_status.as_str(),
                appointment.requested_at.to_rfc3339(),
                appointment.approved_at.map(|t| t.to_rfc3339()),
                appointment.source_channel.as_str()
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_appointment_status(
        conn: &Connection,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> DbResult<()> {
        conn.execute(
            "UPDATE appointments SET status = ?1 WHERE id = ?2",
            params![status.as_str(), appointment_id],
        )?;
        Ok(())
    }

    /// Highest position handed out today, over all entries regardless of
    /// status: cancelled entries keep their number.
    pub fn max_queue_position(
        conn: &Connection,
        business_id: &str,
        date: NaiveDate,
    ) -> DbResult<Option<i64>> {
        conn.query_row(
            "SELECT MAX(position) FROM queue_entries WHERE business_id = ?1 AND queue_date = ?2",
            params![business_id, date.to_string()],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }

    pub fn queue_entry_for_identity(
        conn: &Connection,
        business_id: &str,
        channel_user_ids: &[String],
        customer_ids: &[String],
        date: NaiveDate,
    ) -> DbResult<Option<QueueEntry>> {
        let mut id_clauses = vec![];
        let mut bind: Vec<String> = vec![business_id.to_string(), date.to_string()];
        if !channel_user_ids.is_empty() {
            id_clauses.push(format!(
                "channel_user_id IN ({})",
                placeholders(channel_user_ids.len())
            ));
            bind.extend(channel_user_ids.iter().cloned());
        }
        if !customer_ids.is_empty() {
            id_clauses.push(format!(
                "customer_id IN ({})",
                placeholders(customer_ids.len())
            ));
            bind.extend(customer_ids.iter().cloned());
        }
        if id_clauses.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT id, business_id, employee_id, channel_user_id, customer_id, queue_date, position, status, source_channel
             FROM queue_entries
             WHERE business_id = ? AND queue_date = ? AND status != 'cancelled' AND ({})
             ORDER BY position ASC LIMIT 1",
            id_clauses.join(" OR "),
        );
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(rusqlite::params_from_iter(bind), parse_queue_row)
            .optional()
            .map_err(DbError::from)
    }

    pub fn insert_queue_entry(conn: &Connection, entry: &QueueEntry) -> DbResult<()> {
        conn.execute(
            "INSERT INTO queue_entries (id, business_id, employee_id, channel_user_id, customer_id,
                                        queue_date, position, status, source_channel)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.business_id,
                entry.employee_id,
                entry.channel_user_id,
                entry.customer_id,
                entry.queue_date.to_string(),
                entry.position,
                entry.status.as_str(),
                entry.source_channel.as_str()
            ],
        )?;
        Ok(())
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(",")
    }

    fn day_bounds(date: NaiveDate) -> (String, String) {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
        let end = Utc.from_utc_datetime(
            &(date + chrono::Days::new(1)).and_hms_opt(0, 0, 0).unwrap(),
        );
        (start.to_rfc3339(), end.to_rfc3339())
    }
}

// ==================== Row Parsing ====================

fn parse_business_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Business> {
    Ok(Business {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        active: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_employee_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
    })
}

fn parse_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkingHoursRule> {
    let breaks: String = row.get(5)?;
    Ok(WorkingHoursRule {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        weekday: row.get(2)?,
        start_time: parse_time(&row.get::<_, String>(3)?),
        end_time: parse_time(&row.get::<_, String>(4)?),
        breaks: serde_json::from_str(&breaks).unwrap_or_default(),
    })
}

fn parse_channel_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelUser> {
    Ok(ChannelUser {
        id: row.get(0)?,
        business_id: row.get(1)?,
        external_id: row.get(2)?,
        display_name: row.get(3)?,
        phone_e164: row.get(4)?,
        first_seen_at: parse_datetime(&row.get::<_, String>(5)?),
        last_seen_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let state: String = row.get(3)?;
    let context: String = row.get(4)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        business_id: row.get(1)?,
        external_id: row.get(2)?,
        state: serde_json::from_str(&state).unwrap_or_default(),
        context: serde_json::from_str(&context).unwrap_or_default(),
        last_activity_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_appointment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    let status: String = row.get(6)?;
    let approval: String = row.get(7)?;
    let channel: String = row.get(10)?;
    Ok(Appointment {
        id: row.get(0)?,
        business_id: row.get(1)?,
        employee_id: row.get(2)?,
        channel_user_id: row.get(3)?,
        customer_id: row.get(4)?,
        starts_at: parse_datetime(&row.get::<_, String>(5)?),
        status: AppointmentStatus::parse(&status).unwrap_or(AppointmentStatus::Scheduled),
        approval_status: ApprovalStatus::parse(&approval).unwrap_or(ApprovalStatus::Pending),
        requested_at: parse_datetime(&row.get::<_, String>(8)?),
        approved_at: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_datetime(&s)),
        source_channel: SourceChannel::parse(&channel).unwrap_or(SourceChannel::Chat),
    })
}

fn parse_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let status: String = row.get(7)?;
    let channel: String = row.get(8)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        business_id: row.get(1)?,
        employee_id: row.get(2)?,
        channel_user_id: row.get(3)?,
        customer_id: row.get(4)?,
        queue_date: parse_date(&row.get::<_, String>(5)?),
        position: row.get(6)?,
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Waiting),
        source_channel: SourceChannel::parse(&channel).unwrap_or(SourceChannel::Chat),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive())
}

fn parse_time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .unwrap_or_else(|_| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
