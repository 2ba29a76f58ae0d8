//! Booking transactor
//!
//! The only writer of appointment and queue rows in this core. Every call is
//! a single validate-then-write transaction over the shared connection, with
//! availability re-checked at commit time. Conflicts are reported as data,
//! never as errors; `DbError` is reserved for storage failure.

use crate::availability::{compute_slots, weekday_sunday0};
use crate::db::{
    queries, Appointment, AppointmentStatus, ApprovalStatus, Database, DbResult, QueueEntry,
    QueueStatus, SourceChannel,
};
use crate::identity::CanonicalIdentity;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::fmt;

/// Minimum notice for cancelling an appointment.
pub const MIN_CANCEL_NOTICE_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingDenied {
    SlotUnavailable,
    ExistingSameDay,
}

impl BookingDenied {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingDenied::SlotUnavailable => "slot_unavailable",
            BookingDenied::ExistingSameDay => "existing_same_day",
        }
    }
}

impl fmt::Display for BookingDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDenied {
    NotFound,
    NotOwned,
    AlreadyCancelled,
    Past,
    TooClose,
}

impl CancelDenied {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelDenied::NotFound => "not_found",
            CancelDenied::NotOwned => "not_owned",
            CancelDenied::AlreadyCancelled => "already_cancelled",
            CancelDenied::Past => "past",
            CancelDenied::TooClose => "too_close",
        }
    }
}

impl fmt::Display for CancelDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum AppointmentOutcome {
    Booked(Appointment),
    Denied(BookingDenied),
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Appointment),
    Denied(CancelDenied),
}

#[derive(Debug, Clone)]
pub struct QueueOutcome {
    pub entry: QueueEntry,
    /// The identity already held a live entry today; `entry` is that one.
    pub already_queued: bool,
}

/// Create an appointment for `(employee, date, slot)` bound to the identity's
/// channel user.
///
/// Availability is recomputed inside the transaction to close the gap since
/// slots were last shown, then the cross-channel one-appointment-per-day rule
/// is enforced. The partial unique index on the appointments table backstops
/// writers racing on the same slot.
pub fn create_appointment(
    db: &Database,
    business_id: &str,
    employee_id: &str,
    date: NaiveDate,
    slot: NaiveTime,
    identity: &CanonicalIdentity,
    channel: SourceChannel,
    now: DateTime<Utc>,
) -> DbResult<AppointmentOutcome> {
    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        let today = now.date_naive();

        let employee = match queries::employee(&tx, business_id, employee_id)? {
            Some(e) if e.is_active => e,
            _ => return Ok(AppointmentOutcome::Denied(BookingDenied::SlotUnavailable)),
        };
        let rules = queries::working_hours(&tx, &employee.id, weekday_sunday0(date))?;
        let booked = queries::booked_start_times(&tx, business_id, employee_id, date)?;
        let fresh = compute_slots(&rules, &booked, date, today, now.time());
        if !fresh.contains(&slot) {
            return Ok(AppointmentOutcome::Denied(BookingDenied::SlotUnavailable));
        }

        let same_day = queries::appointments_on_day(
            &tx,
            business_id,
            &identity.channel_user_ids,
            &identity.customer_ids,
            date,
        )?;
        if !same_day.is_empty() {
            return Ok(AppointmentOutcome::Denied(BookingDenied::ExistingSameDay));
        }

        let settings = queries::booking_settings(&tx, business_id)?;
        let appointment = Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            employee_id: employee_id.to_string(),
            channel_user_id: Some(identity.channel_user_id.clone()),
            customer_id: None,
            starts_at: Utc.from_utc_datetime(&date.and_time(slot)),
            status: AppointmentStatus::Scheduled,
            approval_status: if settings.auto_approve {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Pending
            },
            requested_at: now,
            approved_at: settings.auto_approve.then_some(now),
            source_channel: channel,
        };

        if !queries::insert_appointment(&tx, &appointment)? {
            // A concurrent writer landed on the slot between the re-check
            // and the insert; the unique index caught it.
            return Ok(AppointmentOutcome::Denied(BookingDenied::SlotUnavailable));
        }
        tx.commit()?;

        tracing::info!(
            business_id,
            appointment_id = %appointment.id,
            starts_at = %appointment.starts_at,
            approval = %appointment.approval_status,
            "appointment created"
        );
        Ok(AppointmentOutcome::Booked(appointment))
    })
}

/// Join today's queue. Positions are handed out append-only over all of the
/// day's entries, so cancelled entries keep their number. An identity that
/// already holds a live entry gets it back instead of a duplicate.
pub fn join_queue(
    db: &Database,
    business_id: &str,
    employee_id: Option<&str>,
    identity: &CanonicalIdentity,
    channel: SourceChannel,
    now: DateTime<Utc>,
) -> DbResult<QueueOutcome> {
    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        let today = now.date_naive();

        if let Some(entry) = queries::queue_entry_for_identity(
            &tx,
            business_id,
            &identity.channel_user_ids,
            &identity.customer_ids,
            today,
        )? {
            return Ok(QueueOutcome {
                entry,
                already_queued: true,
            });
        }

        let position = queries::max_queue_position(&tx, business_id, today)?.map_or(0, |m| m + 1);
        let entry = QueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business_id.to_string(),
            employee_id: employee_id.map(str::to_string),
            channel_user_id: Some(identity.channel_user_id.clone()),
            customer_id: None,
            queue_date: today,
            position,
            status: QueueStatus::Waiting,
            source_channel: channel,
        };
        queries::insert_queue_entry(&tx, &entry)?;
        tx.commit()?;

        tracing::info!(business_id, entry_id = %entry.id, position, "queue entry created");
        Ok(QueueOutcome {
            entry,
            already_queued: false,
        })
    })
}

/// Cancel one of the caller's appointments, with a 2-hour minimum notice.
pub fn cancel_appointment(
    db: &Database,
    business_id: &str,
    appointment_id: &str,
    identity: &CanonicalIdentity,
    now: DateTime<Utc>,
) -> DbResult<CancelOutcome> {
    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        let appointment = match queries::appointment(&tx, business_id, appointment_id)? {
            Some(a) => a,
            None => return Ok(CancelOutcome::Denied(CancelDenied::NotFound)),
        };

        let owned = appointment
            .channel_user_id
            .as_ref()
            .is_some_and(|id| identity.channel_user_ids.contains(id))
            || appointment
                .customer_id
                .as_ref()
                .is_some_and(|id| identity.customer_ids.contains(id));
        if !owned {
            return Ok(CancelOutcome::Denied(CancelDenied::NotOwned));
        }
        if appointment.status == AppointmentStatus::Cancelled {
            return Ok(CancelOutcome::Denied(CancelDenied::AlreadyCancelled));
        }
        if appointment.starts_at <= now {
            return Ok(CancelOutcome::Denied(CancelDenied::Past));
        }
        if appointment.starts_at - now < Duration::hours(MIN_CANCEL_NOTICE_HOURS) {
            return Ok(CancelOutcome::Denied(CancelDenied::TooClose));
        }

        queries::set_appointment_status(&tx, &appointment.id, AppointmentStatus::Cancelled)?;
        tx.commit()?;

        tracing::info!(business_id, appointment_id, "appointment cancelled");
        let mut cancelled = appointment;
        cancelled.status = AppointmentStatus::Cancelled;
        Ok(CancelOutcome::Cancelled(cancelled))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BookingSettings, Business};
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Business with one employee working Mondays 09:00-12:00.
    fn fixture() -> (Database, Business, String) {
        let db = Database::open_in_memory().unwrap();
        let business = db.create_business("berber", "Berber").unwrap();
        let employee = db.create_employee(&business.id, "Ali", None).unwrap();
        db.add_working_hours(&employee.id, 1, t(9, 0), t(12, 0), vec![])
            .unwrap();
        (db, business, employee.id)
    }

    fn identity(id: &str) -> CanonicalIdentity {
        CanonicalIdentity {
            channel_user_id: id.to_string(),
            phone_e164: None,
            channel_user_ids: vec![id.to_string()],
            customer_ids: vec![],
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn sunday_evening() -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 3, 3)
                .unwrap()
                .and_time(t(18, 0)),
        )
    }

    #[test]
    fn books_a_valid_slot_pending_by_default() {
        let (db, business, employee_id) = fixture();
        let outcome = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(10, 0),
            &identity("cu-1"),
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();

        let appointment = match outcome {
            AppointmentOutcome::Booked(a) => a,
            AppointmentOutcome::Denied(reason) => panic!("denied: {reason}"),
        };
        assert_eq!(appointment.approval_status, ApprovalStatus::Pending);
        assert_eq!(appointment.approved_at, None);
        assert_eq!(
            appointment.starts_at,
            Utc.from_utc_datetime(&monday().and_time(t(10, 0)))
        );
    }

    #[test]
    fn auto_approve_skips_review() {
        let (db, business, employee_id) = fixture();
        db.put_booking_settings(
            &business.id,
            &BookingSettings {
                auto_approve: true,
                queue_requires_employee: false,
            },
        )
        .unwrap();

        let outcome = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(9, 30),
            &identity("cu-1"),
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        match outcome {
            AppointmentOutcome::Booked(a) => {
                assert_eq!(a.approval_status, ApprovalStatus::Approved);
                assert!(a.approved_at.is_some());
            }
            AppointmentOutcome::Denied(reason) => panic!("denied: {reason}"),
        }
    }

    #[test]
    fn taken_slot_is_denied_at_commit_time() {
        let (db, business, employee_id) = fixture();
        let first = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(10, 0),
            &identity("cu-1"),
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(first, AppointmentOutcome::Booked(_)));

        let second = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(10, 0),
            &identity("cu-2"),
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(
            second,
            AppointmentOutcome::Denied(BookingDenied::SlotUnavailable)
        ));
    }

    #[test]
    fn slot_outside_working_hours_is_denied() {
        let (db, business, employee_id) = fixture();
        let outcome = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(14, 0),
            &identity("cu-1"),
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            AppointmentOutcome::Denied(BookingDenied::SlotUnavailable)
        ));
    }

    #[test]
    fn second_same_day_booking_is_denied_for_one_identity() {
        let (db, business, employee_id) = fixture();
        let id = identity("cu-1");
        let first = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(9, 0),
            &id,
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(first, AppointmentOutcome::Booked(_)));

        let second = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(11, 0),
            &id,
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(
            second,
            AppointmentOutcome::Denied(BookingDenied::ExistingSameDay)
        ));
    }

    #[test]
    fn same_day_conflict_crosses_channels_via_phone() {
        let (db, business, employee_id) = fixture();
        // Web booking exists for the customer behind +905551234567.
        let customer = db
            .create_customer(&business.id, "+905551234567", Some("Ayşe"))
            .unwrap();
        let web_appointment = Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business.id.clone(),
            employee_id: employee_id.clone(),
            channel_user_id: None,
            customer_id: Some(customer.id.clone()),
            starts_at: Utc.from_utc_datetime(&monday().and_time(t(11, 30))),
            status: AppointmentStatus::Scheduled,
            approval_status: ApprovalStatus::Approved,
            requested_at: sunday_evening(),
            approved_at: None,
            source_channel: SourceChannel::Web,
        };
        db.with_conn(|conn| {
            queries::insert_appointment(conn, &web_appointment)?;
            Ok(())
        })
        .unwrap();

        // The same phone arrives via chat and tries the same day.
        let chat_identity = CanonicalIdentity {
            channel_user_id: "cu-1".to_string(),
            phone_e164: Some("+905551234567".to_string()),
            channel_user_ids: vec!["cu-1".to_string()],
            customer_ids: vec![customer.id],
        };
        let outcome = create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(9, 0),
            &chat_identity,
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            AppointmentOutcome::Denied(BookingDenied::ExistingSameDay)
        ));
    }

    #[test]
    fn queue_positions_are_append_only() {
        let (db, business, _) = fixture();
        let now = sunday_evening();

        let first = join_queue(&db, &business.id, None, &identity("cu-1"), SourceChannel::Chat, now)
            .unwrap();
        let second =
            join_queue(&db, &business.id, None, &identity("cu-2"), SourceChannel::Chat, now)
                .unwrap();
        assert_eq!(first.entry.position, 0);
        assert_eq!(second.entry.position, 1);

        // Cancelling an entry must not free its number.
        db.set_queue_status(&second.entry.id, QueueStatus::Cancelled)
            .unwrap();
        let third =
            join_queue(&db, &business.id, None, &identity("cu-3"), SourceChannel::Chat, now)
                .unwrap();
        assert_eq!(third.entry.position, 2);
    }

    #[test]
    fn duplicate_queue_join_returns_the_existing_entry() {
        let (db, business, _) = fixture();
        let now = sunday_evening();
        let id = identity("cu-1");

        let first = join_queue(&db, &business.id, None, &id, SourceChannel::Chat, now).unwrap();
        let again = join_queue(&db, &business.id, None, &id, SourceChannel::Chat, now).unwrap();
        assert!(again.already_queued);
        assert_eq!(again.entry.id, first.entry.id);
        assert_eq!(again.entry.position, 0);
    }

    #[test]
    fn cancel_ladder() {
        let (db, business, employee_id) = fixture();
        let id = identity("cu-1");
        let booked = match create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(10, 0),
            &id,
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap()
        {
            AppointmentOutcome::Booked(a) => a,
            AppointmentOutcome::Denied(reason) => panic!("denied: {reason}"),
        };

        // Unknown id.
        let outcome =
            cancel_appointment(&db, &business.id, "nope", &id, sunday_evening()).unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::Denied(CancelDenied::NotFound)
        ));

        // Someone else's appointment.
        let outcome =
            cancel_appointment(&db, &business.id, &booked.id, &identity("cu-2"), sunday_evening())
                .unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::Denied(CancelDenied::NotOwned)
        ));

        // Inside the 2-hour notice window (appointment at 10:00, now 08:30).
        let late = Utc.from_utc_datetime(&monday().and_time(t(8, 30)));
        let outcome = cancel_appointment(&db, &business.id, &booked.id, &id, late).unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::Denied(CancelDenied::TooClose)
        ));

        // After the start time.
        let after = Utc.from_utc_datetime(&monday().and_time(t(10, 30)));
        let outcome = cancel_appointment(&db, &business.id, &booked.id, &id, after).unwrap();
        assert!(matches!(outcome, CancelOutcome::Denied(CancelDenied::Past)));

        // With enough notice it goes through.
        let outcome =
            cancel_appointment(&db, &business.id, &booked.id, &id, sunday_evening()).unwrap();
        let cancelled = match outcome {
            CancelOutcome::Cancelled(a) => a,
            CancelOutcome::Denied(reason) => panic!("denied: {reason}"),
        };
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

        // And a second attempt reports it.
        let outcome =
            cancel_appointment(&db, &business.id, &booked.id, &id, sunday_evening()).unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::Denied(CancelDenied::AlreadyCancelled)
        ));
    }

    #[test]
    fn exactly_two_hours_notice_is_allowed() {
        let (db, business, employee_id) = fixture();
        let id = identity("cu-1");
        let booked = match create_appointment(
            &db,
            &business.id,
            &employee_id,
            monday(),
            t(11, 0),
            &id,
            SourceChannel::Chat,
            sunday_evening(),
        )
        .unwrap()
        {
            AppointmentOutcome::Booked(a) => a,
            AppointmentOutcome::Denied(reason) => panic!("denied: {reason}"),
        };

        let at_boundary = Utc.from_utc_datetime(&monday().and_time(t(9, 0)));
        let outcome =
            cancel_appointment(&db, &business.id, &booked.id, &id, at_boundary).unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled(_)));
    }
}
