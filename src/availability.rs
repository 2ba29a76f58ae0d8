//! Availability engine: slot computation
//!
//! Read-only. Absence of data (unknown or inactive employee, no working
//! hours) yields an empty result, never an error.

use crate::db::{Database, DbResult, WorkingHoursRule};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

/// Fixed slot duration in minutes.
pub const SLOT_DURATION_MIN: u16 = 30;

/// Weekday with Sunday = 0, matching the working-hours rows.
pub fn weekday_sunday0(date: NaiveDate) -> u8 {
    chrono::Datelike::weekday(&date).num_days_from_sunday() as u8
}

/// Pure slot computation over already-fetched inputs.
///
/// Candidates step through each rule's `[start, end - duration]` window in
/// 30-minute increments; a candidate is dropped when it overlaps a break
/// (open-interval test), coincides with a booked start, or, for today, is
/// not strictly in the future.
pub fn compute_slots(
    rules: &[WorkingHoursRule],
    booked_starts: &[NaiveTime],
    date: NaiveDate,
    today: NaiveDate,
    now_time: NaiveTime,
) -> Vec<NaiveTime> {
    if date < today {
        return vec![];
    }

    let step = u32::from(SLOT_DURATION_MIN);
    let booked: Vec<(u32, u32)> = booked_starts
        .iter()
        .map(|t| (t.hour(), t.minute()))
        .collect();

    let mut slots: Vec<NaiveTime> = vec![];
    for rule in rules {
        let start = minute_of_day(rule.start_time);
        let end = minute_of_day(rule.end_time);
        if start >= end {
            continue;
        }

        let mut m = start;
        while m + step <= end {
            let slot_start = m;
            let slot_end = m + step;
            let in_break = rule.breaks.iter().any(|b| {
                slot_start < minute_of_day(b.end) && slot_end > minute_of_day(b.start)
            });
            if !in_break {
                if let Some(t) = NaiveTime::from_hms_opt(slot_start / 60, slot_start % 60, 0) {
                    slots.push(t);
                }
            }
            m += step;
        }
    }

    slots.sort_unstable();
    slots.dedup();
    slots.retain(|t| !booked.contains(&(t.hour(), t.minute())));
    if date == today {
        slots.retain(|t| *t > now_time);
    }
    slots
}

/// Bookable slots for one employee on one date, as of `now`.
pub fn slots(
    db: &Database,
    business_id: &str,
    employee_id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> DbResult<Vec<NaiveTime>> {
    let today = now.date_naive();
    if date < today {
        return Ok(vec![]);
    }

    let employee = match db.get_employee(business_id, employee_id)? {
        Some(e) if e.is_active => e,
        _ => return Ok(vec![]),
    };

    let rules = db.get_working_hours(&employee.id, weekday_sunday0(date))?;
    if rules.is_empty() {
        return Ok(vec![]);
    }

    let booked = db.booked_start_times(business_id, employee_id, date)?;
    Ok(compute_slots(&rules, &booked, date, today, now.time()))
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}
