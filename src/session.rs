//! Session store: per-identity conversation state with idle expiry
//!
//! One row per (business, external identity), created on first contact and
//! never deleted. Expiry is a pure function of `(now, session)`; the reset
//! happens lazily when the next inbound event arrives.

use crate::db::{Database, DbResult, SessionRecord};
use crate::state_machine::{ChatState, SessionContext};
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_TTL_MINUTES: i64 = 15;

pub fn is_expired(now: DateTime<Utc>, session: &SessionRecord) -> bool {
    session.expires_at < now
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Database, ttl_minutes: i64) -> Self {
        Self {
            db,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Fetch the session for an identity, creating it on first contact.
    /// An expired session is reset in place: state back to the menu,
    /// context cleared, and `timed_out` flagged for a one-shot notice.
    /// Either way the idle window slides forward from `now`.
    pub fn fetch(
        &self,
        business_id: &str,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<SessionRecord> {
        let existing = self.db.get_session(business_id, external_id)?;

        let session = match existing {
            None => SessionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                business_id: business_id.to_string(),
                external_id: external_id.to_string(),
                state: ChatState::Welcome,
                context: SessionContext::default(),
                last_activity_at: now,
                expires_at: now + self.ttl,
            },
            Some(mut session) => {
                if is_expired(now, &session) {
                    tracing::debug!(
                        business_id,
                        external_id,
                        state = ?session.state,
                        "session expired, resetting"
                    );
                    session.state = ChatState::Welcome;
                    session.context.clear();
                    session.context.timed_out = true;
                }
                session.last_activity_at = now;
                session.expires_at = now + self.ttl;
                session
            }
        };

        self.db.save_session(&session)?;
        Ok(session)
    }

    pub fn save(&self, session: &SessionRecord) -> DbResult<()> {
        self.db.save_session(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> (SessionStore, String) {
        let db = Database::open_in_memory().unwrap();
        let business = db.create_business("b", "B").unwrap();
        (SessionStore::new(db, DEFAULT_TTL_MINUTES), business.id)
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn first_contact_creates_a_welcome_session() {
        let (store, business_id) = store();
        let session = store.fetch(&business_id, "905551234567", at(9, 0)).unwrap();
        assert_eq!(session.state, ChatState::Welcome);
        assert!(!session.context.timed_out);
        assert_eq!(session.expires_at, at(9, 15));
    }

    #[test]
    fn activity_slides_the_idle_window() {
        let (store, business_id) = store();
        let first = store.fetch(&business_id, "905551234567", at(9, 0)).unwrap();

        let mut advanced = first.clone();
        advanced.state = ChatState::DateSelect;
        store.save(&advanced).unwrap();

        let second = store.fetch(&business_id, "905551234567", at(9, 10)).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.state, ChatState::DateSelect);
        assert!(!second.context.timed_out);
        assert_eq!(second.expires_at, at(9, 25));
    }

    #[test]
    fn expiry_resets_state_and_flags_once() {
        let (store, business_id) = store();
        let mut session = store.fetch(&business_id, "905551234567", at(9, 0)).unwrap();
        session.state = ChatState::Confirm;
        session.context.selected_employee_id = Some("emp-1".to_string());
        store.save(&session).unwrap();

        // Well past the 15-minute window.
        let reset = store.fetch(&business_id, "905551234567", at(10, 0)).unwrap();
        assert_eq!(reset.id, session.id);
        assert_eq!(reset.state, ChatState::Welcome);
        assert_eq!(reset.context.selected_employee_id, None);
        assert!(reset.context.timed_out);

        // The runtime clears the flag after composing the notice; a fresh
        // fetch within the window must not re-raise it.
        let mut cleared = reset.clone();
        cleared.context.timed_out = false;
        store.save(&cleared).unwrap();
        let next = store.fetch(&business_id, "905551234567", at(10, 5)).unwrap();
        assert!(!next.context.timed_out);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (store, business_id) = store();
        let mut session = store.fetch(&business_id, "905551234567", at(9, 0)).unwrap();
        session.state = ChatState::DateSelect;
        store.save(&session).unwrap();

        // Exactly at expires_at the session is still live.
        let s = store.fetch(&business_id, "905551234567", at(9, 15)).unwrap();
        assert_eq!(s.state, ChatState::DateSelect);
    }
}
