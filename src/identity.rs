//! Cross-channel identity resolution
//!
//! The same person can book via the chat channel (keyed by the provider's
//! external id) and via the web portal (keyed by a customer record). Both
//! carry a phone number; normalizing it to E.164 is the correlation key for
//! the one-appointment-per-day rule and for cancellation ownership.

use crate::db::{ChannelUser, Database, DbResult};

/// Normalize a Turkish mobile number to E.164.
///
/// Accepts `5XXXXXXXXX`, `05XXXXXXXXX` and `905XXXXXXXXX` (with any
/// punctuation), returning `+905XXXXXXXXX`. Anything else is `None`.
pub fn normalize_e164(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 if digits.starts_with('5') => Some(format!("+90{digits}")),
        11 if digits.starts_with('0') => Some(format!("+90{}", &digits[1..])),
        12 if digits.starts_with("90") => Some(format!("+{digits}")),
        _ => None,
    }
}

#[allow(dead_code)] // Validation counterpart used by the web path
pub fn is_valid_e164(phone: &str) -> bool {
    phone.len() == 13
        && phone.starts_with("+90")
        && phone[1..].chars().all(|c| c.is_ascii_digit())
}

/// The real-world person behind an inbound event, with every storage id
/// that may hold their bookings.
#[derive(Debug, Clone)]
pub struct CanonicalIdentity {
    /// The channel-user row new chat bookings bind to.
    pub channel_user_id: String,
    pub phone_e164: Option<String>,
    /// All channel-user ids sharing the normalized phone (self included).
    pub channel_user_ids: Vec<String>,
    /// All web customer ids sharing the normalized phone.
    pub customer_ids: Vec<String>,
}

/// Resolve a channel user to the canonical identity. Without a normalizable
/// phone the identity degrades to the single channel-user row.
pub fn resolve(db: &Database, user: &ChannelUser) -> DbResult<CanonicalIdentity> {
    let phone = user
        .phone_e164
        .clone()
        .or_else(|| normalize_e164(&user.external_id));

    let (mut channel_user_ids, customer_ids) = match &phone {
        Some(phone) => (
            db.channel_user_ids_by_phone(&user.business_id, phone)?,
            db.customer_ids_by_phone(&user.business_id, phone)?,
        ),
        None => (vec![], vec![]),
    };
    if !channel_user_ids.contains(&user.id) {
        channel_user_ids.push(user.id.clone());
    }

    Ok(CanonicalIdentity {
        channel_user_id: user.id.clone(),
        phone_e164: phone,
        channel_user_ids,
        customer_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_shapes() {
        assert_eq!(
            normalize_e164("5551234567").as_deref(),
            Some("+905551234567")
        );
        assert_eq!(
            normalize_e164("05551234567").as_deref(),
            Some("+905551234567")
        );
        assert_eq!(
            normalize_e164("905551234567").as_deref(),
            Some("+905551234567")
        );
        assert_eq!(
            normalize_e164("0 (555) 123 45 67").as_deref(),
            Some("+905551234567")
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(normalize_e164(""), None);
        assert_eq!(normalize_e164("12345"), None);
        // 10 digits not starting with 5
        assert_eq!(normalize_e164("4551234567"), None);
        // Wrong country prefix
        assert_eq!(normalize_e164("445551234567"), None);
        assert_eq!(normalize_e164("no digits"), None);
    }

    #[test]
    fn resolve_correlates_channels_by_phone() {
        let db = Database::open_in_memory().unwrap();
        let business = db.create_business("b", "B").unwrap();
        let now = chrono::Utc::now();
        let user = db
            .upsert_channel_user(&business.id, "905551234567", None, now)
            .unwrap();
        let twin = db
            .upsert_channel_user(&business.id, "0 555 123 45 67", None, now)
            .unwrap();
        let customer = db
            .create_customer(&business.id, "+905551234567", None)
            .unwrap();

        let identity = resolve(&db, &user).unwrap();
        assert_eq!(identity.channel_user_id, user.id);
        assert_eq!(identity.phone_e164.as_deref(), Some("+905551234567"));
        assert!(identity.channel_user_ids.contains(&user.id));
        assert!(identity.channel_user_ids.contains(&twin.id));
        assert_eq!(identity.customer_ids, vec![customer.id]);
    }

    #[test]
    fn resolve_without_a_phone_is_just_the_channel_user() {
        let db = Database::open_in_memory().unwrap();
        let business = db.create_business("b", "B").unwrap();
        let user = db
            .upsert_channel_user(&business.id, "not-a-phone", None, chrono::Utc::now())
            .unwrap();

        let identity = resolve(&db, &user).unwrap();
        assert_eq!(identity.phone_e164, None);
        assert_eq!(identity.channel_user_ids, vec![user.id]);
        assert!(identity.customer_ids.is_empty());
    }

    #[test]
    fn validates_e164() {
        assert!(is_valid_e164("+905551234567"));
        assert!(!is_valid_e164("905551234567"));
        assert!(!is_valid_e164("+90555123456"));
        assert!(!is_valid_e164("+9055512345678"));
        assert!(!is_valid_e164("+90555123456a"));
    }
}
