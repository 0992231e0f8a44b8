//! Login credentials, one per account, stored apart from the account record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, RecordMeta};

/// Credentials for one account. `code` equals the account's code.
///
/// Never serialized into API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub email: String,
    pub phone_no: String,
    /// Collection of the account this login belongs to.
    pub collection: String,
    pub password_hash: String,
    /// The current password is a one-time password that must be changed.
    #[serde(default)]
    pub reset: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_expires_at: Option<DateTime<Utc>>,
}

impl LoginRecord {
    pub fn otp_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset && self.otp_expires_at.is_none_or(|expiry| expiry <= now)
    }
}

impl Entity for LoginRecord {
    const KIND: EntityKind = EntityKind::Login;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn otp_expiry_only_applies_while_reset() {
        let now = Utc::now();
        let mut login = LoginRecord {
            meta: RecordMeta::created("DOC1", "HOS1"),
            email: "doc@example.com".into(),
            phone_no: "1".into(),
            collection: "DOCTOR".into(),
            password_hash: "x".into(),
            reset: true,
            otp_expires_at: Some(now + Duration::minutes(5)),
        };
        assert!(!login.otp_expired(now));
        assert!(login.otp_expired(now + Duration::minutes(6)));

        login.reset = false;
        assert!(!login.otp_expired(now + Duration::minutes(6)));
    }
}
