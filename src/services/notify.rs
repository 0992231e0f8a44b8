//! One-time password hand-off. Delivery transport is not part of this service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A freshly issued one-time password for a new account.
#[derive(Debug, Clone)]
pub struct OtpNotice {
    pub code: String,
    pub collection: &'static str,
    pub mail: String,
    pub phone_no: String,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(&self, notice: &OtpNotice) -> anyhow::Result<()>;
}

/// Records that an OTP was issued without revealing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp(&self, notice: &OtpNotice) -> anyhow::Result<()> {
        tracing::info!(
            code = %notice.code,
            collection = notice.collection,
            mail = %notice.mail,
            expires_at = %notice.expires_at,
            "One-time password issued"
        );
        Ok(())
    }
}
