//! Process-wide failed-login counter.
//!
//! A soft rate limit only: counts are lost on restart, and the durable
//! `isBlocked`/`loginAttempts` fields on the account record remain the
//! authoritative lockout state.

use std::collections::HashMap;
use std::sync::Mutex;

/// Failed login attempts per account code, behind a single mutex.
///
/// Injected through application state; never a global.
#[derive(Debug, Default)]
pub struct LoginAttemptTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl LoginAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure and returns the new count.
    pub fn record_failure(&self, code: &str) -> u32 {
        let mut attempts = self.lock();
        let count = attempts.entry(code.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Clears the count after a successful login or an administrative unlock.
    pub fn reset(&self, code: &str) {
        self.lock().remove(code);
    }

    pub fn attempts(&self, code: &str) -> u32 {
        self.lock().get(code).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        // A poisoned map still holds usable counts.
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
