//! Caller secrets and the fingerprints derived from them.

use super::rules::CallerId;
use crate::error::{Result, SyncError};

/// Number of trailing secret characters used as the matching fingerprint.
pub const FINGERPRINT_LEN: usize = 5;

/// An opaque per-caller credential.
#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the fingerprint: the last [`FINGERPRINT_LEN`] characters.
    pub fn fingerprint(&self, caller_id: CallerId) -> Result<String> {
        let len = self.0.chars().count();
        if len < FINGERPRINT_LEN {
            return Err(SyncError::InvalidSecret {
                caller_id,
                min_len: FINGERPRINT_LEN,
            });
        }
        Ok(self.0.chars().skip(len - FINGERPRINT_LEN).collect())
    }

    /// The secret with everything but the fingerprint masked.
    pub fn masked(&self) -> String {
        let len = self.0.chars().count();
        let tail: String = self.0.chars().skip(len.saturating_sub(FINGERPRINT_LEN)).collect();
        format!("***{}", tail)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Secret").field(&"<redacted>").finish()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}
