use std::fmt;

/// Resolved identity for which data and rate-limit keys are scoped.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub subject_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(subject_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            access_token: access_token.into(),
        }
    }
}

// Keep tokens out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject_id", &self.subject_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
