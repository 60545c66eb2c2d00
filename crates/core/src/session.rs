//! The viewer context consulted by role classification and mutations.
//!
//! A `Session` is created when the user signs in and ended at logout. Code that
//! needs to know who is looking receives it explicitly instead of reading any
//! process-wide state.

use crate::models::User;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    user: Option<User>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn signed_in(user: User) -> Self {
        Self { user: Some(user) }
    }

    /// Rebuild a session from a persisted user record. Missing or unparsable
    /// records give an anonymous session.
    pub fn from_stored_record(raw: Option<&[u8]>) -> Self {
        let Some(bytes) = raw else {
            return Self::anonymous();
        };
        match serde_json::from_slice::<User>(bytes) {
            Ok(user) => Self::signed_in(user),
            Err(err) => {
                tracing::warn!(error = %err, "stored session record is malformed; continuing anonymously");
                Self::anonymous()
            }
        }
    }

    pub fn begin(&mut self, user: User) {
        tracing::info!(user_id = %user.id, "session started");
        self.user = Some(user);
    }

    pub fn end(&mut self) {
        if let Some(user) = self.user.take() {
            tracing::info!(user_id = %user.id, "session ended");
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Identifier used for debtor/lender matching. Blank ids count as absent.
    pub fn viewer_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn is_identified(&self) -> bool {
        self.viewer_id().is_some()
    }
}
