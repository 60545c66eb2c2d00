use anyhow::Result;
use async_trait::async_trait;
use splitdebt_core::models::{
    Debt, EventDraft, EventSummary, NewParticipant, Page, Participant, Purchase, PurchaseDraft,
    User,
};

/// Query options for the events collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub active_only: bool,
}

/// Failure reported by the expense server.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// The server answered with its structured error body.
    #[error("{message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// Non-success status with a body that is not a structured error.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

/// The remote expense service. Every list call takes an offset/limit window;
/// single-item mutations report only success or failure.
#[async_trait]
pub trait ExpenseApi: Send + Sync {
    async fn list_events(
        &self,
        offset: u32,
        limit: u32,
        filter: &EventFilter,
    ) -> Result<Page<EventSummary>>;
    async fn get_event(&self, event_id: &str) -> Result<EventSummary>;
    async fn create_event(&self, draft: &EventDraft) -> Result<EventSummary>;
    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> Result<EventSummary>;
    async fn delete_event(&self, event_id: &str) -> Result<()>;

    async fn list_debts(&self, event_id: &str, offset: u32, limit: u32) -> Result<Page<Debt>>;
    async fn get_debt(&self, event_id: &str, debt_id: &str) -> Result<Debt>;
    async fn send_debt(&self, event_id: &str, debt_id: &str) -> Result<()>;
    async fn confirm_debt(&self, event_id: &str, debt_id: &str) -> Result<()>;

    async fn list_participants(
        &self,
        event_id: &str,
        offset: u32,
        limit: u32,
        user_id: Option<&str>,
    ) -> Result<Page<Participant>>;
    async fn get_participant(&self, event_id: &str, participant_id: &str) -> Result<Participant>;
    async fn create_participant(
        &self,
        event_id: &str,
        participant: &NewParticipant,
    ) -> Result<Participant>;
    async fn delete_participant(&self, event_id: &str, participant_id: &str) -> Result<()>;

    async fn get_purchase(&self, event_id: &str, purchase_id: &str) -> Result<Purchase>;
    async fn create_purchase(&self, event_id: &str, draft: &PurchaseDraft) -> Result<Purchase>;
    async fn update_purchase(
        &self,
        event_id: &str,
        purchase_id: &str,
        draft: &PurchaseDraft,
    ) -> Result<Purchase>;
    async fn delete_purchase(&self, event_id: &str, purchase_id: &str) -> Result<()>;

    /// The account behind the current access token.
    async fn account(&self) -> Result<User>;
}

/// User-facing text for a failed call: the server's own message when it sent
/// one, otherwise the error text, otherwise `fallback`.
pub fn error_message(err: &anyhow::Error, fallback: &str) -> String {
    if let Some(ApiError::Server { message, .. }) = err.downcast_ref::<ApiError>() {
        if !message.trim().is_empty() {
            return message.clone();
        }
    }
    let text = err.to_string();
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

pub mod http;
pub mod mock;
pub mod wire;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn server_message_wins_over_context() {
        let err = anyhow::Error::new(ApiError::Server {
            status: 409,
            code: Some("DEBT_NOT_SENT".into()),
            message: "Долг ещё не оплачен".into(),
        })
        .context("confirm failed");
        assert_eq!(error_message(&err, "fallback"), "Долг ещё не оплачен");
    }

    #[test]
    fn blank_server_message_falls_through() {
        let err = anyhow::Error::new(ApiError::Server {
            status: 500,
            code: None,
            message: "  ".into(),
        });
        assert_eq!(error_message(&err, "Не удалось"), "Не удалось");
    }

    #[test]
    fn plain_errors_use_their_text() {
        let err: anyhow::Error = Err::<(), _>(std::io::Error::other("timeout"))
            .context("Failed to load debts")
            .unwrap_err();
        assert_eq!(error_message(&err, "fallback"), "Failed to load debts");
    }
}
