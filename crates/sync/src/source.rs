use anyhow::{Context, Result};
use api::{EventFilter, ExpenseApi};
use async_trait::async_trait;
use splitdebt_core::models::{Debt, EventSummary, Identified, Page, Participant};
use std::sync::Arc;

/// A remote collection that can be read one offset/limit window at a time.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Item: Identified + Clone + Send + Sync + 'static;

    /// Short collection name for logs.
    fn collection(&self) -> &'static str;

    /// Text shown when a page fails to load and the error carries no message.
    fn failure_message(&self) -> &'static str {
        "Не удалось загрузить данные"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<Self::Item>>;
}

pub struct EventPages {
    api: Arc<dyn ExpenseApi>,
    filter: EventFilter,
}

impl EventPages {
    pub fn new(api: Arc<dyn ExpenseApi>, filter: EventFilter) -> Self {
        Self { api, filter }
    }
}

#[async_trait]
impl PageSource for EventPages {
    type Item = EventSummary;

    fn collection(&self) -> &'static str {
        "events"
    }

    fn failure_message(&self) -> &'static str {
        "Не удалось загрузить события"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<EventSummary>> {
        self.api
            .list_events(offset, limit, &self.filter)
            .await
            .context("Не удалось загрузить события")
    }
}

pub struct DebtPages {
    api: Arc<dyn ExpenseApi>,
    event_id: String,
}

impl DebtPages {
    pub fn new(api: Arc<dyn ExpenseApi>, event_id: impl Into<String>) -> Self {
        Self {
            api,
            event_id: event_id.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

#[async_trait]
impl PageSource for DebtPages {
    type Item = Debt;

    fn collection(&self) -> &'static str {
        "debts"
    }

    fn failure_message(&self) -> &'static str {
        "Не удалось загрузить долги"
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<Debt>> {
        self.api
            .list_debts(&self.event_id, offset, limit)
            .await
            .with_context(|| format!("Не удалось загрузить долги события {}", self.event_id))
    }
}

pub struct ParticipantPages {
    api: Arc<dyn ExpenseApi>,
    event_id: String,
    user_id: Option<String>,
}

impl ParticipantPages {
    pub fn new(api: Arc<dyn ExpenseApi>, event_id: impl Into<String>) -> Self {
        Self {
            api,
            event_id: event_id.into(),
            user_id: None,
        }
    }

    /// Only participants linked to this account.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[async_trait]
impl PageSource for ParticipantPages {
    type Item = Participant;

    fn collection(&self) -> &'static str {
        "participants"
    }

    fn failure_message(&self) -> &'static str {
        "Не удалось загрузить участников."
    }

    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<Participant>> {
        self.api
            .list_participants(&self.event_id, offset, limit, self.user_id.as_deref())
            .await
            .context("Не удалось загрузить участников.")
    }
}
