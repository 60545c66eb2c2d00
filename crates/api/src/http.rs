use super::{
    wire::{
        DebtEntry, ErrorEntry, EventShortEntry, PagedEntry, ParticipantEntry, PurchaseEntry,
        UpsertEventEntry, UpsertParticipantEntry, UpsertPurchaseEntry, UserEntry,
    },
    ApiError, EventFilter, ExpenseApi,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use splitdebt_core::models::{
    Debt, EventDraft, EventSummary, NewParticipant, Page, Participant, Purchase, PurchaseDraft,
    User,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_BASE_URL: &str = "https://localhost:7654";

/// REST/JSON client for the expense server.
#[derive(Clone)]
pub struct HttpClient {
    pub base_url: String,
    http_client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
    pub fn new(base_url: String) -> Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Arc::new(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            access_token: Arc::new(RwLock::new(None)),
        }))
    }

    pub async fn set_token(&self, token: String) {
        let mut guard = self.access_token.write().await;
        *guard = Some(token);
    }

    pub async fn clear_token(&self) {
        let mut guard = self.access_token.write().await;
        *guard = None;
    }

    pub async fn has_token(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    /// `{base}/api/v1/` followed by `segments`, each percent-encoded, so an
    /// id containing `/` or `?` stays a single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API base URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("API base URL {} cannot have a path", self.base_url))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self.http_client.request(method, self.url(segments)?);
        let token = self.access_token.read().await;
        Ok(match token.as_ref() {
            Some(t) => builder.header("Authorization", format!("Bearer {}", t)),
            None => builder,
        })
    }

    async fn execute(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .with_context(|| format!("Failed to {what}"))?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorEntry>(&body) {
            Ok(ErrorEntry {
                message: Some(message),
                error_code,
                http_status,
            }) => ApiError::Server {
                status: http_status.unwrap_or(status),
                code: error_code,
                message,
            },
            _ => ApiError::Status { status, body },
        };
        tracing::warn!(status, error = %err, "{what} failed");
        Err(err.into())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let builder = self.request(Method::GET, segments).await?.query(query);
        let resp = self.execute(builder, what).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response to {what}"))
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
        what: &str,
    ) -> Result<T> {
        let builder = self.request(method, segments).await?.json(body);
        let resp = self.execute(builder, what).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response to {what}"))
    }

    async fn send_empty(&self, method: Method, segments: &[&str], what: &str) -> Result<()> {
        let builder = self.request(method, segments).await?;
        self.execute(builder, what).await?;
        Ok(())
    }
}

fn window(offset: u32, limit: u32) -> Vec<(&'static str, String)> {
    vec![("offset", offset.to_string()), ("limit", limit.to_string())]
}

#[async_trait]
impl ExpenseApi for HttpClient {
    async fn list_events(
        &self,
        offset: u32,
        limit: u32,
        filter: &EventFilter,
    ) -> Result<Page<EventSummary>> {
        let mut query = window(offset, limit);
        if filter.active_only {
            query.push(("isActive", "true".to_string()));
        }
        let entry: PagedEntry<EventShortEntry> =
            self.get_json(&["events"], &query, "load events").await?;
        entry.into_page(EventSummary::try_from)
    }

    async fn get_event(&self, event_id: &str) -> Result<EventSummary> {
        let entry: EventShortEntry = self
            .get_json(&["events", event_id], &[], "load event")
            .await?;
        entry.try_into()
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<EventSummary> {
        let entry: EventShortEntry = self
            .send_json(
                Method::POST,
                &["events"],
                &UpsertEventEntry::from(draft),
                "create event",
            )
            .await?;
        let event: EventSummary = entry.try_into()?;
        tracing::info!(event_id = %event.id, "event created");
        Ok(event)
    }

    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> Result<EventSummary> {
        let entry: EventShortEntry = self
            .send_json(
                Method::PATCH,
                &["events", event_id],
                &UpsertEventEntry::from(draft),
                "update event",
            )
            .await?;
        entry.try_into()
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, &["events", event_id], "delete event")
            .await
    }

    async fn list_debts(&self, event_id: &str, offset: u32, limit: u32) -> Result<Page<Debt>> {
        let entry: PagedEntry<DebtEntry> = self
            .get_json(
                &["events", event_id, "debts"],
                &window(offset, limit),
                "load debts",
            )
            .await?;
        entry.into_page(Debt::try_from)
    }

    async fn get_debt(&self, event_id: &str, debt_id: &str) -> Result<Debt> {
        let entry: DebtEntry = self
            .get_json(&["events", event_id, "debts", debt_id], &[], "load debt")
            .await?;
        entry.try_into()
    }

    async fn send_debt(&self, event_id: &str, debt_id: &str) -> Result<()> {
        self.send_empty(
            Method::POST,
            &["events", event_id, "debts", debt_id, "send"],
            "send debt",
        )
        .await?;
        tracing::info!(%event_id, %debt_id, "debt marked as sent");
        Ok(())
    }

    async fn confirm_debt(&self, event_id: &str, debt_id: &str) -> Result<()> {
        self.send_empty(
            Method::POST,
            &["events", event_id, "debts", debt_id, "confirm"],
            "confirm debt",
        )
        .await?;
        tracing::info!(%event_id, %debt_id, "debt confirmed");
        Ok(())
    }

    async fn list_participants(
        &self,
        event_id: &str,
        offset: u32,
        limit: u32,
        user_id: Option<&str>,
    ) -> Result<Page<Participant>> {
        let mut query = window(offset, limit);
        if let Some(user_id) = user_id {
            query.push(("userId", user_id.to_string()));
        }
        let entry: PagedEntry<ParticipantEntry> = self
            .get_json(
                &["events", event_id, "participants"],
                &query,
                "load participants",
            )
            .await?;
        entry.into_page(Participant::try_from)
    }

    async fn get_participant(&self, event_id: &str, participant_id: &str) -> Result<Participant> {
        let entry: ParticipantEntry = self
            .get_json(
                &["events", event_id, "participants", participant_id],
                &[],
                "load participant",
            )
            .await?;
        entry.try_into()
    }

    async fn create_participant(
        &self,
        event_id: &str,
        participant: &NewParticipant,
    ) -> Result<Participant> {
        let entry: ParticipantEntry = self
            .send_json(
                Method::POST,
                &["events", event_id, "participants"],
                &UpsertParticipantEntry::from(participant),
                "add participant",
            )
            .await?;
        entry.try_into()
    }

    async fn delete_participant(&self, event_id: &str, participant_id: &str) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            &["events", event_id, "participants", participant_id],
            "remove participant",
        )
        .await
    }

    async fn get_purchase(&self, event_id: &str, purchase_id: &str) -> Result<Purchase> {
        let entry: PurchaseEntry = self
            .get_json(
                &["events", event_id, "purchases", purchase_id],
                &[],
                "load purchase",
            )
            .await?;
        entry.try_into()
    }

    async fn create_purchase(&self, event_id: &str, draft: &PurchaseDraft) -> Result<Purchase> {
        let entry: PurchaseEntry = self
            .send_json(
                Method::POST,
                &["events", event_id, "purchases"],
                &UpsertPurchaseEntry::from(draft),
                "create purchase",
            )
            .await?;
        entry.try_into()
    }

    async fn update_purchase(
        &self,
        event_id: &str,
        purchase_id: &str,
        draft: &PurchaseDraft,
    ) -> Result<Purchase> {
        let entry: PurchaseEntry = self
            .send_json(
                Method::PATCH,
                &["events", event_id, "purchases", purchase_id],
                &UpsertPurchaseEntry::from(draft),
                "update purchase",
            )
            .await?;
        entry.try_into()
    }

    async fn delete_purchase(&self, event_id: &str, purchase_id: &str) -> Result<()> {
        self.send_empty(
            Method::DELETE,
            &["events", event_id, "purchases", purchase_id],
            "delete purchase",
        )
        .await
    }

    async fn account(&self) -> Result<User> {
        let entry: UserEntry = self.get_json(&["auth", "account"], &[], "load account").await?;
        entry.try_into()
    }
}
