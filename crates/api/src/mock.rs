use super::{ApiError, EventFilter, ExpenseApi};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use splitdebt_core::models::{
    Debt, EventDraft, EventSummary, NewParticipant, Page, PartyRef, Participant, Purchase,
    PurchaseDraft, User,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

/// Every call the mock serves, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListEvents,
    GetEvent,
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
    ListDebts,
    GetDebt,
    SendDebt,
    ConfirmDebt,
    ListParticipants,
    GetParticipant,
    CreateParticipant,
    DeleteParticipant,
    GetPurchase,
    CreatePurchase,
    UpdatePurchase,
    DeletePurchase,
    Account,
}

#[derive(Debug, Default)]
struct MockState {
    events: Vec<EventSummary>,
    debts: HashMap<String, Vec<Debt>>,
    participants: HashMap<String, Vec<Participant>>,
    purchases: HashMap<String, Vec<Purchase>>,
    account: Option<User>,
    fail_next: HashMap<Op, String>,
    calls: HashMap<Op, usize>,
}

/// In-memory expense server. Lists are served in stored order; every call
/// suspends at least once, like a network round trip would.
#[derive(Default)]
pub struct MockApi {
    state: RwLock<MockState>,
    max_latency_ms: u64,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Adds a random delay of up to `max_ms` to every call.
    pub fn with_latency(mut self, max_ms: u64) -> Self {
        self.max_latency_ms = max_ms;
        self
    }

    pub fn with_account(mut self, user: User) -> Self {
        self.state.get_mut().account = Some(user);
        self
    }

    pub fn with_events(mut self, events: Vec<EventSummary>) -> Self {
        self.state.get_mut().events.extend(events);
        self
    }

    pub fn with_debts(mut self, event_id: &str, debts: Vec<Debt>) -> Self {
        self.state
            .get_mut()
            .debts
            .entry(event_id.to_string())
            .or_default()
            .extend(debts);
        self
    }

    pub fn with_participants(mut self, event_id: &str, participants: Vec<Participant>) -> Self {
        self.state
            .get_mut()
            .participants
            .entry(event_id.to_string())
            .or_default()
            .extend(participants);
        self
    }

    /// A small demo data set with one event, three participants and a few debts.
    pub fn demo() -> Self {
        let party = |id: &str, name: &str| PartyRef {
            id: id.to_string(),
            name: Some(name.to_string()),
        };
        let debt = |id: &str, debtor: PartyRef, lender: PartyRef, amount: f64, sent, confirmed| {
            Debt {
                id: id.to_string(),
                debtor,
                lender,
                amount: Some(amount),
                is_sent: sent,
                is_confirmed: confirmed,
            }
        };
        let anna = party("user-anna", "Анна");
        let boris = party("user-boris", "Борис");
        let vera = party("user-vera", "Вера");

        Self::new()
            .with_account(User {
                id: anna.id.clone(),
                name: anna.name.clone(),
                email: Some("anna@example.com".to_string()),
            })
            .with_events(vec![EventSummary {
                id: "event-trip".to_string(),
                name: "Поездка на Байкал".to_string(),
                description: Some("Общие расходы за неделю".to_string()),
                starts_at: Utc::now() - ChronoDuration::days(10),
                ends_at: Some(Utc::now() - ChronoDuration::days(3)),
                is_completed: false,
                owner: Some(anna.clone()),
            }])
            .with_participants(
                "event-trip",
                [&anna, &boris, &vera]
                    .into_iter()
                    .map(|p| Participant {
                        id: format!("participant-{}", p.id),
                        display_name: p.name.clone(),
                        user_id: Some(p.id.clone()),
                    })
                    .collect(),
            )
            .with_debts(
                "event-trip",
                vec![
                    debt("debt-1", anna.clone(), boris.clone(), 1250.0, false, false),
                    debt("debt-2", vera.clone(), anna.clone(), 830.5, true, false),
                    debt("debt-3", boris.clone(), vera.clone(), 400.0, true, true),
                ],
            )
    }

    /// Makes the next call of `op` fail with a server error carrying `message`.
    pub async fn fail_next(&self, op: Op, message: &str) {
        let mut state = self.state.write().await;
        state.fail_next.insert(op, message.to_string());
    }

    pub async fn calls(&self, op: Op) -> usize {
        let state = self.state.read().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Inserts a debt at the head of the stored list, shifting every later
    /// offset by one. Simulates another client writing concurrently.
    pub async fn insert_debt_front(&self, event_id: &str, debt: Debt) {
        let mut state = self.state.write().await;
        state
            .debts
            .entry(event_id.to_string())
            .or_default()
            .insert(0, debt);
    }

    pub async fn debt(&self, event_id: &str, debt_id: &str) -> Option<Debt> {
        let state = self.state.read().await;
        state
            .debts
            .get(event_id)
            .and_then(|debts| debts.iter().find(|d| d.id == debt_id).cloned())
    }

    async fn enter(&self, op: Op) -> Result<()> {
        if self.max_latency_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_latency_ms);
            sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }

        let mut state = self.state.write().await;
        *state.calls.entry(op).or_default() += 1;
        match state.fail_next.remove(&op) {
            Some(message) => Err(ApiError::Server {
                status: 500,
                code: Some("MOCK_FAILURE".to_string()),
                message,
            }
            .into()),
            None => Ok(()),
        }
    }
}

fn window<T: Clone>(items: &[T], offset: u32, limit: u32) -> Page<T> {
    let start = (offset as usize).min(items.len());
    let end = start.saturating_add(limit as usize).min(items.len());
    let total_pages = if limit == 0 {
        0
    } else {
        (items.len() as u32).div_ceil(limit)
    };
    Page::new(items[start..end].to_vec()).with_total_pages(total_pages)
}

fn not_found(kind: &'static str, id: &str) -> anyhow::Error {
    ApiError::NotFound {
        kind,
        id: id.to_string(),
    }
    .into()
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

fn summary_from_draft(id: String, draft: &EventDraft, owner: Option<PartyRef>) -> EventSummary {
    EventSummary {
        id,
        name: draft.name.trim().to_string(),
        description: draft.description.clone(),
        starts_at: draft.starts_at,
        ends_at: draft.ends_at,
        is_completed: false,
        owner,
    }
}

fn purchase_from_draft(id: String, draft: &PurchaseDraft) -> Purchase {
    Purchase {
        id,
        name: draft.name.trim().to_string(),
        cost: draft.cost,
        buyer_participant_id: draft.buyer_participant_id.clone(),
        usages: draft.usages.clone(),
        is_complete: false,
    }
}

#[async_trait]
impl ExpenseApi for MockApi {
    async fn list_events(
        &self,
        offset: u32,
        limit: u32,
        filter: &EventFilter,
    ) -> Result<Page<EventSummary>> {
        self.enter(Op::ListEvents).await?;
        let state = self.state.read().await;
        let events: Vec<EventSummary> = state
            .events
            .iter()
            .filter(|e| !filter.active_only || !e.is_completed)
            .cloned()
            .collect();
        Ok(window(&events, offset, limit))
    }

    async fn get_event(&self, event_id: &str) -> Result<EventSummary> {
        self.enter(Op::GetEvent).await?;
        let state = self.state.read().await;
        state
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .ok_or_else(|| not_found("event", event_id))
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<EventSummary> {
        self.enter(Op::CreateEvent).await?;
        let mut state = self.state.write().await;
        let owner = state.account.as_ref().map(|u| PartyRef {
            id: u.id.clone(),
            name: u.name.clone(),
        });
        let event = summary_from_draft(new_id("event"), draft, owner);
        state.events.insert(0, event.clone());
        Ok(event)
    }

    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> Result<EventSummary> {
        self.enter(Op::UpdateEvent).await?;
        let mut state = self.state.write().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| not_found("event", event_id))?;
        let updated = EventSummary {
            is_completed: event.is_completed,
            ..summary_from_draft(event.id.clone(), draft, event.owner.clone())
        };
        *event = updated.clone();
        Ok(updated)
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        self.enter(Op::DeleteEvent).await?;
        let mut state = self.state.write().await;
        let before = state.events.len();
        state.events.retain(|e| e.id != event_id);
        if state.events.len() == before {
            return Err(not_found("event", event_id));
        }
        state.debts.remove(event_id);
        state.participants.remove(event_id);
        state.purchases.remove(event_id);
        Ok(())
    }

    async fn list_debts(&self, event_id: &str, offset: u32, limit: u32) -> Result<Page<Debt>> {
        self.enter(Op::ListDebts).await?;
        let state = self.state.read().await;
        let debts = state.debts.get(event_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(window(debts, offset, limit))
    }

    async fn get_debt(&self, event_id: &str, debt_id: &str) -> Result<Debt> {
        self.enter(Op::GetDebt).await?;
        let state = self.state.read().await;
        state
            .debts
            .get(event_id)
            .and_then(|debts| debts.iter().find(|d| d.id == debt_id))
            .cloned()
            .ok_or_else(|| not_found("debt", debt_id))
    }

    async fn send_debt(&self, event_id: &str, debt_id: &str) -> Result<()> {
        self.enter(Op::SendDebt).await?;
        let mut state = self.state.write().await;
        let debt = state
            .debts
            .get_mut(event_id)
            .and_then(|debts| debts.iter_mut().find(|d| d.id == debt_id))
            .ok_or_else(|| not_found("debt", debt_id))?;
        debt.is_sent = true;
        Ok(())
    }

    async fn confirm_debt(&self, event_id: &str, debt_id: &str) -> Result<()> {
        self.enter(Op::ConfirmDebt).await?;
        let mut state = self.state.write().await;
        let debt = state
            .debts
            .get_mut(event_id)
            .and_then(|debts| debts.iter_mut().find(|d| d.id == debt_id))
            .ok_or_else(|| not_found("debt", debt_id))?;
        if !debt.is_sent {
            return Err(ApiError::Server {
                status: 409,
                code: Some("DEBT_NOT_SENT".to_string()),
                message: "Долг ещё не оплачен".to_string(),
            }
            .into());
        }
        debt.is_confirmed = true;
        Ok(())
    }

    async fn list_participants(
        &self,
        event_id: &str,
        offset: u32,
        limit: u32,
        user_id: Option<&str>,
    ) -> Result<Page<Participant>> {
        self.enter(Op::ListParticipants).await?;
        let state = self.state.read().await;
        let participants: Vec<Participant> = state
            .participants
            .get(event_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|p| user_id.is_none() || p.user_id.as_deref() == user_id)
            .cloned()
            .collect();
        Ok(window(&participants, offset, limit))
    }

    async fn get_participant(&self, event_id: &str, participant_id: &str) -> Result<Participant> {
        self.enter(Op::GetParticipant).await?;
        let state = self.state.read().await;
        state
            .participants
            .get(event_id)
            .and_then(|ps| ps.iter().find(|p| p.id == participant_id))
            .cloned()
            .ok_or_else(|| not_found("participant", participant_id))
    }

    async fn create_participant(
        &self,
        event_id: &str,
        participant: &NewParticipant,
    ) -> Result<Participant> {
        self.enter(Op::CreateParticipant).await?;
        let mut state = self.state.write().await;
        if !state.events.iter().any(|e| e.id == event_id) {
            return Err(not_found("event", event_id));
        }
        let created = Participant {
            id: new_id("participant"),
            display_name: participant.display_name.clone(),
            user_id: participant.user_id.clone(),
        };
        state
            .participants
            .entry(event_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn delete_participant(&self, event_id: &str, participant_id: &str) -> Result<()> {
        self.enter(Op::DeleteParticipant).await?;
        let mut state = self.state.write().await;
        let participants = state
            .participants
            .get_mut(event_id)
            .ok_or_else(|| not_found("event", event_id))?;
        let before = participants.len();
        participants.retain(|p| p.id != participant_id);
        if participants.len() == before {
            return Err(not_found("participant", participant_id));
        }
        Ok(())
    }

    async fn get_purchase(&self, event_id: &str, purchase_id: &str) -> Result<Purchase> {
        self.enter(Op::GetPurchase).await?;
        let state = self.state.read().await;
        state
            .purchases
            .get(event_id)
            .and_then(|ps| ps.iter().find(|p| p.id == purchase_id))
            .cloned()
            .ok_or_else(|| not_found("purchase", purchase_id))
    }

    async fn create_purchase(&self, event_id: &str, draft: &PurchaseDraft) -> Result<Purchase> {
        self.enter(Op::CreatePurchase).await?;
        let mut state = self.state.write().await;
        if !state.events.iter().any(|e| e.id == event_id) {
            return Err(not_found("event", event_id));
        }
        let purchase = purchase_from_draft(new_id("purchase"), draft);
        state
            .purchases
            .entry(event_id.to_string())
            .or_default()
            .push(purchase.clone());
        Ok(purchase)
    }

    async fn update_purchase(
        &self,
        event_id: &str,
        purchase_id: &str,
        draft: &PurchaseDraft,
    ) -> Result<Purchase> {
        self.enter(Op::UpdatePurchase).await?;
        let mut state = self.state.write().await;
        let purchase = state
            .purchases
            .get_mut(event_id)
            .and_then(|ps| ps.iter_mut().find(|p| p.id == purchase_id))
            .ok_or_else(|| not_found("purchase", purchase_id))?;
        let updated = Purchase {
            is_complete: purchase.is_complete,
            ..purchase_from_draft(purchase.id.clone(), draft)
        };
        *purchase = updated.clone();
        Ok(updated)
    }

    async fn delete_purchase(&self, event_id: &str, purchase_id: &str) -> Result<()> {
        self.enter(Op::DeletePurchase).await?;
        let mut state = self.state.write().await;
        let purchases = state
            .purchases
            .get_mut(event_id)
            .ok_or_else(|| not_found("purchase", purchase_id))?;
        let before = purchases.len();
        purchases.retain(|p| p.id != purchase_id);
        if purchases.len() == before {
            return Err(not_found("purchase", purchase_id));
        }
        Ok(())
    }

    async fn account(&self) -> Result<User> {
        self.enter(Op::Account).await?;
        let state = self.state.read().await;
        state
            .account
            .clone()
            .ok_or_else(|| anyhow!("no account behind the current token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debt(id: &str) -> Debt {
        Debt {
            id: id.to_string(),
            debtor: PartyRef::default(),
            lender: PartyRef::default(),
            amount: Some(1.0),
            is_sent: false,
            is_confirmed: false,
        }
    }

    #[tokio::test]
    async fn lists_are_windowed() {
        let debts = (0..25).map(|i| debt(&format!("d{i}"))).collect();
        let api = MockApi::new().with_debts("e", debts);

        let page = api.list_debts("e", 20, 10).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].id, "d20");
        assert_eq!(page.total_pages, Some(3));

        let past_end = api.list_debts("e", 40, 10).await.unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(api.calls(Op::ListDebts).await, 2);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let api = MockApi::new().with_debts("e", vec![debt("d1")]);
        api.fail_next(Op::SendDebt, "сервер недоступен").await;

        let err = api.send_debt("e", "d1").await.unwrap_err();
        assert_eq!(crate::error_message(&err, "x"), "сервер недоступен");
        assert!(!api.debt("e", "d1").await.unwrap().is_sent);

        api.send_debt("e", "d1").await.unwrap();
        assert!(api.debt("e", "d1").await.unwrap().is_sent);
    }

    #[tokio::test]
    async fn confirm_requires_send() {
        let api = MockApi::new().with_debts("e", vec![debt("d1")]);
        let err = api.confirm_debt("e", "d1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Server { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn active_filter_hides_completed_events() {
        let mut done = MockApi::demo();
        done.state.get_mut().events[0].is_completed = true;
        let filter = EventFilter { active_only: true };
        assert!(done.list_events(0, 10, &filter).await.unwrap().items.is_empty());
        let all = done
            .list_events(0, 10, &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(all.items.len(), 1);
    }
}
