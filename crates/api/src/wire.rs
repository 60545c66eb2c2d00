//! JSON shapes of the expense server.
//!
//! Every field the server may omit is optional here, and the conversions into
//! the core model spell out the defaults. This is the only module that knows
//! the debt confirmation flag is spelled `isComfirmed` on the wire.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitdebt_core::models::{
    Debt, EventDraft, EventSummary, NewParticipant, Page, PartyRef, Participant, Purchase,
    PurchaseDraft, PurchaseUsage, User,
};
use splitdebt_core::validation;

/// Paged list envelope: `{ "data": [...], "totalPages": n }`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedEntry<T> {
    pub data: Option<Vec<T>>,
    pub total_pages: Option<u32>,
}

impl<T> PagedEntry<T> {
    /// Converts every entry, skipping the ones that fail with a warning so
    /// one malformed record does not hide the rest of the page.
    pub fn into_page<U>(self, convert: impl Fn(T) -> Result<U>) -> Result<Page<U>> {
        let mut items = Vec::new();
        let mut skipped = 0;
        for (index, entry) in self.data.unwrap_or_default().into_iter().enumerate() {
            match convert(entry) {
                Ok(item) => items.push(item),
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping unreadable list entry");
                    skipped += 1;
                }
            }
        }
        Ok(Page {
            items,
            total_pages: self.total_pages,
            skipped,
        })
    }
}

/// Structured error body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyEntry {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl PartyEntry {
    fn into_party(self) -> PartyRef {
        PartyRef {
            id: self.id.unwrap_or_default(),
            name: self.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtEntry {
    pub id: Option<String>,
    pub debtor: Option<PartyEntry>,
    pub lender: Option<PartyEntry>,
    pub amount: Option<f64>,
    pub is_sent: Option<bool>,
    #[serde(rename = "isComfirmed")]
    pub is_comfirmed: Option<bool>,
}

impl TryFrom<DebtEntry> for Debt {
    type Error = anyhow::Error;

    fn try_from(entry: DebtEntry) -> Result<Self> {
        let id = entry.id.ok_or_else(|| anyhow!("debt entry without id"))?;
        let debt = Debt {
            id,
            debtor: entry.debtor.map(PartyEntry::into_party).unwrap_or_default(),
            lender: entry.lender.map(PartyEntry::into_party).unwrap_or_default(),
            amount: entry.amount,
            is_sent: entry.is_sent.unwrap_or(false),
            is_confirmed: entry.is_comfirmed.unwrap_or(false),
        };
        if let Err(errs) = validation::validate_debt(&debt) {
            for err in errs {
                tracing::warn!(debt_id = %debt.id, problem = %err, "server sent inconsistent debt");
            }
        }
        Ok(debt)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventShortEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub event_date_start: DateTime<Utc>,
    pub event_date_end: Option<DateTime<Utc>>,
    pub is_completed: Option<bool>,
    pub user: Option<PartyEntry>,
}

impl TryFrom<EventShortEntry> for EventSummary {
    type Error = anyhow::Error;

    fn try_from(entry: EventShortEntry) -> Result<Self> {
        Ok(EventSummary {
            id: entry.id.ok_or_else(|| anyhow!("event entry without id"))?,
            name: entry.name.unwrap_or_default(),
            description: entry.description,
            starts_at: entry.event_date_start,
            ends_at: entry.event_date_end,
            is_completed: entry.is_completed.unwrap_or(false),
            owner: entry.user.map(PartyEntry::into_party),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertEventEntry {
    pub name: String,
    pub description: Option<String>,
    pub event_date_start: DateTime<Utc>,
    pub event_date_end: Option<DateTime<Utc>>,
}

impl From<&EventDraft> for UpsertEventEntry {
    fn from(draft: &EventDraft) -> Self {
        Self {
            name: draft.name.trim().to_string(),
            description: draft
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            event_date_start: draft.starts_at,
            event_date_end: draft.ends_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub user: Option<PartyEntry>,
}

impl TryFrom<ParticipantEntry> for Participant {
    type Error = anyhow::Error;

    fn try_from(entry: ParticipantEntry) -> Result<Self> {
        let id = entry
            .id
            .ok_or_else(|| anyhow!("participant entry without id"))?;
        let (user_id, user_name) = match entry.user {
            Some(user) => (user.id, user.name),
            None => (None, None),
        };
        Ok(Participant {
            id,
            display_name: entry.name.or(user_name),
            user_id,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertParticipantEntry {
    pub name: Option<String>,
    pub user_id: Option<String>,
}

impl From<&NewParticipant> for UpsertParticipantEntry {
    fn from(p: &NewParticipant) -> Self {
        Self {
            name: p.display_name.clone(),
            user_id: p.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseUsageEntry {
    pub participant_id: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub cost: Option<f64>,
    /// The buyer.
    pub participant: Option<PartyEntry>,
    pub purchase_usages: Option<Vec<PurchaseUsageEntry>>,
    pub is_complete: Option<bool>,
}

impl TryFrom<PurchaseEntry> for Purchase {
    type Error = anyhow::Error;

    fn try_from(entry: PurchaseEntry) -> Result<Self> {
        let id = entry.id.ok_or_else(|| anyhow!("purchase entry without id"))?;
        // Usages without a participant are dropped; a missing share counts as one.
        let usages = entry
            .purchase_usages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|u| {
                u.participant_id.map(|participant_id| PurchaseUsage {
                    participant_id,
                    share: u.amount.unwrap_or(1.0),
                })
            })
            .collect();
        Ok(Purchase {
            id,
            name: entry.name.unwrap_or_default(),
            cost: entry.cost.unwrap_or(0.0),
            buyer_participant_id: entry.participant.and_then(|p| p.id).unwrap_or_default(),
            usages,
            is_complete: entry.is_complete.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertPurchaseEntry {
    pub name: String,
    pub cost: f64,
    pub participant_id: String,
    pub purchase_usages: Vec<PurchaseUsageEntry>,
}

impl From<&PurchaseDraft> for UpsertPurchaseEntry {
    fn from(draft: &PurchaseDraft) -> Self {
        Self {
            name: draft.name.trim().to_string(),
            cost: draft.cost,
            participant_id: draft.buyer_participant_id.clone(),
            purchase_usages: draft
                .usages
                .iter()
                .map(|u| PurchaseUsageEntry {
                    participant_id: Some(u.participant_id.clone()),
                    amount: Some(u.share),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl TryFrom<UserEntry> for User {
    type Error = anyhow::Error;

    fn try_from(entry: UserEntry) -> Result<Self> {
        Ok(User {
            id: entry.id.ok_or_else(|| anyhow!("account entry without id"))?,
            name: entry.name,
            email: entry.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debt_reads_misspelled_confirmation_flag() {
        let json = r#"{
            "data": [
                {"id": "d1", "debtor": {"id": "u1", "name": "Аня"}, "lender": {"id": "u2"},
                 "amount": 150.5, "isSent": true, "isComfirmed": true},
                {"id": "d2", "amount": 10}
            ],
            "totalPages": 4
        }"#;
        let entry: PagedEntry<DebtEntry> = serde_json::from_str(json).unwrap();
        let page = entry.into_page(Debt::try_from).unwrap();

        assert_eq!(page.total_pages, Some(4));
        assert!(page.items[0].is_sent && page.items[0].is_confirmed);
        assert_eq!(page.items[0].debtor.name.as_deref(), Some("Аня"));
        assert_eq!(page.items[1].debtor.id, "");
        assert!(!page.items[1].is_sent && !page.items[1].is_confirmed);
    }

    #[test]
    fn unreadable_entry_is_skipped_not_fatal() {
        let json = r#"{
            "data": [
                {"id": "d1", "amount": 10},
                {"amount": 20},
                {"id": "d3", "amount": 30}
            ],
            "totalPages": 2
        }"#;
        let entry: PagedEntry<DebtEntry> = serde_json::from_str(json).unwrap();
        let page = entry.into_page(Debt::try_from).unwrap();

        let ids: Vec<&str> = page.items.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d3"]);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.total_pages, Some(2));
    }

    #[test]
    fn missing_data_is_an_empty_page() {
        let entry: PagedEntry<DebtEntry> = serde_json::from_str("{}").unwrap();
        let page = entry.into_page(Debt::try_from).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, None);
    }

    #[test]
    fn debt_without_id_is_rejected() {
        let entry: DebtEntry = serde_json::from_str(r#"{"amount": 1}"#).unwrap();
        assert!(Debt::try_from(entry).is_err());
    }

    #[test]
    fn purchase_usage_defaults_to_one_share() {
        let json = r#"{"id": "p1", "name": "Шашлык", "cost": 3000,
            "participant": {"id": "buyer"},
            "purchaseUsages": [{"participantId": "a"}, {"amount": 2}, {"participantId": "b", "amount": 2}]}"#;
        let entry: PurchaseEntry = serde_json::from_str(json).unwrap();
        let purchase = Purchase::try_from(entry).unwrap();
        assert_eq!(purchase.buyer_participant_id, "buyer");
        assert_eq!(purchase.usages.len(), 2);
        assert_eq!(purchase.usages[0].share, 1.0);
        assert_eq!(purchase.usages[1].share, 2.0);
    }

    #[test]
    fn participant_name_falls_back_to_user() {
        let json = r#"{"id": "p1", "user": {"id": "u9", "name": "Олег"}}"#;
        let entry: ParticipantEntry = serde_json::from_str(json).unwrap();
        let participant = Participant::try_from(entry).unwrap();
        assert_eq!(participant.display_name.as_deref(), Some("Олег"));
        assert_eq!(participant.user_id.as_deref(), Some("u9"));
    }

    #[test]
    fn event_draft_trims_blank_description() {
        let draft = EventDraft {
            name: "  Поход ".into(),
            description: Some("   ".into()),
            starts_at: Utc::now(),
            ends_at: None,
        };
        let entry = UpsertEventEntry::from(&draft);
        assert_eq!(entry.name, "Поход");
        assert_eq!(entry.description, None);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("eventDateStart").is_some());
    }
}
