use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a freshly created item lands in an already loaded list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    Front,
    Back,
}

/// Anything a paged list can hold: it has a stable server identifier.
pub trait Identified {
    fn id(&self) -> &str;

    /// Where `create` puts a new item of this kind.
    const NEW_ITEM_PLACEMENT: Placement = Placement::Back;
}

/// One side of a debt: a participant linked to a registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PartyRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub id: String,
    pub debtor: PartyRef,
    pub lender: PartyRef,
    pub amount: Option<f64>,
    pub is_sent: bool,
    /// Arrives on the wire as `isComfirmed`; see `api::wire`.
    pub is_confirmed: bool,
}

impl Identified for Debt {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: Option<String>,
    /// `None` for a participant that is not linked to any registered account.
    pub user_id: Option<String>,
}

impl Identified for Participant {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub display_name: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseUsage {
    pub participant_id: String,
    /// Share count or multiplier, not necessarily money.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub name: String,
    pub cost: f64,
    pub buyer_participant_id: String,
    pub usages: Vec<PurchaseUsage>,
    /// Set by the server once the purchase has been settled into debts.
    pub is_complete: bool,
}

impl Identified for Purchase {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDraft {
    pub name: String,
    pub cost: f64,
    pub buyer_participant_id: String,
    pub usages: Vec<PurchaseUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub owner: Option<PartyRef>,
}

impl Identified for EventSummary {
    fn id(&self) -> &str {
        &self.id
    }

    const NEW_ITEM_PLACEMENT: Placement = Placement::Front;
}

/// Body for both event creation and event update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub name: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// The signed-in account, as stored at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// One page of a remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_pages: Option<u32>,
    /// Entries the server sent that could not be read. They still count
    /// towards the page size.
    #[serde(default)]
    pub skipped: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_pages: None,
            skipped: 0,
        }
    }

    pub fn with_total_pages(mut self, total_pages: u32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }

    /// Whether a page after `page_index` (zero based) may exist according to
    /// `total_pages`. An absent count means one more page remains.
    pub fn more_after(&self, page_index: u32) -> bool {
        match self.total_pages {
            Some(total) => page_index + 1 < total,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_total_pages_never_ends_paging() {
        let page: Page<u8> = Page::new(vec![1, 2]);
        assert!(page.more_after(0));
        assert!(page.more_after(40));
    }

    #[test]
    fn total_pages_bounds_paging() {
        let page: Page<u8> = Page::new(vec![1]).with_total_pages(3);
        assert!(page.more_after(1));
        assert!(!page.more_after(2));
    }

    #[test]
    fn events_are_created_at_front() {
        assert_eq!(EventSummary::NEW_ITEM_PLACEMENT, Placement::Front);
        assert_eq!(Participant::NEW_ITEM_PLACEMENT, Placement::Back);
    }
}
