use crate::error::SyncError;
use crate::loader::{FetchOutcome, Loader, PagedCollection};
use crate::mutation::{apply_on_success, Mutation};
use crate::notice::Notice;
use crate::source::DebtPages;
use api::ExpenseApi;
use serde::Serialize;
use splitdebt_core::debt::{describe_for_viewer, DebtAction, DebtView};
use splitdebt_core::models::Debt;
use splitdebt_core::money::format_rub;
use splitdebt_core::session::Session;
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

const UNKNOWN_VIEWER: &str = "Не найден текущий пользователь: роли (должник/заемщик) определить \
                              нельзя, поэтому кнопки действий скрыты.";

/// A debt as the current viewer should see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebtRow {
    pub debt: Debt,
    pub view: DebtView,
    pub amount: String,
    /// A send/confirm for this debt is outstanding.
    pub busy: bool,
}

/// The debts of one event, paged in and annotated for one viewer.
pub struct DebtBoard {
    api: Arc<dyn ExpenseApi>,
    event_id: String,
    session: Session,
    loader: Loader<DebtPages>,
}

impl DebtBoard {
    pub fn new(
        api: Arc<dyn ExpenseApi>,
        event_id: impl Into<String>,
        session: Session,
        page_size: u32,
    ) -> Self {
        let event_id = event_id.into();
        let loader = Loader::new(DebtPages::new(Arc::clone(&api), event_id.clone()), page_size);
        if !session.is_identified() {
            tracing::warn!(%event_id, "no current viewer; debt actions are disabled");
        }
        Self {
            api,
            event_id,
            session,
            loader,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn loader(&self) -> &Loader<DebtPages> {
        &self.loader
    }

    pub fn snapshot(&self) -> PagedCollection<Debt> {
        self.loader.snapshot()
    }

    /// Informational banner shown while no viewer identity is known.
    pub fn banner(&self) -> Option<Notice> {
        (!self.session.is_identified()).then(|| Notice::info(UNKNOWN_VIEWER))
    }

    /// Error banner for the last failed page load, with retry offered.
    pub fn load_error(&self) -> Option<Notice> {
        self.loader
            .snapshot()
            .last_error()
            .map(|message| Notice::error(message).retryable())
    }

    pub fn rows(&self) -> Vec<DebtRow> {
        let viewer = self.session.viewer_id();
        self.loader
            .items()
            .into_iter()
            .map(|debt| DebtRow {
                view: describe_for_viewer(&debt, viewer),
                amount: format_rub(debt.amount),
                busy: self.loader.is_mutating(&debt.id),
                debt,
            })
            .collect()
    }

    pub async fn load_more(&self) -> FetchOutcome {
        self.loader.request_next_page().await
    }

    pub async fn retry(&self) -> FetchOutcome {
        self.loader.retry().await
    }

    /// Point the board at another event; everything loaded so far is dropped.
    pub fn switch_event(&mut self, event_id: impl Into<String>) {
        self.event_id = event_id.into();
        self.loader
            .rescope(DebtPages::new(Arc::clone(&self.api), self.event_id.clone()));
    }

    /// Swap the viewer, e.g. after login or logout. Loaded debts are kept;
    /// only their presentation changes.
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    pub async fn send(&self, debt_id: &str) -> Result<(), SyncError> {
        self.perform(debt_id, DebtAction::Send).await
    }

    pub async fn confirm(&self, debt_id: &str) -> Result<(), SyncError> {
        self.perform(debt_id, DebtAction::Confirm).await
    }

    /// Runs `action` if the viewer's role and the debt's status allow it,
    /// updating the local row once the server has accepted it.
    pub async fn perform(&self, debt_id: &str, action: DebtAction) -> Result<(), SyncError> {
        let debt = self
            .loader
            .find(debt_id)
            .ok_or_else(|| SyncError::UnknownItem(debt_id.to_string()))?;
        let view = describe_for_viewer(&debt, self.session.viewer_id());
        if view.action != Some(action) {
            tracing::warn!(
                event_id = %self.event_id,
                %debt_id,
                ?action,
                role = ?view.role,
                status = ?view.status,
                "refusing debt action"
            );
            return Err(SyncError::NotPermitted {
                debt_id: debt_id.to_string(),
                action,
            });
        }

        let id = debt_id.to_string();
        match action {
            DebtAction::Send => {
                apply_on_success(
                    &self.loader,
                    Some(debt_id),
                    self.api.send_debt(&self.event_id, debt_id),
                    move |_| Mutation::mark_sent(id),
                    "Не удалось выполнить оплату",
                )
                .await
            }
            DebtAction::Confirm => {
                apply_on_success(
                    &self.loader,
                    Some(debt_id),
                    self.api.confirm_debt(&self.event_id, debt_id),
                    move |_| Mutation::mark_confirmed(id),
                    "Не удалось подтвердить оплату",
                )
                .await
            }
        }
    }
}
