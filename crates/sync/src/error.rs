use crate::notice::Notice;
use splitdebt_core::debt::DebtAction;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The remote call behind a mutation failed; nothing was changed locally.
    #[error("{message}")]
    Mutation { message: String, item_id: Option<String> },

    #[error("{action:?} is not available for debt {debt_id}")]
    NotPermitted { debt_id: String, action: DebtAction },

    #[error("item {0} is not loaded")]
    UnknownItem(String),

    #[error("another change to {0} is still in progress")]
    Busy(String),
}

impl SyncError {
    /// Transient notice for the view layer. Failed remote calls may be retried.
    pub fn to_notice(&self) -> Notice {
        match self {
            SyncError::Mutation { message, item_id } => {
                let notice = Notice::error(message.clone()).retryable();
                match item_id {
                    Some(id) => notice.with_item(id.clone()),
                    None => notice,
                }
            }
            SyncError::NotPermitted { debt_id, .. } => {
                Notice::warning(self.to_string()).with_item(debt_id.clone())
            }
            SyncError::UnknownItem(id) | SyncError::Busy(id) => {
                Notice::warning(self.to_string()).with_item(id.clone())
            }
        }
    }
}
