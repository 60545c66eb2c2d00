use serde::{Deserialize, Serialize};

/// Settlement state of a debt as seen by participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebtStatus {
    NotPaid,
    Paid,
    Done,
}

/// Total over both flags; `is_confirmed` is ignored while nothing was sent.
pub fn resolve_status(is_sent: bool, is_confirmed: bool) -> DebtStatus {
    match (is_sent, is_confirmed) {
        (false, _) => DebtStatus::NotPaid,
        (true, false) => DebtStatus::Paid,
        (true, true) => DebtStatus::Done,
    }
}

impl DebtStatus {
    pub fn label(self) -> &'static str {
        match self {
            DebtStatus::NotPaid => "Не оплачено",
            DebtStatus::Paid => "Оплачено",
            DebtStatus::Done => "Завершено",
        }
    }

    pub fn tone(self) -> StatusTone {
        match self {
            DebtStatus::NotPaid => StatusTone::Warning,
            DebtStatus::Paid => StatusTone::Info,
            DebtStatus::Done => StatusTone::Success,
        }
    }
}

/// Colour family a status chip is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTone {
    Warning,
    Info,
    Success,
}
