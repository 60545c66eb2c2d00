//! Debt lifecycle: status resolution, viewer roles and the actions each role
//! may take at each status.

mod role;
mod status;

pub use role::{classify, Role};
pub use status::{resolve_status, DebtStatus, StatusTone};

use crate::models::Debt;
use serde::{Deserialize, Serialize};

/// A state transition a viewer may request for a debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebtAction {
    /// Debtor reports the money as paid.
    Send,
    /// Lender acknowledges receipt.
    Confirm,
}

impl DebtAction {
    pub fn caption(self) -> &'static str {
        match self {
            DebtAction::Send => "Оплатить",
            DebtAction::Confirm => "Подтвердить",
        }
    }
}

/// The only two (role, status) pairs that carry an action.
pub fn allowed_action(role: Role, status: DebtStatus) -> Option<DebtAction> {
    match (role, status) {
        (Role::Debtor, DebtStatus::NotPaid) => Some(DebtAction::Send),
        (Role::Lender, DebtStatus::Paid) => Some(DebtAction::Confirm),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebtView {
    pub role: Role,
    pub status: DebtStatus,
    pub label: &'static str,
    pub tone: StatusTone,
    pub action: Option<DebtAction>,
    pub headline: String,
}

pub fn describe_for_viewer(debt: &Debt, viewer_id: Option<&str>) -> DebtView {
    let role = classify(debt, viewer_id);
    let status = resolve_status(debt.is_sent, debt.is_confirmed);
    DebtView {
        role,
        status,
        label: status.label(),
        tone: status.tone(),
        action: allowed_action(role, status),
        headline: headline(debt, role),
    }
}

const NO_NAME: &str = "—";

fn headline(debt: &Debt, role: Role) -> String {
    let debtor = debt.debtor.name.as_deref().unwrap_or(NO_NAME);
    let lender = debt.lender.name.as_deref().unwrap_or(NO_NAME);
    match role {
        Role::Debtor => format!("Вы должны: {lender}"),
        Role::Lender => format!("Вам должны: {debtor}"),
        Role::Observer => format!("{debtor} → {lender}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartyRef;

    fn debt(is_sent: bool, is_confirmed: bool) -> Debt {
        Debt {
            id: "d1".into(),
            debtor: PartyRef {
                id: "u-debtor".into(),
                name: Some("Петя".into()),
            },
            lender: PartyRef {
                id: "u-lender".into(),
                name: None,
            },
            amount: Some(250.0),
            is_sent,
            is_confirmed,
        }
    }

    #[test]
    fn unpaid_debt_for_debtor_offers_send() {
        let view = describe_for_viewer(&debt(false, false), Some("u-debtor"));
        assert_eq!(view.label, "Не оплачено");
        assert_eq!(view.action, Some(DebtAction::Send));
        assert_eq!(view.headline, "Вы должны: —");
    }

    #[test]
    fn unpaid_debt_for_lender_offers_nothing() {
        let view = describe_for_viewer(&debt(false, false), Some("u-lender"));
        assert_eq!(view.label, "Не оплачено");
        assert_eq!(view.action, None);
        assert_eq!(view.headline, "Вам должны: Петя");
    }

    #[test]
    fn paid_debt_for_lender_offers_confirm() {
        let view = describe_for_viewer(&debt(true, false), Some("u-lender"));
        assert_eq!(view.label, "Оплачено");
        assert_eq!(view.action, Some(DebtAction::Confirm));
    }

    #[test]
    fn only_two_pairs_carry_actions() {
        let roles = [Role::Debtor, Role::Lender, Role::Observer];
        let statuses = [DebtStatus::NotPaid, DebtStatus::Paid, DebtStatus::Done];
        for role in roles {
            for status in statuses {
                let expected = match (role, status) {
                    (Role::Debtor, DebtStatus::NotPaid) => Some(DebtAction::Send),
                    (Role::Lender, DebtStatus::Paid) => Some(DebtAction::Confirm),
                    _ => None,
                };
                assert_eq!(allowed_action(role, status), expected, "{role:?}/{status:?}");
            }
        }
    }

    #[test]
    fn unknown_viewer_gets_label_only() {
        for (sent, confirmed) in [(false, false), (true, false), (true, true)] {
            let view = describe_for_viewer(&debt(sent, confirmed), None);
            assert_eq!(view.role, Role::Observer);
            assert_eq!(view.action, None);
        }
        let view = describe_for_viewer(&debt(true, true), None);
        assert_eq!(view.label, "Завершено");
        assert_eq!(view.headline, "Петя → —");
    }
}
