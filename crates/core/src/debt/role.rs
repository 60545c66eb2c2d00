use crate::models::Debt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Debtor,
    Lender,
    Observer,
}

/// Exact, case-sensitive match of the viewer against both sides of the debt.
pub fn classify(debt: &Debt, viewer_id: Option<&str>) -> Role {
    let Some(viewer) = viewer_id else {
        return Role::Observer;
    };
    if debt.debtor.id == viewer {
        Role::Debtor
    } else if debt.lender.id == viewer {
        Role::Lender
    } else {
        Role::Observer
    }
}
