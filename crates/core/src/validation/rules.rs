use crate::models::{Debt, PurchaseDraft};

pub fn debt_checks(debt: &Debt) -> Vec<String> {
    let mut errs = Vec::new();

    if debt.id.is_empty() {
        errs.push("debt id is empty".to_string());
    }

    // Confirmation cannot precede the payment notice.
    if debt.is_confirmed && !debt.is_sent {
        errs.push(format!("debt {} is confirmed but was never sent", debt.id));
    }

    if let Some(amount) = debt.amount {
        if !amount.is_finite() || amount < 0.0 {
            errs.push(format!("debt {} has invalid amount {amount}", debt.id));
        }
    }

    if !debt.debtor.id.is_empty() && debt.debtor.id == debt.lender.id {
        errs.push(format!("debt {} has the same debtor and lender", debt.id));
    }

    errs
}

pub fn purchase_checks(draft: &PurchaseDraft) -> Vec<String> {
    let mut errs = Vec::new();

    if draft.name.trim().is_empty() {
        errs.push("purchase name is mandatory".to_string());
    }

    if !draft.cost.is_finite() || draft.cost < 0.0 {
        errs.push("purchase cost must be a non-negative number".to_string());
    }

    if draft.buyer_participant_id.is_empty() {
        errs.push("purchase buyer is mandatory".to_string());
    }

    for usage in &draft.usages {
        if usage.participant_id.is_empty() {
            errs.push("purchase usage without participant".to_string());
        } else if !(usage.share.is_finite() && usage.share > 0.0) {
            errs.push(format!(
                "usage share for participant {} must be positive",
                usage.participant_id
            ));
        }
    }

    errs
}
