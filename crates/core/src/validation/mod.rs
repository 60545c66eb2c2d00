mod rules;

use crate::models::{Debt, PurchaseDraft};

/// Checks a debt received from the server. Violations are reported, the record
/// itself is still usable.
pub fn validate_debt(debt: &Debt) -> Result<(), Vec<String>> {
    collect(rules::debt_checks(debt))
}

pub fn validate_purchase(draft: &PurchaseDraft) -> Result<(), Vec<String>> {
    collect(rules::purchase_checks(draft))
}

fn collect(errs: Vec<String>) -> Result<(), Vec<String>> {
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}
