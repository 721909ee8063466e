//! Loan-officer commission recalculation. Runs after every deal write but
//! is strictly best-effort; a failure here never fails the sync.

use loanbridge_adapters::{CrmError, Fields, PipelineCrm};
use loanbridge_core::DealId;
use serde_json::json;
use tracing::debug;

use crate::config::DestSchema;
use crate::mapping::round2;

pub const COMPANY_LEAD_FLAT: f64 = 250.0;
pub const RATE_SELF_SOURCED: f64 = 0.008;
pub const RATE_REFERRED: f64 = 0.004;
pub const CAP_SELF_SOURCED: f64 = 7619.05;
pub const CAP_REFERRED: f64 = 3809.52;
pub const CAP_SELF_SOURCED_BRANCH: f64 = 3200.0;
pub const CAP_REFERRED_BRANCH: f64 = 1600.0;

/// Commission for a loan amount under the compensation plan. Company-
/// provided leads pay a flat amount regardless of size; otherwise the rate
/// depends on sourcing and branch pricing halves it with its own caps.
pub fn commission_amount(
    loan_amount: f64,
    self_sourced: bool,
    branch_pricing: bool,
    company_lead: bool,
) -> f64 {
    if company_lead {
        return COMPANY_LEAD_FLAT;
    }
    let (mut rate, mut cap) = if self_sourced {
        (RATE_SELF_SOURCED, CAP_SELF_SOURCED)
    } else {
        (RATE_REFERRED, CAP_REFERRED)
    };
    if branch_pricing {
        rate /= 2.0;
        cap = if self_sourced {
            CAP_SELF_SOURCED_BRANCH
        } else {
            CAP_REFERRED_BRANCH
        };
    }
    round2((loan_amount * rate).min(cap))
}

/// Recompute and store the commission on a deal. Skips the write when the
/// stored figure already matches, so routine re-syncs stay read-only here.
pub async fn recalculate_for_deal(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    deal_id: DealId,
) -> Result<Option<f64>, CrmError> {
    let deal = crm.get_deal(deal_id).await?;
    let amount = deal
        .value
        .or_else(|| deal.custom_number(&schema.loan_amount_key));
    let amount = match amount {
        Some(amount) if amount > 0.0 => amount,
        _ => return Ok(None),
    };

    let flag = |key: &str, yes_id: i64| {
        deal.custom_fields
            .get(key)
            .and_then(|v| v.option_id())
            .is_some_and(|id| id == yes_id)
    };
    let computed = commission_amount(
        amount,
        flag(&schema.self_sourced_key, schema.self_sourced_yes_id),
        flag(&schema.branch_pricing_key, schema.branch_pricing_yes_id),
        flag(&schema.company_lead_key, schema.company_lead_yes_id),
    );

    let stored = deal.custom_number(&schema.commission_key);
    if stored.is_some_and(|s| (s - computed).abs() < 0.005) {
        return Ok(None);
    }

    let mut fields = Fields::new();
    fields.insert(schema.commission_key.clone(), json!(computed));
    crm.update_deal(deal_id, &fields).await?;
    debug!(%deal_id, commission = computed, "commission updated");
    Ok(Some(computed))
}
