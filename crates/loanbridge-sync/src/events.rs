//! Inbound change-notification handling. The source system pushes change
//! events describing which records moved; each one is re-fetched in full
//! and run through the resolver, so a stale or thin payload can't corrupt
//! the destination.

use loanbridge_core::{ChangeKind, DealId, SkipReason, SyncOutcome};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::SyncContext;

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeNotification {
    pub data: ChangeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeData {
    pub payload: ChangePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePayload {
    #[serde(rename = "ChangeEventHeader")]
    pub header: ChangeHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeHeader {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "changeType")]
    pub change_type: ChangeKind,
    #[serde(rename = "recordIds", default)]
    pub record_ids: Vec<String>,
}

/// Outcome of one record within a change event. Failures are reported in
/// the body; the transport-level acknowledgement is unconditional.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<DealId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventReport {
    fn skipped(loan_id: Option<String>, reason: SkipReason) -> Self {
        Self {
            success: true,
            loan_id,
            deal_id: None,
            skipped: Some(reason),
            error: None,
        }
    }

    fn synced(loan_id: String, deal_id: DealId) -> Self {
        Self {
            success: true,
            loan_id: Some(loan_id),
            deal_id: Some(deal_id),
            skipped: None,
            error: None,
        }
    }

    fn failed(loan_id: Option<String>, error: String) -> Self {
        Self {
            success: false,
            loan_id,
            deal_id: None,
            skipped: None,
            error: Some(error),
        }
    }
}

/// Process one change notification, one report per record id it names.
pub async fn handle_change(ctx: &SyncContext, event: &ChangeNotification) -> Vec<EventReport> {
    let header = &event.data.payload.header;

    if !header
        .entity_name
        .eq_ignore_ascii_case(&ctx.config.entity_name)
    {
        info!(entity = header.entity_name, "ignoring event for foreign entity");
        return vec![EventReport::skipped(None, SkipReason::WrongEntity)];
    }
    if header.change_type == ChangeKind::Delete {
        info!("ignoring delete event; deals are retired manually");
        return vec![EventReport::skipped(None, SkipReason::DeleteEvent)];
    }
    if header.record_ids.is_empty() {
        warn!("change event carried no record ids");
        return vec![EventReport::skipped(None, SkipReason::MissingRecordId)];
    }

    let mut reports = Vec::with_capacity(header.record_ids.len());
    for record_id in &header.record_ids {
        reports.push(sync_one(ctx, record_id).await);
    }
    reports
}

async fn sync_one(ctx: &SyncContext, record_id: &str) -> EventReport {
    let loan = match ctx.source.get_loan(record_id).await {
        Ok(loan) => loan,
        Err(err) => {
            warn!(record_id, %err, "failed to fetch changed loan");
            return EventReport::failed(Some(record_id.to_string()), err.to_string());
        }
    };

    if !ctx.config.owner_filter.is_empty() {
        let owned = loan
            .loan_officer
            .as_deref()
            .is_some_and(|officer| officer.eq_ignore_ascii_case(&ctx.config.owner_filter));
        if !owned {
            return EventReport::skipped(Some(loan.id), SkipReason::OwnerMismatch);
        }
    }

    match ctx.sync_loan(&loan).await {
        Ok(SyncOutcome::Synced { deal_id }) => EventReport::synced(loan.id, deal_id),
        Ok(SyncOutcome::Skipped { reason }) => EventReport::skipped(Some(loan.id), reason),
        Err(err) => {
            warn!(loan_id = %loan.id, error = format!("{err:#}"), "change-event sync failed");
            EventReport::failed(Some(loan.id), format!("{err:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCrm, FakeSource};
    use crate::test_support::context_with;
    use loanbridge_core::{BorrowerBlock, LoanRecord};
    use serde_json::json;

    fn notification(entity: &str, change: &str, ids: &[&str]) -> ChangeNotification {
        serde_json::from_value(json!({
            "data": {"payload": {"ChangeEventHeader": {
                "entityName": entity,
                "changeType": change,
                "recordIds": ids,
            }}}
        }))
        .unwrap()
    }

    fn loan() -> LoanRecord {
        LoanRecord {
            id: "a0X001".into(),
            status: Some("Application".into()),
            loan_number: Some("556677".into()),
            total_amount: Some(300_000.0),
            loan_officer: Some("officer@lender.example".into()),
            borrower: BorrowerBlock {
                name: Some("Jane Doe".into()),
                email: Some("jane@example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn foreign_entity_events_are_acknowledged_and_skipped() {
        let ctx = context_with(FakeCrm::new(), FakeSource::new());
        let reports = handle_change(&ctx, &notification("Contact", "UPDATE", &["x"])).await;
        assert!(reports[0].success);
        assert_eq!(reports[0].skipped, Some(SkipReason::WrongEntity));
    }

    #[tokio::test]
    async fn delete_events_are_not_applied() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let ctx = context_with(FakeCrm::new(), source);
        let reports = handle_change(&ctx, &notification("Loan", "DELETE", &["a0X001"])).await;
        assert_eq!(reports[0].skipped, Some(SkipReason::DeleteEvent));
    }

    #[tokio::test]
    async fn empty_record_ids_are_reported_not_errored() {
        let ctx = context_with(FakeCrm::new(), FakeSource::new());
        let reports = handle_change(&ctx, &notification("Loan", "UPDATE", &[])).await;
        assert!(reports[0].success);
        assert_eq!(reports[0].skipped, Some(SkipReason::MissingRecordId));
    }

    #[tokio::test]
    async fn update_event_syncs_the_full_refetched_loan() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let ctx = context_with(FakeCrm::new(), source);

        let reports = handle_change(&ctx, &notification("Loan", "UPDATE", &["a0X001"])).await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
        assert!(reports[0].deal_id.is_some());
    }

    #[tokio::test]
    async fn other_officers_loans_are_filtered_out() {
        let source = FakeSource::new();
        let mut foreign = loan();
        foreign.loan_officer = Some("someone.else@lender.example".into());
        source.seed_loan(foreign);
        let mut ctx = context_with(FakeCrm::new(), source);
        ctx.config.owner_filter = "officer@lender.example".into();

        let reports = handle_change(&ctx, &notification("Loan", "UPDATE", &["a0X001"])).await;
        assert_eq!(reports[0].skipped, Some(SkipReason::OwnerMismatch));
    }

    #[tokio::test]
    async fn unknown_record_id_fails_that_record_only() {
        let source = FakeSource::new();
        source.seed_loan(loan());
        let ctx = context_with(FakeCrm::new(), source);

        let reports =
            handle_change(&ctx, &notification("Loan", "UPDATE", &["missing", "a0X001"])).await;
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].success);
        assert!(reports[1].success);
    }
}
