//! Batch sync paths: the scheduled polling sweep, the one-shot initial
//! backfill, and the cron wiring. One bad record never aborts a batch.

use std::sync::Arc;

use chrono::{Duration, Utc};
use loanbridge_core::{BatchReport, LoanRecord, SyncOutcome};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::SyncContext;

/// Sync every loan modified in the trailing window. The window should
/// overlap the schedule so an outage never loses records.
pub async fn run_polling_sweep(ctx: &SyncContext, hours_back: i64) -> BatchReport {
    let run_id = Uuid::new_v4();
    let cutoff = Utc::now() - Duration::hours(hours_back.max(0));
    info!(%run_id, %cutoff, "polling sweep started");

    let loans = match ctx
        .source
        .list_loans(Some(cutoff), ctx.config.poll_batch_limit)
        .await
    {
        Ok(loans) => loans,
        Err(err) => {
            error!(%run_id, %err, "failed to list modified loans");
            return failed_report(format!("listing modified loans: {err}"));
        }
    };
    sync_batch(ctx, run_id, loans).await
}

/// One-shot backfill of the most recent loans, regardless of modification
/// time. Used when pointing the service at a fresh destination account.
pub async fn run_initial_sync(ctx: &SyncContext, limit: usize) -> BatchReport {
    let run_id = Uuid::new_v4();
    info!(%run_id, limit, "initial sync started");

    let loans = match ctx.source.list_loans(None, limit).await {
        Ok(loans) => loans,
        Err(err) => {
            error!(%run_id, %err, "failed to list loans for initial sync");
            return failed_report(format!("listing loans: {err}"));
        }
    };
    sync_batch(ctx, run_id, loans).await
}

fn failed_report(message: String) -> BatchReport {
    BatchReport {
        success: false,
        errors: vec![message],
        last_run: Some(Utc::now()),
        ..BatchReport::default()
    }
}

async fn sync_batch(ctx: &SyncContext, run_id: Uuid, loans: Vec<LoanRecord>) -> BatchReport {
    let mut report = BatchReport {
        success: true,
        total: loans.len(),
        ..BatchReport::default()
    };

    for loan in &loans {
        match ctx.sync_loan(loan).await {
            Ok(SyncOutcome::Synced { .. }) => report.synced += 1,
            Ok(SyncOutcome::Skipped { .. }) => report.skipped += 1,
            Err(err) => {
                warn!(%run_id, loan_id = %loan.id, error = format!("{err:#}"), "loan sync failed");
                report.record_failure(format!("loan {}: {err:#}", loan.id));
            }
        }
    }

    report.last_run = Some(Utc::now());
    info!(
        %run_id,
        total = report.total,
        synced = report.synced,
        skipped = report.skipped,
        failed = report.failed,
        "batch finished"
    );
    report
}

/// Start the recurring polling sweep on the configured cron schedule.
pub async fn spawn_scheduler(ctx: Arc<SyncContext>) -> anyhow::Result<JobScheduler> {
    use anyhow::Context;

    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let cron = ctx.config.poll_cron.clone();
    let hours_back = ctx.config.poll_window_hours;

    let job = Job::new_async(cron.as_str(), move |_id, _lock| {
        let ctx = ctx.clone();
        Box::pin(async move {
            let report = run_polling_sweep(&ctx, hours_back).await;
            if !report.success || report.failed > 0 {
                warn!(failed = report.failed, "scheduled sweep finished with failures");
            }
        })
    })
    .with_context(|| format!("creating polling job for cron {cron}"))?;
    scheduler.add(job).await.context("adding polling job")?;
    scheduler.start().await.context("starting scheduler")?;
    info!(cron, "polling scheduler started");
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCrm, FakeSource};
    use crate::test_support::context_with;
    use loanbridge_core::BorrowerBlock;

    fn loan(id: &str, email: &str, modified_hours_ago: i64) -> LoanRecord {
        LoanRecord {
            id: id.into(),
            status: Some("Application".into()),
            loan_number: Some(format!("9{id}")),
            total_amount: Some(250_000.0),
            last_modified: Some(Utc::now() - Duration::hours(modified_hours_ago)),
            borrower: BorrowerBlock {
                name: Some(format!("Borrower {id}")),
                email: Some(email.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sweep_only_touches_recently_modified_loans() {
        let source = FakeSource::new();
        source.seed_loan(loan("a0X001", "one@example.com", 2));
        source.seed_loan(loan("a0X002", "two@example.com", 48));
        let ctx = context_with(FakeCrm::new(), source);

        let report = run_polling_sweep(&ctx, 24).await;
        assert!(report.success);
        assert_eq!(report.total, 1);
        assert_eq!(report.synced, 1);
    }

    #[tokio::test]
    async fn one_bad_record_does_not_abort_the_batch() {
        let source = FakeSource::new();
        source.seed_loan(loan("", "broken@example.com", 1));
        source.seed_loan(loan("a0X002", "ok@example.com", 1));
        let mut cancelled = loan("a0X003", "gone@example.com", 1);
        cancelled.status = Some("Cancelled".into());
        source.seed_loan(cancelled);
        let ctx = context_with(FakeCrm::new(), source);

        let report = run_polling_sweep(&ctx, 24).await;
        assert!(report.success);
        assert_eq!(report.total, 3);
        assert_eq!(report.synced, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn initial_sync_ignores_modification_times() {
        let source = FakeSource::new();
        source.seed_loan(loan("a0X001", "one@example.com", 24 * 400));
        source.seed_loan(loan("a0X002", "two@example.com", 1));
        let ctx = context_with(FakeCrm::new(), source);

        let report = run_initial_sync(&ctx, 100).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.synced, 2);
        assert!(report.last_run.is_some());
    }
}
