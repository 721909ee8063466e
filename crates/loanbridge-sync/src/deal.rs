//! Loan-to-deal resolution. A loan is matched to its destination deal by a
//! fixed cascade of strategies, from cheapest to most invasive:
//!
//!   0. the durable identity mapping
//!   1. search on the external-loan-id custom field
//!   2. loan-number match across the borrower's deals (archived included)
//!   3. conversion of an open lead on the borrower
//!   4. creation of a new deal
//!
//! Earlier strategies always win, and any discovery by 1-3 is written back
//! to the mapping so the next sync takes the fast path.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use loanbridge_adapters::{PipelineCrm, Fields};
use loanbridge_core::{DealId, DealRecord, LoanRecord, PersonId, SkipReason, SyncOutcome};
use loanbridge_storage::{IdentityStore, SyncLocks};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::DestSchema;
use crate::{commission, mapping, person};

pub(crate) struct ResolveCtx<'a> {
    crm: &'a dyn PipelineCrm,
    store: &'a IdentityStore,
    schema: &'a DestSchema,
    loan: &'a LoanRecord,
    person_id: PersonId,
    archived_scan_limit: usize,
}

pub(crate) enum Resolution {
    Matched(DealId),
    Skip(SkipReason),
    Miss,
}

#[async_trait]
trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn try_resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Resolution>;
}

/// Step 0: the identity mapping. A hit here is trusted over any live
/// search, since archived deals are invisible to search.
struct StoredMapping;

#[async_trait]
impl ResolveStrategy for StoredMapping {
    fn name(&self) -> &'static str {
        "stored-mapping"
    }

    async fn try_resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Resolution> {
        let deal_id = match ctx.store.get(&ctx.loan.id).await? {
            Some(deal_id) => deal_id,
            None => return Ok(Resolution::Miss),
        };
        match ctx.crm.get_deal(deal_id).await {
            Ok(deal) if deal.is_archived_or_lost() => {
                debug!(%deal_id, "mapped deal is archived or lost");
                Ok(Resolution::Skip(SkipReason::ArchivedOrLost))
            }
            Ok(_) => Ok(Resolution::Matched(deal_id)),
            Err(err) if err.is_not_found() => {
                // Hard-deleted remotely. The mapping is kept so a re-created
                // duplicate is never silently introduced.
                warn!(%deal_id, loan_id = %ctx.loan.id, "mapped deal no longer exists");
                Ok(Resolution::Skip(SkipReason::MappedDealGone))
            }
            Err(err) => Err(err).context("fetching mapped deal"),
        }
    }
}

/// Step 1: search on the external-loan-id custom field, then the archived
/// listing, healing the mapping on any hit.
struct ExternalIdSearch;

#[async_trait]
impl ResolveStrategy for ExternalIdSearch {
    fn name(&self) -> &'static str {
        "external-id-search"
    }

    async fn try_resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Resolution> {
        let carries_loan_id = |deal: &DealRecord| {
            deal.custom_text(&ctx.schema.loan_id_key)
                .is_some_and(|stored| stored == ctx.loan.id)
        };

        let found = ctx
            .crm
            .search_deals(&ctx.loan.id, "custom_fields")
            .await
            .context("searching deals by external loan id")?
            .into_iter()
            .find(|deal| carries_loan_id(deal));
        if let Some(deal) = found {
            info!(deal_id = %deal.id, loan_id = %ctx.loan.id, "recovered mapping from deal search");
            ctx.store.put(&ctx.loan.id, deal.id).await?;
            return if deal.is_archived_or_lost() {
                Ok(Resolution::Skip(SkipReason::ArchivedOrLost))
            } else {
                Ok(Resolution::Matched(deal.id))
            };
        }

        let archived = ctx
            .crm
            .list_archived_deals(ctx.archived_scan_limit)
            .await
            .context("listing archived deals")?;
        if let Some(deal) = archived.into_iter().find(|deal| carries_loan_id(deal)) {
            info!(deal_id = %deal.id, loan_id = %ctx.loan.id, "loan's deal found in archive");
            ctx.store.put(&ctx.loan.id, deal.id).await?;
            return Ok(Resolution::Skip(SkipReason::ArchivedOrLost));
        }
        Ok(Resolution::Miss)
    }
}

/// Step 2: match by loan number among the borrower's own deals, either on
/// the loan-number custom field or embedded in the title. Scoped to the
/// person so an unrelated file with a recycled number can't collide.
struct LoanNumberMatch;

#[async_trait]
impl ResolveStrategy for LoanNumberMatch {
    fn name(&self) -> &'static str {
        "loan-number-match"
    }

    async fn try_resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Resolution> {
        let number = match ctx.loan.loan_number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => number,
            _ => return Ok(Resolution::Miss),
        };
        let title_needle = format!("Loan # {number}");
        let matches_loan = |deal: &DealRecord| {
            // A deal already claimed by a different loan is never a match.
            if deal
                .custom_text(&ctx.schema.loan_id_key)
                .is_some_and(|stored| stored != ctx.loan.id)
            {
                return false;
            }
            deal.custom_text(&ctx.schema.loan_number_key)
                .is_some_and(|stored| stored == number)
                || deal
                    .title
                    .as_deref()
                    .is_some_and(|title| title.contains(&title_needle))
        };

        let person_deals = ctx
            .crm
            .list_person_deals(ctx.person_id)
            .await
            .context("listing borrower deals")?;
        if let Some(deal) = person_deals.into_iter().find(|deal| matches_loan(deal)) {
            info!(deal_id = %deal.id, number, "matched deal by loan number");
            ctx.store.put(&ctx.loan.id, deal.id).await?;
            return if deal.is_archived_or_lost() {
                Ok(Resolution::Skip(SkipReason::ArchivedOrLost))
            } else {
                Ok(Resolution::Matched(deal.id))
            };
        }

        let archived = ctx
            .crm
            .list_archived_deals(ctx.archived_scan_limit)
            .await
            .context("listing archived deals")?;
        let archived_match = archived
            .into_iter()
            .filter(|deal| deal.person_id == Some(ctx.person_id))
            .find(|deal| matches_loan(deal));
        if let Some(deal) = archived_match {
            info!(deal_id = %deal.id, number, "loan number matched an archived deal");
            ctx.store.put(&ctx.loan.id, deal.id).await?;
            return Ok(Resolution::Skip(SkipReason::ArchivedOrLost));
        }
        Ok(Resolution::Miss)
    }
}

/// Step 3: convert an open lead on the borrower instead of creating a deal
/// from scratch, preserving the lead's history. Conversion failures fall
/// through to plain creation.
struct LeadConversion;

#[async_trait]
impl ResolveStrategy for LeadConversion {
    fn name(&self) -> &'static str {
        "lead-conversion"
    }

    async fn try_resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Resolution> {
        let leads = ctx
            .crm
            .list_person_leads(ctx.person_id)
            .await
            .context("listing borrower leads")?;
        let convertible = leads.into_iter().find(|lead| {
            let label = lead.label_text().map(|l| l.trim().to_ascii_lowercase());
            !matches!(label.as_deref(), Some("cancelled") | Some("applied"))
        });
        let lead = match convertible {
            Some(lead) => lead,
            None => return Ok(Resolution::Miss),
        };

        let seed = mapping::lead_conversion_fields(ctx.loan, ctx.schema, ctx.person_id);
        match ctx.crm.convert_lead_to_deal(&lead.id, &seed).await {
            Ok(deal_id) => {
                info!(%deal_id, lead_id = %lead.id, "converted lead into deal");
                ctx.store.put(&ctx.loan.id, deal_id).await?;
                Ok(Resolution::Matched(deal_id))
            }
            Err(err) => {
                warn!(lead_id = %lead.id, %err, "lead conversion failed, will create instead");
                Ok(Resolution::Miss)
            }
        }
    }
}

/// Orchestrates one loan sync end to end: person resolution, the strategy
/// cascade, the field write, and the follow-up commission pass.
pub struct DealResolver<'a> {
    pub crm: &'a dyn PipelineCrm,
    pub store: &'a IdentityStore,
    pub locks: &'a SyncLocks,
    pub schema: &'a DestSchema,
    pub archived_scan_limit: usize,
}

impl DealResolver<'_> {
    pub async fn resolve_loan(&self, loan: &LoanRecord) -> Result<SyncOutcome> {
        if loan.id.trim().is_empty() {
            bail!("loan record has no id");
        }
        // Held across the whole resolve so two concurrent first-syncs of
        // one loan cannot both reach creation.
        let _guard = self.locks.acquire(&loan.id).await;

        if loan.is_cancelled() {
            return self.handle_cancelled(loan).await;
        }

        let person_id = person::resolve_primary(self.crm, self.schema, loan)
            .await
            .context("resolving primary borrower")?;
        let coborrower_id = match person::resolve_coborrower(self.crm, self.schema, loan).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(loan_id = %loan.id, %err, "co-borrower resolution failed, continuing");
                None
            }
        };

        let ctx = ResolveCtx {
            crm: self.crm,
            store: self.store,
            schema: self.schema,
            loan,
            person_id,
            archived_scan_limit: self.archived_scan_limit,
        };
        let strategies: [&dyn ResolveStrategy; 4] = [
            &StoredMapping,
            &ExternalIdSearch,
            &LoanNumberMatch,
            &LeadConversion,
        ];

        let mut matched = None;
        for strategy in strategies {
            match strategy
                .try_resolve(&ctx)
                .await
                .with_context(|| format!("resolve strategy {}", strategy.name()))?
            {
                Resolution::Matched(deal_id) => {
                    debug!(strategy = strategy.name(), %deal_id, loan_id = %loan.id, "deal resolved");
                    matched = Some(deal_id);
                    break;
                }
                Resolution::Skip(reason) => {
                    info!(loan_id = %loan.id, %reason, "loan sync skipped");
                    return Ok(SyncOutcome::Skipped { reason });
                }
                Resolution::Miss => {}
            }
        }

        let deal_id = match matched {
            Some(deal_id) => {
                let fields = mapping::deal_update_fields(loan, self.schema);
                self.crm
                    .update_deal(deal_id, &fields)
                    .await
                    .context("updating deal")?;
                deal_id
            }
            None => {
                let fields = mapping::deal_create_fields(loan, self.schema, person_id);
                let deal_id = self.crm.create_deal(&fields).await.context("creating deal")?;
                info!(%deal_id, loan_id = %loan.id, "created deal");
                self.store.put(&loan.id, deal_id).await?;
                deal_id
            }
        };

        if let Some(coborrower_id) = coborrower_id {
            self.attach_coborrower(deal_id, coborrower_id).await;
        }
        if let Err(err) = commission::recalculate_for_deal(self.crm, self.schema, deal_id).await {
            warn!(%deal_id, %err, "commission recalculation failed");
        }

        Ok(SyncOutcome::Synced { deal_id })
    }

    /// A cancelled loan never creates or advances anything. If it already
    /// has a live deal, that deal is acknowledged untouched; the officer
    /// closes it out manually.
    async fn handle_cancelled(&self, loan: &LoanRecord) -> Result<SyncOutcome> {
        match self.store.get(&loan.id).await? {
            Some(deal_id) => match self.crm.get_deal(deal_id).await {
                Ok(deal) if !deal.is_archived_or_lost() => {
                    info!(%deal_id, loan_id = %loan.id, "loan cancelled, existing deal left as-is");
                    Ok(SyncOutcome::Synced { deal_id })
                }
                Ok(_) => Ok(SyncOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                }),
                Err(err) if err.is_not_found() => Ok(SyncOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                }),
                Err(err) => Err(err).context("fetching mapped deal for cancelled loan"),
            },
            None => {
                debug!(loan_id = %loan.id, "cancelled loan with no deal, nothing to sync");
                Ok(SyncOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                })
            }
        }
    }

    async fn attach_coborrower(&self, deal_id: DealId, coborrower_id: PersonId) {
        let mut fields = Fields::new();
        fields.insert(self.schema.coborrower_key.clone(), json!(coborrower_id.0));
        if let Err(err) = self.crm.update_deal(deal_id, &fields).await {
            warn!(%deal_id, %coborrower_id, %err, "failed to attach co-borrower");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCrm;
    use loanbridge_core::BorrowerBlock;
    use serde_json::json;
    use tempfile::tempdir;

    struct Harness {
        crm: FakeCrm,
        store: IdentityStore,
        locks: SyncLocks,
        schema: DestSchema,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().expect("tempdir");
            Self {
                crm: FakeCrm::new(),
                store: IdentityStore::new(dir.path().join("deal_mappings.json")),
                locks: SyncLocks::new(),
                schema: DestSchema::from_env(),
                _dir: dir,
            }
        }

        fn resolver(&self) -> DealResolver<'_> {
            DealResolver {
                crm: &self.crm,
                store: &self.store,
                locks: &self.locks,
                schema: &self.schema,
                archived_scan_limit: 500,
            }
        }
    }

    fn loan() -> LoanRecord {
        LoanRecord {
            id: "a0X001".into(),
            status: Some("In Process".into()),
            loan_number: Some("556677".into()),
            total_amount: Some(425_000.0),
            borrower: BorrowerBlock {
                name: Some("Jane Doe".into()),
                email: Some("jane@example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fresh_loan_creates_person_deal_and_mapping() {
        let h = Harness::new();
        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();

        let deal_id = outcome.deal_id().expect("synced");
        assert_eq!(h.crm.person_create_count(), 1);
        assert_eq!(h.crm.deal_create_count(), 1);
        assert_eq!(h.store.get("a0X001").await.unwrap(), Some(deal_id));

        let raw = h.crm.raw_deal(deal_id).unwrap();
        assert_eq!(raw["title"], "Jane Doe - Loan # 556677");
        assert_eq!(raw["value"], 425_000.0);
        assert_eq!(raw[&h.schema.loan_id_key], "a0X001");
    }

    #[tokio::test]
    async fn resyncing_updates_instead_of_duplicating() {
        let h = Harness::new();
        let first = h.resolver().resolve_loan(&loan()).await.unwrap();

        let mut changed = loan();
        changed.total_amount = Some(430_000.0);
        let second = h.resolver().resolve_loan(&changed).await.unwrap();

        assert_eq!(first.deal_id(), second.deal_id());
        assert_eq!(h.crm.deal_create_count(), 1);
        let raw = h.crm.raw_deal(first.deal_id().unwrap()).unwrap();
        assert_eq!(raw["value"], 430_000.0);
    }

    #[tokio::test]
    async fn mapped_archived_deal_is_skipped_not_recreated() {
        let h = Harness::new();
        let archived = h.crm.seed_archived_deal(json!({
            "title": "Jane Doe - Loan # 556677",
            (h.schema.loan_id_key.clone()): "a0X001",
        }));
        h.store.put("a0X001", archived).await.unwrap();

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::ArchivedOrLost
            }
        );
        assert_eq!(h.crm.deal_create_count(), 0);
    }

    #[tokio::test]
    async fn mapped_lost_deal_is_never_resurrected() {
        let h = Harness::new();
        let lost = h.crm.seed_deal(json!({
            "title": "Jane Doe - Loan # 556677",
            "status": "lost",
        }));
        h.store.put("a0X001", lost).await.unwrap();

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::ArchivedOrLost
            }
        );
        assert_eq!(h.crm.deal_update_count(), 0);
    }

    #[tokio::test]
    async fn vanished_mapped_deal_skips_and_keeps_the_mapping() {
        let h = Harness::new();
        let gone = h.crm.seed_deal(json!({"title": "Jane Doe - Loan # 556677"}));
        h.crm.make_deal_unreachable(gone);
        h.store.put("a0X001", gone).await.unwrap();

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::MappedDealGone
            }
        );
        assert_eq!(h.store.get("a0X001").await.unwrap(), Some(gone));
        assert_eq!(h.crm.deal_create_count(), 0);
    }

    #[tokio::test]
    async fn external_id_search_heals_a_missing_mapping() {
        let h = Harness::new();
        let existing = h.crm.seed_deal(json!({
            "title": "Jane Doe - Loan # 556677",
            (h.schema.loan_id_key.clone()): "a0X001",
        }));

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(outcome.deal_id(), Some(existing));
        assert_eq!(h.crm.deal_create_count(), 0);
        assert_eq!(h.store.get("a0X001").await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn loan_number_in_title_matches_the_borrowers_deal() {
        let h = Harness::new();
        let person = h.crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
        }));
        let existing = h.crm.seed_deal(json!({
            "title": "Jane Doe - Loan # 556677",
            "person_id": person.0,
        }));

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(outcome.deal_id(), Some(existing));
        assert_eq!(h.crm.deal_create_count(), 0);
        // The update stamps the external loan id onto the matched deal.
        let raw = h.crm.raw_deal(existing).unwrap();
        assert_eq!(raw[&h.schema.loan_id_key], "a0X001");
    }

    #[tokio::test]
    async fn loan_number_match_ignores_other_peoples_deals() {
        let h = Harness::new();
        let stranger = h.crm.seed_person(json!({
            "name": "John Smith",
            "email": [{"value": "john@example.com", "primary": true}],
        }));
        h.crm.seed_deal(json!({
            "title": "John Smith - Loan # 556677",
            "person_id": stranger.0,
        }));

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert!(outcome.deal_id().is_some());
        // A fresh deal was created for Jane rather than adopting John's.
        assert_eq!(h.crm.deal_create_count(), 1);
    }

    #[tokio::test]
    async fn stored_mapping_beats_a_loan_number_match() {
        let h = Harness::new();
        let person = h.crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
        }));
        let mapped = h.crm.seed_deal(json!({
            "title": "Jane Doe refinance",
            "person_id": person.0,
        }));
        h.crm.seed_deal(json!({
            "title": "Jane Doe - Loan # 556677",
            "person_id": person.0,
        }));
        h.store.put("a0X001", mapped).await.unwrap();

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert_eq!(outcome.deal_id(), Some(mapped));
    }

    #[tokio::test]
    async fn open_lead_is_converted_rather_than_duplicated() {
        let h = Harness::new();
        let person = h.crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
        }));
        h.crm.seed_lead(json!({
            "id": "lead-1",
            "title": "Jane Doe inquiry",
            "person_id": person.0,
        }));

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        let deal_id = outcome.deal_id().expect("synced");
        assert_eq!(h.crm.deal_create_count(), 0);
        assert_eq!(h.store.get("a0X001").await.unwrap(), Some(deal_id));

        // The post-conversion update landed the full field set.
        let raw = h.crm.raw_deal(deal_id).unwrap();
        assert_eq!(raw["title"], "Jane Doe - Loan # 556677");
        assert_eq!(raw[&h.schema.loan_id_key], "a0X001");
    }

    #[tokio::test]
    async fn cancelled_and_applied_leads_are_not_convertible() {
        let h = Harness::new();
        let person = h.crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
        }));
        h.crm.seed_lead(json!({
            "id": "lead-1",
            "person_id": person.0,
            "label": "Cancelled",
        }));
        h.crm.seed_lead(json!({
            "id": "lead-2",
            "person_id": person.0,
            "label": {"id": 3, "value": "Applied"},
        }));

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert!(outcome.deal_id().is_some());
        assert_eq!(h.crm.deal_create_count(), 1);
    }

    #[tokio::test]
    async fn failed_lead_conversion_falls_back_to_creation() {
        let h = Harness::new();
        let person = h.crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
        }));
        h.crm.seed_lead(json!({
            "id": "lead-1",
            "person_id": person.0,
        }));
        h.crm.fail_lead_conversions();

        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        assert!(outcome.deal_id().is_some());
        assert_eq!(h.crm.deal_create_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_loan_never_creates_anything() {
        let h = Harness::new();
        let mut cancelled = loan();
        cancelled.status = Some("Cancelled".into());

        let outcome = h.resolver().resolve_loan(&cancelled).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        );
        assert_eq!(h.crm.deal_create_count(), 0);
        assert_eq!(h.crm.person_create_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_loan_with_live_deal_is_a_pure_no_op() {
        let h = Harness::new();
        let deal_id = h.resolver().resolve_loan(&loan()).await.unwrap().deal_id().unwrap();
        let updates_before = h.crm.deal_update_count();

        let mut cancelled = loan();
        cancelled.status = Some("Cancelled".into());
        let outcome = h.resolver().resolve_loan(&cancelled).await.unwrap();

        assert_eq!(outcome.deal_id(), Some(deal_id));
        assert_eq!(h.crm.deal_update_count(), updates_before);
    }

    #[tokio::test]
    async fn closed_loan_marks_the_deal_won() {
        let h = Harness::new();
        let mut closed = loan();
        closed.status = Some("Closed".into());

        let outcome = h.resolver().resolve_loan(&closed).await.unwrap();
        let raw = h.crm.raw_deal(outcome.deal_id().unwrap()).unwrap();
        assert_eq!(raw["status"], "won");
        assert_eq!(raw["stage_id"], h.schema.stage_clear_to_close);
    }

    #[tokio::test]
    async fn coborrower_is_created_and_attached_to_the_deal() {
        let h = Harness::new();
        let mut with_co = loan();
        with_co.borrower.coborrower_first_name = Some("John".into());
        with_co.borrower.coborrower_last_name = Some("Doe".into());
        with_co.borrower.coborrower_email = Some("john@example.com".into());

        let outcome = h.resolver().resolve_loan(&with_co).await.unwrap();
        assert_eq!(h.crm.person_create_count(), 2);

        let raw = h.crm.raw_deal(outcome.deal_id().unwrap()).unwrap();
        let attached = raw[&h.schema.coborrower_key].as_i64().unwrap();
        let coborrower = h.crm.get_person(PersonId(attached)).await.unwrap();
        assert!(coborrower.has_email("john@example.com"));
    }

    #[tokio::test]
    async fn commission_lands_after_a_sync() {
        let h = Harness::new();
        let outcome = h.resolver().resolve_loan(&loan()).await.unwrap();
        let raw = h.crm.raw_deal(outcome.deal_id().unwrap()).unwrap();
        // 425k referred at 40bps.
        assert_eq!(raw[&h.schema.commission_key], 1700.0);
    }

    #[tokio::test]
    async fn loan_without_an_id_is_rejected() {
        let h = Harness::new();
        let mut bad = loan();
        bad.id = String::new();
        assert!(h.resolver().resolve_loan(&bad).await.is_err());
    }
}
