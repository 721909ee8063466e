//! Sync engine: resolves source loans into destination persons and deals,
//! in response to change events, a polling schedule, or a manual backfill.

use std::sync::Arc;

use anyhow::Result;
use loanbridge_adapters::{
    OriginationClient, OriginationConfig, OriginationSource, PipelineClient, PipelineConfig,
    PipelineCrm,
};
use loanbridge_core::{LoanRecord, SyncOutcome};
use loanbridge_storage::{IdentityStore, SyncLocks};

pub mod commission;
pub mod config;
pub mod deal;
pub mod events;
pub mod mapping;
pub mod person;
pub mod poll;

#[cfg(any(test, feature = "test-fakes"))]
pub mod fake;
#[cfg(test)]
pub(crate) mod test_support;

use crate::config::{DestSchema, SyncConfig};
use crate::deal::DealResolver;

pub const CRATE_NAME: &str = "loanbridge-sync";

/// Everything one sync needs: the two remote systems, the identity store,
/// the per-loan locks, and the destination schema. Shared behind an `Arc`
/// by the web handlers and the scheduler.
pub struct SyncContext {
    pub crm: Arc<dyn PipelineCrm>,
    pub source: Arc<dyn OriginationSource>,
    pub store: IdentityStore,
    pub locks: SyncLocks,
    pub schema: DestSchema,
    pub config: SyncConfig,
}

impl SyncContext {
    pub fn from_env() -> Result<Self> {
        let config = SyncConfig::from_env();
        let crm = PipelineClient::new(PipelineConfig::from_env())?;
        let source = OriginationClient::new(OriginationConfig::from_env())?;
        Ok(Self::new(Arc::new(crm), Arc::new(source), config))
    }

    pub fn new(
        crm: Arc<dyn PipelineCrm>,
        source: Arc<dyn OriginationSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store: IdentityStore::new(&config.store_path),
            locks: SyncLocks::new(),
            schema: DestSchema::from_env(),
            crm,
            source,
            config,
        }
    }

    pub fn resolver(&self) -> DealResolver<'_> {
        DealResolver {
            crm: self.crm.as_ref(),
            store: &self.store,
            locks: &self.locks,
            schema: &self.schema,
            archived_scan_limit: self.config.archived_scan_limit,
        }
    }

    /// Sync one loan end to end.
    pub async fn sync_loan(&self, loan: &LoanRecord) -> Result<SyncOutcome> {
        self.resolver().resolve_loan(loan).await
    }
}
