use std::sync::Arc;

use uuid::Uuid;

use crate::config::SyncConfig;
use crate::fake::{FakeCrm, FakeSource};
use crate::SyncContext;

/// A context over the in-memory fakes with an isolated store file.
pub fn context_with(crm: FakeCrm, source: FakeSource) -> SyncContext {
    let mut config = SyncConfig::from_env();
    config.store_path = std::env::temp_dir()
        .join(format!("loanbridge-test-{}", Uuid::new_v4()))
        .join("deal_mappings.json")
        .to_string_lossy()
        .into_owned();
    config.owner_filter = String::new();
    SyncContext::new(Arc::new(crm), Arc::new(source), config)
}
