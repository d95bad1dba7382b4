//! Provisioning new ledger workbooks from the template.
//!
//! The sequence is:
//!
//! 1. copy the template workbook into the target folder
//! 2. wait for the copy to settle
//! 3. open the copy to anyone with the link
//! 4. find the bill table inside the copy by name
//! 5. register the copy in the ledger registry as unassigned
//!
//! A failing step aborts the sequence. Nothing is rolled back: a copy that
//! never gets registered stays behind in the target folder.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::repo::{LedgerStore, RepoError};
use crate::store::{DocumentStore, RetryConfig, StoreError, retry_with_backoff};
use crate::types::{Ledger, LedgerDraft};

pub const BILL_TABLE_NAME: &str = "个人账单记录";
pub const LEDGER_NAME: &str = "飞书记账";

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub template_token: String,
    pub target_folder: String,
    pub ledger_name: String,
    pub bill_table_name: String,
    pub copy_delay: Duration,
    /// Retry policy for the steps that touch the fresh copy.
    pub propagation_retry: RetryConfig,
}

impl GenerationConfig {
    pub fn new(template_token: impl Into<String>, target_folder: impl Into<String>) -> Self {
        GenerationConfig {
            template_token: template_token.into(),
            target_folder: target_folder.into(),
            ledger_name: LEDGER_NAME.to_string(),
            bill_table_name: BILL_TABLE_NAME.to_string(),
            copy_delay: Duration::from_secs(2),
            propagation_retry: RetryConfig::PROPAGATION,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("copying template failed: {0}")]
    Copy(#[source] StoreError),

    #[error("setting permissions on {token} failed: {source}")]
    Permissions { token: String, source: StoreError },

    #[error("listing tables of {token} failed: {source}")]
    ListTables { token: String, source: StoreError },

    #[error("workbook {token} has no table named {table:?}")]
    BillTableMissing { token: String, table: String },

    #[error("registering ledger failed: {0}")]
    Register(#[from] RepoError),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Copy(e) => e.is_transient(),
            GenerationError::Permissions { source, .. } => source.is_transient(),
            GenerationError::ListTables { source, .. } => source.is_transient(),
            GenerationError::BillTableMissing { .. } => false,
            GenerationError::Register(e) => e.is_transient(),
        }
    }
}

pub struct LedgerGenerator<S> {
    store: Arc<S>,
    ledgers: Arc<LedgerStore<S>>,
    config: GenerationConfig,
}

impl<S: DocumentStore> LedgerGenerator<S> {
    pub fn new(store: Arc<S>, ledgers: Arc<LedgerStore<S>>, config: GenerationConfig) -> Self {
        LedgerGenerator {
            store,
            ledgers,
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Provisions and registers one unassigned ledger.
    ///
    /// `before_register` sees the finished workbook before its registry row
    /// exists, which is the last moment nobody else can observe it.
    #[instrument(skip_all)]
    pub async fn generate<F>(&self, before_register: F) -> Result<Ledger, GenerationError>
    where
        F: FnOnce(&LedgerDraft) + Send,
    {
        let draft = self.provision().await?;
        before_register(&draft);
        let ledger = self.ledgers.create(draft).await?;
        info!(ledger_id = %ledger.id, container = %ledger.container_token, "Generated ledger");
        Ok(ledger)
    }

    /// Steps 1 to 4: a usable workbook that is not yet registered.
    async fn provision(&self) -> Result<LedgerDraft, GenerationError> {
        let copy = self
            .store
            .copy_template(
                &self.config.template_token,
                &self.config.target_folder,
                &self.config.ledger_name,
            )
            .await
            .map_err(GenerationError::Copy)?;

        if !self.config.copy_delay.is_zero() {
            tokio::time::sleep(self.config.copy_delay).await;
        }

        let retry = self.config.propagation_retry;
        retry_with_backoff(retry, || self.store.set_public_permissions(&copy.token))
            .await
            .map_err(|source| GenerationError::Permissions {
                token: copy.token.clone(),
                source,
            })?;

        let tables = retry_with_backoff(retry, || self.store.list_tables(&copy.token))
            .await
            .map_err(|source| GenerationError::ListTables {
                token: copy.token.clone(),
                source,
            })?;
        let bill_table = tables
            .into_iter()
            .find(|t| t.name == self.config.bill_table_name)
            .ok_or_else(|| GenerationError::BillTableMissing {
                token: copy.token.clone(),
                table: self.config.bill_table_name.clone(),
            })?;

        let name = if copy.name.is_empty() {
            self.config.ledger_name.clone()
        } else {
            copy.name
        };
        Ok(LedgerDraft {
            container_token: copy.token,
            table_token: bill_table.id,
            name,
            url: copy.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreErrorKind;
    use crate::store::memory::{MemoryDocumentStore, Operation};
    use std::sync::Mutex;

    fn setup(store: &Arc<MemoryDocumentStore>) -> LedgerGenerator<MemoryDocumentStore> {
        store.register_template("tpl", &["分类", BILL_TABLE_NAME]);
        let ledgers = Arc::new(LedgerStore::new(store.clone(), "registry", "ledgers"));
        let mut config = GenerationConfig::new("tpl", "folder");
        config.copy_delay = Duration::ZERO;
        config.propagation_retry = RetryConfig::IMMEDIATE;
        LedgerGenerator::new(store.clone(), ledgers, config)
    }

    #[tokio::test]
    async fn generates_public_registered_ledger() {
        let store = Arc::new(MemoryDocumentStore::new());
        let generator = setup(&store);
        let seen = Mutex::new(None);

        let ledger = generator
            .generate(|draft| *seen.lock().unwrap() = Some(draft.container_token.clone()))
            .await
            .unwrap();

        assert!(!ledger.is_assigned());
        assert_eq!(ledger.name, LEDGER_NAME);
        assert!(store.is_public(&ledger.container_token));
        assert_eq!(seen.lock().unwrap().as_deref(), Some(ledger.container_token.as_str()));

        let tables = store.list_tables(&ledger.container_token).await.unwrap();
        let bill_table = tables.iter().find(|t| t.name == BILL_TABLE_NAME).unwrap();
        assert_eq!(ledger.table_token, bill_table.id);
        assert_eq!(store.records("registry", "ledgers").len(), 1);
    }

    #[tokio::test]
    async fn transient_permission_failure_is_retried() {
        let store = Arc::new(MemoryDocumentStore::new());
        let generator = setup(&store);
        store.fail_next(Operation::SetPermissions, StoreErrorKind::Transient);
        store.fail_next(Operation::SetPermissions, StoreErrorKind::Transient);

        let ledger = generator.generate(|_| {}).await.unwrap();
        assert!(store.is_public(&ledger.container_token));
        assert_eq!(store.calls(Operation::SetPermissions), 3);
    }

    #[tokio::test]
    async fn copy_failure_aborts_before_anything_is_registered() {
        let store = Arc::new(MemoryDocumentStore::new());
        let generator = setup(&store);
        store.fail_next(Operation::Copy, StoreErrorKind::Transient);

        let err = generator.generate(|_| {}).await.unwrap_err();
        assert!(matches!(err, GenerationError::Copy(_)));
        assert!(err.is_transient());
        assert_eq!(store.calls(Operation::SetPermissions), 0);
        assert!(store.records("registry", "ledgers").is_empty());
    }

    #[tokio::test]
    async fn missing_bill_table_is_permanent() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.register_template("bare", &["something else"]);
        let ledgers = Arc::new(LedgerStore::new(store.clone(), "registry", "ledgers"));
        let mut config = GenerationConfig::new("bare", "folder");
        config.copy_delay = Duration::ZERO;
        let generator = LedgerGenerator::new(store.clone(), ledgers, config);

        let err = generator.generate(|_| {}).await.unwrap_err();
        assert!(matches!(err, GenerationError::BillTableMissing { .. }));
        assert!(!err.is_transient());
        assert!(store.records("registry", "ledgers").is_empty());
    }
}
