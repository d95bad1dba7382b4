//! The ledger registry: one row per provisioned ledger workbook.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{RepoError, required_text, text};
use crate::store::{DocumentStore, Fields, Filter, Record};
use crate::types::{Ledger, LedgerDraft, LedgerId, User, UserId};

const FIELD_APP_TOKEN: &str = "app_token";
const FIELD_TABLE_TOKEN: &str = "table_token";
const FIELD_NAME: &str = "name";
const FIELD_URL: &str = "url";
const FIELD_OWNER_ID: &str = "creator_id";
const FIELD_OWNER_NAME: &str = "creator_name";

pub struct LedgerStore<S> {
    store: Arc<S>,
    container: String,
    table: String,
    /// Assigned ledgers by owner. Ownership never changes once set, so
    /// entries never go stale.
    owned: RwLock<HashMap<UserId, Ledger>>,
}

fn decode(record: &Record) -> Result<Ledger, RepoError> {
    let fields = &record.fields;
    Ok(Ledger {
        id: LedgerId::new(record.id.clone()),
        container_token: required_text(&record.id, fields, FIELD_APP_TOKEN)?,
        table_token: required_text(&record.id, fields, FIELD_TABLE_TOKEN)?,
        name: text(fields, FIELD_NAME),
        url: text(fields, FIELD_URL),
        owner_id: UserId::new(text(fields, FIELD_OWNER_ID)),
        owner_name: text(fields, FIELD_OWNER_NAME),
    })
}

fn owner_fields(user: &User) -> Fields {
    let mut fields = Fields::new();
    fields.insert(FIELD_OWNER_ID.to_string(), Value::String(user.id.to_string()));
    fields.insert(
        FIELD_OWNER_NAME.to_string(),
        Value::String(user.display_name.clone()),
    );
    fields
}

impl<S: DocumentStore> LedgerStore<S> {
    pub fn new(store: Arc<S>, container: impl Into<String>, table: impl Into<String>) -> Self {
        LedgerStore {
            store,
            container: container.into(),
            table: table.into(),
            owned: RwLock::new(HashMap::new()),
        }
    }

    fn remember(&self, ledger: &Ledger) {
        if ledger.is_assigned() {
            self.owned
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(ledger.owner_id.clone(), ledger.clone());
        }
    }

    /// Persists a freshly generated ledger as unassigned.
    #[instrument(skip(self, draft), fields(container = %draft.container_token))]
    pub async fn create(&self, draft: LedgerDraft) -> Result<Ledger, RepoError> {
        let mut fields = Fields::new();
        fields.insert(
            FIELD_APP_TOKEN.to_string(),
            Value::String(draft.container_token.clone()),
        );
        fields.insert(
            FIELD_TABLE_TOKEN.to_string(),
            Value::String(draft.table_token.clone()),
        );
        fields.insert(FIELD_NAME.to_string(), Value::String(draft.name.clone()));
        fields.insert(FIELD_URL.to_string(), Value::String(draft.url.clone()));
        fields.insert(FIELD_OWNER_ID.to_string(), Value::String(String::new()));
        fields.insert(FIELD_OWNER_NAME.to_string(), Value::String(String::new()));

        let id = self
            .store
            .create_record(&self.container, &self.table, fields)
            .await?;
        debug!(ledger_id = %id, "Registered ledger");
        Ok(draft.into_ledger(LedgerId::new(id)))
    }

    /// The ledger assigned to `owner`, if any.
    ///
    /// Should the registry hold several (which allocation discipline
    /// prevents), the first is returned.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn query_by_owner(&self, owner: &UserId) -> Result<Option<Ledger>, RepoError> {
        if owner.is_empty() {
            return Ok(None);
        }
        if let Some(ledger) = self
            .owned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .cloned()
        {
            return Ok(Some(ledger));
        }

        let rows = self
            .store
            .read_records(
                &self.container,
                &self.table,
                &Filter::all().eq(FIELD_OWNER_ID, owner.as_str()),
            )
            .await?;
        if rows.len() > 1 {
            warn!(count = rows.len(), "Owner holds more than one ledger");
        }
        match rows.first() {
            Some(row) => {
                let ledger = decode(row)?;
                self.remember(&ledger);
                Ok(Some(ledger))
            }
            None => Ok(None),
        }
    }

    /// Every ledger without an owner, in registry order.
    ///
    /// Rows that fail to decode are skipped; they can never be handed out.
    #[instrument(skip(self))]
    pub async fn query_unassigned(&self) -> Result<Vec<Ledger>, RepoError> {
        let rows = self
            .store
            .read_records(&self.container, &self.table, &Filter::all().eq(FIELD_OWNER_ID, ""))
            .await?;
        let mut ledgers = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode(row) {
                Ok(ledger) if !ledger.is_assigned() => ledgers.push(ledger),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping undecodable ledger row"),
            }
        }
        Ok(ledgers)
    }

    /// Records `user` as the owner of `ledger`.
    #[instrument(skip(self, ledger, user), fields(ledger_id = %ledger.id, owner = %user.id))]
    pub async fn reassign_owner(&self, ledger: Ledger, user: &User) -> Result<Ledger, RepoError> {
        self.store
            .update_record(
                &self.container,
                &self.table,
                ledger.id.as_str(),
                owner_fields(user),
            )
            .await?;
        let ledger = ledger.assigned_to(user);
        self.remember(&ledger);
        Ok(ledger)
    }

    /// Loads every assigned ledger into the cache. Returns the number loaded.
    pub async fn warm_up(&self) -> Result<usize, RepoError> {
        let rows = self
            .store
            .read_records(&self.container, &self.table, &Filter::all())
            .await?;
        let assigned: Vec<Ledger> = rows
            .iter()
            .filter_map(|row| decode(row).ok())
            .filter(Ledger::is_assigned)
            .collect();
        let count = assigned.len();
        let mut owned = self.owned.write().unwrap_or_else(PoisonError::into_inner);
        for ledger in assigned {
            owned.entry(ledger.owner_id.clone()).or_insert(ledger);
        }
        Ok(count)
    }
}
