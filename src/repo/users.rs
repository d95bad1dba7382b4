//! The user table: chat identity to display name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, instrument};

use super::{RepoError, required_text, text};
use crate::store::{DocumentStore, Fields, Filter, Record};
use crate::types::{User, UserId};

const FIELD_UID: &str = "uid";
const FIELD_NAME: &str = "name";

/// Users keyed by chat identity, with a read-through cache.
pub struct UserStore<S> {
    store: Arc<S>,
    container: String,
    table: String,
    cache: RwLock<HashMap<UserId, User>>,
}

fn decode(record: &Record) -> Result<User, RepoError> {
    let id = required_text(&record.id, &record.fields, FIELD_UID)?;
    Ok(User::new(UserId::new(id), text(&record.fields, FIELD_NAME)))
}

impl<S: DocumentStore> UserStore<S> {
    pub fn new(store: Arc<S>, container: impl Into<String>, table: impl Into<String>) -> Self {
        UserStore {
            store,
            container: container.into(),
            table: table.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, id: &UserId) -> Option<User> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remember(&self, user: User) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id.clone(), user);
    }

    /// Looks a user up by chat identity.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn get(&self, id: &UserId) -> Result<Option<User>, RepoError> {
        if let Some(user) = self.cached(id) {
            return Ok(Some(user));
        }

        let rows = self
            .store
            .read_records(&self.container, &self.table, &Filter::all().eq(FIELD_UID, id.as_str()))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let user = decode(row)?;
        self.remember(user.clone());
        Ok(Some(user))
    }

    /// Stores the user, replacing any existing rows for the same identity.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn save(&self, user: &User) -> Result<(), RepoError> {
        let existing = self
            .store
            .read_records(
                &self.container,
                &self.table,
                &Filter::all().eq(FIELD_UID, user.id.as_str()),
            )
            .await?;
        for row in &existing {
            self.store
                .delete_record(&self.container, &self.table, &row.id)
                .await?;
        }

        let mut fields = Fields::new();
        fields.insert(FIELD_UID.to_string(), Value::String(user.id.to_string()));
        fields.insert(
            FIELD_NAME.to_string(),
            Value::String(user.display_name.clone()),
        );
        self.store
            .create_record(&self.container, &self.table, fields)
            .await?;

        debug!(replaced = existing.len(), "Saved user");
        self.remember(user.clone());
        Ok(())
    }

    /// Loads every user into the cache. Returns the number loaded.
    ///
    /// Rows that fail to decode are skipped.
    pub async fn warm_up(&self) -> Result<usize, RepoError> {
        let rows = self
            .store
            .read_records(&self.container, &self.table, &Filter::all())
            .await?;
        let users: Vec<User> = rows.iter().filter_map(|row| decode(row).ok()).collect();
        let count = users.len();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for user in users {
            cache.insert(user.id.clone(), user);
        }
        Ok(count)
    }
}
