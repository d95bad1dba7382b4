//! In-process document store.
//!
//! Tables are created on first write. Copying a template creates a new
//! workbook whose tables mirror the ones registered for that template.
//! Failures can be scripted per operation to exercise error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{CopiedDocument, DocumentStore, Fields, Filter, Record, StoreError, StoreErrorKind, TableInfo};

/// Store operations, for failure scripting and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Copy,
    SetPermissions,
    ListTables,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<(String, String), Vec<Record>>,
    /// Table names per template token.
    templates: HashMap<String, Vec<String>>,
    /// Tables per copied workbook token.
    workbooks: HashMap<String, Vec<TableInfo>>,
    public: HashSet<String>,
    next_id: u64,
    calls: HashMap<Operation, usize>,
    scripted: HashMap<Operation, VecDeque<StoreErrorKind>>,
    always_failing: HashSet<Operation>,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:06}", prefix, self.next_id)
    }

    /// Counts the call and returns a scripted failure, if any.
    fn enter(&mut self, op: Operation) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        if self.always_failing.contains(&op) {
            return Err(StoreError::permanent(format!("{:?} unavailable", op)));
        }
        match self.scripted.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(StoreErrorKind::Transient) => {
                Err(StoreError::transient(format!("scripted transient {:?} failure", op)))
            }
            Some(StoreErrorKind::Permanent) => {
                Err(StoreError::permanent(format!("scripted permanent {:?} failure", op)))
            }
            None => Ok(()),
        }
    }
}

/// A [`DocumentStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed delay to every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers a template workbook and the table names a copy of it contains.
    pub fn register_template(&self, token: &str, table_names: &[&str]) {
        self.lock().templates.insert(
            token.to_string(),
            table_names.iter().map(|n| n.to_string()).collect(),
        );
    }

    /// Makes the next call of `op` fail with the given kind.
    pub fn fail_next(&self, op: Operation, kind: StoreErrorKind) {
        self.lock().scripted.entry(op).or_default().push_back(kind);
    }

    /// Makes every call of `op` fail permanently.
    pub fn fail_always(&self, op: Operation) {
        self.lock().always_failing.insert(op);
    }

    pub fn recover(&self, op: Operation) {
        let mut state = self.lock();
        state.always_failing.remove(&op);
        state.scripted.remove(&op);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// All records of a table, in insertion order.
    pub fn records(&self, container: &str, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(&(container.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_public(&self, token: &str) -> bool {
        self.lock().public.contains(token)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn table_key(container: &str, table: &str) -> (String, String) {
    (container.to_string(), table.to_string())
}

impl DocumentStore for MemoryDocumentStore {
    async fn create_record(
        &self,
        container: &str,
        table: &str,
        fields: Fields,
    ) -> Result<String, StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::Create)?;
        let id = state.next_id("rec");
        state
            .tables
            .entry(table_key(container, table))
            .or_default()
            .push(Record {
                id: id.clone(),
                fields,
            });
        Ok(id)
    }

    async fn read_records(
        &self,
        container: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::Read)?;
        Ok(state
            .tables
            .get(&table_key(container, table))
            .map(|rows| {
                rows.iter()
                    .filter(|r| filter.matches(&r.fields))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_record(
        &self,
        container: &str,
        table: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::Update)?;
        let record = state
            .tables
            .get_mut(&table_key(container, table))
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| StoreError::permanent(format!("record not found: {}", id)))?;
        record.fields.extend(fields);
        Ok(())
    }

    async fn delete_record(&self, container: &str, table: &str, id: &str) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::Delete)?;
        if let Some(rows) = state.tables.get_mut(&table_key(container, table)) {
            rows.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn copy_template(
        &self,
        template_token: &str,
        target_container: &str,
        name: &str,
    ) -> Result<CopiedDocument, StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::Copy)?;
        let table_names = state
            .templates
            .get(template_token)
            .cloned()
            .ok_or_else(|| StoreError::permanent(format!("template not found: {}", template_token)))?;
        let token = state.next_id("bascn");
        let mut tables = Vec::with_capacity(table_names.len());
        for table_name in table_names {
            let id = state.next_id("tbl");
            tables.push(TableInfo {
                id,
                name: table_name,
            });
        }
        state.workbooks.insert(token.clone(), tables);
        Ok(CopiedDocument {
            url: format!("https://memory.invalid/{}/base/{}", target_container, token),
            token,
            name: name.to_string(),
        })
    }

    async fn set_public_permissions(&self, token: &str) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::SetPermissions)?;
        if !state.workbooks.contains_key(token) {
            return Err(StoreError::permanent(format!("workbook not found: {}", token)));
        }
        state.public.insert(token.to_string());
        Ok(())
    }

    async fn list_tables(&self, token: &str) -> Result<Vec<TableInfo>, StoreError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(Operation::ListTables)?;
        state
            .workbooks
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::permanent(format!("workbook not found: {}", token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_then_read_with_filter() {
        let store = MemoryDocumentStore::new();
        store
            .create_record("app", "tbl", fields(json!({"uid": "u1", "name": "A"})))
            .await
            .unwrap();
        store
            .create_record("app", "tbl", fields(json!({"uid": "u2", "name": "B"})))
            .await
            .unwrap();

        let rows = store
            .read_records("app", "tbl", &Filter::all().eq("uid", "u2"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["name"], json!("B"));
    }

    #[tokio::test]
    async fn read_unknown_table_is_empty() {
        let store = MemoryDocumentStore::new();
        let rows = store.read_records("app", "nope", &Filter::all()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = MemoryDocumentStore::new();
        let id = store
            .create_record("app", "tbl", fields(json!({"a": "1", "b": "2"})))
            .await
            .unwrap();
        store
            .update_record("app", "tbl", &id, fields(json!({"b": "3"})))
            .await
            .unwrap();
        let rows = store.records("app", "tbl");
        assert_eq!(rows[0].fields["a"], json!("1"));
        assert_eq!(rows[0].fields["b"], json!("3"));
    }

    #[tokio::test]
    async fn update_missing_record_is_permanent() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update_record("app", "tbl", "rec-missing", Fields::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = MemoryDocumentStore::new();
        let id = store
            .create_record("app", "tbl", fields(json!({"a": "1"})))
            .await
            .unwrap();
        store.delete_record("app", "tbl", &id).await.unwrap();
        assert!(store.records("app", "tbl").is_empty());
    }

    #[tokio::test]
    async fn copy_template_produces_fresh_workbook() {
        let store = MemoryDocumentStore::new();
        store.register_template("tpl", &["个人账单记录", "分类"]);

        let first = store.copy_template("tpl", "folder", "ledger").await.unwrap();
        let second = store.copy_template("tpl", "folder", "ledger").await.unwrap();
        assert_ne!(first.token, second.token);

        let tables = store.list_tables(&first.token).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "个人账单记录");

        store.set_public_permissions(&first.token).await.unwrap();
        assert!(store.is_public(&first.token));
        assert!(!store.is_public(&second.token));
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let store = MemoryDocumentStore::new();
        store.fail_next(Operation::Read, StoreErrorKind::Transient);

        let err = store.read_records("a", "t", &Filter::all()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.read_records("a", "t", &Filter::all()).await.is_ok());
        assert_eq!(store.calls(Operation::Read), 2);
    }

    #[tokio::test]
    async fn always_failing_until_recovered() {
        let store = MemoryDocumentStore::new();
        store.register_template("tpl", &["t"]);
        store.fail_always(Operation::Copy);
        assert!(store.copy_template("tpl", "f", "n").await.is_err());
        assert!(store.copy_template("tpl", "f", "n").await.is_err());
        store.recover(Operation::Copy);
        assert!(store.copy_template("tpl", "f", "n").await.is_ok());
    }
}
