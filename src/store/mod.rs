//! External document store (spreadsheet-like "bitable" workbooks).
//!
//! The store holds three kinds of tables:
//!
//! - the ledger registry (one row per provisioned ledger)
//! - the user table (one row per identified chat user)
//! - each ledger's own bill table (one row per bill)
//!
//! The [`DocumentStore`] trait is the seam: [`feishu::FeishuDocumentStore`]
//! talks to the real API, [`memory::MemoryDocumentStore`] keeps tables in
//! process for tests and local runs.

use std::future::Future;

use serde_json::Value;

pub mod error;
pub mod feishu;
pub mod memory;
pub mod retry;

pub use error::{StoreError, StoreErrorKind};
pub use retry::{RetryConfig, retry_with_backoff};

/// Field values of one record, keyed by column name.
pub type Fields = serde_json::Map<String, Value>;

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

/// A table inside a workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: String,
    pub name: String,
}

/// The result of copying a template workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedDocument {
    pub token: String,
    pub url: String,
    pub name: String,
}

/// A conjunction of field-equality conditions.
///
/// A field that is absent or null compares equal to the empty string, so
/// `Filter::all().eq("owner_id", "")` selects rows without an owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    /// Matches every record.
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| field_text(fields.get(field)) == *expected)
    }

    /// Renders the filter as a bitable formula, e.g.
    /// `AND(CurrentValue.[owner_id]="u1")`.
    pub fn to_formula(&self) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .conditions
            .iter()
            .map(|(field, value)| {
                format!(
                    "CurrentValue.[{}]=\"{}\"",
                    field,
                    value.replace('\\', "\\\\").replace('"', "\\\"")
                )
            })
            .collect();
        Some(format!("AND({})", clauses.join(",")))
    }
}

/// The textual value of a field for equality comparison.
fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Operations the bot needs from the document store.
///
/// `container` is a workbook token; `table` is a table ID inside it.
pub trait DocumentStore: Send + Sync + 'static {
    /// Appends a record and returns its ID.
    fn create_record(
        &self,
        container: &str,
        table: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn read_records(
        &self,
        container: &str,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Overwrites the given fields of an existing record.
    fn update_record(
        &self,
        container: &str,
        table: &str,
        id: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_record(
        &self,
        container: &str,
        table: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Copies the template workbook into the target folder.
    fn copy_template(
        &self,
        template_token: &str,
        target_container: &str,
        name: &str,
    ) -> impl Future<Output = Result<CopiedDocument, StoreError>> + Send;

    /// Makes the workbook reachable by link.
    fn set_public_permissions(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_tables(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Vec<TableInfo>, StoreError>> + Send;
}
