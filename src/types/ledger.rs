//! Ledgers: pre-provisioned spreadsheet workbooks, one per user.

use serde::{Deserialize, Serialize};

use super::{LedgerId, User, UserId};

/// A ledger workbook.
///
/// A ledger moves from unassigned (`owner_id` empty) to assigned exactly once.
/// This crate never deletes ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Record ID in the ledger registry table.
    pub id: LedgerId,

    /// Handle of the copied workbook (the bitable "app token").
    pub container_token: String,

    /// Handle of the bill table inside the workbook.
    pub table_token: String,

    pub name: String,

    /// Shareable link to the workbook.
    pub url: String,

    pub owner_id: UserId,

    pub owner_name: String,
}

impl Ledger {
    pub fn is_assigned(&self) -> bool {
        !self.owner_id.is_empty()
    }

    /// Returns this ledger with ownership transferred to `user`.
    pub fn assigned_to(mut self, user: &User) -> Self {
        self.owner_id = user.id.clone();
        self.owner_name = user.display_name.clone();
        self
    }
}

/// A ledger that has been generated but not yet given a registry record ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDraft {
    pub container_token: String,
    pub table_token: String,
    pub name: String,
    pub url: String,
}

impl LedgerDraft {
    pub fn into_ledger(self, id: LedgerId) -> Ledger {
        Ledger {
            id,
            container_token: self.container_token,
            table_token: self.table_token,
            name: self.name,
            url: self.url,
            owner_id: UserId::new(""),
            owner_name: String::new(),
        }
    }
}
