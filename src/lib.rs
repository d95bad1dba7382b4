//! Bookkeeper Bot - a chat bot that keeps personal ledgers in shared spreadsheets.
//!
//! Messages arrive through the official-account callback, are classified into
//! intents by a language model, and are answered by handlers that read and
//! write the user's ledger. Each user gets a ledger from a pool of
//! pre-provisioned copies of a template workbook.

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod idempotency;
pub mod pool;
pub mod repo;
pub mod router;
pub mod server;
pub mod services;
pub mod store;
pub mod tasks;
pub mod types;
pub mod wechat;

#[cfg(test)]
pub(crate) mod test_utils;
