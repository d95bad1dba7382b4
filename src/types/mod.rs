//! Core domain types for the bookkeeping bot.

pub mod bill;
pub mod ids;
pub mod intent;
pub mod ledger;
pub mod user;

// Re-export commonly used types at the module level
pub use bill::{Bill, Expenses, UnknownExpenses, format_amount};
pub use ids::{DeliveryId, LedgerId, UserId};
pub use intent::Intent;
pub use ledger::{Ledger, LedgerDraft};
pub use user::User;
