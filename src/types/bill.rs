//! Bills: one immutable record per bookkeeping operation.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::UserId;

/// Whether a bill records money coming in or going out.
///
/// The wire values are the labels used in the bill table and in the
/// classifier's function catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expenses {
    #[serde(rename = "收入")]
    Income,
    #[serde(rename = "支出")]
    Expense,
}

impl Expenses {
    pub const INCOME_LABEL: &'static str = "收入";
    pub const EXPENSE_LABEL: &'static str = "支出";

    pub fn label(&self) -> &'static str {
        match self {
            Expenses::Income => Self::INCOME_LABEL,
            Expenses::Expense => Self::EXPENSE_LABEL,
        }
    }

    /// Parses a wire label, treating an empty label as an expense.
    pub fn parse_or_default(s: &str) -> Result<Self, UnknownExpenses> {
        match s.trim() {
            "" => Ok(Expenses::Expense),
            other => other.parse(),
        }
    }
}

/// A label that is neither income nor expense.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown expenses label: {0:?}")]
pub struct UnknownExpenses(pub String);

impl FromStr for Expenses {
    type Err = UnknownExpenses;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::INCOME_LABEL => Ok(Expenses::Income),
            Self::EXPENSE_LABEL => Ok(Expenses::Expense),
            other => Err(UnknownExpenses(other.to_string())),
        }
    }
}

impl fmt::Display for Expenses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A bookkeeping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub remark: String,

    /// Ordered and without duplicates.
    pub categories: Vec<String>,

    pub amount: Decimal,

    pub expenses: Expenses,

    pub author_id: UserId,

    pub author_name: String,

    pub timestamp_millis: i64,
}

impl Bill {
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Formats an amount with exactly two decimal places.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}
