//! Function-call arguments as the classifier sends them.
//!
//! The model is loose with types: amounts come as strings or numbers and
//! optional fields come as empty strings. Each argument struct decodes
//! leniently and then validates into the request its handler works with.

use std::str::FromStr;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{HandlerError, ValidationError};
use crate::classifier::catalog::DATE_FORMAT;
use crate::repo::{BillQuery, DateRange};
use crate::types::Expenses;

/// Decodes the arguments of `function`. Missing arguments read as `{}`.
pub fn decode<T: DeserializeOwned>(function: &str, arguments: Value) -> Result<T, HandlerError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|source| HandlerError::InvalidArguments {
        function: function.to_string(),
        source,
    })
}

/// Amounts must stay below one trillion.
///
/// Together with rounding to cents this keeps every amount within 14
/// significant digits, which the store's float cells hold exactly.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// An amount as the model wrote it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

impl Default for RawAmount {
    fn default() -> Self {
        RawAmount::Text(String::new())
    }
}

impl RawAmount {
    /// Parses a strictly positive amount below [`MAX_AMOUNT`], rounded to
    /// cents. A leading `+` is allowed.
    pub fn parse(&self) -> Result<Decimal, ValidationError> {
        let text = match self {
            RawAmount::Number(n) => n.to_string(),
            RawAmount::Text(s) => s.trim().to_string(),
        };
        let digits = text.strip_prefix('+').unwrap_or(&text);
        let amount = Decimal::from_str(digits)
            .or_else(|_| Decimal::from_scientific(digits))
            .map_err(|_| ValidationError::IllegalAmount(text.clone()))?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if amount <= Decimal::ZERO || amount >= MAX_AMOUNT {
            return Err(ValidationError::IllegalAmount(text));
        }
        Ok(amount)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BookkeepingArgs {
    pub remark: String,
    pub amount: RawAmount,
    pub expenses: String,
    pub category: String,
}

/// A validated bookkeeping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookkeeping {
    pub remark: String,
    pub amount: Decimal,
    pub expenses: Expenses,
    pub category: String,
}

impl BookkeepingArgs {
    pub fn validate(self) -> Result<Bookkeeping, ValidationError> {
        let amount = self.amount.parse()?;
        let expenses = Expenses::parse_or_default(&self.expenses)?;
        let category = self.category.trim().to_string();
        if category.is_empty() {
            return Err(ValidationError::MissingCategory);
        }
        Ok(Bookkeeping {
            remark: self.remark.trim().to_string(),
            amount,
            expenses,
            category,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryBillArgs {
    pub start_date: String,
    pub end_date: String,
    pub expenses: String,
    pub category: String,
}

fn parse_date(s: &str) -> Result<Option<NaiveDate>, ValidationError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map(Some)
        .map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(chrono::Datelike::day0(&date)))
}

impl QueryBillArgs {
    /// Builds the query. Without dates it covers the calendar month of `now`;
    /// an open end runs through today and an open start begins on the first
    /// of the end date's month.
    pub fn into_query(
        self,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<BillQuery, ValidationError> {
        let today = now.with_timezone(&offset).date_naive();
        let range = match (parse_date(&self.start_date)?, parse_date(&self.end_date)?) {
            (None, None) => DateRange::month_of(now, offset),
            (Some(start), None) => {
                if start > today {
                    return Err(ValidationError::InvalidDateRange);
                }
                DateRange::days(start, today, offset)
            }
            (None, Some(end)) => DateRange::days(first_of_month(end), end, offset),
            (Some(start), Some(end)) => {
                if end < start {
                    return Err(ValidationError::InvalidDateRange);
                }
                DateRange::days(start, end, offset)
            }
        };

        let expenses = match self.expenses.trim() {
            "" => None,
            label => Some(label.parse::<Expenses>()?),
        };
        let category = Some(self.category.trim().to_string()).filter(|c| !c.is_empty());

        Ok(BillQuery {
            range: Some(range),
            expenses,
            category,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityArgs {
    pub name: String,
}

impl IdentityArgs {
    pub fn validate(self) -> Result<String, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        Ok(name)
    }
}
