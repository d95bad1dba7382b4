//! Bill tables, one per ledger workbook.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use tracing::{instrument, warn};

use super::{DecodeError, RepoError, decimal, labels, millis, text};
use crate::store::{DocumentStore, Fields, Filter, Record};
use crate::types::{Bill, Expenses, Ledger, UserId};

pub const FIELD_REMARK: &str = "备注";
pub const FIELD_CATEGORY: &str = "分类";
pub const FIELD_AMOUNT: &str = "金额";
pub const FIELD_DATE: &str = "日期";
pub const FIELD_EXPENSES: &str = "收支";
pub const FIELD_AUTHOR: &str = "花钱小能手";
pub const FIELD_AUTHOR_ID: &str = "author_id";

/// A half-open interval of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start_millis: i64,
    pub end_millis: i64,
}

fn local_midnight_millis(date: NaiveDate, offset: FixedOffset) -> i64 {
    let utc_equivalent = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    utc_equivalent - i64::from(offset.local_minus_utc()) * 1000
}

impl DateRange {
    /// The calendar month containing `now`, in the given time zone.
    pub fn month_of(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let today = now.with_timezone(&offset).date_naive();
        let first = today - Days::new(u64::from(today.day0()));
        let next = first
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        DateRange {
            start_millis: local_midnight_millis(first, offset),
            end_millis: local_midnight_millis(next, offset),
        }
    }

    /// Whole days from `first` through `last`, both inclusive.
    pub fn days(first: NaiveDate, last: NaiveDate, offset: FixedOffset) -> Self {
        let after_last = last.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
        DateRange {
            start_millis: local_midnight_millis(first, offset),
            end_millis: local_midnight_millis(after_last, offset),
        }
    }

    pub fn contains(&self, millis: i64) -> bool {
        self.start_millis <= millis && millis < self.end_millis
    }
}

/// Which bills to select. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillQuery {
    pub range: Option<DateRange>,
    pub expenses: Option<Expenses>,
    pub category: Option<String>,
}

impl BillQuery {
    pub fn matches(&self, bill: &Bill) -> bool {
        self.range
            .is_none_or(|range| range.contains(bill.timestamp_millis))
            && self.expenses.is_none_or(|e| e == bill.expenses)
            && self
                .category
                .as_deref()
                .is_none_or(|c| bill.has_category(c))
    }
}

/// Totals over a set of bills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillSummary {
    pub income: Decimal,
    pub expense: Decimal,
    pub count: usize,
}

impl BillSummary {
    /// Totals the bills, or `None` if a total overflows.
    pub fn of<'a>(bills: impl IntoIterator<Item = &'a Bill>) -> Option<Self> {
        bills.into_iter().try_fold(BillSummary::default(), |mut acc, bill| {
            match bill.expenses {
                Expenses::Income => acc.income = acc.income.checked_add(bill.amount)?,
                Expenses::Expense => acc.expense = acc.expense.checked_add(bill.amount)?,
            }
            acc.count += 1;
            Some(acc)
        })
    }

    pub fn balance(&self) -> Decimal {
        self.income - self.expense
    }
}

fn decode(record: &Record) -> Result<Bill, DecodeError> {
    let fields = &record.fields;
    let expenses_label = text(fields, FIELD_EXPENSES);
    let expenses =
        Expenses::parse_or_default(&expenses_label).map_err(|_| DecodeError::InvalidField {
            record: record.id.clone(),
            field: FIELD_EXPENSES,
            value: expenses_label.clone(),
        })?;
    let mut categories: Vec<String> = Vec::new();
    for category in labels(fields, FIELD_CATEGORY) {
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    Ok(Bill {
        remark: text(fields, FIELD_REMARK),
        categories,
        amount: decimal(&record.id, fields, FIELD_AMOUNT)?,
        expenses,
        author_id: UserId::new(text(fields, FIELD_AUTHOR_ID)),
        author_name: text(fields, FIELD_AUTHOR),
        timestamp_millis: millis(&record.id, fields, FIELD_DATE)?,
    })
}

fn encode(bill: &Bill) -> Fields {
    let mut fields = Fields::new();
    fields.insert(FIELD_REMARK.to_string(), Value::String(bill.remark.clone()));
    fields.insert(
        FIELD_CATEGORY.to_string(),
        Value::Array(bill.categories.iter().cloned().map(Value::String).collect()),
    );
    // Accepted amounts are below one trillion with at most two decimals, so
    // the number cell holds them exactly.
    let amount = bill
        .amount
        .to_f64()
        .map(Value::from)
        .unwrap_or_else(|| Value::String(bill.amount.to_string()));
    fields.insert(FIELD_AMOUNT.to_string(), amount);
    fields.insert(FIELD_DATE.to_string(), Value::from(bill.timestamp_millis));
    fields.insert(
        FIELD_EXPENSES.to_string(),
        Value::String(bill.expenses.label().to_string()),
    );
    fields.insert(FIELD_AUTHOR.to_string(), Value::String(bill.author_name.clone()));
    fields.insert(
        FIELD_AUTHOR_ID.to_string(),
        Value::String(bill.author_id.to_string()),
    );
    fields
}

pub struct BillStore<S> {
    store: Arc<S>,
    /// Time zone of the bookkeeping calendar.
    offset: FixedOffset,
}

impl<S: DocumentStore> BillStore<S> {
    pub fn new(store: Arc<S>, offset: FixedOffset) -> Self {
        BillStore { store, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Appends a bill to the ledger's bill table and returns its record ID.
    #[instrument(skip(self, ledger, bill), fields(ledger_id = %ledger.id))]
    pub async fn save(&self, ledger: &Ledger, bill: &Bill) -> Result<String, RepoError> {
        let id = self
            .store
            .create_record(&ledger.container_token, &ledger.table_token, encode(bill))
            .await?;
        Ok(id)
    }

    /// Bills matching `query`, in table order.
    ///
    /// Criteria are applied after decoding because an empty expenses cell
    /// counts as an expense. Rows that fail to decode are skipped.
    #[instrument(skip(self, ledger), fields(ledger_id = %ledger.id))]
    pub async fn search(&self, ledger: &Ledger, query: &BillQuery) -> Result<Vec<Bill>, RepoError> {
        let rows = self
            .store
            .read_records(&ledger.container_token, &ledger.table_token, &Filter::all())
            .await?;
        let mut bills = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode(row) {
                Ok(bill) if query.matches(&bill) => bills.push(bill),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping undecodable bill row"),
            }
        }
        Ok(bills)
    }

    /// Distinct categories in order of first use.
    pub async fn list_categories(&self, ledger: &Ledger) -> Result<Vec<String>, RepoError> {
        let bills = self.search(ledger, &BillQuery::default()).await?;
        let mut categories: Vec<String> = Vec::new();
        for category in bills.into_iter().flat_map(|b| b.categories) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        Ok(categories)
    }

    /// Sum of this calendar month's bills of the given kind.
    pub async fn month_total(
        &self,
        ledger: &Ledger,
        expenses: Expenses,
        now: DateTime<Utc>,
    ) -> Result<Decimal, RepoError> {
        let query = BillQuery {
            range: Some(DateRange::month_of(now, self.offset)),
            expenses: Some(expenses),
            category: None,
        };
        let bills = self.search(ledger, &query).await?;
        bills
            .iter()
            .try_fold(Decimal::ZERO, |total, bill| total.checked_add(bill.amount))
            .ok_or(RepoError::Overflow)
    }

    pub async fn summarize(&self, ledger: &Ledger, query: &BillQuery) -> Result<BillSummary, RepoError> {
        let bills = self.search(ledger, query).await?;
        BillSummary::of(&bills).ok_or(RepoError::Overflow)
    }
}
