//! Handler failures and how each one is answered.

use thiserror::Error;

use super::replies;
use crate::pool::PoolError;
use crate::repo::RepoError;
use crate::types::UnknownExpenses;

/// Input the user has to correct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount {0:?} is not a positive number")]
    IllegalAmount(String),

    #[error("bill has no category")]
    MissingCategory,

    #[error(transparent)]
    UnknownExpenses(#[from] UnknownExpenses),

    #[error("no name given")]
    MissingName,

    #[error("date {0:?} is not yyyy/mm/dd")]
    InvalidDate(String),

    #[error("date range ends before it starts")]
    InvalidDateRange,
}

impl ValidationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ValidationError::IllegalAmount(_) => replies::AMOUNT_ILLEGAL,
            ValidationError::MissingCategory => replies::MISSING_CATEGORY,
            ValidationError::UnknownExpenses(_) => replies::UNKNOWN_EXPENSES,
            ValidationError::MissingName => replies::MISSING_NAME,
            ValidationError::InvalidDate(_) | ValidationError::InvalidDateRange => {
                replies::INVALID_DATE
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("arguments for {function} do not decode: {source}")]
    InvalidArguments {
        function: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user owns no ledger")]
    NoLedger,

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// How a failed request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Might succeed on redelivery: apologise and do not cache.
    Transient,
    /// The user's input needs correcting.
    Validation,
    /// The user has to do something first.
    AuthorizationGap,
    /// Will fail the same way on redelivery.
    Failure,
}

impl HandlerError {
    pub fn disposition(&self) -> Disposition {
        match self {
            HandlerError::InvalidArguments { .. } | HandlerError::Validation(_) => {
                Disposition::Validation
            }
            HandlerError::NoLedger => Disposition::AuthorizationGap,
            HandlerError::Repo(e) if e.is_transient() => Disposition::Transient,
            HandlerError::Pool(e) if e.is_transient() => Disposition::Transient,
            HandlerError::Repo(_) | HandlerError::Pool(_) => Disposition::Failure,
        }
    }

    /// Whether the reply may be replayed for redeliveries of the message.
    pub fn is_cacheable(&self) -> bool {
        self.disposition() != Disposition::Transient
    }

    pub fn user_message(&self) -> String {
        match self {
            HandlerError::InvalidArguments { .. } => replies::NOT_UNDERSTOOD.to_string(),
            HandlerError::Validation(e) => e.user_message().to_string(),
            HandlerError::NoLedger => replies::NO_LEDGER.to_string(),
            HandlerError::Repo(_) | HandlerError::Pool(_) => match self.disposition() {
                Disposition::Transient => replies::APOLOGY.to_string(),
                _ => replies::FAILURE.to_string(),
            },
        }
    }
}
