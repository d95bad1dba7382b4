//! The collaborators every handler may need, built once at startup.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::pool::LedgerPool;
use crate::repo::{BillStore, UserStore};
use crate::store::DocumentStore;
use crate::tasks::TaskQueue;

pub const DEFAULT_SOURCE_URL: &str = "https://github.com/wangyuheng/richman";

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Services<S> {
    pub users: Arc<UserStore<S>>,
    pub bills: Arc<BillStore<S>>,
    pub pool: Arc<LedgerPool<S>>,
    pub tasks: TaskQueue,
    pub source_url: String,
    clock: Clock,
}

impl<S: DocumentStore> Services<S> {
    pub fn new(
        users: Arc<UserStore<S>>,
        bills: Arc<BillStore<S>>,
        pool: Arc<LedgerPool<S>>,
        tasks: TaskQueue,
    ) -> Self {
        Services {
            users,
            bills,
            pool,
            tasks,
            source_url: DEFAULT_SOURCE_URL.to_string(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Time zone of the bookkeeping calendar.
    pub fn offset(&self) -> FixedOffset {
        self.bills.offset()
    }
}
