//! Shared test fixtures and arbitrary generators for property-based testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::classifier::{ClassifierError, FunctionSpec, IntentClassifier};
use crate::pool::generate::BILL_TABLE_NAME;
use crate::pool::{GenerationConfig, LedgerGenerator, LedgerPool, PoolConfig};
use crate::repo::{BillStore, LedgerStore, UserStore};
use crate::services::Services;
use crate::store::RetryConfig;
use crate::store::memory::MemoryDocumentStore;
use crate::tasks::TaskQueue;
use crate::types::{Bill, Expenses, Intent, Ledger, User, UserId};

pub const REGISTRY: &str = "registry";
pub const LEDGER_TABLE: &str = "ledgers";
pub const USER_TABLE: &str = "users";
pub const TEMPLATE: &str = "tpl";

/// The fixed "now" of every fixture: mid-March in the bookkeeping calendar.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 4, 0, 0).unwrap()
}

pub fn beijing() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

/// A complete service graph over an in-memory store.
///
/// Must be created inside a tokio runtime; the task queue is stopped when
/// the fixture is dropped.
pub struct Fixture {
    pub store: Arc<MemoryDocumentStore>,
    pub ledgers: Arc<LedgerStore<MemoryDocumentStore>>,
    pub services: Arc<Services<MemoryDocumentStore>>,
    shutdown: CancellationToken,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(MemoryDocumentStore::new())
    }

    pub fn with_store(store: MemoryDocumentStore) -> Self {
        let store = Arc::new(store);
        store.register_template(TEMPLATE, &["分类", BILL_TABLE_NAME]);

        let ledgers = Arc::new(LedgerStore::new(store.clone(), REGISTRY, LEDGER_TABLE));
        let users = Arc::new(UserStore::new(store.clone(), REGISTRY, USER_TABLE));
        let bills = Arc::new(BillStore::new(store.clone(), beijing()));

        let mut generation = GenerationConfig::new(TEMPLATE, "folder");
        generation.copy_delay = Duration::ZERO;
        generation.propagation_retry = RetryConfig::IMMEDIATE;
        let generator = LedgerGenerator::new(store.clone(), ledgers.clone(), generation);
        let pool = Arc::new(LedgerPool::new(ledgers.clone(), generator, PoolConfig::default()));

        let shutdown = CancellationToken::new();
        let (tasks, _supervisor) = TaskQueue::start(shutdown.clone());
        let services = Services::new(users, bills, pool, tasks).with_clock(Arc::new(fixed_now));

        Fixture {
            store,
            ledgers,
            services: Arc::new(services),
            shutdown,
        }
    }

    pub async fn identified_user(&self, id: &str, name: &str) -> User {
        let user = User::new(UserId::new(id), name);
        self.services.users.save(&user).await.unwrap();
        user
    }

    pub async fn assign_ledger(&self, user: &User) -> Ledger {
        self.services.pool.ensure_owned(user).await.unwrap()
    }

    /// Saves a bill dated at the fixture's "now".
    pub async fn seed_bill(&self, ledger: &Ledger, user: &User, amount: Decimal, expenses: Expenses) {
        let bill = Bill {
            remark: "seed".to_string(),
            categories: vec!["其他".to_string()],
            amount,
            expenses,
            author_id: user.id.clone(),
            author_name: user.display_name.clone(),
            timestamp_millis: fixed_now().timestamp_millis(),
        };
        self.services.bills.save(ledger, &bill).await.unwrap();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Answer(Intent),
    Fail(u16),
    Panic,
}

/// A classifier that answers from a script keyed by the user's text.
///
/// Unscripted text classifies as [`Intent::Empty`].
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    script: Mutex<HashMap<String, Scripted>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every classification takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn script(&self, text: &str, entry: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.to_string(), entry);
    }

    pub fn answer(&self, text: &str, intent: Intent) {
        self.script(text, Scripted::Answer(intent));
    }

    /// Classifying `text` fails with the given HTTP status.
    pub fn fail(&self, text: &str, status: u16) {
        self.script(text, Scripted::Fail(status));
    }

    pub fn panic_on(&self, text: &str) {
        self.script(text, Scripted::Panic);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IntentClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        _system_prompt: &str,
        user_text: &str,
        _catalog: &[FunctionSpec],
    ) -> Result<Intent, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let entry = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_text)
            .cloned();
        match entry {
            Some(Scripted::Answer(intent)) => Ok(intent),
            Some(Scripted::Fail(status)) => Err(ClassifierError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Some(Scripted::Panic) => panic!("classifier exploded"),
            None => Ok(Intent::Empty),
        }
    }
}

// ─── Arbitrary generators ───

pub fn arb_user_id() -> impl Strategy<Value = UserId> {
    "o[A-Za-z0-9_-]{8,28}".prop_map(UserId::new)
}

pub fn arb_expenses() -> impl Strategy<Value = Expenses> {
    prop_oneof![Just(Expenses::Income), Just(Expenses::Expense)]
}

/// Positive amounts with at most two decimal places.
pub fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

pub fn arb_bill() -> impl Strategy<Value = Bill> {
    (
        "[a-z ]{0,20}",
        prop::collection::btree_set("[a-z]{1,8}", 1..3),
        arb_amount(),
        arb_expenses(),
        arb_user_id(),
        0i64..4_102_444_800_000,
    )
        .prop_map(|(remark, categories, amount, expenses, author_id, timestamp_millis)| Bill {
            remark,
            categories: categories.into_iter().collect(),
            amount,
            expenses,
            author_id,
            author_name: "someone".to_string(),
            timestamp_millis,
        })
}
