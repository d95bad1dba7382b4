//! Pool of pre-provisioned, unassigned ledgers.
//!
//! Generating a ledger takes several seconds of store calls, too long for a
//! chat reply. The pool keeps a few ready in memory and hands them out
//! last-in first-out. When the buffer is empty it falls back to unassigned
//! ledgers in the registry (left over from earlier runs), and only then
//! generates inline.
//!
//! # Concurrency
//!
//! The buffer and the set of ledgers this process has taken share one
//! mutex, never held across a store call. A ledger is identified by its
//! container token from the moment its workbook exists, so a ledger being
//! generated can never be claimed from the registry by a concurrent
//! allocation. Two allocations therefore never return the same ledger.
//!
//! Once a ledger's new owner is written, the registry no longer lists it as
//! unassigned and its token is dropped from the taken set. A registry listing
//! that was already in flight may still hold it, so while any listing is
//! pending the tokens are set aside and dropped when the last one finishes.
//!
//! Allocations for the same owner are serialised by [`LedgerPool::ensure_owned`];
//! one owner never ends up with two ledgers through this process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::repo::{LedgerStore, RepoError};
use crate::store::DocumentStore;
use crate::types::{Ledger, User, UserId};

pub mod generate;
pub mod maintenance;

pub use generate::{GenerationConfig, GenerationError, LedgerGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Replenish when the buffer holds this many or fewer.
    pub low_water: usize,
    /// The buffer never grows beyond this.
    pub high_water: usize,
    /// At most this many ledgers are generated per replenishment pass.
    pub batch: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            low_water: 5,
            high_water: 20,
            batch: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl PoolError {
    pub fn is_transient(&self) -> bool {
        match self {
            PoolError::Repo(e) => e.is_transient(),
            PoolError::Generation(e) => e.is_transient(),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    buffer: Vec<Ledger>,
    /// Container tokens of ledgers buffered, being generated, or being
    /// assigned by this process.
    taken: HashSet<String>,
    /// Registry listings in flight.
    listings: usize,
    /// Assigned tokens waiting for the in-flight listings to finish.
    settled: Vec<String>,
}

impl PoolState {
    fn assigned(&mut self, token: String) {
        if self.listings == 0 {
            self.taken.remove(&token);
        } else {
            self.settled.push(token);
        }
    }

    fn finish_listing(&mut self) {
        self.listings = self.listings.saturating_sub(1);
        if self.listings == 0 {
            for token in self.settled.drain(..) {
                self.taken.remove(&token);
            }
        }
    }
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts a registry listing as in flight until dropped.
struct Listing<'a> {
    state: &'a Mutex<PoolState>,
}

impl<'a> Listing<'a> {
    fn start(state: &'a Mutex<PoolState>) -> Self {
        lock_state(state).listings += 1;
        Listing { state }
    }
}

impl Drop for Listing<'_> {
    fn drop(&mut self) {
        lock_state(self.state).finish_listing();
    }
}

/// Where an allocated ledger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Buffer,
    Registry,
    Generated,
}

pub struct LedgerPool<S> {
    ledgers: Arc<LedgerStore<S>>,
    generator: LedgerGenerator<S>,
    state: Mutex<PoolState>,
    /// Held for the duration of a replenishment pass.
    warming: tokio::sync::Mutex<()>,
    owner_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    config: PoolConfig,
}

impl<S: DocumentStore> LedgerPool<S> {
    pub fn new(
        ledgers: Arc<LedgerStore<S>>,
        generator: LedgerGenerator<S>,
        config: PoolConfig,
    ) -> Self {
        LedgerPool {
            ledgers,
            generator,
            state: Mutex::new(PoolState::default()),
            warming: tokio::sync::Mutex::new(()),
            owner_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        lock_state(&self.state)
    }

    /// Ledgers currently buffered, oldest first.
    pub fn buffered(&self) -> Vec<Ledger> {
        self.lock().buffer.clone()
    }

    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Gives `user` a ledger of their own.
    ///
    /// Does not check whether the user already owns one; see
    /// [`ensure_owned`](Self::ensure_owned).
    #[instrument(skip(self, user), fields(owner = %user.id))]
    pub async fn allocate(&self, user: &User) -> Result<Ledger, PoolError> {
        let popped = self.lock().buffer.pop();
        let (ledger, source) = match popped {
            Some(ledger) => (ledger, Source::Buffer),
            None => match self.claim_from_registry().await? {
                Some(ledger) => (ledger, Source::Registry),
                None => (self.generate_claimed().await?, Source::Generated),
            },
        };
        let token = ledger.container_token.clone();
        debug!(ledger_id = %ledger.id, ?source, "Picked ledger");

        match self.ledgers.reassign_owner(ledger, user).await {
            Ok(ledger) => {
                self.lock().assigned(token);
                info!(ledger_id = %ledger.id, ?source, "Allocated ledger");
                Ok(ledger)
            }
            Err(e) => {
                // A buffered ledger is consumed regardless; the others are
                // still unassigned in the registry and can be claimed again.
                if source != Source::Buffer {
                    self.lock().taken.remove(&token);
                }
                warn!(error = %e, ?source, "Assigning ledger failed");
                Err(e.into())
            }
        }
    }

    /// The first unassigned registry ledger nobody in this process has taken.
    async fn claim_from_registry(&self) -> Result<Option<Ledger>, PoolError> {
        let _listing = Listing::start(&self.state);
        let candidates = self.ledgers.query_unassigned().await?;
        let mut state = self.lock();
        Ok(candidates
            .into_iter()
            .find(|c| state.taken.insert(c.container_token.clone())))
    }

    /// Generates a ledger that is already marked taken when it becomes
    /// visible in the registry.
    async fn generate_claimed(&self) -> Result<Ledger, GenerationError> {
        self.generator
            .generate(|draft| {
                self.lock().taken.insert(draft.container_token.clone());
            })
            .await
    }

    /// The ledger `owner` already has, if any.
    pub async fn query_owned(&self, owner: &UserId) -> Result<Option<Ledger>, PoolError> {
        Ok(self.ledgers.query_by_owner(owner).await?)
    }

    /// The user's ledger, allocating one if they have none.
    ///
    /// Concurrent calls for the same user are serialised, so the second
    /// finds the ledger the first allocated.
    pub async fn ensure_owned(&self, user: &User) -> Result<Ledger, PoolError> {
        let owner_lock = {
            let mut locks = self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user.id.clone()).or_default())
        };

        let result = {
            let _serialised = owner_lock.lock().await;
            match self.query_owned(&user.id).await {
                Ok(Some(ledger)) => Ok(ledger),
                Ok(None) => self.allocate(user).await,
                Err(e) => Err(e),
            }
        };

        drop(owner_lock);
        let mut locks = self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody is waiting.
        if locks
            .get(&user.id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&user.id);
        }
        result
    }

    /// Tops the buffer up when it has run low. Returns the buffer afterwards.
    ///
    /// Unassigned registry ledgers are used first; then up to `batch` new
    /// ones are generated until the buffer is above the low-water mark. A
    /// generation failure ends the pass. A pass that starts while another is
    /// running returns immediately.
    #[instrument(skip(self))]
    pub async fn ensure_warm(&self) -> Vec<Ledger> {
        let Ok(_pass) = self.warming.try_lock() else {
            debug!("Replenishment already running");
            return self.buffered();
        };

        if self.buffered_len() > self.config.low_water {
            return self.buffered();
        }

        let listing = Listing::start(&self.state);
        let listed = self.ledgers.query_unassigned().await;
        match listed {
            Ok(candidates) => {
                let mut state = self.lock();
                let mut pulled = 0;
                for candidate in candidates {
                    if state.buffer.len() >= self.config.high_water {
                        break;
                    }
                    if state.taken.insert(candidate.container_token.clone()) {
                        state.buffer.push(candidate);
                        pulled += 1;
                    }
                }
                if pulled > 0 {
                    debug!(pulled, "Buffered unassigned registry ledgers");
                }
            }
            Err(e) => warn!(error = %e, "Listing unassigned ledgers failed"),
        }
        drop(listing);

        let mut generated = 0;
        while generated < self.config.batch && self.needs_more() {
            match self.generate_claimed().await {
                Ok(ledger) => {
                    self.lock().buffer.push(ledger);
                    generated += 1;
                }
                Err(e) => {
                    warn!(error = %e, generated, "Ledger generation failed; ending pass");
                    break;
                }
            }
        }

        let buffered = self.buffered();
        info!(buffered = buffered.len(), generated, "Replenishment pass done");
        buffered
    }

    fn needs_more(&self) -> bool {
        let len = self.buffered_len();
        len <= self.config.low_water && len < self.config.high_water
    }
}
