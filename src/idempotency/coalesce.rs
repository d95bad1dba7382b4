//! Duplicate suppression for webhook deliveries.
//!
//! The platform redelivers a message when it does not get a reply in time,
//! so the same delivery can arrive again while the first copy is still being
//! processed. The [`Coalescer`] lets exactly one copy do the work in the
//! common case, lets later copies replay its reply, and falls back to
//! independent processing when waiting would take too long.
//!
//! ```text
//! claim(id)
//!   ├─ cached?      → Replay(text)
//!   ├─ not running? → Process(guard)
//!   └─ running      → poll every `interval`, up to `attempts` times
//!                       ├─ cached        → Replay(text)
//!                       ├─ mark released → Process(guard)
//!                       └─ exhausted     → Process(guard)  (second holder)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::cache::IdempotencyCache;
use super::in_flight::InFlightTracker;
use crate::types::DeliveryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceConfig {
    pub cache_capacity: usize,
    pub in_flight_capacity: usize,
    /// How many times a duplicate re-polls before processing on its own.
    pub wait_attempts: u32,
    pub wait_interval: Duration,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        CoalesceConfig {
            cache_capacity: super::cache::DEFAULT_CAPACITY,
            in_flight_capacity: super::in_flight::DEFAULT_CAPACITY,
            wait_attempts: 5,
            wait_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a single non-blocking check.
#[derive(Debug)]
pub enum Begin {
    AlreadyCached(String),
    AlreadyInFlight,
    Started(InFlightGuard),
}

/// Outcome of [`Coalescer::claim`].
#[derive(Debug)]
pub enum Claim {
    /// Send this reply; do not process.
    Replay(String),
    /// Process the delivery while holding the guard.
    Process(InFlightGuard),
}

enum Poll {
    Cached(String),
    Busy,
    Released,
}

#[derive(Debug)]
struct CoalesceState {
    responses: IdempotencyCache,
    in_flight: InFlightTracker,
}

/// Reply cache and in-flight tracker under one mutex.
#[derive(Debug)]
pub struct Coalescer {
    state: Mutex<CoalesceState>,
    config: CoalesceConfig,
}

impl Coalescer {
    pub fn new(config: CoalesceConfig) -> Arc<Self> {
        Arc::new(Coalescer {
            state: Mutex::new(CoalesceState {
                responses: IdempotencyCache::new(config.cache_capacity),
                in_flight: InFlightTracker::new(config.in_flight_capacity),
            }),
            config,
        })
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CoalesceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks the cache, then the in-flight marks, and reserves the delivery
    /// if neither applies. The cache always wins.
    pub fn try_begin(self: &Arc<Self>, id: &DeliveryId) -> Begin {
        let mut state = self.lock();
        if let Some(text) = state.responses.get(id) {
            return Begin::AlreadyCached(text);
        }
        if state.in_flight.is_in_flight(id) {
            return Begin::AlreadyInFlight;
        }
        state.in_flight.acquire(id);
        Begin::Started(self.guard(id))
    }

    /// Like [`try_begin`](Self::try_begin) but reserves even when another
    /// holder is processing.
    fn begin_regardless(self: &Arc<Self>, id: &DeliveryId) -> Claim {
        let mut state = self.lock();
        if let Some(text) = state.responses.get(id) {
            return Claim::Replay(text);
        }
        let holders = state.in_flight.acquire(id);
        if holders > 1 {
            debug!(delivery_id = %id, holders, "Processing duplicate independently");
        }
        Claim::Process(self.guard(id))
    }

    fn guard(self: &Arc<Self>, id: &DeliveryId) -> InFlightGuard {
        InFlightGuard {
            coalescer: Arc::clone(self),
            id: id.clone(),
            released: false,
        }
    }

    /// Decides whether this copy of the delivery should process or replay,
    /// waiting a bounded time for a concurrent copy to finish.
    pub async fn claim(self: &Arc<Self>, id: &DeliveryId) -> Claim {
        match self.try_begin(id) {
            Begin::AlreadyCached(text) => return Claim::Replay(text),
            Begin::Started(guard) => return Claim::Process(guard),
            Begin::AlreadyInFlight => {}
        }

        for attempt in 1..=self.config.wait_attempts {
            tokio::time::sleep(self.config.wait_interval).await;
            match self.poll(id) {
                Poll::Cached(text) => {
                    trace!(delivery_id = %id, attempt, "Duplicate replaying finished reply");
                    return Claim::Replay(text);
                }
                // The holder finished without a cacheable reply.
                Poll::Released => break,
                Poll::Busy => trace!(delivery_id = %id, attempt, "Duplicate still waiting"),
            }
        }

        self.begin_regardless(id)
    }

    fn poll(&self, id: &DeliveryId) -> Poll {
        let state = self.lock();
        if let Some(text) = state.responses.peek(id) {
            Poll::Cached(text)
        } else if state.in_flight.is_in_flight(id) {
            Poll::Busy
        } else {
            Poll::Released
        }
    }

    /// The cached reply for a delivery, without touching recency.
    pub fn cached(&self, id: &DeliveryId) -> Option<String> {
        self.lock().responses.peek(id)
    }

    pub fn is_in_flight(&self, id: &DeliveryId) -> bool {
        self.lock().in_flight.is_in_flight(id)
    }

    fn complete(&self, id: &DeliveryId, reply: Option<String>) {
        let mut state = self.lock();
        if let Some(text) = reply {
            state.responses.insert(id.clone(), text);
        }
        state.in_flight.release(id);
    }
}

/// A reservation on an in-flight delivery.
///
/// Dropping the guard releases the reservation without caching anything,
/// so an error, a panic or a cancelled task never leaves a stale mark.
#[derive(Debug)]
pub struct InFlightGuard {
    coalescer: Arc<Coalescer>,
    id: DeliveryId,
    released: bool,
}

impl InFlightGuard {
    pub fn id(&self) -> &DeliveryId {
        &self.id
    }

    /// Caches the reply and releases the reservation in one step.
    pub fn finish(mut self, text: impl Into<String>) {
        self.coalescer.complete(&self.id, Some(text.into()));
        self.released = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.released {
            self.coalescer.complete(&self.id, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> CoalesceConfig {
        CoalesceConfig {
            wait_attempts: 5,
            wait_interval: Duration::from_millis(10),
            ..CoalesceConfig::default()
        }
    }

    fn id(s: &str) -> DeliveryId {
        DeliveryId::new(s)
    }

    #[test]
    fn first_copy_starts() {
        let coalescer = Coalescer::new(quick());
        assert!(matches!(coalescer.try_begin(&id("m1")), Begin::Started(_)));
    }

    #[test]
    fn second_copy_sees_in_flight() {
        let coalescer = Coalescer::new(quick());
        let _guard = coalescer.try_begin(&id("m1"));
        assert!(matches!(
            coalescer.try_begin(&id("m1")),
            Begin::AlreadyInFlight
        ));
    }

    #[test]
    fn finish_caches_and_clears() {
        let coalescer = Coalescer::new(quick());
        let Begin::Started(guard) = coalescer.try_begin(&id("m1")) else {
            panic!("expected Started");
        };
        guard.finish("done");

        assert!(!coalescer.is_in_flight(&id("m1")));
        match coalescer.try_begin(&id("m1")) {
            Begin::AlreadyCached(text) => assert_eq!(text, "done"),
            other => panic!("expected AlreadyCached, got {:?}", other),
        }
    }

    #[test]
    fn dropped_guard_clears_without_caching() {
        let coalescer = Coalescer::new(quick());
        let begin = coalescer.try_begin(&id("m1"));
        drop(begin);

        assert!(!coalescer.is_in_flight(&id("m1")));
        assert_eq!(coalescer.cached(&id("m1")), None);
        assert!(matches!(coalescer.try_begin(&id("m1")), Begin::Started(_)));
    }

    #[test]
    fn guard_released_on_panic() {
        let coalescer = Coalescer::new(quick());
        let cloned = Arc::clone(&coalescer);
        let result = std::panic::catch_unwind(move || {
            let _begin = cloned.try_begin(&DeliveryId::new("m1"));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!coalescer.is_in_flight(&id("m1")));
    }

    #[tokio::test]
    async fn waiting_duplicate_replays_finished_reply() {
        let coalescer = Coalescer::new(quick());
        let Claim::Process(guard) = coalescer.claim(&id("m1")).await else {
            panic!("expected Process");
        };

        let waiter = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move { coalescer.claim(&DeliveryId::new("m1")).await })
        };
        tokio::time::sleep(Duration::from_millis(15)).await;
        guard.finish("reply");

        match waiter.await.unwrap() {
            Claim::Replay(text) => assert_eq!(text, "reply"),
            Claim::Process(_) => panic!("duplicate should replay"),
        }
    }

    #[tokio::test]
    async fn waiting_duplicate_processes_after_uncached_release() {
        let coalescer = Coalescer::new(quick());
        let Claim::Process(guard) = coalescer.claim(&id("m1")).await else {
            panic!("expected Process");
        };

        let waiter = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move { coalescer.claim(&DeliveryId::new("m1")).await })
        };
        tokio::time::sleep(Duration::from_millis(15)).await;
        drop(guard);

        assert!(matches!(waiter.await.unwrap(), Claim::Process(_)));
    }

    #[tokio::test]
    async fn exhausted_wait_adds_second_holder() {
        let coalescer = Coalescer::new(CoalesceConfig {
            wait_attempts: 2,
            wait_interval: Duration::from_millis(5),
            ..CoalesceConfig::default()
        });
        let Claim::Process(first) = coalescer.claim(&id("m1")).await else {
            panic!("expected Process");
        };
        let Claim::Process(second) = coalescer.claim(&id("m1")).await else {
            panic!("expected Process after exhausting the wait");
        };

        drop(second);
        assert!(coalescer.is_in_flight(&id("m1")), "first holder remains");
        first.finish("late");
        assert!(!coalescer.is_in_flight(&id("m1")));
        assert_eq!(coalescer.cached(&id("m1")).as_deref(), Some("late"));
    }
}
