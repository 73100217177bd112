//! Concurrent flow state store
//!
//! Owns one `FlowState` per `FlowKey`.
//!
//! # Design
//!
//! - Sharded concurrent map (DashMap) from key to a shared handle
//! - Per-flow mutex: packets of one flow serialize, other flows proceed
//! - Creation happens under the shard's entry lock, so racing first
//!   packets of a flow all receive the same state
//! - Removed states are marked evicted; a caller holding a stale handle
//!   sees the mark and re-resolves
//!
//! Never call back into the store while holding a flow lock.

use crate::window::FeatureWindow;
use censor_common::{Action, Direction, Endpoint, FlowKey, Packet};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable per-flow state
#[derive(Debug)]
pub struct FlowState {
    /// Flow key
    pub key: FlowKey,
    /// Source of the first observed packet
    pub initiator: Endpoint,
    /// Packets seen
    pub packets: u64,
    /// Payload bytes seen
    pub bytes: u64,
    /// Feature rows awaiting scoring
    pub window: FeatureWindow,
    /// Windows handed to the oracle
    pub windows_scored: u32,
    /// First packet timestamp
    pub first_seen: Instant,
    /// Last packet timestamp
    pub last_seen: Instant,
    latched: Option<Action>,
    evicted: bool,
}

impl FlowState {
    /// Create new flow state
    pub fn new(key: FlowKey, initiator: Endpoint, window: FeatureWindow, now: Instant) -> Self {
        Self {
            key,
            initiator,
            packets: 0,
            bytes: 0,
            window,
            windows_scored: 0,
            first_seen: now,
            last_seen: now,
            latched: None,
            evicted: false,
        }
    }

    /// Direction of a packet relative to the initiator
    #[inline(always)]
    pub fn direction_of(&self, packet: &Packet) -> Direction {
        packet.direction_from(&self.initiator)
    }

    /// Update with packet
    #[inline(always)]
    pub fn record(&mut self, packet: &Packet, now: Instant) {
        self.packets += 1;
        self.bytes += packet.payload_len() as u64;
        self.last_seen = now;
    }

    /// Latched action, if a decision has been made
    #[inline(always)]
    pub fn latched(&self) -> Option<Action> {
        self.latched
    }

    /// Latch an action
    ///
    /// The first latch wins; later calls return the action already latched.
    pub fn latch(&mut self, action: Action) -> Action {
        *self.latched.get_or_insert(action)
    }

    /// Whether the store has let go of this state
    #[inline(always)]
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    /// Check if flow is idle
    pub fn is_idle(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Shared handle to one flow's state
pub type FlowHandle = Arc<Mutex<FlowState>>;

/// Concurrent flow table
pub struct FlowStateStore {
    flows: DashMap<FlowKey, FlowHandle>,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl Default for FlowStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowStateStore {
    /// Create new store
    pub fn new() -> Self {
        Self {
            flows: DashMap::new(),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Create new store with an explicit shard count (power of two)
    pub fn with_shards(shards: usize) -> Self {
        Self {
            flows: DashMap::with_shard_amount(shards),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Look up a flow, creating it with `init` if absent
    ///
    /// Returns the handle and whether this call created it.
    pub fn get_or_create<F>(&self, key: &FlowKey, init: F) -> (FlowHandle, bool)
    where
        F: FnOnce() -> FlowState,
    {
        if let Some(handle) = self.flows.get(key) {
            return (Arc::clone(handle.value()), false);
        }

        let mut created = false;
        let handle = self
            .flows
            .entry(*key)
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(init()))
            })
            .value()
            .clone();

        if created {
            self.created.fetch_add(1, Ordering::Relaxed);
        }
        (handle, created)
    }

    /// Look up a flow
    pub fn get(&self, key: &FlowKey) -> Option<FlowHandle> {
        self.flows.get(key).map(|h| Arc::clone(h.value()))
    }

    /// Remove a flow if `handle` is still the stored state
    ///
    /// The caller must have marked the state evicted (see
    /// [`FlowStateStore::mark_evicted`]) and released its lock.
    pub fn remove_handle(&self, key: &FlowKey, handle: &FlowHandle) -> bool {
        let removed = self
            .flows
            .remove_if(key, |_, stored| Arc::ptr_eq(stored, handle))
            .is_some();
        if removed {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Mark a locked state as leaving the store
    #[inline(always)]
    pub fn mark_evicted(state: &mut FlowState) {
        state.evicted = true;
    }

    /// Remove a flow, waiting for any in-progress decision on it
    pub fn remove(&self, key: &FlowKey) -> Option<FlowHandle> {
        let handle = self.get(key)?;
        Self::mark_evicted(&mut handle.lock());
        if self.remove_handle(key, &handle) {
            Some(handle)
        } else {
            None
        }
    }

    /// Remove every flow matching `predicate`
    ///
    /// Flows whose lock is held are skipped for this pass, so a decision in
    /// progress is never swept. Returns the number removed.
    pub fn sweep<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&FlowState) -> bool,
    {
        let mut removed = 0usize;
        self.flows.retain(|_, handle| match handle.try_lock() {
            Some(mut state) => {
                if predicate(&state) {
                    state.evicted = true;
                    removed += 1;
                    false
                } else {
                    true
                }
            }
            None => true,
        });

        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Visit every flow that is not currently locked
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&FlowState),
    {
        for entry in self.flows.iter() {
            if let Some(state) = entry.value().try_lock() {
                f(&state);
            }
        }
    }

    /// Tracked flow count
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows created since startup
    pub fn created_total(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Flows evicted since startup
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
