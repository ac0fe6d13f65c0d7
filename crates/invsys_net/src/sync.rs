//! Replica synchronization
//!
//! The authoritative side pushes every committed [`ContainerDelta`] to the
//! subscribers of that container through a [`ReplicationPublisher`]. Each
//! observing side keeps a [`ReplicaSynchronizer`] that applies deltas in strict
//! version order:
//!
//! - `version == last + 1`: applied, then any buffered successors are drained
//! - `version <= last`: a duplicate, discarded
//! - `version > last + 1`: a gap; the delta is buffered and a snapshot is
//!   requested from the authority
//!
//! A snapshot always wins over buffered deltas: everything at or below its
//! version is discarded and the rest is replayed. When no snapshot arrives in
//! time the request is repeated a bounded number of times, after which the
//! replica is marked stale and a [`SyncEvent::ResyncTimeout`] is raised. A
//! stale replica keeps serving its last known state until a snapshot or the
//! missing deltas arrive.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::wire::NetMessage;
use invsys_core::{ContainerId, Handle, PeerId, Version};
use invsys_inventory::{AppliedDelta, ContainerDelta, ContainerSnapshot, InventoryContainer};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Instant;

/// Health of one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaStatus {
    /// Caught up with every delta seen so far
    Synced,
    /// A snapshot was requested and has not arrived yet
    AwaitingSnapshot { since: Instant, attempts: u32 },
    /// Snapshot requests went unanswered; showing last known state
    Stale { since: Instant },
}

impl ReplicaStatus {
    /// Check if the replica is caught up
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }

    /// Check if the replica gave up waiting for a snapshot
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Notable synchronizer transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A snapshot was requested from the authority
    ResyncRequested {
        container: ContainerId,
        attempt: u32,
    },
    /// A requested snapshot arrived and the replica is caught up
    Resynced {
        container: ContainerId,
        version: Version,
    },
    /// No snapshot arrived after every retry
    ResyncTimeout {
        container: ContainerId,
        attempts: u32,
    },
    /// A stale replica caught up again
    Recovered {
        container: ContainerId,
        version: Version,
    },
}

/// Counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Deltas applied in order
    pub applied: u64,
    /// Deltas discarded as already applied
    pub duplicates: u64,
    /// Deltas put aside because of a gap
    pub buffered: u64,
    /// Version gaps detected
    pub gaps: u64,
    /// Snapshots installed
    pub snapshots: u64,
    /// Replicas that went stale
    pub timeouts: u64,
    /// Messages about containers not replicated here
    pub ignored: u64,
}

struct ReplicaState {
    authority: PeerId,
    container: Option<InventoryContainer>,
    buffered: BTreeMap<Version, ContainerDelta>,
    status: ReplicaStatus,
}

/// Observer-side replicas of remote containers
pub struct ReplicaSynchronizer {
    local: PeerId,
    config: SyncConfig,
    replicas: HashMap<ContainerId, ReplicaState>,
    outgoing: VecDeque<(PeerId, NetMessage)>,
    events: VecDeque<SyncEvent>,
    stats: SyncStats,
}

impl ReplicaSynchronizer {
    /// Create an empty synchronizer
    pub fn new(local: PeerId, config: SyncConfig) -> Self {
        Self {
            local,
            config,
            replicas: HashMap::new(),
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
            stats: SyncStats::default(),
        }
    }

    /// Start replicating a container owned by `authority`
    ///
    /// Sends a subscription; the authority answers with a snapshot.
    pub fn subscribe(&mut self, container: ContainerId, authority: PeerId, now: Instant) {
        if self.replicas.contains_key(&container) {
            return;
        }
        self.replicas.insert(
            container,
            ReplicaState {
                authority,
                container: None,
                buffered: BTreeMap::new(),
                status: ReplicaStatus::AwaitingSnapshot {
                    since: now,
                    attempts: 1,
                },
            },
        );
        self.outgoing
            .push_back((authority, NetMessage::Subscribe { container }));
        log::debug!("{} subscribed to {} at {}", self.local, container, authority);
    }

    /// Adopt a known state as an already synced replica
    pub fn adopt(&mut self, snapshot: ContainerSnapshot, authority: PeerId) {
        let id = snapshot.container;
        let limit = self.config.unbounded_slot_limit;
        let container = match InventoryContainer::from_snapshot(snapshot, Handle::null(), limit) {
            Ok(container) => container,
            Err(err) => {
                log::warn!("{} cannot adopt {}: {}", self.local, id, err);
                return;
            }
        };
        self.replicas.insert(
            id,
            ReplicaState {
                authority,
                container: Some(container),
                buffered: BTreeMap::new(),
                status: ReplicaStatus::Synced,
            },
        );
    }

    /// Stop replicating a container
    pub fn unsubscribe(&mut self, container: ContainerId) -> Option<InventoryContainer> {
        let state = self.replicas.remove(&container)?;
        self.outgoing
            .push_back((state.authority, NetMessage::Unsubscribe { container }));
        state.container
    }

    /// Drop a replica without telling anyone (dissolved, or promoted to local authority)
    pub fn forget(&mut self, container: ContainerId) -> Option<InventoryContainer> {
        self.replicas.remove(&container)?.container
    }

    /// Point resync requests at a new authority
    pub fn set_authority(&mut self, container: ContainerId, authority: PeerId) {
        if let Some(state) = self.replicas.get_mut(&container) {
            state.authority = authority;
        }
    }

    /// Current authority of a replicated container
    pub fn authority_of(&self, container: ContainerId) -> Option<PeerId> {
        self.replicas.get(&container).map(|s| s.authority)
    }

    /// Check if a container is replicated here
    pub fn is_tracking(&self, container: ContainerId) -> bool {
        self.replicas.contains_key(&container)
    }

    /// Replicated containers, sorted
    pub fn containers(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self.replicas.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Last known state of a container, even if stale
    pub fn replica(&self, container: ContainerId) -> Option<&InventoryContainer> {
        self.replicas.get(&container)?.container.as_ref()
    }

    /// Last known state, failing when the replica is stale or missing
    pub fn require_synced(&self, container: ContainerId) -> SyncResult<&InventoryContainer> {
        let state = self
            .replicas
            .get(&container)
            .ok_or(SyncError::UnknownContainer(container))?;
        if state.status.is_stale() {
            return Err(SyncError::ResyncTimeout {
                container,
                attempts: self.config.max_resync_attempts,
            });
        }
        state
            .container
            .as_ref()
            .ok_or(SyncError::UnknownContainer(container))
    }

    /// Version last applied to a replica
    pub fn last_applied(&self, container: ContainerId) -> Option<Version> {
        self.replica(container).map(InventoryContainer::version)
    }

    /// Health of a replica
    pub fn status(&self, container: ContainerId) -> Option<ReplicaStatus> {
        self.replicas.get(&container).map(|s| s.status)
    }

    /// Number of deltas waiting behind a gap
    pub fn buffered(&self, container: ContainerId) -> usize {
        self.replicas.get(&container).map_or(0, |s| s.buffered.len())
    }

    /// Handle an incoming delta
    ///
    /// Returns the deltas that landed, in version order.
    pub fn on_delta(&mut self, delta: ContainerDelta, now: Instant) -> Vec<ContainerDelta> {
        let id = delta.container;
        let max_buffered = self.config.max_buffered_deltas;
        let Some(state) = self.replicas.get_mut(&id) else {
            self.stats.ignored += 1;
            log::debug!("{} ignoring delta for untracked {}", self.local, id);
            return Vec::new();
        };

        if state.container.is_none() {
            // Still waiting for the first snapshot
            Self::buffer(state, delta, max_buffered, &mut self.stats);
            return Vec::new();
        }
        let Some(container) = state.container.as_mut() else {
            return Vec::new();
        };

        let last = container.version();
        if delta.version <= last {
            self.stats.duplicates += 1;
            return Vec::new();
        }

        if !last.is_followed_by(delta.version) {
            self.stats.gaps += 1;
            log::debug!(
                "{} gap on {}: at {}, received {}",
                self.local, id, last, delta.version
            );
            Self::buffer(state, delta, max_buffered, &mut self.stats);
            // A stale replica asks again: fresh traffic means the link is back
            if !matches!(state.status, ReplicaStatus::AwaitingSnapshot { .. }) {
                self.request_resync(id, 1, now);
            }
            return Vec::new();
        }

        let mut landed = Vec::new();
        if let Err(err) = container.apply_delta(&delta) {
            log::warn!("{} could not apply delta to {}: {}", self.local, id, err);
            self.request_resync(id, 1, now);
            return landed;
        }
        self.stats.applied += 1;
        landed.push(delta);
        landed.extend(self.drain_buffered(id));
        self.settle(id, now);
        landed
    }

    /// Handle an incoming snapshot
    ///
    /// Returns the net change to the replica as one delta, or `None` when the
    /// snapshot was older than the replica.
    pub fn on_snapshot(&mut self, snapshot: ContainerSnapshot, now: Instant) -> Option<ContainerDelta> {
        let id = snapshot.container;
        let Some(state) = self.replicas.get_mut(&id) else {
            self.stats.ignored += 1;
            log::debug!("{} ignoring snapshot for untracked {}", self.local, id);
            return None;
        };

        let version = snapshot.version;
        let before = match &state.container {
            Some(current) if current.version() > version => {
                log::debug!(
                    "{} ignoring old snapshot {} of {} (at {})",
                    self.local, version, id, current.version()
                );
                return None;
            }
            Some(current) => current.slots().to_vec(),
            None => Vec::new(),
        };

        let mut change = ContainerDelta::diff(id, version, &before, &snapshot.slots);
        let limit = self.config.unbounded_slot_limit;
        let installed = match state.container.as_mut() {
            Some(current) => current.restore(snapshot),
            None => InventoryContainer::from_snapshot(snapshot, Handle::null(), limit)
                .map(|container| state.container = Some(container)),
        };
        if let Err(err) = installed {
            log::warn!("{} rejected snapshot for {}: {}", self.local, id, err);
            return None;
        }
        state.buffered = state.buffered.split_off(&version.next());
        self.stats.snapshots += 1;
        log::debug!("{} installed snapshot {} of {}", self.local, version, id);

        // Replay whatever continues from the snapshot, folded into one change
        for replayed in self.drain_buffered(id) {
            change.version = replayed.version;
            for slot in replayed.changes {
                match change.changes.iter_mut().find(|c| c.index == slot.index) {
                    Some(existing) => existing.stack = slot.stack,
                    None => change.changes.push(slot),
                }
            }
        }
        change.changes.sort_by_key(|c| c.index);
        if self.buffered(id) > 0 {
            // This snapshot answered the last request; the rest is still missing
            self.request_resync(id, 1, now);
        } else {
            self.settle(id, now);
        }
        Some(change)
    }

    /// Re-request overdue snapshots and mark exhausted replicas stale
    pub fn poll_timeouts(&mut self, now: Instant) {
        let timeout = self.config.resync_timeout();
        let max_attempts = self.config.max_resync_attempts;
        let overdue: Vec<(ContainerId, u32)> = self
            .replicas
            .iter()
            .filter_map(|(id, state)| match state.status {
                ReplicaStatus::AwaitingSnapshot { since, attempts }
                    if now.saturating_duration_since(since) >= timeout =>
                {
                    Some((*id, attempts))
                }
                _ => None,
            })
            .collect();

        for (id, attempts) in overdue {
            if attempts < max_attempts {
                self.request_resync(id, attempts + 1, now);
                continue;
            }
            if let Some(state) = self.replicas.get_mut(&id) {
                state.status = ReplicaStatus::Stale { since: now };
            }
            self.stats.timeouts += 1;
            log::warn!(
                "{} gave up on snapshot for {} after {} requests",
                self.local, id, attempts
            );
            self.events.push_back(SyncEvent::ResyncTimeout {
                container: id,
                attempts,
            });
        }
    }

    /// Ask for a fresh snapshot right away, even if stale
    pub fn request_resync(&mut self, container: ContainerId, attempt: u32, now: Instant) {
        let Some(state) = self.replicas.get_mut(&container) else {
            return;
        };
        state.status = ReplicaStatus::AwaitingSnapshot {
            since: now,
            attempts: attempt,
        };
        let have = state.container.as_ref().map(InventoryContainer::version);
        self.outgoing
            .push_back((state.authority, NetMessage::ResyncRequest { container, have }));
        log::info!("{} requesting snapshot of {} (attempt {})", self.local, container, attempt);
        self.events.push_back(SyncEvent::ResyncRequested { container, attempt });
    }

    /// Take outgoing messages (drains the queue)
    pub fn take_outgoing(&mut self) -> Vec<(PeerId, NetMessage)> {
        self.outgoing.drain(..).collect()
    }

    /// Take pending events (drains the queue)
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    /// Get synchronization statistics
    pub fn stats(&self) -> SyncStats {
        self.stats.clone()
    }

    fn buffer(state: &mut ReplicaState, delta: ContainerDelta, max: usize, stats: &mut SyncStats) {
        if state.buffered.len() >= max {
            // The snapshot will cover everything that was put aside
            state.buffered.clear();
        }
        stats.buffered += 1;
        state.buffered.insert(delta.version, delta);
    }

    fn drain_buffered(&mut self, id: ContainerId) -> Vec<ContainerDelta> {
        let mut landed = Vec::new();
        let Some(state) = self.replicas.get_mut(&id) else {
            return landed;
        };
        let Some(container) = state.container.as_mut() else {
            return landed;
        };
        loop {
            let next = container.version().next();
            let Some(delta) = state.buffered.remove(&next) else {
                break;
            };
            if let Err(err) = container.apply_delta(&delta) {
                log::warn!("{} buffered delta for {} failed: {}", self.local, id, err);
                break;
            }
            self.stats.applied += 1;
            landed.push(delta);
        }
        // Anything at or below the current version is now redundant
        let floor = container.version().next();
        state.buffered = state.buffered.split_off(&floor);
        landed
    }

    fn settle(&mut self, id: ContainerId, now: Instant) {
        let Some(state) = self.replicas.get_mut(&id) else {
            return;
        };
        let version = state
            .container
            .as_ref()
            .map_or(Version::ZERO, InventoryContainer::version);
        if !state.buffered.is_empty() {
            // A gap remains past what we have
            if !matches!(state.status, ReplicaStatus::AwaitingSnapshot { .. }) {
                self.request_resync(id, 1, now);
            }
            return;
        }
        let previous = std::mem::replace(&mut state.status, ReplicaStatus::Synced);
        match previous {
            ReplicaStatus::Synced => {}
            ReplicaStatus::AwaitingSnapshot { .. } => {
                self.events.push_back(SyncEvent::Resynced { container: id, version });
            }
            ReplicaStatus::Stale { .. } => {
                log::info!("{} recovered {} at {}", self.local, id, version);
                self.events.push_back(SyncEvent::Recovered { container: id, version });
            }
        }
    }
}

/// Authority-side fan-out of deltas to subscribers
pub struct ReplicationPublisher {
    subscribers: HashMap<ContainerId, BTreeSet<PeerId>>,
    outgoing: VecDeque<(PeerId, NetMessage)>,
}

impl ReplicationPublisher {
    /// Create a publisher with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            outgoing: VecDeque::new(),
        }
    }

    /// Add a subscriber and send it the current state
    pub fn subscribe(&mut self, peer: PeerId, snapshot: ContainerSnapshot) {
        let container = snapshot.container;
        self.subscribers.entry(container).or_default().insert(peer);
        self.outgoing.push_back((peer, NetMessage::Snapshot(snapshot)));
        log::debug!("{} subscribed to {}", peer, container);
    }

    /// Register subscribers without sending anything (authority handover)
    pub fn adopt_subscribers(&mut self, container: ContainerId, peers: impl IntoIterator<Item = PeerId>) {
        self.subscribers.entry(container).or_default().extend(peers);
    }

    /// Remove a subscriber
    pub fn unsubscribe(&mut self, peer: PeerId, container: ContainerId) {
        if let Some(peers) = self.subscribers.get_mut(&container) {
            peers.remove(&peer);
        }
    }

    /// Answer a resync request with a fresh snapshot
    ///
    /// Asking for a snapshot implies interest, so the peer also becomes a
    /// subscriber; this covers a lost `Subscribe`.
    pub fn resync(&mut self, peer: PeerId, snapshot: ContainerSnapshot) {
        self.subscribers
            .entry(snapshot.container)
            .or_default()
            .insert(peer);
        self.outgoing.push_back((peer, NetMessage::Snapshot(snapshot)));
    }

    /// Queue every container delta of a committed transaction for its subscribers
    pub fn publish(&mut self, applied: &AppliedDelta) {
        for delta in &applied.deltas {
            let Some(peers) = self.subscribers.get(&delta.container) else {
                continue;
            };
            for peer in peers {
                self.outgoing.push_back((*peer, NetMessage::Delta(delta.clone())));
            }
        }
    }

    /// Queue one message for every subscriber of a container
    pub fn broadcast(&mut self, container: ContainerId, message: NetMessage) {
        if let Some(peers) = self.subscribers.get(&container) {
            for peer in peers {
                self.outgoing.push_back((*peer, message.clone()));
            }
        }
    }

    /// Subscribers of a container
    pub fn subscribers(&self, container: ContainerId) -> Vec<PeerId> {
        self.subscribers
            .get(&container)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget a container and all its subscribers
    pub fn remove_container(&mut self, container: ContainerId) -> Vec<PeerId> {
        self.subscribers
            .remove(&container)
            .map(|peers| peers.into_iter().collect())
            .unwrap_or_default()
    }

    /// Take outgoing messages (drains the queue)
    pub fn take_outgoing(&mut self) -> Vec<(PeerId, NetMessage)> {
        self.outgoing.drain(..).collect()
    }
}

impl Default for ReplicationPublisher {
    fn default() -> Self {
        Self::new()
    }
}
