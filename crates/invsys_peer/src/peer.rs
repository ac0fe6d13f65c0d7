//! One simulation side
//!
//! An [`InventoryPeer`] owns the containers this side is authoritative for,
//! replicas of the ones it observes, and the protocol state machines that keep
//! both in line with the other sides. Everything is driven from [`tick`]
//! with a caller supplied clock.
//!
//! [`tick`]: InventoryPeer::tick

use crate::config::PeerConfig;
use crate::error::{PeerError, PeerResult};
use crate::events::{EventQueue, PeerEvent};
use crate::persistence::{InventorySave, SaveManager, SaveState, SavedContainer};
use crossbeam_channel::Receiver;
use invsys_core::{ContainerId, Owner, OwnerKind, OwnerRegistry, PeerId, RequestId};
use invsys_inventory::{
    AppliedDelta, ContainerDelta, ContainerSnapshot, ContainerStore, InventoryContainer, ItemTable,
    Transaction, TransactionEngine, TransactionError, TransactionResult,
};
use invsys_net::{
    AuthorityResolver, AuthorityState, Handover, MessageChannel, NetMessage, ReplicaStatus,
    ReplicaSynchronizer, ReplicationPublisher, ResolverEvent, SlotView, SpeculationOutcome,
    SpeculativeOverlay, SyncEvent, SyncStats, Transport, TransportStats,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Answered remote requests remembered for duplicate delivery
const ANSWERED_CAPACITY: usize = 1024;

/// How a requested transaction was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Every container is local: the transaction is committed and published
    Committed(AppliedDelta),
    /// Sent to `authority`; `predicted` is shown until it answers
    Speculative {
        request: RequestId,
        authority: PeerId,
        predicted: AppliedDelta,
    },
}

/// One side of the inventory simulation
pub struct InventoryPeer<T: Transport> {
    pub(crate) config: PeerConfig,
    pub(crate) engine: TransactionEngine,
    pub(crate) store: ContainerStore,
    pub(crate) owners: OwnerRegistry,
    pub(crate) replicas: ReplicaSynchronizer,
    pub(crate) publisher: ReplicationPublisher,
    pub(crate) resolver: AuthorityResolver,
    pub(crate) overlay: SpeculativeOverlay,
    pub(crate) channel: MessageChannel<T>,
    pub(crate) outbox: Vec<(PeerId, NetMessage)>,
    answered: VecDeque<((PeerId, RequestId), TransactionResult<AppliedDelta>)>,
    pub(crate) events: EventQueue,
    pub(crate) save_state: SaveState,
}

impl<T: Transport> InventoryPeer<T> {
    /// Create a side speaking over `transport`
    ///
    /// The transport decides the identity; a differing `config.peer_id` is
    /// overridden.
    pub fn new(mut config: PeerConfig, catalog: Arc<ItemTable>, transport: T) -> Self {
        let local = transport.local_peer();
        if local != config.peer_id {
            log::warn!(
                "Configured as {} but the transport speaks for {}",
                config.peer_id,
                local
            );
            config.peer_id = local;
        }

        config.sync.unbounded_slot_limit = config.unbounded_slot_limit;
        let engine =
            TransactionEngine::new(catalog).with_unbounded_slot_limit(config.unbounded_slot_limit);
        let mut resolver = AuthorityResolver::new(local, config.sync.clone());
        resolver.set_allow_transfer(config.allow_authority_transfer);

        log::info!("Inventory peer {} ready", local);
        Self {
            replicas: ReplicaSynchronizer::new(local, config.sync.clone()),
            overlay: SpeculativeOverlay::new(engine.clone(), config.sync.clone()),
            publisher: ReplicationPublisher::new(),
            store: ContainerStore::new(),
            owners: OwnerRegistry::new(),
            channel: MessageChannel::new(transport),
            outbox: Vec::new(),
            answered: VecDeque::new(),
            events: EventQueue::new(),
            save_state: SaveState::None,
            engine,
            resolver,
            config,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.config.peer_id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    /// Receiver of everything this side reports
    pub fn events(&self) -> Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Take every event nobody has received yet
    pub fn drain_events(&self) -> Vec<PeerEvent> {
        self.events.drain()
    }

    pub fn save_state(&self) -> SaveState {
        self.save_state
    }

    pub fn is_authoritative(&self, container: ContainerId) -> bool {
        self.resolver.is_authoritative(container)
    }

    pub fn authority_state(&self, container: ContainerId) -> Option<AuthorityState> {
        self.resolver.state(container)
    }

    /// Side currently in charge of a container, as far as this side knows
    pub fn authority_of(&self, container: ContainerId) -> Option<PeerId> {
        self.resolver.authority_of(container)
    }

    /// Containers this side may commit to
    pub fn authoritative(&self) -> Vec<ContainerId> {
        self.resolver.authoritative()
    }

    /// Containers observed through replicas
    pub fn observed(&self) -> Vec<ContainerId> {
        self.replicas.containers()
    }

    pub fn replica_status(&self, container: ContainerId) -> Option<ReplicaStatus> {
        self.replicas.status(container)
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.replicas.stats()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.channel.stats()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    /// Owner of a local container
    pub fn owner_of(&self, container: ContainerId) -> Option<&Owner> {
        let owner = self.store.read(container, |c| c.owner())?;
        self.owners.resolve(owner)
    }

    /// Last known state, authoritative or replicated
    pub fn snapshot(&self, container: ContainerId) -> Option<ContainerSnapshot> {
        self.store
            .snapshot(container)
            .or_else(|| self.replicas.replica(container).map(|c| c.snapshot()))
    }

    /// What gameplay and UI should show for a container
    ///
    /// Local containers are always confirmed; replicas carry pending predictions.
    pub fn view(&self, container: ContainerId) -> Option<Vec<SlotView>> {
        if let Some(slots) = self.store.read(container, |c| c.slots().to_vec()) {
            return Some(slots.into_iter().map(SlotView::Confirmed).collect());
        }
        self.overlay.view(container, &self.replicas)
    }

    /// Whether a speculated request still awaits resolution
    pub fn is_pending(&self, request: RequestId) -> bool {
        self.overlay.is_pending(request)
    }

    /// Log the contents of a container
    pub fn log_inventory(&self, container: ContainerId) {
        let description = self
            .store
            .read(container, |c| c.describe())
            .or_else(|| self.replicas.replica(container).map(|c| c.describe()));
        match description {
            Some(description) => log::info!("{}", description),
            None => log::warn!("No container {} on {}", container, self.local_peer()),
        }
    }

    /// Start observing a container held by `authority`
    pub fn subscribe(&mut self, container: ContainerId, authority: PeerId, now: Instant) {
        self.replicas.subscribe(container, authority, now);
        self.resolver.observe(container, authority);
    }

    /// Stop observing a container
    pub fn unsubscribe(&mut self, container: ContainerId) {
        self.replicas.unsubscribe(container);
        if !self.store.contains(container) {
            self.resolver.release(container);
        }
        for outcome in self.overlay.discard_container(container) {
            self.on_speculation(outcome);
        }
    }

    /// Ask the authority for a fresh snapshot of an observed container
    pub fn resync(&mut self, container: ContainerId, now: Instant) -> PeerResult<()> {
        if !self.replicas.is_tracking(container) {
            return Err(PeerError::UnknownContainer(container));
        }
        self.replicas.request_resync(container, 1, now);
        Ok(())
    }

    /// Ask the current authority to hand a container over
    pub fn request_authority(&mut self, container: ContainerId, now: Instant) -> PeerResult<()> {
        self.resolver.request_authority(container, now)?;
        Ok(())
    }

    /// Run a transaction
    ///
    /// Committed directly when this side holds every container; otherwise sent
    /// to the single remote authority holding all of them and predicted
    /// meanwhile.
    pub fn request_transaction(
        &mut self,
        transaction: Transaction,
        now: Instant,
    ) -> TransactionResult<Submission> {
        let result = self.route(transaction, now);
        if let Err(error) = &result {
            log::debug!("{} refused a transaction: {}", self.local_peer(), error);
            self.events.emit(PeerEvent::TransactionRejected {
                request: None,
                error: error.clone(),
            });
        }
        result
    }

    fn route(&mut self, transaction: Transaction, now: Instant) -> TransactionResult<Submission> {
        if transaction.is_empty() {
            return Err(TransactionError::EmptyTransaction);
        }
        let containers = transaction.containers();
        if containers.iter().all(|id| self.resolver.is_authoritative(*id)) {
            return self.commit_local(&transaction).map(Submission::Committed);
        }

        let local = self.local_peer();
        let mut authority = None;
        for id in &containers {
            let holder = self
                .resolver
                .authority_of(*id)
                .ok_or(TransactionError::UnknownContainer(*id))?;
            if holder == local || authority.is_some_and(|a| a != holder) {
                return Err(TransactionError::AuthorityDenied(*id));
            }
            authority = Some(holder);
        }
        let authority = authority.ok_or(TransactionError::EmptyTransaction)?;

        let request = RequestId::next();
        let predicted = self
            .overlay
            .speculate(request, &transaction, &self.replicas, now)?;
        self.outbox.push((
            authority,
            NetMessage::TransactionRequest {
                request,
                transaction,
            },
        ));
        Ok(Submission::Speculative {
            request,
            authority,
            predicted,
        })
    }

    /// Commit against local containers and publish the result
    pub(crate) fn commit_local(&mut self, transaction: &Transaction) -> TransactionResult<AppliedDelta> {
        let applied = self.engine.apply(&self.store, transaction, &self.resolver)?;
        self.publisher.publish(&applied);
        self.save_state = SaveState::NeedsSaving;
        self.events
            .emit(PeerEvent::TransactionCommitted(applied.clone()));
        Ok(applied)
    }

    /// Process everything received, run timers, and send what is due
    pub fn tick(&mut self, now: Instant) -> PeerResult<()> {
        for (from, message) in self.channel.receive_all()? {
            self.dispatch(from, message, now);
        }

        self.replicas.poll_timeouts(now);
        self.resolver.poll_handshakes(now);
        for outcome in self.overlay.expire(now) {
            self.on_speculation(outcome);
        }

        self.process_sync_events();
        self.process_resolver_events();
        self.flush();
        Ok(())
    }

    /// Send every queued message
    ///
    /// Failed sends are logged; the protocol recovers through retries.
    pub fn flush(&mut self) {
        let mut outgoing = std::mem::take(&mut self.outbox);
        outgoing.extend(self.replicas.take_outgoing());
        outgoing.extend(self.publisher.take_outgoing());
        outgoing.extend(self.resolver.take_outgoing());

        for (to, message) in outgoing {
            if let Err(err) = self.channel.send(to, message) {
                log::warn!("{} could not reach {}: {}", self.local_peer(), to, err);
            }
        }
    }

    fn dispatch(&mut self, from: PeerId, message: NetMessage, now: Instant) {
        log::trace!("{} <- {}: {}", self.local_peer(), from, message.name());
        match message {
            NetMessage::Subscribe { container } => match self.serving_snapshot(container) {
                Some(snapshot) => self.publisher.subscribe(from, snapshot),
                None => self.redirect(from, container),
            },
            NetMessage::Unsubscribe { container } => self.publisher.unsubscribe(from, container),
            NetMessage::ResyncRequest { container, have } => {
                log::debug!("{} resyncs {} from {:?}", from, container, have);
                match self.serving_snapshot(container) {
                    Some(snapshot) => self.publisher.resync(from, snapshot),
                    None => self.redirect(from, container),
                }
            }
            NetMessage::Delta(delta) => {
                let container = delta.container;
                let landed = self.replicas.on_delta(delta, now);
                self.after_replica_change(container, &landed);
            }
            NetMessage::Snapshot(snapshot) => {
                let container = snapshot.container;
                if let Some(change) = self.replicas.on_snapshot(snapshot, now) {
                    self.after_replica_change(container, &[change]);
                }
            }
            NetMessage::TransactionRequest {
                request,
                transaction,
            } => self.serve_request(from, request, transaction),
            NetMessage::TransactionResult { request, outcome } => {
                if let Err(error) = &outcome {
                    self.events.emit(PeerEvent::TransactionRejected {
                        request: Some(request),
                        error: error.clone(),
                    });
                }
                for outcome in self.overlay.on_result(request, &outcome, &self.replicas) {
                    self.on_speculation(outcome);
                }
            }
            NetMessage::AuthorityRequest { container } => {
                let snapshot = self.store.snapshot(container);
                let observers = self.publisher.subscribers(container);
                self.resolver
                    .on_request(from, container, snapshot, observers, now);
            }
            NetMessage::AuthorityGrant {
                snapshot,
                observers,
                ..
            } => {
                if let Err(err) = self.engine.validate_snapshot(&snapshot) {
                    // Left unacknowledged, the granting side reclaims
                    log::warn!("Ignoring grant of {} from {}: {}", snapshot.container, from, err);
                } else if let Some(handover) = self.resolver.on_grant(from, snapshot, observers, now) {
                    self.install_handover(handover);
                }
            }
            NetMessage::AuthorityAck { container, version } => {
                self.resolver.on_ack(from, container, version)
            }
            NetMessage::AuthorityChanged {
                container,
                authority,
                version,
            } => self.resolver.on_changed(container, authority, version),
            NetMessage::ContainerDissolved { container } => self.on_remote_dissolved(container),
        }
    }

    /// Snapshot to serve to observers, while this side is still the authority
    fn serving_snapshot(&self, container: ContainerId) -> Option<ContainerSnapshot> {
        if self.resolver.authority_of(container) != Some(self.local_peer()) {
            return None;
        }
        self.store.snapshot(container)
    }

    /// Point a subscriber at whoever holds the container now
    fn redirect(&mut self, to: PeerId, container: ContainerId) {
        match self.resolver.authority_of(container) {
            Some(authority) if authority != self.local_peer() => {
                let version = self
                    .replicas
                    .last_applied(container)
                    .unwrap_or_default();
                self.outbox.push((
                    to,
                    NetMessage::AuthorityChanged {
                        container,
                        authority,
                        version,
                    },
                ));
            }
            _ => log::debug!("{} asked for unknown container {}", to, container),
        }
    }

    fn serve_request(&mut self, from: PeerId, request: RequestId, transaction: Transaction) {
        let key = (from, request);
        let cached = self
            .answered
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, outcome)| outcome.clone());

        let outcome = match cached {
            Some(outcome) => {
                log::debug!("Repeating answer to {} from {}", request, from);
                outcome
            }
            None => {
                let outcome = self.commit_local(&transaction);
                if let Err(error) = &outcome {
                    log::debug!("Refused {} from {}: {}", request, from, error);
                    self.events.emit(PeerEvent::TransactionRejected {
                        request: Some(request),
                        error: error.clone(),
                    });
                }
                self.answered.push_back((key, outcome.clone()));
                if self.answered.len() > ANSWERED_CAPACITY {
                    self.answered.pop_front();
                }
                outcome
            }
        };
        self.outbox
            .push((from, NetMessage::TransactionResult { request, outcome }));
    }

    fn after_replica_change(&mut self, container: ContainerId, landed: &[ContainerDelta]) {
        if landed.is_empty() {
            return;
        }
        if let Some(version) = self.replicas.last_applied(container) {
            self.events
                .emit(PeerEvent::ReplicaUpdated { container, version });
        }
        for outcome in self.overlay.reconcile(landed, &self.replicas) {
            self.on_speculation(outcome);
        }
    }

    pub(crate) fn on_speculation(&mut self, outcome: SpeculationOutcome) {
        let event = match outcome {
            SpeculationOutcome::Confirmed(request) => PeerEvent::SpeculationConfirmed { request },
            SpeculationOutcome::Reverted { request, reason } => {
                log::debug!("Reverted {}: {:?}", request, reason);
                PeerEvent::SpeculationReverted { request, reason }
            }
        };
        self.events.emit(event);
    }

    /// Take custody of a granted container; commits wait for the handshake
    fn install_handover(&mut self, handover: Handover) {
        let container = handover.snapshot.container;
        let local = self.local_peer();
        log::info!(
            "{} installs {} at {} from {}",
            local,
            container,
            handover.snapshot.version,
            handover.from
        );

        self.replicas.forget(container);
        let owner = self
            .owners
            .spawn(Owner::new(OwnerKind::Container, format!("handed over by {}", handover.from)));
        let limit = self.engine.unbounded_slot_limit();
        match InventoryContainer::from_snapshot(handover.snapshot, owner, limit) {
            Ok(held) => {
                self.store.insert(held);
            }
            Err(err) => {
                log::error!("{} cannot install {}: {}", local, container, err);
                self.owners.despawn(owner);
                return;
            }
        }
        self.publisher.adopt_subscribers(
            container,
            handover.observers.into_iter().filter(|peer| *peer != local),
        );
        for outcome in self.overlay.discard_container(container) {
            self.on_speculation(outcome);
        }
    }

    fn on_remote_dissolved(&mut self, container: ContainerId) {
        if self.store.contains(container) && self.resolver.is_authoritative(container) {
            log::warn!("Ignoring dissolve of {}, held here", container);
            return;
        }
        self.replicas.forget(container);
        self.resolver.release(container);
        for outcome in self.overlay.discard_container(container) {
            self.on_speculation(outcome);
        }
        self.events
            .emit(PeerEvent::ContainerDissolved { container });
    }

    fn process_sync_events(&mut self) {
        for event in self.replicas.take_events() {
            match event {
                SyncEvent::ResyncRequested { container, attempt } => {
                    log::debug!("Resync of {} (attempt {})", container, attempt);
                    self.events
                        .emit(PeerEvent::ResyncRequested { container });
                }
                SyncEvent::ResyncTimeout {
                    container,
                    attempts,
                } => {
                    log::warn!("{} went stale after {} attempts", container, attempts);
                    self.events.emit(PeerEvent::ResyncTimeout { container });
                }
                SyncEvent::Recovered { container, version } => {
                    self.events
                        .emit(PeerEvent::ResyncRecovered { container, version });
                }
                // Already reported as a replica update
                SyncEvent::Resynced { .. } => {}
            }
        }
    }

    fn process_resolver_events(&mut self) {
        for event in self.resolver.take_events() {
            match event {
                ResolverEvent::Gained { container, .. } | ResolverEvent::Reclaimed { container } => {
                    self.events.emit(PeerEvent::AuthorityGained { container });
                }
                ResolverEvent::Lost { container, to } => {
                    if let Some(held) = self.store.remove(container) {
                        self.replicas.adopt(held.snapshot(), to);
                    }
                    self.publisher.remove_container(container);
                    self.events
                        .emit(PeerEvent::AuthorityLost { container, to });
                }
                ResolverEvent::Changed {
                    container,
                    authority,
                } => {
                    self.replicas.set_authority(container, authority);
                    self.events.emit(PeerEvent::AuthorityChanged {
                        container,
                        authority,
                    });
                }
                ResolverEvent::Refused {
                    container,
                    authority,
                } => {
                    // A grant may have been installed before the handover failed
                    if let Some(held) = self.store.remove(container) {
                        self.owners.despawn(held.owner());
                        self.publisher.remove_container(container);
                        self.replicas.adopt(held.snapshot(), authority);
                    }
                    self.replicas.set_authority(container, authority);
                    self.events.emit(PeerEvent::AuthorityRefused {
                        container,
                        authority,
                    });
                }
            }
        }
    }

    /// State of a container for export, authoritative or replicated
    pub fn export_snapshot(&self, container: ContainerId) -> PeerResult<ContainerSnapshot> {
        self.snapshot(container)
            .ok_or(PeerError::UnknownContainer(container))
    }

    /// Take authority over a container restored from elsewhere
    pub fn import_snapshot(&mut self, snapshot: ContainerSnapshot) -> PeerResult<ContainerId> {
        self.import_owned(snapshot, Owner::new(OwnerKind::Container, "imported"))
    }

    /// Reject a snapshot that names a known container or could not have been built here
    fn check_import(&self, snapshot: &ContainerSnapshot) -> PeerResult<()> {
        let container = snapshot.container;
        if self.store.contains(container) || self.replicas.is_tracking(container) {
            return Err(PeerError::DuplicateContainer(container));
        }
        self.engine
            .validate_snapshot(snapshot)
            .map_err(|source| PeerError::InvalidSnapshot { container, source })
    }

    fn import_owned(&mut self, snapshot: ContainerSnapshot, owner: Owner) -> PeerResult<ContainerId> {
        self.check_import(&snapshot)?;
        let container = snapshot.container;
        let kind = owner.kind;
        let owner = self.owners.spawn(owner);
        let limit = self.engine.unbounded_slot_limit();
        match InventoryContainer::from_snapshot(snapshot, owner, limit) {
            Ok(held) => {
                self.store.insert(held);
            }
            Err(source) => {
                self.owners.despawn(owner);
                return Err(PeerError::InvalidSnapshot {
                    container,
                    source: source.into(),
                });
            }
        }
        self.resolver.claim(container);
        self.events
            .emit(PeerEvent::ContainerSpawned { container, kind });
        Ok(container)
    }

    /// Collect every authoritative container into a save record
    pub fn collect_save(&mut self, name: &str) -> InventorySave {
        self.save_state = SaveState::Pending;
        let mut record = InventorySave::new(name);
        let mut ids = self.resolver.authoritative();
        ids.sort();
        for container in ids {
            let Some(held) = self.store.clone_container(container) else {
                continue;
            };
            let (owner_kind, owner_name, platform_id) = match self.owners.resolve(held.owner()) {
                Some(owner) => (owner.kind, owner.name.clone(), owner.platform_id.clone()),
                None => (OwnerKind::Container, String::from("unknown"), None),
            };
            record.containers.push(SavedContainer {
                owner_kind,
                owner_name,
                platform_id,
                snapshot: held.snapshot(),
            });
        }
        self.save_state = SaveState::SaveReady;
        record
    }

    /// Write every authoritative container to a save slot
    pub fn save(&mut self, manager: &mut SaveManager, slot: &str, name: &str) -> PeerResult<()> {
        let record = self.collect_save(name);
        match manager.save(slot, &record) {
            Ok(()) => {
                self.save_state = SaveState::Saved;
                Ok(())
            }
            Err(err) => {
                log::error!("Saving slot {} failed: {}", slot, err);
                self.save_state = SaveState::Error;
                Err(err.into())
            }
        }
    }

    /// Restore containers from a save slot, owners included
    ///
    /// Nothing is restored unless every container in the record can be.
    pub fn load(&mut self, manager: &SaveManager, slot: &str) -> PeerResult<Vec<ContainerId>> {
        let record = manager.load(slot)?;
        let mut seen = BTreeSet::new();
        for saved in &record.containers {
            self.check_import(&saved.snapshot)?;
            if !seen.insert(saved.snapshot.container) {
                return Err(PeerError::DuplicateContainer(saved.snapshot.container));
            }
        }
        let mut restored = Vec::with_capacity(record.containers.len());
        for saved in record.containers {
            let mut owner = Owner::new(saved.owner_kind, saved.owner_name);
            owner.platform_id = saved.platform_id;
            restored.push(self.import_owned(saved.snapshot, owner)?);
        }
        log::info!(
            "{} loaded {} containers from {}",
            self.local_peer(),
            restored.len(),
            slot
        );
        self.save_state = SaveState::Saved;
        Ok(restored)
    }
}
