//! Container authority
//!
//! Exactly one side may commit to a container at any time. Authority moves
//! only through an explicit handshake:
//!
//! 1. The new side enters `RequestingTransfer` and sends `AuthorityRequest`.
//! 2. The current authority enters `Relinquishing`, stops committing, and
//!    answers with `AuthorityGrant` carrying its latest snapshot and observers.
//! 3. The new side installs the snapshot, enters `AwaitingSnapshotAck`, and
//!    sends `AuthorityAck` for the snapshot version.
//! 4. The old authority becomes an observer and announces `AuthorityChanged`
//!    to the new side and every observer.
//! 5. The new side becomes `Authoritative` when it sees the announcement.
//!
//! Neither side commits between steps 2 and 5. Every step is retransmitted
//! until answered. An unanswered request or grant is abandoned and authority
//! stays where it was. The new side never abandons once it has acknowledged:
//! its ack may have landed, so it keeps acknowledging until the old side
//! either announces the change or, having reclaimed, refuses it.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::wire::NetMessage;
use invsys_core::{ContainerId, PeerId, Version};
use invsys_inventory::{AuthorityGate, ContainerSnapshot};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Authority state of one container as seen from this side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    /// This side commits
    Authoritative,
    /// Another side commits
    Observing { authority: PeerId },
    /// Asked `from` to hand the container over
    RequestingTransfer {
        from: PeerId,
        since: Instant,
        attempts: u32,
    },
    /// Installed the granted snapshot, waiting for the handover to be announced
    AwaitingSnapshotAck {
        from: PeerId,
        version: Version,
        since: Instant,
        attempts: u32,
    },
    /// Granted the container to `to`, waiting for its acknowledgement
    Relinquishing {
        to: PeerId,
        version: Version,
        since: Instant,
        attempts: u32,
    },
}

impl AuthorityState {
    /// Check if this side may commit
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Self::Authoritative)
    }

    /// Check if a handover is in flight
    pub fn in_handshake(&self) -> bool {
        matches!(
            self,
            Self::RequestingTransfer { .. }
                | Self::AwaitingSnapshotAck { .. }
                | Self::Relinquishing { .. }
        )
    }

    fn stamp(&mut self, now: Instant) {
        if let Self::RequestingTransfer { since, attempts, .. }
        | Self::AwaitingSnapshotAck { since, attempts, .. }
        | Self::Relinquishing { since, attempts, .. } = self
        {
            *since = now;
            *attempts = attempts.saturating_add(1);
        }
    }
}

/// Authority transitions for collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent {
    /// This side became authoritative after a handover
    Gained { container: ContainerId, version: Version },
    /// This side handed the container to `to`
    Lost { container: ContainerId, to: PeerId },
    /// Another pair of sides completed a handover
    Changed { container: ContainerId, authority: PeerId },
    /// A requested handover did not happen; `authority` is still in charge
    Refused { container: ContainerId, authority: PeerId },
    /// A granted handover went unanswered; this side is authoritative again
    Reclaimed { container: ContainerId },
}

/// Decided state of a received grant: what the new authority installs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handover {
    /// Side that granted the container
    pub from: PeerId,
    /// Latest state of the container
    pub snapshot: ContainerSnapshot,
    /// Sides observing the container, including the granting side
    pub observers: Vec<PeerId>,
}

/// Tracks who may commit to which container and runs handovers
pub struct AuthorityResolver {
    local: PeerId,
    config: SyncConfig,
    allow_transfer: bool,
    states: HashMap<ContainerId, AuthorityState>,
    pending: HashMap<ContainerId, (PeerId, NetMessage)>,
    outgoing: VecDeque<(PeerId, NetMessage)>,
    events: VecDeque<ResolverEvent>,
}

impl AuthorityResolver {
    /// Create a resolver for the side `local`
    pub fn new(local: PeerId, config: SyncConfig) -> Self {
        Self {
            local,
            config,
            allow_transfer: true,
            states: HashMap::new(),
            pending: HashMap::new(),
            outgoing: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Refuse or allow handing containers over to other sides
    pub fn set_allow_transfer(&mut self, allow: bool) {
        self.allow_transfer = allow;
    }

    /// The side this resolver decides for
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Take authority over a container created or loaded here
    pub fn claim(&mut self, container: ContainerId) {
        self.states.insert(container, AuthorityState::Authoritative);
    }

    /// Record that `authority` commits to a container
    pub fn observe(&mut self, container: ContainerId, authority: PeerId) {
        if authority == self.local {
            self.claim(container);
        } else {
            self.states
                .insert(container, AuthorityState::Observing { authority });
        }
    }

    /// Forget a container (dissolved or unsubscribed)
    pub fn release(&mut self, container: ContainerId) -> Option<AuthorityState> {
        self.pending.remove(&container);
        self.states.remove(&container)
    }

    /// Current state of a container
    pub fn state(&self, container: ContainerId) -> Option<AuthorityState> {
        self.states.get(&container).copied()
    }

    /// Side that currently commits to a container
    ///
    /// During a handover this is still the granting side.
    pub fn authority_of(&self, container: ContainerId) -> Option<PeerId> {
        Some(match self.states.get(&container)? {
            AuthorityState::Authoritative | AuthorityState::Relinquishing { .. } => self.local,
            AuthorityState::Observing { authority } => *authority,
            AuthorityState::RequestingTransfer { from, .. }
            | AuthorityState::AwaitingSnapshotAck { from, .. } => *from,
        })
    }

    /// Check if this side may commit to a container right now
    pub fn is_authoritative(&self, container: ContainerId) -> bool {
        self.states
            .get(&container)
            .is_some_and(AuthorityState::is_authoritative)
    }

    /// Containers this side commits to, sorted
    pub fn authoritative(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self
            .states
            .iter()
            .filter(|(_, s)| s.is_authoritative())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Start taking a container over from its current authority
    pub fn request_authority(&mut self, container: ContainerId, now: Instant) -> SyncResult<()> {
        let state = self
            .states
            .get_mut(&container)
            .ok_or(SyncError::UnknownContainer(container))?;
        let AuthorityState::Observing { authority } = *state else {
            return Ok(());
        };
        *state = AuthorityState::RequestingTransfer {
            from: authority,
            since: now,
            attempts: 1,
        };
        log::info!("{} requesting authority over {} from {}", self.local, container, authority);
        self.send_pending(container, authority, NetMessage::AuthorityRequest { container });
        Ok(())
    }

    /// Handle `AuthorityRequest` from `from`
    ///
    /// `snapshot` and `observers` describe the container as held here; they
    /// are only used when this side is authoritative.
    pub fn on_request(
        &mut self,
        from: PeerId,
        container: ContainerId,
        snapshot: Option<ContainerSnapshot>,
        observers: Vec<PeerId>,
        now: Instant,
    ) {
        let version = snapshot.as_ref().map_or(Version::ZERO, |s| s.version);
        match self.states.get(&container).copied() {
            Some(AuthorityState::Authoritative) if self.allow_transfer && from != self.local => {
                let Some(snapshot) = snapshot else {
                    self.refuse(from, container, version);
                    return;
                };
                let mut observers: Vec<PeerId> = observers
                    .into_iter()
                    .filter(|peer| *peer != from)
                    .chain(std::iter::once(self.local))
                    .collect();
                observers.sort();
                observers.dedup();
                self.states.insert(
                    container,
                    AuthorityState::Relinquishing {
                        to: from,
                        version,
                        since: now,
                        attempts: 1,
                    },
                );
                log::info!("{} granting {} to {} at {}", self.local, container, from, version);
                self.send_pending(
                    container,
                    from,
                    NetMessage::AuthorityGrant {
                        container,
                        snapshot,
                        observers,
                    },
                );
            }
            Some(AuthorityState::Relinquishing { to, .. }) if to == from => {
                self.resend(container);
            }
            Some(_) => self.refuse(from, container, version),
            None => log::debug!("{} ignoring authority request for unknown {}", self.local, container),
        }
    }

    /// Handle `AuthorityGrant` from `from`
    ///
    /// Returns the state to install when this side asked for the container.
    pub fn on_grant(
        &mut self,
        from: PeerId,
        snapshot: ContainerSnapshot,
        observers: Vec<PeerId>,
        now: Instant,
    ) -> Option<Handover> {
        let container = snapshot.container;
        let version = snapshot.version;
        match self.states.get(&container).copied() {
            Some(AuthorityState::RequestingTransfer { from: owner, .. }) if owner == from => {
                self.states.insert(
                    container,
                    AuthorityState::AwaitingSnapshotAck {
                        from,
                        version,
                        since: now,
                        attempts: 1,
                    },
                );
                self.send_pending(container, from, NetMessage::AuthorityAck { container, version });
                Some(Handover {
                    from,
                    snapshot,
                    observers,
                })
            }
            Some(AuthorityState::AwaitingSnapshotAck {
                from: owner,
                version: acked,
                ..
            }) if owner == from && acked == version => {
                self.resend(container);
                None
            }
            _ => {
                log::debug!("{} ignoring unexpected grant of {} from {}", self.local, container, from);
                None
            }
        }
    }

    /// Handle `AuthorityAck` from `from`
    pub fn on_ack(&mut self, from: PeerId, container: ContainerId, version: Version) {
        match self.states.get(&container).copied() {
            Some(AuthorityState::Relinquishing { to, version: granted, .. })
                if to == from && granted == version =>
            {
                let observers = match self.pending.remove(&container) {
                    Some((_, NetMessage::AuthorityGrant { observers, .. })) => observers,
                    _ => Vec::new(),
                };
                self.states
                    .insert(container, AuthorityState::Observing { authority: from });
                let announcement = NetMessage::AuthorityChanged {
                    container,
                    authority: from,
                    version,
                };
                self.outgoing.push_back((from, announcement.clone()));
                for peer in observers.into_iter().filter(|p| *p != self.local && *p != from) {
                    self.outgoing.push_back((peer, announcement.clone()));
                }
                log::info!("{} handed {} to {} at {}", self.local, container, from, version);
                self.events.push_back(ResolverEvent::Lost { container, to: from });
            }
            Some(AuthorityState::Observing { authority }) if authority == from => {
                // Announcement was lost; repeat it
                self.outgoing.push_back((
                    from,
                    NetMessage::AuthorityChanged {
                        container,
                        authority: from,
                        version,
                    },
                ));
            }
            Some(AuthorityState::Authoritative) => self.refuse(from, container, version),
            _ => log::debug!("{} ignoring ack for {} from {}", self.local, container, from),
        }
    }

    /// Handle `AuthorityChanged`
    pub fn on_changed(&mut self, container: ContainerId, authority: PeerId, version: Version) {
        let Some(state) = self.states.get(&container).copied() else {
            return;
        };
        match state {
            AuthorityState::AwaitingSnapshotAck { .. } if authority == self.local => {
                self.pending.remove(&container);
                self.states.insert(container, AuthorityState::Authoritative);
                log::info!("{} is now authoritative for {} at {}", self.local, container, version);
                self.events.push_back(ResolverEvent::Gained { container, version });
            }
            AuthorityState::RequestingTransfer { .. } | AuthorityState::AwaitingSnapshotAck { .. } => {
                if authority == self.local {
                    // Granted and announced before our grant arrived; wait for the grant
                    return;
                }
                self.pending.remove(&container);
                self.states
                    .insert(container, AuthorityState::Observing { authority });
                log::info!("{} handover of {} refused, {} stays authoritative", self.local, container, authority);
                self.events.push_back(ResolverEvent::Refused { container, authority });
            }
            AuthorityState::Observing { authority: known } if known != authority && authority != self.local => {
                self.states
                    .insert(container, AuthorityState::Observing { authority });
                log::debug!("{} sees {} move to {}", self.local, container, authority);
                self.events.push_back(ResolverEvent::Changed { container, authority });
            }
            AuthorityState::Authoritative | AuthorityState::Relinquishing { .. } if authority != self.local => {
                log::warn!(
                    "{} ignoring claim that {} owns {} while this side is in charge",
                    self.local, authority, container
                );
            }
            _ => {}
        }
    }

    /// Retransmit unanswered handshake steps and abandon exhausted requests and grants
    pub fn poll_handshakes(&mut self, now: Instant) {
        let retry = self.config.handshake_retry();
        let max_attempts = self.config.max_handshake_attempts;
        let overdue: Vec<(ContainerId, AuthorityState)> = self
            .states
            .iter()
            .filter(|(_, state)| match state {
                AuthorityState::RequestingTransfer { since, .. }
                | AuthorityState::AwaitingSnapshotAck { since, .. }
                | AuthorityState::Relinquishing { since, .. } => {
                    now.saturating_duration_since(*since) >= retry
                }
                _ => false,
            })
            .map(|(id, state)| (*id, *state))
            .collect();

        for (container, state) in overdue {
            let attempts = match state {
                AuthorityState::RequestingTransfer { attempts, .. }
                | AuthorityState::AwaitingSnapshotAck { attempts, .. }
                | AuthorityState::Relinquishing { attempts, .. } => attempts,
                _ => continue,
            };
            if let AuthorityState::AwaitingSnapshotAck { from, .. } = state {
                if attempts == max_attempts {
                    log::warn!("{} still waiting for {} to announce {}", self.local, from, container);
                }
            } else if attempts >= max_attempts {
                self.abandon(container, state);
                continue;
            }
            if let Some(entry) = self.states.get_mut(&container) {
                entry.stamp(now);
            }
            self.resend(container);
        }
    }

    /// Take outgoing messages (drains the queue)
    pub fn take_outgoing(&mut self) -> Vec<(PeerId, NetMessage)> {
        self.outgoing.drain(..).collect()
    }

    /// Take pending events (drains the queue)
    pub fn take_events(&mut self) -> Vec<ResolverEvent> {
        self.events.drain(..).collect()
    }

    fn abandon(&mut self, container: ContainerId, state: AuthorityState) {
        self.pending.remove(&container);
        match state {
            AuthorityState::RequestingTransfer { from, .. } => {
                log::warn!("{} gave up taking {} from {}", self.local, container, from);
                self.states
                    .insert(container, AuthorityState::Observing { authority: from });
                self.events.push_back(ResolverEvent::Refused {
                    container,
                    authority: from,
                });
            }
            AuthorityState::Relinquishing { to, version, .. } => {
                log::warn!("{} gave up handing {} to {}", self.local, container, to);
                self.states.insert(container, AuthorityState::Authoritative);
                self.outgoing.push_back((
                    to,
                    NetMessage::AuthorityChanged {
                        container,
                        authority: self.local,
                        version,
                    },
                ));
                self.events.push_back(ResolverEvent::Reclaimed { container });
            }
            _ => {}
        }
    }

    fn refuse(&mut self, to: PeerId, container: ContainerId, version: Version) {
        let Some(authority) = self.authority_of(container) else {
            return;
        };
        log::debug!("{} refusing {} for {}", self.local, to, container);
        self.outgoing.push_back((
            to,
            NetMessage::AuthorityChanged {
                container,
                authority,
                version,
            },
        ));
    }

    fn send_pending(&mut self, container: ContainerId, to: PeerId, message: NetMessage) {
        self.outgoing.push_back((to, message.clone()));
        self.pending.insert(container, (to, message));
    }

    fn resend(&mut self, container: ContainerId) {
        if let Some((to, message)) = self.pending.get(&container) {
            self.outgoing.push_back((*to, message.clone()));
        }
    }
}

impl AuthorityGate for AuthorityResolver {
    fn may_commit(&self, container: ContainerId) -> bool {
        self.is_authoritative(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsys_inventory::{Capacity, ItemStack};
    use std::time::Duration;

    const CHEST: ContainerId = ContainerId::from_u128(0xC4E5);
    const HOST: PeerId = PeerId::HOST;
    const NEW: PeerId = PeerId(1);
    const WATCHER: PeerId = PeerId(2);

    fn snapshot(version: u64) -> ContainerSnapshot {
        ContainerSnapshot {
            container: CHEST,
            capacity: Capacity::Fixed(4),
            version: Version::new(version),
            slots: vec![Some(ItemStack::new("ore", 3)), None, None, None],
        }
    }

    fn pair() -> (AuthorityResolver, AuthorityResolver) {
        let mut host = AuthorityResolver::new(HOST, SyncConfig::testing());
        let mut new = AuthorityResolver::new(NEW, SyncConfig::testing());
        host.claim(CHEST);
        new.observe(CHEST, HOST);
        (host, new)
    }

    fn only(outgoing: Vec<(PeerId, NetMessage)>) -> (PeerId, NetMessage) {
        assert_eq!(outgoing.len(), 1, "{:?}", outgoing);
        outgoing.into_iter().next().unwrap()
    }

    #[test]
    fn test_full_handshake() {
        let now = Instant::now();
        let (mut host, mut new) = pair();

        new.request_authority(CHEST, now).unwrap();
        let (to, request) = only(new.take_outgoing());
        assert_eq!(to, HOST);
        assert_eq!(request, NetMessage::AuthorityRequest { container: CHEST });

        host.on_request(NEW, CHEST, Some(snapshot(4)), vec![NEW, WATCHER], now);
        assert!(!host.may_commit(CHEST));
        let (_, grant) = only(host.take_outgoing());
        let NetMessage::AuthorityGrant { snapshot: granted, observers, .. } = grant else {
            panic!("expected a grant");
        };
        assert_eq!(observers, vec![HOST, WATCHER]);

        let handover = new.on_grant(HOST, granted, observers, now).unwrap();
        assert_eq!(handover.snapshot.version, Version::new(4));
        assert!(!new.may_commit(CHEST));
        let (_, ack) = only(new.take_outgoing());
        assert_eq!(ack, NetMessage::AuthorityAck { container: CHEST, version: Version::new(4) });

        host.on_ack(NEW, CHEST, Version::new(4));
        assert_eq!(host.state(CHEST), Some(AuthorityState::Observing { authority: NEW }));
        let announcements = host.take_outgoing();
        let recipients: Vec<_> = announcements.iter().map(|(p, _)| *p).collect();
        assert_eq!(recipients, vec![NEW, WATCHER]);
        assert_eq!(host.take_events(), vec![ResolverEvent::Lost { container: CHEST, to: NEW }]);

        new.on_changed(CHEST, NEW, Version::new(4));
        assert!(new.may_commit(CHEST));
        assert_eq!(
            new.take_events(),
            vec![ResolverEvent::Gained { container: CHEST, version: Version::new(4) }]
        );
    }

    #[test]
    fn test_never_two_authorities() {
        let now = Instant::now();
        let (mut host, mut new) = pair();
        let both = |h: &AuthorityResolver, n: &AuthorityResolver| h.may_commit(CHEST) && n.may_commit(CHEST);

        new.request_authority(CHEST, now).unwrap();
        new.take_outgoing();
        assert!(!both(&host, &new));
        host.on_request(NEW, CHEST, Some(snapshot(1)), vec![], now);
        host.take_outgoing();
        assert!(!both(&host, &new));
        new.on_grant(HOST, snapshot(1), vec![HOST], now);
        assert!(!both(&host, &new));
        host.on_ack(NEW, CHEST, Version::new(1));
        assert!(!both(&host, &new));
        new.on_changed(CHEST, NEW, Version::new(1));
        assert!(new.may_commit(CHEST) && !host.may_commit(CHEST));
    }

    #[test]
    fn test_refused_when_transfer_disabled() {
        let now = Instant::now();
        let (mut host, mut new) = pair();
        host.set_allow_transfer(false);

        new.request_authority(CHEST, now).unwrap();
        new.take_outgoing();
        host.on_request(NEW, CHEST, Some(snapshot(2)), vec![], now);
        assert!(host.may_commit(CHEST));
        let (_, reply) = only(host.take_outgoing());
        let NetMessage::AuthorityChanged { authority, version, .. } = reply else {
            panic!("expected a refusal");
        };
        assert_eq!(authority, HOST);

        new.on_changed(CHEST, authority, version);
        assert_eq!(new.state(CHEST), Some(AuthorityState::Observing { authority: HOST }));
        assert_eq!(
            new.take_events(),
            vec![ResolverEvent::Refused { container: CHEST, authority: HOST }]
        );
    }

    #[test]
    fn test_duplicate_steps_are_idempotent() {
        let now = Instant::now();
        let (mut host, mut new) = pair();
        new.request_authority(CHEST, now).unwrap();

        host.on_request(NEW, CHEST, Some(snapshot(3)), vec![], now);
        host.on_request(NEW, CHEST, Some(snapshot(3)), vec![], now);
        assert_eq!(host.take_outgoing().len(), 2);

        assert!(new.on_grant(HOST, snapshot(3), vec![HOST], now).is_some());
        assert!(new.on_grant(HOST, snapshot(3), vec![HOST], now).is_none());

        host.on_ack(NEW, CHEST, Version::new(3));
        host.on_ack(NEW, CHEST, Version::new(3));
        assert_eq!(host.take_events().len(), 1);
    }

    #[test]
    fn test_unanswered_grant_is_reclaimed() {
        let start = Instant::now();
        let (mut host, _) = pair();
        host.on_request(NEW, CHEST, Some(snapshot(5)), vec![], start);
        host.take_outgoing();

        let retry = Duration::from_millis(50);
        host.poll_handshakes(start + retry);
        host.poll_handshakes(start + retry * 2);
        assert_eq!(host.take_outgoing().len(), 2);
        assert!(!host.may_commit(CHEST));

        host.poll_handshakes(start + retry * 3);
        assert!(host.may_commit(CHEST));
        assert_eq!(host.take_events(), vec![ResolverEvent::Reclaimed { container: CHEST }]);
        let (to, _) = only(host.take_outgoing());
        assert_eq!(to, NEW);
    }

    #[test]
    fn test_unanswered_request_gives_up() {
        let start = Instant::now();
        let (host, mut new) = pair();
        new.request_authority(CHEST, start).unwrap();
        let retry = Duration::from_millis(50);
        for step in 1..=3 {
            new.poll_handshakes(start + retry * step);
        }
        assert_eq!(new.state(CHEST), Some(AuthorityState::Observing { authority: HOST }));
        assert_eq!(new.authority_of(CHEST), Some(HOST));
        assert_eq!(authorities(&host, &new), vec![HOST]);
    }

    /// Sides that may commit, after checking both agree on who that is
    fn authorities(host: &AuthorityResolver, new: &AuthorityResolver) -> Vec<PeerId> {
        assert_eq!(host.authority_of(CHEST), new.authority_of(CHEST));
        [host, new]
            .into_iter()
            .filter(|side| side.may_commit(CHEST))
            .map(|side| side.local)
            .collect()
    }

    /// Run the handshake up to the new side acknowledging the grant
    fn granted_and_acked(host: &mut AuthorityResolver, new: &mut AuthorityResolver, now: Instant) -> NetMessage {
        new.request_authority(CHEST, now).unwrap();
        new.take_outgoing();
        host.on_request(NEW, CHEST, Some(snapshot(6)), vec![], now);
        host.take_outgoing();
        new.on_grant(HOST, snapshot(6), vec![HOST], now).unwrap();
        let (_, ack) = only(new.take_outgoing());
        ack
    }

    #[test]
    fn test_lost_announcements_keep_new_side_acknowledging() {
        let start = Instant::now();
        let retry = Duration::from_millis(50);
        let (mut host, mut new) = pair();
        granted_and_acked(&mut host, &mut new, start);

        // Every AuthorityChanged the old side sends is dropped
        host.on_ack(NEW, CHEST, Version::new(6));
        host.take_outgoing();
        for step in 1..=10 {
            new.poll_handshakes(start + retry * step);
            let (to, ack) = only(new.take_outgoing());
            assert_eq!(to, HOST);
            assert_eq!(ack, NetMessage::AuthorityAck { container: CHEST, version: Version::new(6) });
            assert!(matches!(new.state(CHEST), Some(AuthorityState::AwaitingSnapshotAck { .. })));

            host.on_ack(NEW, CHEST, Version::new(6));
            assert_eq!(only(host.take_outgoing()).0, NEW);
        }
        assert!(new.take_events().is_empty());

        // One announcement finally gets through
        host.on_ack(NEW, CHEST, Version::new(6));
        let (_, announcement) = only(host.take_outgoing());
        let NetMessage::AuthorityChanged { authority, version, .. } = announcement else {
            panic!("expected an announcement");
        };
        new.on_changed(CHEST, authority, version);
        assert_eq!(authorities(&host, &new), vec![NEW]);
    }

    #[test]
    fn test_lost_acks_leave_old_side_in_charge() {
        let start = Instant::now();
        let retry = Duration::from_millis(50);
        let (mut host, mut new) = pair();
        granted_and_acked(&mut host, &mut new, start);

        // Every ack and every grant resend is dropped until the old side reclaims
        for step in 1..=3 {
            host.poll_handshakes(start + retry * step);
            new.poll_handshakes(start + retry * step);
            new.take_outgoing();
        }
        assert_eq!(host.take_events(), vec![ResolverEvent::Reclaimed { container: CHEST }]);
        host.take_outgoing();
        assert!(matches!(new.state(CHEST), Some(AuthorityState::AwaitingSnapshotAck { .. })));

        // A late ack is refused and the refusal settles the new side
        new.poll_handshakes(start + retry * 4);
        let (_, ack) = only(new.take_outgoing());
        let NetMessage::AuthorityAck { container, version } = ack else {
            panic!("expected an ack");
        };
        host.on_ack(NEW, container, version);
        let (to, refusal) = only(host.take_outgoing());
        assert_eq!(to, NEW);
        let NetMessage::AuthorityChanged { authority, version, .. } = refusal else {
            panic!("expected a refusal");
        };
        assert_eq!(authority, HOST);
        new.on_changed(CHEST, authority, version);
        assert_eq!(
            new.take_events(),
            vec![ResolverEvent::Refused { container: CHEST, authority: HOST }]
        );
        assert_eq!(authorities(&host, &new), vec![HOST]);
    }

    #[test]
    fn test_lost_grants_leave_old_side_in_charge() {
        let start = Instant::now();
        let retry = Duration::from_millis(50);
        let (mut host, mut new) = pair();
        new.request_authority(CHEST, start).unwrap();
        new.take_outgoing();
        host.on_request(NEW, CHEST, Some(snapshot(2)), vec![], start);

        // Grants and request resends are dropped; both sides give up
        for step in 1..=3 {
            host.take_outgoing();
            host.poll_handshakes(start + retry * step);
            new.poll_handshakes(start + retry * step);
            new.take_outgoing();
        }
        assert!(host.may_commit(CHEST));
        assert_eq!(new.state(CHEST), Some(AuthorityState::Observing { authority: HOST }));

        // The reclaim announcement and a stale grant change nothing
        let (_, reclaimed) = only(host.take_outgoing());
        let NetMessage::AuthorityChanged { authority, version, .. } = reclaimed else {
            panic!("expected an announcement");
        };
        new.on_changed(CHEST, authority, version);
        assert!(new.on_grant(HOST, snapshot(2), vec![HOST], start).is_none());
        assert_eq!(authorities(&host, &new), vec![HOST]);
    }

    #[test]
    fn test_lost_request_leaves_old_side_in_charge() {
        let start = Instant::now();
        let retry = Duration::from_millis(50);
        let (host, mut new) = pair();
        new.request_authority(CHEST, start).unwrap();
        for step in 1..=3 {
            new.take_outgoing();
            new.poll_handshakes(start + retry * step);
        }
        assert!(new.take_outgoing().is_empty());
        assert_eq!(
            new.take_events(),
            vec![ResolverEvent::Refused { container: CHEST, authority: HOST }]
        );
        assert_eq!(authorities(&host, &new), vec![HOST]);
    }

    #[test]
    fn test_unknown_container() {
        let mut resolver = AuthorityResolver::new(NEW, SyncConfig::testing());
        assert!(matches!(
            resolver.request_authority(CHEST, Instant::now()),
            Err(SyncError::UnknownContainer(_))
        ));
    }
}
