//! Transport layer
//!
//! Transports move opaque datagrams between simulation sides with no ordering
//! or delivery guarantee. [`LoopbackHub`] connects sides living in one
//! process over crossbeam channels; [`FaultyTransport`] wraps any transport
//! and drops, duplicates and reorders datagrams from a seeded generator so
//! lossy runs are reproducible. [`MessageChannel`] puts the wire codec on top.

use crate::error::{SyncResult, TransportError, TransportResult};
use crate::wire::{NetMessage, Packet};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use invsys_core::PeerId;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Best-effort datagram transport
pub trait Transport: Send {
    /// Side this transport belongs to
    fn local_peer(&self) -> PeerId;

    /// Send one datagram
    fn send(&mut self, to: PeerId, data: &[u8]) -> TransportResult<()>;

    /// Take the next received datagram, if any
    fn try_receive(&mut self) -> TransportResult<Option<Vec<u8>>>;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Datagrams deliberately dropped
    pub dropped: u64,
    /// Datagrams deliberately sent twice
    pub duplicated: u64,
    /// Datagrams deliberately held back
    pub reordered: u64,
    /// Number of send errors
    pub send_errors: u64,
}

type Routes = Arc<RwLock<HashMap<PeerId, Sender<Vec<u8>>>>>;

/// In-process switchboard connecting loopback transports
#[derive(Clone, Default)]
pub struct LoopbackHub {
    routes: Routes,
}

impl LoopbackHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a side to the hub
    pub fn connect(&self, peer: PeerId) -> LoopbackTransport {
        let (sender, inbox) = unbounded();
        if self.routes.write().insert(peer, sender).is_some() {
            log::warn!("{} reconnected to loopback hub", peer);
        }
        LoopbackTransport {
            local: peer,
            routes: self.routes.clone(),
            inbox,
            stats: TransportStats::default(),
        }
    }

    /// Detach a side; datagrams to it fail with `UnknownPeer`
    pub fn disconnect(&self, peer: PeerId) {
        self.routes.write().remove(&peer);
    }

    /// Sides currently attached
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.routes.read().keys().copied().collect();
        peers.sort();
        peers
    }
}

/// One side's end of a [`LoopbackHub`]
pub struct LoopbackTransport {
    local: PeerId,
    routes: Routes,
    inbox: Receiver<Vec<u8>>,
    stats: TransportStats,
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn send(&mut self, to: PeerId, data: &[u8]) -> TransportResult<()> {
        let route = self.routes.read().get(&to).cloned();
        let Some(route) = route else {
            self.stats.send_errors += 1;
            return Err(TransportError::UnknownPeer(to));
        };
        if route.send(data.to_vec()).is_err() {
            self.stats.send_errors += 1;
            return Err(TransportError::Disconnected(to));
        }
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn try_receive(&mut self) -> TransportResult<Option<Vec<u8>>> {
        match self.inbox.try_recv() {
            Ok(data) => {
                self.stats.messages_received += 1;
                self.stats.bytes_received += data.len() as u64;
                Ok(Some(data))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Fault probabilities for [`FaultyTransport`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability a datagram is silently dropped
    pub drop_rate: f64,
    /// Probability a datagram is delivered twice
    pub duplicate_rate: f64,
    /// Probability a datagram is held back behind later ones
    pub reorder_rate: f64,
    /// Generator seed
    pub seed: u64,
}

impl FaultConfig {
    /// No faults at all
    pub fn reliable() -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }

    /// A noticeably bad link
    pub fn lossy(seed: u64) -> Self {
        Self {
            drop_rate: 0.1,
            duplicate_rate: 0.1,
            reorder_rate: 0.2,
            seed,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

/// Wraps a transport and injects drops, duplicates and reordering on send
pub struct FaultyTransport<T> {
    inner: T,
    config: FaultConfig,
    rng: StdRng,
    held: Vec<(PeerId, Vec<u8>)>,
    stats: TransportStats,
}

impl<T: Transport> FaultyTransport<T> {
    /// Wrap `inner`
    pub fn new(inner: T, config: FaultConfig) -> Self {
        Self {
            inner,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            held: Vec::new(),
            stats: TransportStats::default(),
        }
    }

    /// Change fault probabilities, e.g. to heal a link mid-run
    pub fn set_config(&mut self, config: FaultConfig) {
        self.config = config;
    }

    /// Deliver every held-back datagram now
    pub fn flush(&mut self) -> TransportResult<()> {
        for (to, data) in std::mem::take(&mut self.held) {
            self.inner.send(to, &data)?;
        }
        Ok(())
    }

    /// Number of datagrams currently held back
    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_bool(probability.min(1.0))
    }
}

impl<T: Transport> Transport for FaultyTransport<T> {
    fn local_peer(&self) -> PeerId {
        self.inner.local_peer()
    }

    fn send(&mut self, to: PeerId, data: &[u8]) -> TransportResult<()> {
        if self.roll(self.config.drop_rate) {
            self.stats.dropped += 1;
            log::trace!("{} dropped datagram to {}", self.local_peer(), to);
            return Ok(());
        }
        if self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.held.push((to, data.to_vec()));
            return Ok(());
        }
        self.inner.send(to, data)?;
        if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.inner.send(to, data)?;
        }
        // Held datagrams go out behind the one just sent
        self.flush()
    }

    fn try_receive(&mut self) -> TransportResult<Option<Vec<u8>>> {
        self.inner.try_receive()
    }

    fn stats(&self) -> TransportStats {
        let inner = self.inner.stats();
        TransportStats {
            dropped: self.stats.dropped,
            duplicated: self.stats.duplicated,
            reordered: self.stats.reordered,
            ..inner
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_peer(&self) -> PeerId {
        (**self).local_peer()
    }

    fn send(&mut self, to: PeerId, data: &[u8]) -> TransportResult<()> {
        (**self).send(to, data)
    }

    fn try_receive(&mut self) -> TransportResult<Option<Vec<u8>>> {
        (**self).try_receive()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Typed messages over a datagram transport
pub struct MessageChannel<T> {
    transport: T,
    decode_failures: u64,
}

impl<T: Transport> MessageChannel<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decode_failures: 0,
        }
    }

    /// Side this channel belongs to
    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Encode and send one message
    pub fn send(&mut self, to: PeerId, message: NetMessage) -> SyncResult<()> {
        let name = message.name();
        let bytes = Packet::new(self.local_peer(), message).encode()?;
        self.transport.send(to, &bytes)?;
        log::trace!("{} -> {}: {} ({} bytes)", self.local_peer(), to, name, bytes.len());
        Ok(())
    }

    /// Drain every received message
    ///
    /// Undecodable datagrams are dropped with a warning.
    pub fn receive_all(&mut self) -> SyncResult<Vec<(PeerId, NetMessage)>> {
        let mut messages = Vec::new();
        while let Some(bytes) = self.transport.try_receive()? {
            match Packet::decode(&bytes) {
                Ok(packet) => messages.push((packet.from, packet.message)),
                Err(err) => {
                    self.decode_failures += 1;
                    log::warn!("{} dropped undecodable datagram: {}", self.local_peer(), err);
                }
            }
        }
        Ok(messages)
    }

    /// Datagrams that failed to decode
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Underlying transport statistics
    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Access the wrapped transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
