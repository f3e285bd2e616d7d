//! The node task: protocol state and run loop
//!
//! One context runs exactly one node task. Everything the protocol owns -
//! the registry mirror, election state, dispatch table, probe bookkeeping -
//! lives inside the task and is touched only between awaits, so handling
//! of every event is synchronous and non-preemptive (no in-context
//! locking, exactly the execution model the protocol assumes). Handles
//! talk to the task through an mpsc request channel.

use std::sync::Arc;

use serde_json::{Value, json};
use sharedstore::{ChangeEvent, SharedStore};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{Inbound, MessageBus};
use crate::config::CrosslinkConfig;
use crate::election::{Effect, Election};
use crate::envelope::{Envelope, EventKind, StoreKey};
use crate::error::CrosslinkError;
use crate::events::Dispatcher;
use crate::identity::{ContextId, now_ms};
use crate::keepalive::{Probe, heartbeat_payload};
use crate::registry::{PeerRecord, Registry};
use crate::support::SupportState;

use super::handle::CrosslinkHandle;
use super::messages::{NodeRequest, NodeSnapshot};

/// A coordination node for one context
pub struct Node {
    config: CrosslinkConfig,
    store: Arc<dyn SharedStore>,
    self_id: ContextId,
    tx: mpsc::Sender<NodeRequest>,
    rx: mpsc::Receiver<NodeRequest>,
}

impl Node {
    /// Create a node over a store connection; mints this context's id
    pub fn new(store: Arc<dyn SharedStore>, config: CrosslinkConfig) -> Self {
        Self::with_id(store, config, ContextId::generate())
    }

    /// Create a node with an explicit identity instead of a minted one
    pub fn with_id(store: Arc<dyn SharedStore>, config: CrosslinkConfig, self_id: ContextId) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        Self {
            config,
            store,
            self_id,
            tx,
            rx,
        }
    }

    /// This context's immutable id
    pub fn id(&self) -> &ContextId {
        &self.self_id
    }

    /// Create a handle for talking to this node
    pub fn handle(&self) -> CrosslinkHandle {
        CrosslinkHandle::new(self.tx.clone(), self.self_id.clone())
    }

    /// Run the node task until shutdown
    pub async fn run(mut self) {
        let mut changes = self.store.subscribe();
        let mut state = State::new(
            self.config.clone(),
            Arc::clone(&self.store),
            self.self_id.clone(),
            self.tx.clone(),
        );

        state.bootstrap();
        info!(id = %state.self_id, supported = state.support.supported(), "crosslink node started");

        // First keepalive runs before any inbound event is processed, so
        // this context is always in its own registry when elections start.
        if state.ticking() {
            state.keepalive();
        }

        let period = self.config.heartbeat_interval();
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                req = self.rx.recv() => {
                    match req {
                        Some(NodeRequest::Shutdown) | None => {
                            state.shutdown();
                            break;
                        }
                        Some(req) => state.handle_request(req),
                    }
                }
                Some(change) = changes.recv() => state.handle_change(&change),
                _ = tick.tick(), if state.ticking() => state.keepalive(),
            }
        }

        info!(id = %state.self_id, "crosslink node stopped");
    }
}

struct State {
    config: CrosslinkConfig,
    self_id: ContextId,
    tx: mpsc::Sender<NodeRequest>,
    bus: MessageBus,
    support: SupportState,
    registry: Registry,
    election: Election,
    dispatcher: Dispatcher,
    probe: Probe,
    setup_complete: bool,
    shutting_down: bool,
    ready_waiters: Vec<tokio::sync::oneshot::Sender<()>>,
}

impl State {
    fn new(
        config: CrosslinkConfig,
        store: Arc<dyn SharedStore>,
        self_id: ContextId,
        tx: mpsc::Sender<NodeRequest>,
    ) -> Self {
        let support = SupportState::new(store.probe());
        Self {
            config,
            self_id: self_id.clone(),
            tx,
            bus: MessageBus::new(store, self_id.clone()),
            support,
            registry: Registry::new(),
            election: Election::new(self_id),
            dispatcher: Dispatcher::new(),
            probe: Probe::new(),
            setup_complete: false,
            shutting_down: false,
            ready_waiters: Vec::new(),
        }
    }

    fn ticking(&self) -> bool {
        self.support.supported() && !self.shutting_down
    }

    /// Startup: honor cached verdicts and mirror the persisted registry
    fn bootstrap(&mut self) {
        if !self.support.supported() {
            return;
        }

        let now = now_ms();
        let ttl = self.config.verdict_cache_ms as i64;

        if let Some(frozen) = self.bus.read(StoreKey::Frozen) {
            if frozen.is_expired(now, ttl) {
                let _ = self.bus.remove(StoreKey::Frozen);
            } else if frozen.data.as_bool() == Some(true) {
                warn!(id = %self.self_id, "cached frozen-environment verdict applies");
                self.frozen_detected();
            }
        }

        if let Some(supported) = self.bus.read(StoreKey::Supported) {
            if supported.is_expired(now, ttl) {
                let _ = self.bus.remove(StoreKey::Supported);
            } else if let Some(verdict) = supported.data.as_bool() {
                // An explicit cached verdict settles setup without probing
                self.support.cache_supported(verdict);
                self.complete_setup();
            }
        }

        if !self.support.supported() {
            return;
        }

        // Mirror the last persisted registry snapshot so a joining context
        // knows the current master before any heartbeat arrives
        if let Some(snapshot) = self.bus.read(StoreKey::Registry)
            && let Ok(registry) = serde_json::from_value::<Registry>(snapshot.data)
        {
            debug!(id = %self.self_id, peers = registry.len(), "registry mirror bootstrapped");
            self.registry = registry;
        }
    }

    fn handle_request(&mut self, req: NodeRequest) {
        match req {
            NodeRequest::Broadcast {
                event,
                data,
                destination,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.broadcast(event, data, destination));
            }

            NodeRequest::BroadcastMaster { event, data, reply_tx } => {
                let result = match self.registry.master_id().cloned() {
                    Some(master) => self.broadcast(event, data, Some(master)),
                    None => Err(CrosslinkError::NoMaster),
                };
                let _ = reply_tx.send(result);
            }

            NodeRequest::On {
                event,
                key,
                handler,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.dispatcher.on(event, key, handler));
            }

            NodeRequest::Once {
                event,
                key,
                handler,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.dispatcher.once(event, key, handler));
            }

            NodeRequest::Off { event, key, reply_tx } => {
                let _ = reply_tx.send(self.dispatcher.off(&event, &key));
            }

            NodeRequest::OffAll { event, reply_tx } => {
                let _ = reply_tx.send(self.dispatcher.off_all(&event));
            }

            NodeRequest::Clear { reply_tx } => {
                self.dispatcher.clear();
                let _ = reply_tx.send(());
            }

            NodeRequest::WhenReady { reply_tx } => {
                if self.setup_complete {
                    let _ = reply_tx.send(());
                } else {
                    self.ready_waiters.push(reply_tx);
                }
            }

            NodeRequest::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.snapshot());
            }

            NodeRequest::BullyFire => {
                let effects = self.election.bully_fired();
                self.apply(effects);
            }

            NodeRequest::ProbeTimeout { probe_seq } => {
                if !self.setup_complete && self.probe.is_current(probe_seq) {
                    // No pong within the window: change notifications are
                    // not reaching this context.
                    warn!(id = %self.self_id, "bootstrap probe timed out; frozen environment");
                    self.frozen_detected();
                    self.complete_setup();
                }
            }

            // Intercepted by the run loop
            NodeRequest::Shutdown => {}
        }
    }

    fn handle_change(&mut self, change: &ChangeEvent) {
        if !self.support.supported() {
            return;
        }
        match self.bus.on_change(change) {
            Some(Inbound::Message(envelope)) => self.deliver(envelope),
            Some(Inbound::FrozenVerdict(frozen)) => self.support.observe_frozen(frozen),
            Some(Inbound::SupportedVerdict(verdict)) => self.support.observe_supported(verdict),
            None => {}
        }
    }

    /// Ship an envelope and deliver it locally when addressed here
    fn broadcast(
        &mut self,
        event: EventKind,
        data: Value,
        destination: Option<ContextId>,
    ) -> Result<(), CrosslinkError> {
        let local = self.bus.broadcast(&self.support, event, data, destination)?;
        if let Some(envelope) = local {
            self.deliver(envelope);
        }
        Ok(())
    }

    /// Protocol handling first, then local subscribers
    fn deliver(&mut self, envelope: Envelope) {
        match &envelope.event {
            EventKind::Heartbeat => self.on_heartbeat(&envelope),
            EventKind::PeerClosed => self.on_peer_closed(&envelope),
            EventKind::Promoted => self.on_promoted(&envelope),
            EventKind::Ping => self.on_ping(&envelope),
            EventKind::Pong => self.on_pong(),
            _ => {}
        }
        self.dispatcher.emit(&envelope);
    }

    fn on_heartbeat(&mut self, envelope: &Envelope) {
        let Ok(record) = serde_json::from_value::<PeerRecord>(envelope.data.clone()) else {
            warn!(origin = %envelope.origin, "unparsable heartbeat dropped");
            return;
        };

        self.registry.on_heartbeat(record);

        if self.registry.master_id().is_none() {
            let effects = self.election.run_election(&mut self.registry, now_ms());
            self.apply(effects);
        }
        if self.election.is_master(&self.registry) {
            self.persist_registry();
        }
    }

    fn on_peer_closed(&mut self, envelope: &Envelope) {
        let Some(peer) = envelope.data.as_str() else {
            return;
        };
        let peer = ContextId::from(peer);
        debug!(id = %self.self_id, %peer, "peer closed");

        let was_master = self.registry.on_peer_closed(&peer);
        if was_master || self.registry.master_id().is_none() {
            let effects = self.election.run_election(&mut self.registry, now_ms());
            self.apply(effects);
        } else if self.election.is_master(&self.registry) {
            self.persist_registry();
        }
    }

    fn on_promoted(&mut self, envelope: &Envelope) {
        let Some(announced) = envelope.data.as_str() else {
            return;
        };
        let effects = self
            .election
            .on_promoted(&mut self.registry, ContextId::from(announced), envelope.timestamp);
        self.apply(effects);
    }

    fn on_ping(&mut self, envelope: &Envelope) {
        // Only answer pings aimed at us, and only fresh ones; a stale ping
        // must not produce a misleading pong.
        if envelope.destination.as_ref() != Some(&self.self_id) {
            return;
        }
        if now_ms() - envelope.timestamp >= self.config.ping_timeout_ms as i64 {
            return;
        }
        let origin = envelope.origin.clone();
        if let Err(err) = self.broadcast(EventKind::Pong, Value::Null, Some(origin)) {
            warn!(%err, "pong failed");
        }
    }

    fn on_pong(&mut self) {
        if self.setup_complete || !self.probe.in_flight() {
            return;
        }
        self.probe.resolve();

        // The round trip worked end to end; cache that for other contexts
        if let Err(err) = self.bus.persist(StoreKey::Supported, json!(true)) {
            warn!(%err, "persisting supported verdict failed");
        }
        if let Err(err) = self.bus.persist(StoreKey::Frozen, json!(false)) {
            warn!(%err, "persisting frozen verdict failed");
        }
        self.complete_setup();
    }

    /// One keepalive round: heartbeat, sweep, bootstrap probe
    fn keepalive(&mut self) {
        let now = now_ms();

        if let Err(err) = self.broadcast(EventKind::Heartbeat, heartbeat_payload(&self.self_id, now), None) {
            warn!(%err, "heartbeat failed");
            return;
        }

        for dead in self.registry.dead_peers(now, self.config.peer_timeout_ms as i64) {
            warn!(id = %self.self_id, peer = %dead, "peer timed out");
            if let Err(err) = self.broadcast(EventKind::PeerClosed, json!(dead.as_str()), None) {
                warn!(%err, "closure broadcast failed");
            }
        }

        if !self.setup_complete {
            self.bootstrap_probe();
        }
    }

    /// Validate the coordination channel end to end, once per lifetime
    fn bootstrap_probe(&mut self) {
        match self.registry.master_id().cloned() {
            Some(master) if master != self.self_id => {
                if self.probe.in_flight() {
                    return;
                }
                let seq = self.probe.arm();
                debug!(id = %self.self_id, %master, seq, "bootstrap probe: pinging master");

                if let Err(err) = self.broadcast(EventKind::Ping, Value::Null, Some(master)) {
                    warn!(%err, "bootstrap ping failed");
                    self.probe.resolve();
                    return;
                }

                // Cancellable wait: a pong arriving first makes this
                // timeout notification stale.
                let tx = self.tx.clone();
                let timeout = self.config.ping_timeout();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(NodeRequest::ProbeTimeout { probe_seq: seq }).await;
                });
            }
            Some(_) => {
                // We are master; a solitary context has no peer to probe
                self.complete_setup();
            }
            None => {}
        }
    }

    fn frozen_detected(&mut self) {
        self.support.mark_frozen();
        if let Err(err) = self.bus.persist(StoreKey::Frozen, json!(true)) {
            warn!(%err, "persisting frozen verdict failed");
        }
        if let Err(err) = self.bus.persist(StoreKey::Supported, json!(false)) {
            warn!(%err, "persisting supported verdict failed");
        }
    }

    /// Setup completes exactly once per context lifetime
    fn complete_setup(&mut self) {
        if self.setup_complete {
            return;
        }
        self.setup_complete = true;
        info!(id = %self.self_id, supported = self.support.supported(), "setup complete");

        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(());
        }
        self.emit_local(EventKind::SetupComplete);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::AnnounceSelf => {
                    let data = json!(self.self_id.as_str());
                    if let Err(err) = self.broadcast(EventKind::Promoted, data, None) {
                        warn!(%err, "promotion announcement failed");
                    }
                }
                Effect::DeferBully => self.schedule_bully(),
                Effect::BecameMaster => self.emit_local(EventKind::BecomeMaster),
                Effect::Demoted => self.emit_local(EventKind::Demoted),
                Effect::PersistRegistry => self.persist_registry(),
            }
        }
    }

    /// Queue the bully announcement for the next scheduling round
    fn schedule_bully(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(NodeRequest::BullyFire).await;
        });
    }

    fn emit_local(&mut self, event: EventKind) {
        debug!(id = %self.self_id, ?event, "emitting local event");
        let envelope = Envelope::local(event, Value::Null, self.self_id.clone(), now_ms());
        self.dispatcher.emit(&envelope);
    }

    fn persist_registry(&mut self) {
        match serde_json::to_value(&self.registry) {
            Ok(snapshot) => {
                if let Err(err) = self.bus.persist(StoreKey::Registry, snapshot) {
                    warn!(%err, "persisting registry failed");
                }
            }
            Err(err) => warn!(%err, "encoding registry failed"),
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.self_id.clone(),
            supported: self.support.supported(),
            setup_complete: self.setup_complete,
            master_id: self.registry.master_id().cloned(),
            is_master: self.election.is_master(&self.registry),
            peers: self.registry.peers.keys().cloned().collect(),
        }
    }

    /// Clean shutdown: last context out resets the registry, otherwise
    /// peers are told we are gone
    fn shutdown(&mut self) {
        self.shutting_down = true;
        if !self.support.supported() {
            return;
        }

        if self.registry.len() <= 1 {
            self.registry.clear();
            self.persist_registry();
        } else if let Err(err) = self.broadcast(EventKind::PeerClosed, json!(self.self_id.as_str()), None) {
            warn!(%err, "closure broadcast failed");
        }
    }
}
