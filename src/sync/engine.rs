//! Client-side state machine.
//!
//! The engine owns every piece of session state and is driven one event at a
//! time by the session loop, so cache reads and writes never interleave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    communication::{
        channel::{Channel, ChannelSignal},
        correlator::MessageCorrelator,
        protocol::{
            Inbound, MessageId, Notification, Op, Response, CODE_CONFLICT, CODE_NOT_FOUND, CODE_OK,
        },
    },
    config::ClientConfig,
    record_key::{DayWindow, RecordKey},
    render::{display_order, Renderer},
    sync::{
        cache::ReconciliationCache,
        debounce::DebounceGate,
        mutation::{self, merge_for_retry, Mutation},
        session::{SessionEvent, UserCommand},
        subscription::{Generation, SubscriptionManager},
    },
    sync_error::SyncError,
    task::Collection,
};

/// Whether the session loop keeps going after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The user asked to leave.
    Quit,
    /// A channel failed; the session is over.
    Disconnected(SyncError),
}

pub struct SyncEngine {
    clock: Arc<dyn Clock>,
    correlator: MessageCorrelator,
    gate: DebounceGate,
    cache: ReconciliationCache,
    command: Channel,
    subscription: SubscriptionManager,
    window: DayWindow,
    active: Option<RecordKey>,
    /// Day of the most recent local write; the gate only holds its refreshes.
    last_written: Option<RecordKey>,
    /// Refresh the gate held back, sent once the window has passed.
    held_refresh: Option<RecordKey>,
    /// GETs issued to resolve a 409, by message id.
    conflict_reads: HashMap<MessageId, RecordKey>,
    /// INSERTs that already are a conflict retry; a second 409 gives up.
    conflict_writes: HashSet<MessageId>,
    renderer: Box<dyn Renderer>,
    events: mpsc::UnboundedSender<SessionEvent>,
    connected: bool,
}

impl SyncEngine {
    pub fn new(
        config: &ClientConfig,
        clock: Arc<dyn Clock>,
        window: DayWindow,
        command: Channel,
        subscription: SubscriptionManager,
        renderer: Box<dyn Renderer>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            clock,
            correlator: MessageCorrelator::new(config.sent_id_capacity),
            gate: DebounceGate::new(config.debounce_window),
            cache: ReconciliationCache::new(),
            command,
            subscription,
            window,
            active: None,
            last_written: None,
            held_refresh: None,
            conflict_reads: HashMap::new(),
            conflict_writes: HashSet::new(),
            renderer,
            events,
            connected: true,
        }
    }

    /// Subscribe to the visible window and show today.
    pub fn start(&mut self) -> Flow {
        self.subscription
            .subscribe(self.window.keys(), self.events.clone());
        let today = self.window.today().key;
        self.activate(today)
    }

    pub fn handle(&mut self, event: SessionEvent) -> Flow {
        if !self.connected {
            return Flow::Disconnected(SyncError::Channel("session closed".into()));
        }
        let flow = match event {
            SessionEvent::User(cmd) => self.on_user(cmd),
            SessionEvent::Command(signal) => match signal {
                ChannelSignal::Frame(frame) => self.on_command_frame(frame),
                ChannelSignal::Closed(reason) => self.teardown(SyncError::Channel(reason), true),
            },
            SessionEvent::Notification { generation, signal } => {
                self.on_notification(generation, signal)
            }
            SessionEvent::SubscriptionReady { generation, result } => {
                if let Err(e) = self
                    .subscription
                    .on_ready(generation, result, self.events.clone())
                {
                    self.renderer.report(&e);
                }
                Flow::Continue
            }
            SessionEvent::GateReopened => {
                if self.held_refresh.is_some() && self.gate_closed() {
                    self.arm_gate_wake();
                }
                Flow::Continue
            }
        };
        match flow {
            Flow::Continue => self.release_held_refresh(),
            other => other,
        }
    }

    /*──────── user actions ────────*/

    fn on_user(&mut self, cmd: UserCommand) -> Flow {
        let result = match cmd {
            UserCommand::ShowDay(offset) => {
                if !self.window.contains_offset(offset) {
                    Err(SyncError::DayOutOfWindow { offset })
                } else {
                    let key = self.window.day(offset).key;
                    return self.activate(key);
                }
            }
            UserCommand::HideDay => {
                self.active = None;
                Ok(())
            }
            UserCommand::Add { text, priority } => self.mutate(Mutation::Add { text, priority }),
            UserCommand::Toggle(id) => self.mutate(Mutation::Toggle { id }),
            UserCommand::Delete(id) => self.mutate(Mutation::Delete { id }),
            UserCommand::Refresh => match self.active.clone() {
                Some(key) => self.request_refresh(&key),
                None => Err(SyncError::NoActiveDay),
            },
            UserCommand::Disconnect => {
                return self.teardown(SyncError::Channel("disconnected by user".into()), false)
            }
        };
        self.settle(result)
    }

    /// Terminal errors end the session; everything else is reported.
    fn settle(&mut self, result: Result<(), SyncError>) -> Flow {
        match result {
            Ok(()) => Flow::Continue,
            Err(e) if e.is_terminal() => self.teardown(e, true),
            Err(e) => {
                warn!(%e, "engine: operation rejected");
                self.renderer.report(&e);
                Flow::Continue
            }
        }
    }

    /// Show `key` right away from cache, then ask the store for it.
    pub fn activate(&mut self, key: RecordKey) -> Flow {
        debug!(%key, "engine: activate day");
        self.active = Some(key.clone());
        self.render_active(true);
        let result = self.request_refresh(&key);
        self.settle(result)
    }

    fn request_refresh(&mut self, key: &RecordKey) -> Result<(), SyncError> {
        if self.gate_closed() && self.last_written.as_ref() == Some(key) {
            debug!(%key, "engine: refresh held by debounce gate");
            if self.held_refresh.replace(key.clone()).is_none() {
                self.arm_gate_wake();
            }
            return Ok(());
        }
        if self.held_refresh.as_ref() == Some(key) {
            self.held_refresh = None;
        }
        self.send(Op::Get, key, String::new())?;
        Ok(())
    }

    fn gate_closed(&self) -> bool {
        self.gate
            .should_suppress_refresh(self.clock.now(), &self.correlator)
    }

    /// Post a wake-up for when the gate is due to reopen.
    fn arm_gate_wake(&self) {
        let Some(delay) = self.gate.reopens_in(self.clock.now()) else {
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::GateReopened);
        });
    }

    fn release_held_refresh(&mut self) -> Flow {
        if self.held_refresh.is_none() || self.gate_closed() {
            return Flow::Continue;
        }
        let Some(key) = self.held_refresh.take() else {
            return Flow::Continue;
        };
        if self.active.as_ref() != Some(&key) {
            debug!(%key, "engine: held refresh dropped, day no longer shown");
            return Flow::Continue;
        }
        debug!(%key, "engine: gate reopened, sending held refresh");
        let result = self.send(Op::Get, &key, String::new()).map(|_| ());
        self.settle(result)
    }

    fn mutate(&mut self, m: Mutation) -> Result<(), SyncError> {
        let key = self.active.clone().ok_or(SyncError::NoActiveDay)?;
        if matches!(m, Mutation::Add { .. }) && self.window.is_past(&key) {
            return Err(SyncError::ReadOnlyDay {
                key: key.to_string(),
            });
        }
        let now = self.clock.now();
        let Some(applied) = mutation::apply(&key, self.cache.get(&key), &m, now)? else {
            debug!(%key, "engine: empty add ignored");
            return Ok(());
        };
        debug!(%key, kind = m.kind(), task = %applied.task_id, "engine: local mutation");
        self.write_through(key, applied.collection)?;
        self.render_active(true);
        Ok(())
    }

    /// Cache first, then one INSERT carrying the whole collection.
    fn write_through(&mut self, key: RecordKey, collection: Collection) -> Result<MessageId, SyncError> {
        let value = collection.canonical()?;
        self.cache.put(key.clone(), collection)?;
        let id = self.send(Op::Insert, &key, value)?;
        self.gate.mark_local_mutation(self.clock.now());
        self.last_written = Some(key);
        Ok(id)
    }

    fn send(&mut self, op: Op, key: &RecordKey, value: String) -> Result<MessageId, SyncError> {
        let msg = self
            .correlator
            .tag(op, key.as_str(), value, self.clock.now());
        self.command.send(&msg)?;
        self.correlator.record_sent(&msg);
        Ok(msg.message_id)
    }

    /*──────── inbound ────────*/

    fn on_command_frame(&mut self, frame: Inbound) -> Flow {
        match frame {
            Inbound::Response(r) => self.on_response(r),
            // Some stores push on the command socket too.
            Inbound::Notification(n) => {
                self.on_push(n);
                Flow::Continue
            }
        }
    }

    fn on_response(&mut self, r: Response) -> Flow {
        if let Some(id) = r.message_id {
            if let Some(key) = self.conflict_reads.remove(&id) {
                return self.finish_conflict_retry(key, r);
            }
        }
        let retried = r.message_id.is_some_and(|id| self.conflict_writes.remove(&id));

        let sent = r.message_id.and_then(|id| self.correlator.lookup(id)).cloned();
        let is_write = sent.as_ref().is_some_and(|s| s.op.is_write());

        if matches!(r.code, CODE_OK | CODE_NOT_FOUND) && self.is_own_echo(r.message_id) {
            debug!(key = %r.key, id = ?r.message_id, "engine: own echo suppressed");
            return Flow::Continue;
        }

        match r.code {
            CODE_OK if is_write => {
                debug!(key = %r.key, id = ?r.message_id, "engine: write acknowledged");
            }
            CODE_OK => self.on_snapshot(&r.key, r.value.as_deref()),
            CODE_NOT_FOUND if is_write => {
                warn!(key = %r.key, id = ?r.message_id, "engine: store reported write target missing");
                self.renderer.report(&SyncError::NotFound { key: r.key.clone() });
            }
            // Absent record: the day is empty.
            CODE_NOT_FOUND => self.on_snapshot(&r.key, None),
            CODE_CONFLICT => return self.on_conflict(r, retried),
            code => {
                let message = r.error.clone().unwrap_or_default();
                error!(code, key = %r.key, %message, "engine: store error");
                self.renderer.report(&SyncError::Store { code, message });
            }
        }
        Flow::Continue
    }

    fn is_own_echo(&self, id: Option<MessageId>) -> bool {
        id.is_some_and(|id| self.correlator.is_self_originated(id)) && self.gate_closed()
    }

    fn on_conflict(&mut self, r: Response, retried: bool) -> Flow {
        let Some(key) = RecordKey::parse(&r.key) else {
            warn!(key = %r.key, "engine: conflict on unknown key");
            return Flow::Continue;
        };
        if retried {
            let e = SyncError::Conflict {
                key: key.to_string(),
            };
            error!(%key, "engine: conflict persisted after retry, giving up");
            self.renderer.report(&e);
            return Flow::Continue;
        }
        info!(%key, "engine: conflict, reading before retry");
        let result = self.send(Op::Get, &key, String::new()).map(|id| {
            self.conflict_reads.insert(id, key);
        });
        self.settle(result)
    }

    fn finish_conflict_retry(&mut self, key: RecordKey, r: Response) -> Flow {
        let remote = match (r.code, r.value.as_deref()) {
            (CODE_OK, Some(v)) => match Collection::parse(v) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%key, %e, "engine: unreadable value during conflict retry");
                    return Flow::Continue;
                }
            },
            (CODE_OK, None) | (CODE_NOT_FOUND, _) => Collection::new(),
            (code, _) => {
                let message = r.error.unwrap_or_default();
                error!(code, %key, %message, "engine: conflict read failed");
                self.renderer.report(&SyncError::Store { code, message });
                return Flow::Continue;
            }
        };
        let local = self.cache.get(&key).cloned().unwrap_or_default();
        let merged = merge_for_retry(&remote, &local);
        let result = self.write_through(key.clone(), merged).map(|id| {
            self.conflict_writes.insert(id);
        });
        if self.active.as_ref() == Some(&key) {
            self.render_active(true);
        }
        self.settle(result)
    }

    fn on_notification(&mut self, generation: Generation, signal: ChannelSignal) -> Flow {
        if !self.subscription.accepts(generation) {
            debug!(generation, "engine: stale notification signal dropped");
            return Flow::Continue;
        }
        match signal {
            ChannelSignal::Frame(Inbound::Notification(n)) => {
                self.on_push(n);
                Flow::Continue
            }
            ChannelSignal::Frame(Inbound::Response(r)) => {
                debug!(code = r.code, key = %r.key, "engine: response on notification channel ignored");
                Flow::Continue
            }
            ChannelSignal::Closed(reason) => {
                if self.subscription.on_closed(generation) {
                    self.teardown(SyncError::Channel(reason), true)
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Only the echo of our own write inside the window is dropped. A push
    /// without a message id is someone else's.
    fn on_push(&mut self, n: Notification) {
        if self.is_own_echo(n.message_id) {
            debug!(key = %n.key, id = ?n.message_id, "engine: own push echo suppressed");
            return;
        }
        self.on_snapshot(&n.key, n.value.as_deref());
    }

    /// Diff an authoritative value against the cache; render only real
    /// changes to the active day.
    fn on_snapshot(&mut self, raw_key: &str, value: Option<&str>) {
        let Some(key) = RecordKey::parse(raw_key) else {
            warn!(key = raw_key, "engine: ignoring value for foreign key");
            return;
        };
        let incoming = match value {
            None => Collection::new(),
            Some(v) => match Collection::parse(v) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%key, %e, "engine: dropping malformed collection");
                    return;
                }
            },
        };
        let changed = match self.cache.apply(key.clone(), incoming) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(%key, %e, "engine: could not cache collection");
                return;
            }
        };
        if self.active.as_ref() == Some(&key) {
            self.render_active(changed);
        } else if changed {
            debug!(%key, "engine: cached update for hidden day");
        }
    }

    fn render_active(&mut self, changed: bool) {
        let Some(key) = self.active.as_ref() else {
            return;
        };
        let tasks = self
            .cache
            .get(key)
            .map(display_order)
            .unwrap_or_default();
        self.renderer.render(key, &tasks, changed);
    }

    /*──────── teardown ────────*/

    fn teardown(&mut self, reason: SyncError, notify: bool) -> Flow {
        let flow = if notify {
            Flow::Disconnected(reason.clone())
        } else {
            Flow::Quit
        };
        if !self.connected {
            return flow;
        }
        info!(%reason, "engine: session closed");
        self.connected = false;
        self.subscription.close();
        self.command.close();
        self.cache.clear();
        self.conflict_reads.clear();
        self.conflict_writes.clear();
        self.active = None;
        self.last_written = None;
        self.held_refresh = None;
        if notify {
            self.renderer.disconnected(&reason);
        }
        flow
    }

    /*──────── inspection ────────*/

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn active(&self) -> Option<&RecordKey> {
        self.active.as_ref()
    }

    /// Conflict reads and retried writes still waiting for a reply.
    pub fn conflicts_in_flight(&self) -> usize {
        self.conflict_reads.len() + self.conflict_writes.len()
    }

    pub fn held_refresh(&self) -> Option<&RecordKey> {
        self.held_refresh.as_ref()
    }

    pub fn cache(&self) -> &ReconciliationCache {
        &self.cache
    }

    pub fn correlator(&self) -> &MessageCorrelator {
        &self.correlator
    }

    pub fn subscription(&self) -> &SubscriptionManager {
        &self.subscription
    }

    pub fn window(&self) -> &DayWindow {
        &self.window
    }
}
