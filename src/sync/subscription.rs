//! Notification channel lifecycle.
//!
//! `Disconnected → TokenRequested → Connected → Disconnected`. Every
//! `subscribe` bumps the generation; token results, frames and close signals
//! from an older generation are discarded.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    communication::{
        channel::{Channel, SignalSink},
        transports::{Connector, TransportConn},
    },
    config::ClientConfig,
    record_key::RecordKey,
    sync::{session::SessionEvent, token::TokenProvider},
    sync_error::SyncError,
};

pub type Generation = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    TokenRequested {
        generation: Generation,
        keys: Vec<RecordKey>,
    },
    Connected {
        generation: Generation,
        keys: Vec<RecordKey>,
    },
}

pub struct SubscriptionManager {
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    generation: Generation,
    state: SubscriptionState,
    channel: Option<Channel>,
    pending: Option<JoinHandle<()>>,
}

impl SubscriptionManager {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            tokens,
            connector,
            generation: 0,
            state: SubscriptionState::Disconnected,
            channel: None,
            pending: None,
        }
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Replace the subscription with one covering exactly `keys`.
    ///
    /// The token request and dial run on a spawned task whose outcome comes
    /// back as [`SessionEvent::SubscriptionReady`].
    pub fn subscribe(&mut self, keys: Vec<RecordKey>, events: mpsc::UnboundedSender<SessionEvent>) {
        self.drop_current();
        self.generation += 1;
        let generation = self.generation;
        debug!(generation, keys = keys.len(), "subscription: requesting token");
        self.state = SubscriptionState::TokenRequested {
            generation,
            keys: keys.clone(),
        };

        let tokens = self.tokens.clone();
        let connector = self.connector.clone();
        let config = self.config.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = establish(tokens, connector, config, keys).await;
            let _ = events.send(SessionEvent::SubscriptionReady { generation, result });
        }));
    }

    /// Consume the outcome of a `subscribe`. Stale outcomes are dropped (and
    /// their connection closed). A failed acquisition is returned to the
    /// caller and leaves the manager disconnected.
    pub fn on_ready(
        &mut self,
        generation: Generation,
        result: Result<Arc<dyn TransportConn>, SyncError>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), SyncError> {
        let keys = match &self.state {
            SubscriptionState::TokenRequested { generation: g, keys } if *g == generation => {
                keys.clone()
            }
            _ => {
                debug!(generation, current = self.generation, "subscription: stale result dropped");
                if let Ok(conn) = result {
                    tokio::spawn(async move { conn.close().await });
                }
                return Ok(());
            }
        };
        self.pending = None;

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                warn!(generation, %e, "subscription: failed");
                self.state = SubscriptionState::Disconnected;
                return Err(e);
            }
        };

        let sink: SignalSink = Arc::new(move |signal| {
            events
                .send(SessionEvent::Notification { generation, signal })
                .is_ok()
        });
        self.channel = Some(Channel::open("notifications", conn, sink));
        info!(generation, keys = keys.len(), "subscription: connected");
        self.state = SubscriptionState::Connected { generation, keys };
        Ok(())
    }

    /// True if frames tagged with `generation` belong to the live channel.
    pub fn accepts(&self, generation: Generation) -> bool {
        matches!(&self.state, SubscriptionState::Connected { generation: g, .. } if *g == generation)
    }

    /// The live channel reported a close. Returns false for stale signals.
    pub fn on_closed(&mut self, generation: Generation) -> bool {
        if !self.accepts(generation) {
            return false;
        }
        self.channel = None;
        self.state = SubscriptionState::Disconnected;
        true
    }

    pub fn close(&mut self) {
        self.drop_current();
        // Anything still in flight is now stale.
        self.generation += 1;
        self.state = SubscriptionState::Disconnected;
    }

    fn drop_current(&mut self) {
        if let Some(p) = self.pending.take() {
            p.abort();
        }
        if let Some(mut ch) = self.channel.take() {
            ch.close();
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(p) = self.pending.take() {
            p.abort();
        }
    }
}

async fn establish(
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    keys: Vec<RecordKey>,
) -> Result<Arc<dyn TransportConn>, SyncError> {
    let token = tokens.acquire(&keys).await?;
    let url = config.notification_url(&token);
    let conn = connector.dial(&url).await?;
    Ok(conn)
}
