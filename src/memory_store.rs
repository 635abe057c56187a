//! In-process stand-in for the key-value store.
//!
//! Serves the command protocol, the token endpoint and the notification push
//! over [`InMemConn`] pairs, so whole sessions run without a network. Useful
//! for tests and demos.

use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    communication::{
        protocol::{
            encode_notification, encode_response, Notification, Op, OutboundMessage, Response,
            CODE_CONFLICT, CODE_NOT_FOUND, CODE_OK,
        },
        transports::{inmem::InMemConn, Connector, TransportConn, TransportError},
    },
    record_key::RecordKey,
    sync::token::TokenProvider,
    sync_error::SyncError,
};

const CODE_BAD_REQUEST: u16 = 400;

struct Subscriber {
    keys: HashSet<String>,
    conn: Arc<InMemConn>,
}

#[derive(Default)]
struct Inner {
    api_key: String,
    records: Mutex<HashMap<String, String>>,
    tokens: Mutex<HashMap<String, Vec<String>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    command_conns: Mutex<Vec<Arc<InMemConn>>>,
    next_token: AtomicU64,
    refuse_tokens: AtomicBool,
    conflict_once: Mutex<HashSet<String>>,
}

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api_key: api_key.into(),
                ..Inner::default()
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.records.lock().expect("poisoned").get(key).cloned()
    }

    /// Write as some other client would: store and notify subscribers.
    pub async fn put(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.inner
            .records
            .lock()
            .expect("poisoned")
            .insert(key.to_string(), value.clone());
        self.inner.notify(key, Some(&value)).await;
    }

    pub async fn remove(&self, key: &str) {
        self.inner.records.lock().expect("poisoned").remove(key);
        self.inner.notify(key, None).await;
    }

    /// The next INSERT on `key` answers 409 instead of writing.
    pub fn conflict_next_insert(&self, key: &str) {
        self.inner
            .conflict_once
            .lock()
            .expect("poisoned")
            .insert(key.to_string());
    }

    pub fn refuse_tokens(&self, refuse: bool) {
        self.inner.refuse_tokens.store(refuse, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("poisoned").len()
    }

    /// Drop every client connection from the store side.
    pub async fn disconnect_all(&self) {
        let commands: Vec<_> = self
            .inner
            .command_conns
            .lock()
            .expect("poisoned")
            .drain(..)
            .collect();
        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .expect("poisoned")
            .drain(..)
            .map(|s| s.conn)
            .collect();
        for c in commands.into_iter().chain(subscribers) {
            c.close().await;
        }
    }
}

impl Inner {
    async fn notify(&self, key: &str, value: Option<&str>) {
        let targets: Vec<Arc<InMemConn>> = self
            .subscribers
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|s| s.keys.contains(key))
            .map(|s| s.conn.clone())
            .collect();
        if targets.is_empty() {
            return;
        }
        let frame = match encode_notification(&Notification {
            key: key.to_string(),
            value: value.map(str::to_string),
            message_id: None,
        }) {
            Ok(f) => f,
            Err(e) => {
                warn!(%e, key, "memory store: notification not encodable");
                return;
            }
        };
        let mut dead = Vec::new();
        for conn in targets {
            if conn.send_text(frame.clone()).await.is_err() {
                dead.push(conn);
            }
        }
        if !dead.is_empty() {
            self.subscribers
                .lock()
                .expect("poisoned")
                .retain(|s| !dead.iter().any(|d| Arc::ptr_eq(d, &s.conn)));
        }
    }

    /// Apply one command and build its reply. Returns the notification to
    /// fan out, if the command changed anything.
    fn execute(&self, msg: &OutboundMessage) -> (Response, Option<Option<String>>) {
        let reply = |code: u16, value: Option<String>, error: Option<&str>| Response {
            code,
            key: msg.key.clone(),
            value,
            message_id: Some(msg.message_id),
            error: error.map(str::to_string),
        };
        let mut records = self.records.lock().expect("poisoned");
        match msg.op {
            Op::Get => match records.get(&msg.key) {
                Some(v) => (reply(CODE_OK, Some(v.clone()), None), None),
                None => (reply(CODE_NOT_FOUND, None, Some("not found")), None),
            },
            Op::Insert => {
                if self.conflict_once.lock().expect("poisoned").remove(&msg.key) {
                    return (reply(CODE_CONFLICT, None, Some("conflict")), None);
                }
                records.insert(msg.key.clone(), msg.value.clone());
                (reply(CODE_OK, None, None), Some(Some(msg.value.clone())))
            }
            Op::Update => match records.get_mut(&msg.key) {
                Some(v) => {
                    *v = msg.value.clone();
                    (reply(CODE_OK, None, None), Some(Some(msg.value.clone())))
                }
                None => (reply(CODE_NOT_FOUND, None, Some("not found")), None),
            },
            Op::Delete => match records.remove(&msg.key) {
                Some(_) => (reply(CODE_OK, None, None), Some(None)),
                None => (reply(CODE_NOT_FOUND, None, Some("not found")), None),
            },
        }
    }
}

async fn serve_commands(inner: Arc<Inner>, conn: Arc<InMemConn>) {
    let mut rx = conn.recv();
    while let Some(text) = rx.recv().await {
        let msg: OutboundMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(%e, "memory store: bad request");
                let r = Response {
                    code: CODE_BAD_REQUEST,
                    key: String::new(),
                    value: None,
                    message_id: None,
                    error: Some(e.to_string()),
                };
                if !respond(conn.as_ref(), &r).await {
                    break;
                }
                continue;
            }
        };
        let (response, change) = inner.execute(&msg);
        debug!(op = ?msg.op, key = %msg.key, code = response.code, "memory store: command");
        if !respond(conn.as_ref(), &response).await {
            break;
        }
        if let Some(value) = change {
            inner.notify(&msg.key, value.as_deref()).await;
        }
    }
    debug!("memory store: command connection ended");
}

/// False once the connection is gone.
async fn respond(conn: &dyn TransportConn, r: &Response) -> bool {
    match encode_response(r) {
        Ok(frame) => conn.send_text(frame).await.is_ok(),
        Err(e) => {
            warn!(%e, key = %r.key, "memory store: response not encodable");
            true
        }
    }
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then_some(v)
    })
}

#[async_trait]
impl Connector for MemoryStore {
    async fn dial(&self, url: &str) -> Result<Arc<dyn TransportConn>, TransportError> {
        if let Some(key) = query_param(url, "apiKey") {
            if key != self.inner.api_key {
                return Err(TransportError::Io("unauthorized".into()));
            }
            let (client, server) = InMemConn::pair();
            self.inner
                .command_conns
                .lock()
                .expect("poisoned")
                .push(server.clone());
            tokio::spawn(serve_commands(self.inner.clone(), server));
            return Ok(client);
        }

        if let Some(token) = query_param(url, "token") {
            let keys = self
                .inner
                .tokens
                .lock()
                .expect("poisoned")
                .remove(token)
                .ok_or_else(|| TransportError::Io("unknown token".into()))?;
            let (client, server) = InMemConn::pair();
            self.inner
                .subscribers
                .lock()
                .expect("poisoned")
                .push(Subscriber {
                    keys: keys.into_iter().collect(),
                    conn: server,
                });
            return Ok(client);
        }

        Err(TransportError::Io(format!("no credentials in {url}")))
    }
}

#[async_trait]
impl TokenProvider for MemoryStore {
    async fn acquire(&self, keys: &[RecordKey]) -> Result<String, SyncError> {
        if self.inner.refuse_tokens.load(Ordering::SeqCst) {
            return Err(SyncError::TokenAcquisition("403 Forbidden".into()));
        }
        let n = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok-{n}");
        self.inner.tokens.lock().expect("poisoned").insert(
            token.clone(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        Ok(token)
    }
}
