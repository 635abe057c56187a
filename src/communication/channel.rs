use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, instrument, warn};

use crate::{
    communication::{
        protocol::{decode_inbound, Inbound, OutboundMessage},
        transports::TransportConn,
    },
    sync_error::SyncError,
};

/// What a channel reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelSignal {
    Frame(Inbound),
    /// The connection ended (remote close, send failure, or reader exit).
    Closed(String),
}

/// Callback receiving channel signals. Returning `false` stops the reader.
pub type SignalSink = Arc<dyn Fn(ChannelSignal) -> bool + Send + Sync>;

/// A live duplex channel: a send worker draining an unbounded queue into the
/// connection, and a read loop decoding frames into the sink.
///
/// Sends never wait for the network. Malformed inbound frames are logged and
/// dropped.
pub struct Channel {
    name: &'static str,
    outbound: mpsc::UnboundedSender<String>,
    conn: Option<Arc<dyn TransportConn>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Channel {
    pub fn open(name: &'static str, conn: Arc<dyn TransportConn>, sink: SignalSink) -> Self {
        debug!(channel = name, "channel: open");
        let (tx_text, mut rx_text) = mpsc::unbounded_channel::<String>();

        // SEND WORKER
        let conn_for_send = conn.clone();
        let sink_for_send = sink.clone();
        let send_task = tokio::spawn(async move {
            while let Some(text) = rx_text.recv().await {
                if let Err(e) = conn_for_send.send_text(text).await {
                    warn!(channel = name, %e, "channel: send failed");
                    sink_for_send(ChannelSignal::Closed(format!("{name}: {e}")));
                    break;
                }
            }
            debug!(channel = name, "channel: send worker exit");
        });

        // READ LOOP
        let rx_frames = conn.recv();
        let read_task = tokio::spawn(read_loop(name, rx_frames, sink));

        Self {
            name,
            outbound: tx_text,
            conn: Some(conn),
            tasks: vec![send_task, read_task],
        }
    }

    /// A channel with no connection behind it; whatever is sent shows up on
    /// the returned receiver.
    pub fn detached(name: &'static str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name,
                outbound: tx,
                conn: None,
                tasks: Vec::new(),
            },
            rx,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a raw frame for sending.
    pub fn send_text(&self, text: String) -> Result<(), SyncError> {
        self.outbound
            .send(text)
            .map_err(|_| SyncError::Channel(format!("{}: closed", self.name)))
    }

    pub fn send(&self, msg: &OutboundMessage) -> Result<(), SyncError> {
        self.send_text(msg.encode()?)
    }

    /// Stop both tasks and close the connection. No `Closed` signal follows.
    pub fn close(&mut self) {
        for t in self.tasks.drain(..) {
            t.abort();
        }
        // Swap in a dead queue so later sends fail right away.
        let (dead_tx, _) = mpsc::unbounded_channel();
        self.outbound = dead_tx;
        if let Some(conn) = self.conn.take() {
            debug!(channel = self.name, "channel: close");
            tokio::spawn(async move { conn.close().await });
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

#[instrument(skip_all, fields(channel = name))]
async fn read_loop(name: &'static str, mut rx: mpsc::Receiver<String>, sink: SignalSink) {
    debug!("channel: read loop start");
    while let Some(text) = rx.recv().await {
        match decode_inbound(&text) {
            Ok(frame) => {
                if !sink(ChannelSignal::Frame(frame)) {
                    debug!("channel: sink gone, stopping reader");
                    return;
                }
            }
            Err(e) => warn!(%e, "channel: dropping malformed frame"),
        }
    }
    debug!("channel: read loop exit");
    sink(ChannelSignal::Closed(format!("{name}: connection closed")));
}
