use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::{
    clock::Clock,
    communication::{
        channel::{Channel, ChannelSignal, SignalSink},
        transports::{Connector, TransportConn},
    },
    config::ClientConfig,
    record_key::DayWindow,
    render::Renderer,
    sync::{
        engine::{Flow, SyncEngine},
        subscription::{Generation, SubscriptionManager},
        token::TokenProvider,
    },
    sync_error::SyncError,
    task::{Priority, TaskId},
};

/// What the user can ask for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserCommand {
    /// Activate the day at this offset from today.
    ShowDay(i64),
    HideDay,
    Add { text: String, priority: Priority },
    Toggle(TaskId),
    Delete(TaskId),
    Refresh,
    Disconnect,
}

/// Everything the session loop reacts to, in arrival order.
pub enum SessionEvent {
    User(UserCommand),
    Command(ChannelSignal),
    Notification {
        generation: Generation,
        signal: ChannelSignal,
    },
    SubscriptionReady {
        generation: Generation,
        result: Result<Arc<dyn TransportConn>, SyncError>,
    },
    /// The debounce window a held refresh was waiting on should be over.
    GateReopened,
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::User(c) => f.debug_tuple("User").field(c).finish(),
            SessionEvent::Command(s) => f.debug_tuple("Command").field(s).finish(),
            SessionEvent::Notification { generation, signal } => f
                .debug_struct("Notification")
                .field("generation", generation)
                .field("signal", signal)
                .finish(),
            SessionEvent::SubscriptionReady { generation, result } => f
                .debug_struct("SubscriptionReady")
                .field("generation", generation)
                .field("ok", &result.is_ok())
                .finish(),
            SessionEvent::GateReopened => f.write_str("GateReopened"),
        }
    }
}

/// Cloneable way to feed user commands into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn send(&self, cmd: UserCommand) -> Result<(), SyncError> {
        self.tx
            .send(SessionEvent::User(cmd))
            .map_err(|_| SyncError::Channel("session has ended".into()))
    }

    pub fn show_day(&self, offset: i64) -> Result<(), SyncError> {
        self.send(UserCommand::ShowDay(offset))
    }

    pub fn add(&self, text: impl Into<String>, priority: Priority) -> Result<(), SyncError> {
        self.send(UserCommand::Add {
            text: text.into(),
            priority,
        })
    }

    pub fn toggle(&self, id: impl Into<TaskId>) -> Result<(), SyncError> {
        self.send(UserCommand::Toggle(id.into()))
    }

    pub fn delete(&self, id: impl Into<TaskId>) -> Result<(), SyncError> {
        self.send(UserCommand::Delete(id.into()))
    }

    pub fn refresh(&self) -> Result<(), SyncError> {
        self.send(UserCommand::Refresh)
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.send(UserCommand::Disconnect)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One connected client: the engine plus the queue that drives it.
pub struct Session {
    engine: SyncEngine,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Dial the command channel and wire up the engine. Subscribing and
    /// showing today happen when [`Session::run`] starts.
    #[instrument(skip_all, fields(endpoint = %config.endpoint))]
    pub async fn connect(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
        today: NaiveDate,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let conn = connector.dial(&config.command_url()).await?;
        info!("session: command channel open");

        let (tx, rx) = mpsc::unbounded_channel();
        let sink_tx = tx.clone();
        let sink: SignalSink = Arc::new(move |s| sink_tx.send(SessionEvent::Command(s)).is_ok());
        let command = Channel::open("command", conn, sink);

        let subscription = SubscriptionManager::new(config.clone(), tokens, connector);
        let window = DayWindow::new(today, config.day_offsets.clone());
        let engine = SyncEngine::new(
            &config,
            clock,
            window,
            command,
            subscription,
            renderer,
            tx.clone(),
        );
        Ok(Self { engine, tx, rx })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drive the engine until the user quits (`Ok`) or a channel fails.
    pub async fn run(mut self) -> Result<(), SyncError> {
        let mut flow = self.engine.start();
        loop {
            match flow {
                Flow::Continue => {}
                Flow::Quit => return Ok(()),
                Flow::Disconnected(e) => return Err(e),
            }
            // The engine holds a sender, so the queue never runs dry.
            let Some(event) = self.rx.recv().await else {
                return Err(SyncError::Channel("event queue closed".into()));
            };
            flow = self.engine.handle(event);
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}
