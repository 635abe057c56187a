//! Terminal front end: shows one day at a time and reads commands from stdin.

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use daybook_sync::{
    clock::SystemClock,
    communication::transports::websockets::WsConnector,
    config::{ClientConfig, DEFAULT_ENDPOINT},
    record_key::RecordKey,
    render::Renderer,
    sync::{session::Session, token::HttpTokenProvider, SessionHandle},
    task::{Priority, Task, TaskId},
    SyncError,
};

#[derive(Parser, Debug)]
#[command(name = "daybook", version, about = "Day-by-day task lists kept in sync through a key-value store")]
struct Cli {
    /// Store endpoint as host[:port].
    #[arg(long, env = "DAYBOOK_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long, env = "DAYBOOK_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Use plain ws/http even for remote endpoints.
    #[arg(long, conflicts_with = "tls")]
    insecure: bool,

    /// Use wss/https even for localhost.
    #[arg(long)]
    tls: bool,

    /// Quiet period after a local edit, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    debounce_ms: u64,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new(self.endpoint.clone(), self.api_key.clone());
        cfg.secure = match (self.insecure, self.tls) {
            (true, _) => Some(false),
            (_, true) => Some(true),
            _ => None,
        };
        cfg.debounce_window = Duration::from_millis(self.debounce_ms);
        cfg
    }
}

/*──────── logging ────────*/

/// `DAYBOOK_LOG`, then `RUST_LOG`, then the -v/-q flags. Default `warn`.
fn init_tracing(verbose: bool, quiet: bool) {
    let filter = std::env::var("DAYBOOK_LOG")
        .ok()
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| {
            let level = if verbose {
                Level::DEBUG
            } else if quiet {
                Level::ERROR
            } else {
                Level::WARN
            };
            EnvFilter::new(level.as_str().to_ascii_lowercase())
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(true)
                .without_time()
                .compact(),
        )
        .init();
}

/*──────── rendering ────────*/

/// Prints the active day and remembers its order so `toggle 2` can work.
struct TerminalRenderer {
    shown: Arc<Mutex<Vec<TaskId>>>,
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, key: &RecordKey, tasks: &[Task], changed: bool) {
        if !changed {
            return;
        }
        *self.shown.lock().expect("poisoned") = tasks.iter().map(|t| t.id.clone()).collect();

        println!();
        println!("== {} ==", key.date().format("%A %d %B %Y"));
        if tasks.is_empty() {
            println!("   (nothing yet)");
        }
        for (i, t) in tasks.iter().enumerate() {
            let mark = if t.status.is_done() { "x" } else { " " };
            println!("{:>3}. [{mark}] ({}) {}", i + 1, t.priority, t.text);
        }
    }

    fn disconnected(&mut self, reason: &SyncError) {
        self.shown.lock().expect("poisoned").clear();
        println!();
        println!("!! connection closed: {reason}");
        println!("!! type `reconnect` to connect again or `quit` to leave");
    }

    fn report(&mut self, err: &SyncError) {
        println!("! {err}");
    }
}

/*──────── input ────────*/

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Day(i64),
    Add { priority: Priority, text: String },
    Toggle(String),
    Delete(String),
    Refresh,
    Help,
    Quit,
    Reconnect,
}

const HELP: &str = "commands: day <offset> | add [high|low] <text> | toggle <n|id> | delete <n|id> | refresh | quit";

fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let input = match cmd {
        "day" | "d" => Input::Day(
            rest.parse()
                .map_err(|_| format!("`{rest}` is not a day offset"))?,
        ),
        "add" | "a" => {
            let (first, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            match Priority::parse(first) {
                Some(priority) if !tail.trim().is_empty() => Input::Add {
                    priority,
                    text: tail.trim().to_string(),
                },
                _ => Input::Add {
                    priority: Priority::default(),
                    text: rest.to_string(),
                },
            }
        }
        "toggle" | "t" | "delete" | "del" | "rm" => {
            if rest.is_empty() {
                return Err(format!("`{cmd}` needs a task number or id"));
            }
            if cmd.starts_with('t') {
                Input::Toggle(rest.to_string())
            } else {
                Input::Delete(rest.to_string())
            }
        }
        "refresh" | "r" => Input::Refresh,
        "help" | "h" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        "reconnect" => Input::Reconnect,
        other => return Err(format!("unknown command `{other}`")),
    };
    Ok(Some(input))
}

/// A 1-based position in the last rendered list, or a literal id.
fn resolve_target(target: &str, shown: &[TaskId]) -> TaskId {
    target
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| shown.get(i))
        .cloned()
        .unwrap_or_else(|| target.to_string())
}

fn dispatch(input: Input, handle: &SessionHandle, shown: &Mutex<Vec<TaskId>>) -> Result<(), SyncError> {
    match input {
        Input::Day(offset) => handle.show_day(offset),
        Input::Add { priority, text } => handle.add(text, priority),
        Input::Toggle(t) => {
            let id = resolve_target(&t, &shown.lock().expect("poisoned"));
            handle.toggle(id)
        }
        Input::Delete(t) => {
            let id = resolve_target(&t, &shown.lock().expect("poisoned"));
            handle.delete(id)
        }
        Input::Refresh => handle.refresh(),
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Reconnect => {
            println!("already connected");
            Ok(())
        }
        Input::Quit => handle.disconnect(),
    }
}

/// Block until the user picks `reconnect` (true) or `quit` / EOF (false).
async fn wait_for_reconnect(lines: &mut Lines<BufReader<Stdin>>) -> bool {
    loop {
        match lines.next_line().await {
            Ok(Some(l)) => match parse_line(&l) {
                Ok(Some(Input::Reconnect)) => return true,
                Ok(Some(Input::Quit)) => return false,
                _ => println!("!! disconnected: `reconnect` or `quit`"),
            },
            Ok(None) | Err(_) => return false,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = cli.config();
    if let Err(e) = config.validate() {
        eprintln!("daybook: {e}");
        return ExitCode::FAILURE;
    }
    let tokens = match HttpTokenProvider::new(
        config.token_url(),
        config.api_key.clone(),
        config.token_timeout,
    ) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("daybook: {e}");
            return ExitCode::FAILURE;
        }
    };
    let connector = Arc::new(WsConnector::new());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    'connect: loop {
        let shown = Arc::new(Mutex::new(Vec::new()));
        let renderer = TerminalRenderer {
            shown: shown.clone(),
        };
        let today = chrono::Local::now().date_naive();
        let session = match Session::connect(
            config.clone(),
            connector.clone(),
            tokens.clone(),
            Arc::new(SystemClock),
            today,
            Box::new(renderer),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                println!("!! could not connect: {e}");
                if wait_for_reconnect(&mut lines).await {
                    continue 'connect;
                }
                return ExitCode::FAILURE;
            }
        };
        println!("connected to {} ({HELP})", config.endpoint);

        let handle = session.handle();
        let mut running = tokio::spawn(session.run());
        loop {
            tokio::select! {
                finished = &mut running => {
                    match finished {
                        Ok(Ok(())) => return ExitCode::SUCCESS,
                        // The renderer has already shown the notice.
                        Ok(Err(_)) => {}
                        Err(e) => error!(%e, "daybook: session task failed"),
                    }
                    if wait_for_reconnect(&mut lines).await {
                        continue 'connect;
                    }
                    return ExitCode::SUCCESS;
                }
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(l)) => l,
                        Ok(None) | Err(_) => {
                            let _ = handle.disconnect();
                            let _ = running.await;
                            return ExitCode::SUCCESS;
                        }
                    };
                    match parse_line(&line) {
                        Ok(Some(input)) => {
                            if let Err(e) = dispatch(input, &handle, &shown) {
                                println!("! {e}");
                            }
                        }
                        Ok(None) => {}
                        Err(msg) => println!("! {msg}"),
                    }
                }
            }
        }
    }
}
