use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use switchboard::collaborators::StaticIdentity;
use switchboard::{
    Collaborators, ConfigError, ConnectionState, ErrorInfo, RequestOptions, SessionConfig, SessionError, SessionHandle,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("could not connect within {secs}s: {reason}")]
    ConnectTimeout { secs: u64, reason: String },
    #[error("request failed: {0}")]
    Request(ErrorInfo),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("--data must be a JSON object")]
    NotAnObject,
}

#[derive(Parser, Debug)]
#[command(name = "switchboard-cli", about = "Talk to a game server over its websocket session protocol")]
struct Cli {
    #[arg(long, env = "SWITCHBOARD_URL")]
    url: String,

    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    no_reconnect: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a correlated request and print the response data.
    Call(CallArgs),
    /// Send a fire-and-forget frame.
    Send(SendArgs),
    /// Print push events as JSON lines.
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct CallArgs {
    route: String,

    #[arg(long, default_value = "{}")]
    data: String,

    #[arg(long, help = "User id attached as data.uid (JSON, or a bare string)")]
    uid: Option<String>,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct SendArgs {
    route: String,

    #[arg(long, default_value = "{}")]
    data: String,
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[arg(long = "kind", required = true, help = "Push type to subscribe to; repeatable")]
    kinds: Vec<String>,

    #[arg(long, help = "Exit after this many events")]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = SessionConfig::new(cli.url);
    if cli.no_reconnect {
        config = config.no_reconnect();
    }
    let identity = match &cli.command {
        Command::Call(args) => args.uid.as_deref().map(parse_value),
        _ => None,
    };
    let collaborators = Collaborators::default().with_identity(StaticIdentity(identity));

    let handle = switchboard::spawn(config, collaborators)?;
    connect(&handle, cli.connect_timeout_secs).await?;

    let result = match cli.command {
        Command::Call(args) => run_call(&handle, args).await,
        Command::Send(args) => run_send(&handle, args).await,
        Command::Listen(args) => run_listen(&handle, args).await,
    };

    close(&handle).await;
    result
}

async fn connect(handle: &SessionHandle, secs: u64) -> Result<(), CliError> {
    handle.connect().await?;
    let wait = handle.wait_for_state(ConnectionState::Connected);
    match tokio::time::timeout(Duration::from_secs(secs), wait).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            let reason = handle
                .snapshot()
                .await
                .ok()
                .and_then(|s| s.info)
                .map_or_else(|| "no answer".to_owned(), |info| info.to_string());
            Err(CliError::ConnectTimeout { secs, reason })
        }
    }
}

async fn close(handle: &SessionHandle) {
    if handle.disconnect().await.is_ok() {
        let wait = handle.wait_for_state(ConnectionState::Disconnected);
        if tokio::time::timeout(Duration::from_secs(2), wait).await.is_err() {
            debug!("close handshake did not finish");
        }
    }
    handle.shutdown();
}

async fn run_call(handle: &SessionHandle, args: CallArgs) -> Result<(), CliError> {
    let data = parse_object(&args.data)?;
    let mut options = RequestOptions::new().wait_text(format!("{}...", args.route));
    if args.uid.is_some() {
        options = options.with_identity();
    }
    let timeout = Duration::from_secs(args.timeout_secs);
    let value = handle
        .call_timeout(&args.route, data, options, timeout)
        .await
        .map_err(CliError::Request)?;
    print_json(&value)
}

async fn run_send(handle: &SessionHandle, args: SendArgs) -> Result<(), CliError> {
    let data = parse_object(&args.data)?;
    handle.send(&args.route, data, RequestOptions::new()).await?;
    info!(route = %args.route, "sent");
    Ok(())
}

async fn run_listen(handle: &SessionHandle, args: ListenArgs) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in &args.kinds {
        let tx = tx.clone();
        let name = kind.clone();
        handle
            .on(kind, move |data| {
                let _ = tx.send(json!({ "type": name, "data": data }));
            })
            .await?;
    }
    drop(tx);

    let mut seen = 0usize;
    while let Some(event) = rx.recv().await {
        println!("{event}");
        seen += 1;
        if args.count.is_some_and(|count| seen >= count) {
            break;
        }
    }
    Ok(())
}

fn parse_object(raw: &str) -> Result<Value, CliError> {
    let value = serde_json::from_str::<Value>(raw)?;
    if value.is_object() { Ok(value) } else { Err(CliError::NotAnObject) }
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
