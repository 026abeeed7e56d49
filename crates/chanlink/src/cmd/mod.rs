use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chanlink_client::{Client, ClientBuilder, ClientConfig, HandshakeConfig};
use chanlink_schema::SchemaRegistry;
use chanlink_transport::WsConnector;
use clap::{Args, Subcommand};
use tokio::sync::Notify;

use crate::exit::{io_error, schema_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod schema;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print received messages.
    Listen(ListenArgs),
    /// Connect, send one message, optionally wait for a reply.
    Send(SendArgs),
    /// Run a minimal counterpart server that echoes every message back.
    Echo(EchoArgs),
    /// Load and print a schema document.
    Schema(SchemaArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => block_on(listen::run(args, format)),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Echo(args) => block_on(echo::run(args)),
        Command::Schema(args) => schema::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn block_on(command: impl Future<Output = CliResult<i32>>) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(command)
}

/// Options shared by every command that opens a client.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// WebSocket endpoint (ws:// or wss://).
    #[arg(env = "CHANLINK_URL")]
    pub url: String,
    /// Handshake token.
    #[arg(long, env = "CHANLINK_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,
    /// Handshake metadata entry (repeatable).
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
    /// Idle delay before reconnecting (e.g. 2s, 500ms).
    #[arg(long, default_value = "2000ms")]
    pub reconnect_delay: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connection: ConnectArgs,
    /// Filter to specific channels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<String>>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Schema document published after each handshake.
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectArgs,
    /// Channel to send on.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// String payload (a JSON string, or raw bytes with --binary).
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file (JSON, or raw bytes with --binary).
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Send as a binary frame.
    #[arg(long, conflicts_with = "json")]
    pub binary: bool,
    /// Wait for one message on the same channel and print it.
    #[arg(long)]
    pub wait: bool,
    /// Bound on connecting, and on the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind (e.g. 127.0.0.1:9001).
    pub addr: String,
    /// Exit after serving N connections.
    #[arg(long)]
    pub max_connections: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Schema document (JSON).
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{input}'")),
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Start a client for `args`, publishing `schema` after each handshake.
pub(crate) fn start_client(
    args: &ConnectArgs,
    schema: Option<&Path>,
) -> CliResult<Client<WsConnector>> {
    let config = ClientConfig {
        reconnect_delay: parse_duration(&args.reconnect_delay)?,
        ..ClientConfig::default()
    };
    let mut handshake = HandshakeConfig::new(args.token.clone());
    handshake.metadata.extend(args.metadata.iter().cloned());

    let mut builder = ClientBuilder::new(WsConnector::new(args.url.clone()))
        .config(config)
        .handshake(handshake);

    if let Some(path) = schema {
        let registry =
            SchemaRegistry::from_file(path).map_err(|err| schema_error("schema load failed", err))?;
        builder = builder.schema_source(Arc::new(registry.document()));
    }

    Ok(builder.start())
}

pub(crate) fn install_ctrlc_handler(stop: Arc<Notify>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.notify_one();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("k=a=b").unwrap(),
            ("k".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("=v").is_err());
        assert!(parse_key_value("novalue").is_err());
    }
}
