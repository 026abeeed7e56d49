use std::fs;
use std::time::Duration;

use chanlink_client::{Client, ConnectionState};
use chanlink_transport::WsConnector;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cmd::{parse_duration, start_client, SendArgs};
use crate::exit::{
    client_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_received, OutputFormat, Received};

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let client = start_client(&args.connection, None)?;

    let result = send_and_wait(&client, &args, payload, timeout, format).await;
    client.dispose().await;
    result
}

async fn send_and_wait(
    client: &Client<WsConnector>,
    args: &SendArgs,
    payload: Payload,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if args.wait {
        let channel = args.channel.clone();
        let json_tx = tx.clone();
        client.on_json_received(move |message| {
            if message.channel == channel {
                let _ = json_tx.send(Received::Json(message.clone()));
            }
        });
        let channel = args.channel.clone();
        client.on_binary_received(move |frame| {
            if frame.channel() == channel {
                let _ = tx.send(Received::Binary(frame.to_owned()));
            }
        });
    }

    match tokio::time::timeout(timeout, client.wait_for_state(ConnectionState::Connected)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(client_error("connect failed", err)),
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("connect failed: not connected after {timeout:?}"),
            ))
        }
    }

    match &payload {
        Payload::Json(value) => client.send_json(&args.channel, value).await,
        Payload::Binary(bytes) => client.send_binary(&args.channel, bytes).await,
    }
    .map_err(|err| client_error("send failed", err))?;

    if args.wait {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(received)) => print_received(&received, format),
            Ok(None) => return Err(CliError::new(FAILURE, "client stopped")),
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply on '{}' within {timeout:?}", args.channel),
                ))
            }
        }
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Payload> {
    if let Some(json) = &args.json {
        let value = serde_json::from_str::<Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Payload::Json(value));
    }
    if let Some(data) = &args.data {
        return Ok(if args.binary {
            Payload::Binary(data.as_bytes().to_vec())
        } else {
            Payload::Json(Value::String(data.clone()))
        });
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        if args.binary {
            return Ok(Payload::Binary(bytes));
        }
        let value = serde_json::from_slice::<Value>(&bytes).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("{} is not valid JSON: {err}", path.display()),
            )
        })?;
        return Ok(Payload::Json(value));
    }
    Ok(if args.binary {
        Payload::Binary(Vec::new())
    } else {
        Payload::Json(Value::Null)
    })
}
