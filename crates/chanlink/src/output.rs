use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use chanlink_frame::{JsonMessage, OwnedBinaryFrame};
use chanlink_schema::ApiDocument;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A message copied out of the client's receive callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Json(JsonMessage),
    Binary(OwnedBinaryFrame),
}

impl Received {
    pub fn channel(&self) -> &str {
        match self {
            Received::Json(message) => &message.channel,
            Received::Binary(frame) => &frame.channel,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Received::Json(_) => "json",
            Received::Binary(_) => "binary",
        }
    }

    fn payload_size(&self) -> usize {
        match self {
            Received::Json(message) => message.payload.to_string().len(),
            Received::Binary(frame) => frame.payload.len(),
        }
    }

    fn preview(&self) -> String {
        match self {
            Received::Json(message) => message.payload.to_string(),
            Received::Binary(frame) => payload_preview(&frame.payload),
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    kind: &'a str,
    channel: &'a str,
    payload_size: usize,
    payload: Value,
    timestamp: String,
}

pub fn print_received(received: &Received, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let payload = match received {
                Received::Json(message) => message.payload.clone(),
                Received::Binary(frame) => Value::String(payload_preview(&frame.payload)),
            };
            let out = MessageOutput {
                kind: received.kind(),
                channel: received.channel(),
                payload_size: received.payload_size(),
                payload,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "KIND", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    received.channel().to_string(),
                    received.kind().to_string(),
                    received.payload_size().to_string(),
                    received.preview(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} kind={} size={} payload={}",
                received.channel(),
                received.kind(),
                received.payload_size(),
                received.preview()
            );
        }
        OutputFormat::Raw => match received {
            Received::Json(message) => println!("{}", message.payload),
            Received::Binary(frame) => print_raw(&frame.payload),
        },
    }
}

pub fn print_document(document: &ApiDocument, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            println!(
                "{}",
                serde_json::to_string(document).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(document).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "NAME", "CATEGORY", "TYPE", "SUBSCRIBE", "PUBLISH"]);
            for (channel, schema) in &document.channels {
                table.add_row(vec![
                    channel.clone(),
                    schema.name.clone(),
                    schema.category.clone(),
                    schema.kind.clone(),
                    yes_no(schema.subscribe.is_some()),
                    yes_no(schema.publish.is_some()),
                ]);
            }
            println!("{table}");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
