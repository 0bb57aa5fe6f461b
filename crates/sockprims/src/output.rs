use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sockprims_frame::{MessageCodec, TaggedCodec};

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

#[derive(Serialize, Debug, PartialEq)]
struct ReplyOutput<'a> {
    endpoint: &'a str,
    command: Option<String>,
    transaction: Option<String>,
    size: usize,
    body: String,
    timestamp: String,
}

impl<'a> ReplyOutput<'a> {
    fn new(codec: &TaggedCodec, payload: &[u8], endpoint: &'a str) -> Self {
        Self {
            endpoint,
            command: codec.find_command(payload),
            transaction: codec.find_transaction(payload),
            size: payload.len(),
            body: body_preview(TaggedCodec::body(payload).unwrap_or(payload)),
            timestamp: now_unix_seconds(),
        }
    }
}

/// Print a reply payload received from `endpoint`.
pub fn print_reply(codec: &TaggedCodec, payload: &[u8], endpoint: &str, format: OutputFormat) {
    if let OutputFormat::Raw = format {
        print_raw(payload);
        return;
    }

    let out = ReplyOutput::new(codec, payload, endpoint);
    match format {
        OutputFormat::Json => {
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
                .set_header(vec!["ENDPOINT", "COMMAND", "TX", "SIZE", "BODY"])
                .add_row(vec![
                    out.endpoint.to_string(),
                    out.command.clone().unwrap_or_default(),
                    out.transaction.clone().unwrap_or_default(),
                    out.size.to_string(),
                    out.body.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} command={} tx={} size={} body={}",
                out.endpoint,
                out.command.as_deref().unwrap_or("-"),
                out.transaction.as_deref().unwrap_or("-"),
                out.size,
                out.body
            );
        }
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct ListeningOutput {
    listening: String,
    style: String,
    call_ins: Vec<String>,
}

/// Announce a started server on stdout.
pub fn print_listening(addr: SocketAddr, style: &str, call_ins: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                listening: addr.to_string(),
                style: style.to_string(),
                call_ins: call_ins.to_vec(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        _ => println!("listening on {addr} (style={style}, call-ins={})", call_ins.join(",")),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
