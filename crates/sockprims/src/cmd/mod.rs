use clap::{Args, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use sockprims_frame::Markers;
use sockprims_peer::ConnectionStyle;

use crate::exit::{frame_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server that echoes call-in commands back to their sender.
    Serve(ServeArgs),
    /// Send one message through one or more endpoints.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Frame markers as hex (`02`, `0x0d0a`, `aa:bb`).
#[derive(Args, Debug, Clone)]
pub struct MarkerArgs {
    /// Head marker bytes in hex.
    #[arg(long, default_value = "02")]
    pub head: String,
    /// Tail marker bytes in hex.
    #[arg(long, default_value = "03")]
    pub tail: String,
}

impl MarkerArgs {
    pub fn markers(&self) -> CliResult<Markers> {
        Markers::from_hex(&self.head, &self.tail).map_err(|err| frame_error("invalid markers", err))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StyleArg {
    Normal,
    OneEachClient,
    OnlyOne,
}

impl From<StyleArg> for ConnectionStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Normal => ConnectionStyle::Normal,
            StyleArg::OneEachClient => ConnectionStyle::OneEachClient,
            StyleArg::OnlyOne => ConnectionStyle::OnlyOne,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON server config; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Address to bind.
    #[arg(long)]
    pub bind: Option<IpAddr>,
    /// Port to listen on (0 picks a free port).
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
    /// How connections are identified and replaced.
    #[arg(long, value_enum)]
    pub style: Option<StyleArg>,
    /// Evict connections idle this long (e.g. 60s, 500ms).
    #[arg(long)]
    pub idle_timeout: Option<String>,
    /// Commands to echo (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "ECHO")]
    pub call_in: Vec<String>,
    #[command(flatten)]
    pub markers: MarkerArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint `host:port`; repeat (or comma-separate) for failover order.
    #[arg(long, short = 'e', required = true, value_delimiter = ',')]
    pub endpoint: Vec<String>,
    /// Command field of the message.
    #[arg(long, default_value = "ECHO")]
    pub command: String,
    /// Transaction id; generated when omitted.
    #[arg(long)]
    pub tx: Option<String>,
    /// JSON body.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string body.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read body from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for the reply with the same transaction id and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Per-endpoint connect timeout.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Write attempts per endpoint.
    #[arg(long, default_value_t = 3)]
    pub retries: usize,
    #[command(flatten)]
    pub markers: MarkerArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
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
