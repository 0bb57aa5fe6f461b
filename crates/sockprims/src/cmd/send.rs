use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sockprims_frame::{HeadTailProtocol, TaggedCodec};
use sockprims_peer::{ClientConfig, ClientEndpoint, FailoverClient, SocketClient};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let markers = args.markers.markers()?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let protocol = Arc::new(HeadTailProtocol::new("cli", markers.clone()));
    let codec = TaggedCodec::new(markers);
    let clients = args
        .endpoint
        .iter()
        .map(|address| {
            let config = ClientConfig {
                name: address.clone(),
                address: address.clone(),
                connect_timeout_ms: connect_timeout.as_millis() as u64,
                send_retries: args.retries,
                request_timeout_ms: wait_timeout.as_millis() as u64,
                ..ClientConfig::default()
            };
            SocketClient::new(config, protocol.clone(), Arc::new(codec.clone()))
        })
        .collect();
    let failover = FailoverClient::new(clients).map_err(|err| peer_error("no endpoints", err))?;

    let tx = args.tx.clone().unwrap_or_else(generate_tx);
    let payload = TaggedCodec::message(&args.command, &tx, &resolve_body(&args)?);

    let outcome = if args.wait {
        match failover.request(&payload).await {
            Ok(reply) => {
                print_reply(&codec, &reply, failover.active().name(), format);
                Ok(SUCCESS)
            }
            Err(err) => Err(peer_error("request failed", err)),
        }
    } else {
        failover
            .send(&payload)
            .await
            .map(|()| SUCCESS)
            .map_err(|err| peer_error("send failed", err))
    };

    failover.disconnect().await;
    outcome
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn generate_tx() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{}-{nanos:08x}", std::process::id())
}
