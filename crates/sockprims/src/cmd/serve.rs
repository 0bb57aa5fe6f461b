use std::sync::Arc;

use sockprims_frame::{HeadTailProtocol, TaggedCodec};
use sockprims_peer::{Connection, ConnectionListener, ConnectionStyle, ServerConfig, SocketServer};
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

/// Logs connection lifecycle events.
struct LogListener;

impl ConnectionListener for LogListener {
    fn connected(&self, conn: &Arc<Connection>) {
        info!(peer = %conn.id(), "client connected");
    }

    fn disconnected(&self, conn: &Arc<Connection>) {
        info!(peer = %conn.id(), "client disconnected");
    }
}

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = resolve_config(&args)?;
    let markers = args.markers.markers()?;
    let retries = config.send_retries;

    let server = SocketServer::new(
        config,
        Arc::new(HeadTailProtocol::new("cli", markers.clone())),
        Arc::new(TaggedCodec::new(markers).with_call_ins(args.call_in.iter().cloned())),
    )
    .map_err(|err| peer_error("invalid config", err))?;

    for command in &args.call_in {
        server.register_call_in(command.clone(), move |payload, conn: Arc<Connection>| async move {
            info!(peer = %conn.id(), size = payload.len(), "echoing message");
            if let Err(err) = conn.send(&payload, retries).await {
                warn!(peer = %conn.id(), error = %err, "echo failed");
            }
        });
    }
    server.add_listener(Arc::new(LogListener));

    server
        .start()
        .await
        .map_err(|err| peer_error("start failed", err))?;
    if let Some(addr) = server.local_addr() {
        print_listening(
            addr,
            style_name(server.config().connection_style),
            &args.call_in,
            format,
        );
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    info!("shutting down");

    server
        .stop()
        .await
        .map_err(|err| peer_error("stop failed", err))?;
    Ok(SUCCESS)
}

fn resolve_config(args: &ServeArgs) -> CliResult<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)
            .map_err(|err| peer_error(&format!("failed loading {}", path.display()), err))?,
        None => ServerConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(style) = args.style {
        config.connection_style = style.into();
    }
    if let Some(idle) = &args.idle_timeout {
        config.idle_timeout_ms = parse_duration(idle)?.as_millis() as u64;
    }
    config
        .validate()
        .map_err(|err| peer_error("invalid config", err))?;
    Ok(config)
}

fn style_name(style: ConnectionStyle) -> &'static str {
    match style {
        ConnectionStyle::Normal => "normal",
        ConnectionStyle::OneEachClient => "one-each-client",
        ConnectionStyle::OnlyOne => "only-one",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cmd::{MarkerArgs, StyleArg};

    fn args() -> ServeArgs {
        ServeArgs {
            config: None,
            bind: None,
            port: None,
            style: None,
            idle_timeout: None,
            call_in: vec!["ECHO".to_string()],
            markers: MarkerArgs {
                head: "02".to_string(),
                tail: "03".to_string(),
            },
        }
    }

    #[test]
    fn flags_override_defaults() {
        let mut args = args();
        args.port = Some(7001);
        args.style = Some(StyleArg::OnlyOne);
        args.idle_timeout = Some("1500ms".to_string());

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.connection_style, ConnectionStyle::OnlyOne);
        assert_eq!(config.idle_timeout_ms, 1500);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = std::env::temp_dir().join(format!("sockprims-serve-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.json");
        std::fs::write(&path, r#"{ "port": 6000, "connection_style": "one_each_client" }"#)
            .unwrap();

        let mut args = args();
        args.config = Some(path);
        args.port = Some(6001);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.connection_style, ConnectionStyle::OneEachClient);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_config_file_fails() {
        let mut args = args();
        args.config = Some("/nonexistent/sockprims.json".into());
        assert!(resolve_config(&args).is_err());
    }
}
