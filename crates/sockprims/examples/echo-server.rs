//! Minimal echo server: every `ECHO` message is sent straight back.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send --endpoint 127.0.0.1:5953 \
//!     --data 'hello' --wait

use std::sync::Arc;

use sockprims::frame::{HeadTailProtocol, Markers, TaggedCodec};
use sockprims::peer::{ServerConfig, SocketServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let markers = Markers::new(vec![0x02], vec![0x03])?;
    let server = SocketServer::new(
        ServerConfig::default(),
        Arc::new(HeadTailProtocol::new("stx-etx", markers.clone())),
        Arc::new(TaggedCodec::new(markers).with_call_ins(["ECHO"])),
    )?;

    server.register_call_in("ECHO", |payload, conn| async move {
        eprintln!("{} sent {} bytes", conn.id(), payload.len());
        if let Err(e) = conn.send(&payload, 1).await {
            eprintln!("echo to {} failed: {e}", conn.id());
        }
    });

    server.start().await?;
    if let Some(addr) = server.local_addr() {
        eprintln!("Listening on {addr}");
    }

    tokio::signal::ctrl_c().await?;
    server.stop().await?;
    Ok(())
}
