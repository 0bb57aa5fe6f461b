//! Request/reply through an ordered list of endpoints.
//!
//! Start one or more echo servers (see `echo-server`), then:
//!   cargo run --example failover-client --features peer -- \
//!     127.0.0.1:6000 127.0.0.1:5953

use std::sync::Arc;

use sockprims::frame::{HeadTailProtocol, Markers, MessageCodec, TaggedCodec};
use sockprims::peer::{ClientConfig, FailoverClient, SocketClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut endpoints: Vec<String> = std::env::args().skip(1).collect();
    if endpoints.is_empty() {
        endpoints.push("127.0.0.1:5953".to_string());
    }

    let markers = Markers::new(vec![0x02], vec![0x03])?;
    let protocol = Arc::new(HeadTailProtocol::new("stx-etx", markers.clone()));
    let codec = TaggedCodec::new(markers);

    let clients = endpoints
        .iter()
        .map(|address| {
            SocketClient::new(
                ClientConfig::new(address.clone(), address.clone()),
                protocol.clone(),
                Arc::new(codec.clone()),
            )
        })
        .collect();
    let failover = FailoverClient::new(clients)?;

    for i in 0..3 {
        let payload = TaggedCodec::message("ECHO", &format!("tx-{i}"), b"hello");
        match failover.request(&payload).await {
            Ok(reply) => eprintln!(
                "reply for {:?} via client {}",
                codec.find_transaction(&reply),
                failover.active_index()
            ),
            Err(e) => eprintln!("request {i} failed on every endpoint: {e}"),
        }
    }

    failover.disconnect().await;
    Ok(())
}
