use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::events::Event;

const SUBSCRIBE_NEW_HEADS: &str =
    r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#;

// eth_subscription notification carrying a block header
#[derive(Deserialize)]
struct Notification {
    params: Option<Params>,
}

#[derive(Deserialize)]
struct Params {
    result: Header,
}

#[derive(Deserialize)]
struct Header {
    number: String,
}

/// Block number from a `newHeads` notification. None for anything else
/// (subscription acks, errors).
fn parse_block_number(text: String) -> Option<u64> {
    let mut bytes = text.into_bytes();
    let note = simd_json::from_slice::<Notification>(&mut bytes).ok()?;
    let hex = note.params?.result.number;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

/// Spawns a task that follows chain heads and sends NewBlock events.
pub fn spawn(ws_url: String, tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        loop {
            info!(url = %ws_url, "[blocks] connecting");

            match connect_async(ws_url.as_str()).await {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    if let Err(e) = write
                        .send(tungstenite::Message::Text(SUBSCRIBE_NEW_HEADS.to_string()))
                        .await
                    {
                        warn!(error = %e, "[blocks] failed to subscribe");
                    } else {
                        info!("[blocks] subscribed to newHeads");

                        let mut last = 0u64;
                        while let Some(msg) = read.next().await {
                            match msg {
                                Ok(tungstenite::Message::Text(text)) => {
                                    if let Some(number) = parse_block_number(text) {
                                        // Reorgs and duplicates replay old heights
                                        if number > last {
                                            last = number;
                                            if tx.send(Event::NewBlock { number }).await.is_err() {
                                                debug!("[blocks] receiver gone, stopping");
                                                return;
                                            }
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "[blocks] stream error");
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "[blocks] failed to connect");
                }
            }

            info!("[blocks] reconnecting in 5 seconds");
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        }
    });
}
