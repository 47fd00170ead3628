use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use questkit::api::{metadata, RpcClient};
use questkit::config::Config;
use questkit::quest::{load_inventory, QuestContext, SystemClock};
use questkit::state::QueryCache;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let collection = args
        .next()
        .ok_or_else(|| anyhow!("usage: inventory <collection-address> [config.toml]"))?;
    let collection = Address::from_str(&collection)?;
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());

    let cfg = Config::load(&config_path)?;
    let rpc = Arc::new(RpcClient::connect(&cfg.network, cfg.credentials.private_key.as_deref())?);
    let ctx = QuestContext::new(
        rpc.clone(),
        rpc,
        Arc::new(QueryCache::new(cfg.cache.stale_time())),
        Arc::new(SystemClock),
    );

    let Some(account) = ctx.account() else {
        println!("No wallet connected (set {})", questkit::config::PRIVATE_KEY_VAR);
        return Ok(());
    };

    println!("Loading tokens of {} in {}...", account, collection);
    let start = Instant::now();
    let tokens = load_inventory(&ctx, collection).await?;
    println!("Found {} tokens in {:?}", tokens.len(), start.elapsed());

    let http = reqwest::Client::new();
    for token in &tokens {
        let name = match &token.uri {
            Some(uri) => match metadata::fetch_metadata(&http, uri).await {
                Ok(meta) => meta.name.unwrap_or_else(|| "(unnamed)".to_string()),
                Err(e) => format!("(metadata unavailable: {})", e),
            },
            None => "(no tokenURI)".to_string(),
        };
        println!("  #{} {}", token.token_id, name);
    }

    Ok(())
}
