use anyhow::{anyhow, Result};
use serde::Deserialize;

const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

/// Token metadata as served from a `tokenURI`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// Rewrite `ipfs://` URIs to an HTTP gateway. Other schemes pass through.
pub fn resolve_uri(uri: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(path) => format!("{}{}", IPFS_GATEWAY, path.trim_start_matches("ipfs/")),
        None => uri.to_string(),
    }
}

// Unencoded on-chain metadata, e.g. `data:application/json;utf8,{...}`
fn inline_json(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("data:application/json")?;
    rest.strip_prefix(";utf8,").or_else(|| rest.strip_prefix(','))
}

/// Fetch and decode metadata for one token.
pub async fn fetch_metadata(client: &reqwest::Client, uri: &str) -> Result<TokenMetadata> {
    if let Some(json) = inline_json(uri) {
        let mut metadata: TokenMetadata = serde_json::from_str(json)?;
        metadata.image = metadata.image.map(|image| resolve_uri(&image));
        return Ok(metadata);
    }

    let url = resolve_uri(uri);
    let response = client.get(&url).send().await?;

    if response.status() == 404 {
        return Err(anyhow!("Metadata not found: {}", uri));
    }

    let mut metadata: TokenMetadata = response.json().await?;
    metadata.image = metadata.image.map(|image| resolve_uri(&image));
    Ok(metadata)
}
