use alloy_primitives::{Address, U256};
use futures_util::future::join_all;
use tracing::debug;

use super::QuestContext;
use crate::api::{ReadCall, ReadMethod};
use crate::error::{QuestError, Result};

/// Upper bound on tokens enumerated per collection.
const MAX_TOKENS: u64 = 200;

/// One NFT held by the connected account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedToken {
    pub token_id: U256,
    /// None when `tokenURI` could not be read.
    pub uri: Option<String>,
}

/// Enumerate the connected account's tokens in an ERC-721 enumerable
/// collection. Not connected → empty, without reading anything.
pub async fn load_inventory(ctx: &QuestContext, collection: Address) -> Result<Vec<OwnedToken>> {
    let Some(account) = ctx.account() else {
        return Ok(Vec::new());
    };
    let reader = ctx.reader.as_ref();

    let balance = ctx
        .cache
        .fetch(reader, &ReadCall::new(collection, ReadMethod::BalanceOf), Some(account), None)
        .await?
        .as_uint()
        .ok_or_else(|| QuestError::decode("balanceOf", "expected uint"))?;
    let count = u64::try_from(balance).unwrap_or(u64::MAX).min(MAX_TOKENS);
    debug!(%collection, %account, count, "loading inventory");

    let tokens = (0..count).map(|index| async move {
        let by_index = ReadCall::new(collection, ReadMethod::TokenOfOwnerByIndex(index));
        let token_id = ctx
            .cache
            .fetch(reader, &by_index, Some(account), None)
            .await?
            .as_uint()
            .ok_or_else(|| QuestError::decode(by_index.method.to_string(), "expected uint"))?;

        let uri_read = ReadCall::new(collection, ReadMethod::TokenUri(token_id));
        let uri = match ctx.cache.fetch(reader, &uri_read, Some(account), None).await {
            Ok(fact) => fact.as_text().map(str::to_string),
            Err(_) => None,
        };
        Ok::<_, QuestError>(OwnedToken { token_id, uri })
    });

    join_all(tokens).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockReader, MockSession};
    use crate::api::Fact;
    use crate::quest::MonotonicClock;
    use crate::state::QueryCache;
    use std::sync::Arc;
    use std::time::Duration;

    fn collection() -> Address {
        Address::repeat_byte(0x07)
    }

    fn read(method: ReadMethod) -> ReadCall {
        ReadCall::new(collection(), method)
    }

    fn ctx(reader: Arc<MockReader>, session: MockSession) -> QuestContext {
        QuestContext::new(
            Arc::new(session),
            reader,
            Arc::new(QueryCache::new(Duration::from_secs(60))),
            Arc::new(MonotonicClock::starting_at(0)),
        )
    }

    #[tokio::test]
    async fn test_lists_tokens_in_index_order() {
        let reader = Arc::new(MockReader::new());
        reader.set(&read(ReadMethod::BalanceOf), Ok(Fact::Uint(U256::from(2))));
        reader.set(&read(ReadMethod::TokenOfOwnerByIndex(0)), Ok(Fact::Uint(U256::from(41))));
        reader.set(&read(ReadMethod::TokenOfOwnerByIndex(1)), Ok(Fact::Uint(U256::from(7))));
        reader.set(
            &read(ReadMethod::TokenUri(U256::from(41))),
            Ok(Fact::Text("ipfs://Qm/41.json".to_string())),
        );
        // No URI for token 7

        let tokens = load_inventory(&ctx(reader, MockSession::connected()), collection())
            .await
            .unwrap();

        assert_eq!(
            tokens,
            vec![
                OwnedToken {
                    token_id: U256::from(41),
                    uri: Some("ipfs://Qm/41.json".to_string()),
                },
                OwnedToken {
                    token_id: U256::from(7),
                    uri: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_when_disconnected() {
        let reader = Arc::new(MockReader::new());
        let tokens = load_inventory(&ctx(reader.clone(), MockSession::disconnected()), collection())
            .await
            .unwrap();
        assert!(tokens.is_empty());
        assert_eq!(reader.calls(), 0);
    }

    #[tokio::test]
    async fn test_balance_failure_propagates() {
        let reader = Arc::new(MockReader::new());
        let result = load_inventory(&ctx(reader, MockSession::connected()), collection()).await;
        assert!(matches!(result, Err(QuestError::Rpc(_))));
    }
}
