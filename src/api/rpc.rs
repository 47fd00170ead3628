use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::contract::{
    ContractReader, Fact, ReadCall, ReadMethod, Receipt, WalletSession, WriteCall, WriteMethod,
};
use crate::config::NetworkSettings;
use crate::error::{QuestError, Result};

sol! {
    interface IQuest {
        function hasClaimed(address account) external view returns (bool);
        function canClaim(address account) external view returns (bool);
        function nextClaimTime(address account) external view returns (uint256);
        function rewardAmount() external view returns (uint256);
        function claim() external;
    }

    interface IStaking {
        function stakedBalance(address account) external view returns (uint256);
        function stake(uint256 amount) external;
        function unstake(uint256 amount) external;
    }

    interface IToken {
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        function tokenURI(uint256 tokenId) external view returns (string);
        function buy(uint256 amount) external payable;
    }
}

/// JSON-RPC collaborator: reads via `eth_call`, writes through a local signer.
#[derive(Clone)]
pub struct RpcClient {
    provider: DynProvider,
    account: Option<Address>,
    chain_id: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcClient {
    /// Connect to `rpc_url`. Without a private key the client is read-only
    /// and reports no connected account.
    pub fn connect(network: &NetworkSettings, private_key: Option<&str>) -> Result<Self> {
        let url: reqwest::Url = network
            .rpc_url
            .parse()
            .map_err(|e| QuestError::Config(format!("invalid rpc_url {}: {}", network.rpc_url, e)))?;

        let (provider, account) = match private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key
                    .parse()
                    .map_err(|e| QuestError::Config(format!("invalid private key: {}", e)))?;
                let account = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_http(url)
                    .erased();
                (provider, Some(account))
            }
            None => (ProviderBuilder::new().connect_http(url).erased(), None),
        };

        Ok(Self {
            provider,
            account,
            chain_id: network.chain_id,
            confirmation_timeout: Duration::from_secs(network.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(network.poll_interval_ms),
        })
    }

    /// Fail unless the node serves the configured chain.
    pub async fn verify_chain(&self) -> Result<()> {
        let actual = self.provider.get_chain_id().await.map_err(QuestError::rpc)?;
        check_chain(self.chain_id, actual)
    }

    /// Unsigned transaction for a write, pinned to the configured chain.
    fn write_request(&self, call: &WriteCall) -> TransactionRequest {
        let (input, value) = encode_write(&call.method);
        TransactionRequest::default()
            .with_to(call.contract)
            .with_input(input)
            .with_value(value)
            .with_chain_id(self.chain_id)
    }

    async fn eth_call(&self, to: Address, input: Vec<u8>) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(input);
        self.provider.call(tx).await.map_err(QuestError::rpc)
    }
}

fn check_chain(expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(QuestError::Config(format!(
            "chain_id is {} but the node serves chain {}",
            expected, actual
        )));
    }
    Ok(())
}

/// Account argument for reads that need one.
fn require(account: Option<Address>) -> Result<Address> {
    account.ok_or(QuestError::NotConnected)
}

fn decode<C: SolCall>(method: &ReadMethod, data: &[u8]) -> Result<C::Return> {
    C::abi_decode_returns(data).map_err(|e| QuestError::decode(method.to_string(), e))
}

/// Calldata and attached value for a write.
fn encode_write(method: &WriteMethod) -> (Vec<u8>, U256) {
    match method {
        WriteMethod::Claim => (IQuest::claimCall {}.abi_encode(), U256::ZERO),
        WriteMethod::Stake(amount) => (IStaking::stakeCall { amount: *amount }.abi_encode(), U256::ZERO),
        WriteMethod::Unstake(amount) => {
            (IStaking::unstakeCall { amount: *amount }.abi_encode(), U256::ZERO)
        }
        WriteMethod::Buy { amount, value } => (IToken::buyCall { amount: *amount }.abi_encode(), *value),
    }
}

#[async_trait]
impl ContractReader for RpcClient {
    async fn read(&self, call: &ReadCall, account: Option<Address>) -> Result<Fact> {
        let method = &call.method;
        let to = call.contract;

        let fact = match method {
            ReadMethod::HasClaimed => {
                let input = IQuest::hasClaimedCall { account: require(account)? }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Bool(decode::<IQuest::hasClaimedCall>(method, &out)?)
            }
            ReadMethod::CanClaim => {
                let input = IQuest::canClaimCall { account: require(account)? }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Bool(decode::<IQuest::canClaimCall>(method, &out)?)
            }
            ReadMethod::NextClaimAt => {
                let input = IQuest::nextClaimTimeCall { account: require(account)? }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Uint(decode::<IQuest::nextClaimTimeCall>(method, &out)?)
            }
            ReadMethod::RewardAmount => {
                let out = self.eth_call(to, IQuest::rewardAmountCall {}.abi_encode()).await?;
                Fact::Uint(decode::<IQuest::rewardAmountCall>(method, &out)?)
            }
            ReadMethod::StakedBalance => {
                let input = IStaking::stakedBalanceCall { account: require(account)? }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Uint(decode::<IStaking::stakedBalanceCall>(method, &out)?)
            }
            ReadMethod::BalanceOf => {
                let input = IToken::balanceOfCall { owner: require(account)? }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Uint(decode::<IToken::balanceOfCall>(method, &out)?)
            }
            ReadMethod::TokenOfOwnerByIndex(index) => {
                let input = IToken::tokenOfOwnerByIndexCall {
                    owner: require(account)?,
                    index: U256::from(*index),
                }
                .abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Uint(decode::<IToken::tokenOfOwnerByIndexCall>(method, &out)?)
            }
            ReadMethod::TokenUri(token_id) => {
                let input = IToken::tokenURICall { tokenId: *token_id }.abi_encode();
                let out = self.eth_call(to, input).await?;
                Fact::Text(decode::<IToken::tokenURICall>(method, &out)?)
            }
        };

        debug!(contract = %to, method = %method, ?fact, "read");
        Ok(fact)
    }
}

#[async_trait]
impl WalletSession for RpcClient {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn submit(&self, call: &WriteCall) -> Result<TxHash> {
        if self.account.is_none() {
            return Err(QuestError::NotConnected);
        }
        let tx = self.write_request(call);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| QuestError::Rejected(e.to_string()))?;
        let tx_hash = *pending.tx_hash();
        debug!(contract = %call.contract, method = %call.method, %tx_hash, "submitted");
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<Receipt> {
        let started = Instant::now();
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return Ok(Receipt {
                        tx_hash,
                        block_number: receipt.block_number(),
                        success: receipt.status(),
                    });
                }
                Ok(None) => {}
                // Nodes drop receipt lookups under load; keep polling.
                Err(e) => warn!(%tx_hash, error = %e, "receipt lookup failed"),
            }

            let waited = started.elapsed();
            if waited >= self.confirmation_timeout {
                return Err(QuestError::ConfirmationTimeout { tx_hash, waited });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
