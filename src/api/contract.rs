use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::error::Result;

/// Read-only methods the quest contracts expose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMethod {
    /// `hasClaimed(address) -> bool`
    HasClaimed,
    /// `canClaim(address) -> bool`
    CanClaim,
    /// `nextClaimTime(address) -> uint256` (unix seconds)
    NextClaimAt,
    /// `balanceOf(address) -> uint256` (ERC-20 and ERC-721)
    BalanceOf,
    /// `stakedBalance(address) -> uint256`
    StakedBalance,
    /// `rewardAmount() -> uint256`
    RewardAmount,
    /// `tokenOfOwnerByIndex(address, uint256) -> uint256`
    TokenOfOwnerByIndex(u64),
    /// `tokenURI(uint256) -> string`
    TokenUri(U256),
}

impl ReadMethod {
    /// Whether the read is parameterised by the connected account.
    /// Such reads are disabled while no wallet is connected.
    pub fn needs_account(&self) -> bool {
        !matches!(self, Self::RewardAmount | Self::TokenUri(_))
    }
}

impl fmt::Display for ReadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HasClaimed => write!(f, "hasClaimed"),
            Self::CanClaim => write!(f, "canClaim"),
            Self::NextClaimAt => write!(f, "nextClaimTime"),
            Self::BalanceOf => write!(f, "balanceOf"),
            Self::StakedBalance => write!(f, "stakedBalance"),
            Self::RewardAmount => write!(f, "rewardAmount"),
            Self::TokenOfOwnerByIndex(i) => write!(f, "tokenOfOwnerByIndex({})", i),
            Self::TokenUri(id) => write!(f, "tokenURI({})", id),
        }
    }
}

/// State-changing methods.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMethod {
    /// `claim()`
    Claim,
    /// `stake(uint256)`
    Stake(U256),
    /// `unstake(uint256)`
    Unstake(U256),
    /// `buy(uint256)` payable, `value` in wei
    Buy { amount: U256, value: U256 },
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim => write!(f, "claim"),
            Self::Stake(amount) => write!(f, "stake({})", amount),
            Self::Unstake(amount) => write!(f, "unstake({})", amount),
            Self::Buy { amount, .. } => write!(f, "buy({})", amount),
        }
    }
}

/// A read against one contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ReadCall {
    pub contract: Address,
    pub method: ReadMethod,
}

impl ReadCall {
    pub fn new(contract: Address, method: ReadMethod) -> Self {
        Self { contract, method }
    }
}

/// An unsigned write against one contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteCall {
    pub contract: Address,
    pub method: WriteMethod,
}

impl WriteCall {
    pub fn new(contract: Address, method: WriteMethod) -> Self {
        Self { contract, method }
    }
}

/// A decoded read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    Bool(bool),
    Uint(U256),
    Text(String),
}

impl Fact {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Bool(b) => Some(U256::from(*b as u8)),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    /// False when the transaction was mined but reverted.
    pub success: bool,
}

/// Decodes contract reads.
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// Perform one read. `account` is passed for reads that need it.
    async fn read(&self, call: &ReadCall, account: Option<Address>) -> Result<Fact>;
}

/// Connected wallet: identity, signing and confirmation.
#[async_trait]
pub trait WalletSession: Send + Sync {
    /// Currently connected account, if any.
    fn account(&self) -> Option<Address>;

    /// Sign and broadcast a call. Returns once the node accepted it.
    async fn submit(&self, call: &WriteCall) -> Result<TxHash>;

    /// Wait until the transaction is mined.
    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<Receipt>;
}
