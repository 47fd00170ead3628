use alloy_primitives::TxHash;
use std::time::Duration;
use thiserror::Error;

/// Errors raised at the collaborator boundary (reads, writes, confirmations).
///
/// None of these ever reach the caller as a panic: the cache stores them as
/// failed snapshots and the dispatcher turns them into an `Error` status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuestError {
    /// No wallet account is connected.
    #[error("wallet not connected")]
    NotConnected,

    /// Transport or node error from the RPC endpoint.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The node answered but the return data did not decode.
    #[error("failed to decode {method} result: {reason}")]
    Decode { method: String, reason: String },

    /// The wallet or node refused to accept the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The transaction was mined but reverted.
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: TxHash },

    /// No receipt showed up within the confirmation window.
    #[error("transaction not confirmed after {}s: {tx_hash}", .waited.as_secs())]
    ConfirmationTimeout { tx_hash: TxHash, waited: Duration },

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QuestError>;

impl QuestError {
    /// Build an `Rpc` error from anything displayable.
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }

    /// Build a `Decode` error for a method.
    pub fn decode(method: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            method: method.into(),
            reason: err.to_string(),
        }
    }
}
