use alloy_primitives::Address;
use std::fmt;

use crate::api::ReadCall;

/// Cache key for one distinct read.
///
/// Two widgets issuing the same read for the same account share a key.
/// The account only participates for reads that take one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub contract: Address,
    pub method: String,
    pub account: Option<Address>,
}

impl QueryKey {
    pub fn for_read(call: &ReadCall, account: Option<Address>) -> Self {
        Self {
            contract: call.contract,
            method: call.method.to_string(),
            account: account.filter(|_| call.method.needs_account()),
        }
    }

    /// True when this key belongs to `account`.
    pub fn is_for(&self, account: Address) -> bool {
        self.account == Some(account)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contract, self.method)?;
        if let Some(account) = self.account {
            write!(f, ":{}", account)?;
        }
        Ok(())
    }
}
