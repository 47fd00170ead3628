pub mod contract;
pub mod metadata;
pub mod rpc;

#[cfg(test)]
pub mod mock;

pub use contract::{
    ContractReader, Fact, ReadCall, ReadMethod, Receipt, WalletSession, WriteCall, WriteMethod,
};
pub use rpc::RpcClient;
