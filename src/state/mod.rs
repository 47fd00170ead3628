mod balance;
mod cache;
mod key;

pub use balance::{format_amount, group_thousands, to_decimal};
pub use cache::{QueryCache, SnapshotState};
pub use key::QueryKey;
