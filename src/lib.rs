//! Quest board client: countdowns, eligibility and claim dispatch over a
//! shared cache of contract reads.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod feeds;
pub mod quest;
pub mod state;

pub use error::{QuestError, Result};
