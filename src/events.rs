use crate::quest::ActionStatus;
use crate::state::QueryKey;

// Everything the CLI loop reacts to arrives as one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // Head of the chain moved (websocket feed)
    NewBlock { number: u64 },

    // Countdown for a quest re-sampled (at most once per second)
    CountdownTick { quest: String, remaining: u64 },

    // Countdown for a quest hit zero. Sent once per deadline.
    CountdownExpired { quest: String },

    // Dispatcher moved to a new status
    ActionStatus { quest: String, status: ActionStatus },

    // Cached snapshots marked stale
    Invalidated { keys: Vec<QueryKey> },

    // Ctrl+C or kill signal
    Shutdown,
}

impl Event {
    /// Quest this event belongs to, if any.
    pub fn quest(&self) -> Option<&str> {
        match self {
            Event::CountdownTick { quest, .. }
            | Event::CountdownExpired { quest }
            | Event::ActionStatus { quest, .. } => Some(quest),
            _ => None,
        }
    }
}
