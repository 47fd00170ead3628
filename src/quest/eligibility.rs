use alloy_primitives::{Address, U256};
use futures_util::future::join_all;
use serde::Deserialize;
use std::time::Duration;

use super::QuestContext;
use crate::api::{Fact, ReadCall};
use crate::state::{QueryKey, SnapshotState};

/// Turns a fact into a yes/no answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    #[default]
    IsTrue,
    IsFalse,
    /// Numeric fact is at least this value (e.g. NFT balance >= 1).
    AtLeast(u64),
}

impl Check {
    /// None when the fact has the wrong shape for this check.
    pub fn apply(&self, fact: &Fact) -> Option<bool> {
        match self {
            Self::IsTrue => fact.as_bool(),
            Self::IsFalse => fact.as_bool().map(|b| !b),
            Self::AtLeast(min) => fact.as_uint().map(|v| v >= U256::from(*min)),
        }
    }
}

/// One named precondition of a quest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CriterionConfig {
    pub name: String,
    pub read: ReadCall,
    #[serde(default)]
    pub check: Check,
    /// Overrides the cache default.
    pub stale_time_secs: Option<u64>,
}

impl CriterionConfig {
    pub fn new(name: impl Into<String>, read: ReadCall, check: Check) -> Self {
        Self {
            name: name.into(),
            read,
            check,
            stale_time_secs: None,
        }
    }

    pub fn stale_time(&self) -> Option<Duration> {
        self.stale_time_secs.map(Duration::from_secs)
    }
}

/// Where one criterion stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriterionState {
    Loading,
    /// Needs an account and none is connected. Not attempted.
    Disabled,
    Ready(bool),
    Failed(String),
}

impl CriterionState {
    pub fn is_met(&self) -> bool {
        matches!(self, Self::Ready(true))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    fn from_fact(check: Check, fact: &Fact) -> Self {
        match check.apply(fact) {
            Some(b) => Self::Ready(b),
            None => Self::Failed(format!("unexpected value {:?}", fact)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionResult {
    pub name: String,
    pub state: CriterionState,
}

/// Why an action is or isn't available, for the button label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Loading,
    NotConnected,
    AlreadyCompleted,
    Ineligible,
    Ready,
}

/// Combined view of every criterion of a quest.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    /// In configuration order, never fetch-completion order.
    pub criteria: Vec<CriterionResult>,
    pub is_loading: bool,
    pub already_done: bool,
    pub can_act: bool,
    /// Display only, never used for gating.
    pub progress_percentage: f64,
    /// A wallet account was present when this was evaluated.
    pub connected: bool,
}

impl Eligibility {
    /// Record the account this was evaluated for. Without one nothing can
    /// be acted on, whatever the criteria say.
    pub fn with_account(mut self, account: Option<Address>) -> Self {
        self.connected = account.is_some();
        self.can_act &= self.connected;
        self
    }

    pub fn gate(&self) -> Gate {
        if self.already_done {
            Gate::AlreadyCompleted
        } else if !self.connected {
            Gate::NotConnected
        } else if self.is_loading {
            Gate::Loading
        } else if self.can_act {
            Gate::Ready
        } else if self.criteria.iter().any(|c| c.state == CriterionState::Disabled) {
            Gate::NotConnected
        } else {
            Gate::Ineligible
        }
    }

    pub fn met(&self) -> usize {
        self.criteria.iter().filter(|c| c.state.is_met()).count()
    }
}

/// Combine criteria with AND semantics.
///
/// `completed` is the "already done" flag, when the quest has one. An
/// unresolved completed flag blocks the action like an unresolved criterion.
pub fn aggregate(
    criteria: Vec<CriterionResult>,
    completed: Option<&CriterionState>,
    base_percentage: f64,
) -> Eligibility {
    let is_loading = criteria.iter().any(|c| c.state.is_loading())
        || completed.is_some_and(CriterionState::is_loading);
    let already_done = completed.is_some_and(CriterionState::is_met);
    let completed_clear = matches!(completed, None | Some(CriterionState::Ready(false)));
    let all_met = criteria.iter().all(|c| c.state.is_met());

    Eligibility {
        is_loading,
        already_done,
        can_act: all_met && completed_clear,
        progress_percentage: progress(&criteria, base_percentage),
        connected: true,
        criteria,
    }
}

fn progress(criteria: &[CriterionResult], base_percentage: f64) -> f64 {
    if criteria.is_empty() {
        return 100.0;
    }
    let met = criteria.iter().filter(|c| c.state.is_met()).count() as f64;
    let share = (100.0 - base_percentage) / criteria.len() as f64;
    base_percentage + share * met
}

/// Read every criterion (and the completed flag) through the cache.
///
/// Reads run concurrently; results keep configuration order. A failed read
/// degrades to `Failed`, counted as not met.
pub async fn evaluate(
    ctx: &QuestContext,
    criteria: &[CriterionConfig],
    completed: Option<&ReadCall>,
    base_percentage: f64,
) -> Eligibility {
    let account = ctx.account();

    let reads = criteria.iter().map(|c| async move {
        CriterionResult {
            name: c.name.clone(),
            state: fetch_state(ctx, &c.read, c.check, c.stale_time()).await,
        }
    });
    let completed_read = async {
        match completed {
            Some(read) => Some(fetch_state(ctx, read, Check::IsTrue, None).await),
            None => None,
        }
    };

    let (results, completed_state) = futures_util::join!(join_all(reads), completed_read);
    tracing::trace!(?account, criteria = results.len(), "eligibility evaluated");
    aggregate(results, completed_state.as_ref(), base_percentage).with_account(account)
}

/// Build eligibility from whatever the cache holds, without reading.
/// Missing snapshots count as loading; stale ones still count.
pub fn observe(
    ctx: &QuestContext,
    criteria: &[CriterionConfig],
    completed: Option<&ReadCall>,
    base_percentage: f64,
) -> Eligibility {
    let results = criteria
        .iter()
        .map(|c| CriterionResult {
            name: c.name.clone(),
            state: peek_state(ctx, &c.read, c.check),
        })
        .collect();
    let completed_state = completed.map(|read| peek_state(ctx, read, Check::IsTrue));
    aggregate(results, completed_state.as_ref(), base_percentage).with_account(ctx.account())
}

async fn fetch_state(
    ctx: &QuestContext,
    read: &ReadCall,
    check: Check,
    stale_time: Option<Duration>,
) -> CriterionState {
    let account = ctx.account();
    if read.method.needs_account() && account.is_none() {
        return CriterionState::Disabled;
    }
    match ctx.cache.fetch(ctx.reader.as_ref(), read, account, stale_time).await {
        Ok(fact) => CriterionState::from_fact(check, &fact),
        Err(e) => CriterionState::Failed(e.to_string()),
    }
}

fn peek_state(ctx: &QuestContext, read: &ReadCall, check: Check) -> CriterionState {
    let account = ctx.account();
    if read.method.needs_account() && account.is_none() {
        return CriterionState::Disabled;
    }
    match ctx.cache.peek(&QueryKey::for_read(read, account)) {
        SnapshotState::Missing => CriterionState::Loading,
        SnapshotState::Fresh(fact) | SnapshotState::Stale(fact) => CriterionState::from_fact(check, &fact),
        SnapshotState::Failed(e) => CriterionState::Failed(e),
    }
}
