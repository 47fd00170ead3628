mod countdown;
mod dispatcher;
mod eligibility;
mod inventory;

pub use countdown::{remaining_secs, Breakdown, Clock, CountdownHandle, MonotonicClock, SystemClock, TICK_PERIOD};
pub use dispatcher::{truncate_message, ActionDispatcher, ActionStatus, DispatchSettings, Skip, Submission};
pub use eligibility::{
    aggregate, evaluate, observe, Check, CriterionConfig, CriterionResult, CriterionState, Eligibility, Gate,
};
pub use inventory::{load_inventory, OwnedToken};

use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ContractReader, ReadCall, WalletSession, WriteCall};
use crate::events::Event;
use crate::state::{to_decimal, QueryCache, QueryKey};

/// Collaborators every quest needs, passed explicitly.
#[derive(Clone)]
pub struct QuestContext {
    pub session: Arc<dyn WalletSession>,
    pub reader: Arc<dyn ContractReader>,
    pub cache: Arc<QueryCache>,
    pub clock: Arc<dyn Clock>,
    pub events: Option<mpsc::Sender<Event>>,
}

impl QuestContext {
    pub fn new(
        session: Arc<dyn WalletSession>,
        reader: Arc<dyn ContractReader>,
        cache: Arc<QueryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            reader,
            cache,
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn account(&self) -> Option<Address> {
        self.session.account()
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// Where a quest's reward amount comes from.
///
/// `Fixed` skips a read per render at the cost of trusting the config;
/// `Remote` reads the contract through the cache.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RewardSource {
    #[default]
    None,
    Fixed {
        amount: Decimal,
    },
    Remote {
        read: ReadCall,
        #[serde(default = "default_decimals")]
        decimals: u32,
    },
}

fn default_decimals() -> u32 {
    18
}

/// One quest: criteria, the write that completes it, what that write touches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuestConfig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub criteria: Vec<CriterionConfig>,
    /// "Already done" flag, e.g. `hasClaimed`.
    pub completed: Option<ReadCall>,
    /// Cooldown or unlock timestamp.
    pub deadline: Option<ReadCall>,
    pub action: WriteCall,
    /// Reads shown elsewhere (balances, counters) that the action changes.
    #[serde(default)]
    pub affects: Vec<ReadCall>,
    #[serde(default)]
    pub reward: RewardSource,
}

impl QuestConfig {
    /// Every read a successful action makes stale.
    pub fn affected_reads(&self) -> Vec<ReadCall> {
        let mut reads: Vec<ReadCall> = Vec::new();
        let all = self
            .criteria
            .iter()
            .map(|c| &c.read)
            .chain(self.completed.iter())
            .chain(self.deadline.iter())
            .chain(self.affects.iter());
        for read in all {
            if !reads.contains(read) {
                reads.push(read.clone());
            }
        }
        reads
    }
}

/// Settings shared by all quests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuestSettings {
    pub base_percentage: f64,
    pub dispatch: DispatchSettings,
}

impl Default for QuestSettings {
    fn default() -> Self {
        Self {
            base_percentage: 10.0,
            dispatch: DispatchSettings::default(),
        }
    }
}

/// A configured quest bound to its collaborators.
pub struct Quest {
    config: QuestConfig,
    ctx: QuestContext,
    settings: QuestSettings,
    dispatcher: ActionDispatcher,
}

impl Quest {
    pub fn new(config: QuestConfig, ctx: QuestContext, settings: QuestSettings) -> Self {
        let dispatcher = ActionDispatcher::new(
            config.id.clone(),
            config.action.clone(),
            config.affected_reads(),
            ctx.clone(),
            settings.dispatch,
        );
        Self {
            config,
            ctx,
            settings,
            dispatcher,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &QuestConfig {
        &self.config
    }

    /// Read all criteria through the cache.
    pub async fn eligibility(&self) -> Eligibility {
        evaluate(
            &self.ctx,
            &self.config.criteria,
            self.config.completed.as_ref(),
            self.settings.base_percentage,
        )
        .await
    }

    /// Eligibility from cached values only.
    pub fn observe(&self) -> Eligibility {
        observe(
            &self.ctx,
            &self.config.criteria,
            self.config.completed.as_ref(),
            self.settings.base_percentage,
        )
    }

    /// Current deadline, or None when the quest has none, it can't be read,
    /// or it needs an account and none is connected.
    pub async fn deadline(&self) -> Option<i64> {
        let read = self.config.deadline.as_ref()?;
        match self
            .ctx
            .cache
            .fetch(self.ctx.reader.as_ref(), read, self.ctx.account(), None)
            .await
        {
            Ok(fact) => fact.as_uint().map(|v| {
                u64::try_from(v)
                    .ok()
                    .and_then(|secs| i64::try_from(secs).ok())
                    .unwrap_or(i64::MAX)
            }),
            Err(e) => {
                debug!(quest = %self.config.id, error = %e, "deadline unavailable");
                None
            }
        }
    }

    /// Start a countdown to the current deadline.
    ///
    /// On expiry the completed and deadline snapshots are invalidated so the
    /// next read picks up the new state. Ticks are forwarded as events while
    /// the handle lives.
    pub async fn countdown(&self) -> CountdownHandle {
        let deadline = self.deadline().await;
        let account = self.ctx.account();
        let keys: Vec<QueryKey> = self
            .config
            .completed
            .iter()
            .chain(self.config.deadline.iter())
            .map(|read| QueryKey::for_read(read, account))
            .collect();

        let ctx = self.ctx.clone();
        let quest = self.config.id.clone();
        let handle = CountdownHandle::start(deadline, self.ctx.clock.clone(), move || {
            ctx.cache.invalidate_all(&keys);
            ctx.emit(Event::CountdownExpired { quest: quest.clone() });
        });

        if handle.is_running() && self.ctx.events.is_some() {
            let mut rx = handle.subscribe();
            let ctx = self.ctx.clone();
            let quest = self.config.id.clone();
            // Ends once the handle and its tick task are gone.
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let remaining = *rx.borrow_and_update();
                    ctx.emit(Event::CountdownTick {
                        quest: quest.clone(),
                        remaining,
                    });
                }
            });
        }
        handle
    }

    /// Reward amount in whole tokens, per the configured source.
    pub async fn reward(&self) -> Option<Decimal> {
        match &self.config.reward {
            RewardSource::None => None,
            RewardSource::Fixed { amount } => Some(*amount),
            RewardSource::Remote { read, decimals } => {
                match self
                    .ctx
                    .cache
                    .fetch(self.ctx.reader.as_ref(), read, self.ctx.account(), None)
                    .await
                {
                    Ok(fact) => fact.as_uint().and_then(|raw| to_decimal(raw, *decimals)),
                    Err(e) => {
                        warn!(quest = %self.config.id, error = %e, "reward read failed");
                        None
                    }
                }
            }
        }
    }

    /// Submit against an eligibility the caller already holds.
    pub fn submit(&self, eligibility: &Eligibility) -> Submission {
        self.dispatcher.submit(eligibility)
    }

    /// Re-evaluate, then submit.
    pub async fn claim(&self) -> Submission {
        let eligibility = self.eligibility().await;
        self.submit(&eligibility)
    }

    pub fn status(&self) -> ActionStatus {
        self.dispatcher.status()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<ActionStatus> {
        self.dispatcher.subscribe()
    }

    pub fn reset(&self) -> bool {
        self.dispatcher.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockReader, MockSession};
    use crate::api::{Fact, ReadMethod, WriteMethod};
    use crate::state::SnapshotState;
    use alloy_primitives::U256;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn quest_contract() -> Address {
        Address::repeat_byte(0x03)
    }

    fn nft_read() -> ReadCall {
        ReadCall::new(Address::repeat_byte(0x01), ReadMethod::BalanceOf)
    }

    fn claimed_read() -> ReadCall {
        ReadCall::new(quest_contract(), ReadMethod::HasClaimed)
    }

    fn next_claim_read() -> ReadCall {
        ReadCall::new(quest_contract(), ReadMethod::NextClaimAt)
    }

    fn token_balance_read() -> ReadCall {
        ReadCall::new(Address::repeat_byte(0x09), ReadMethod::BalanceOf)
    }

    fn gm_config() -> QuestConfig {
        QuestConfig {
            id: "gm".to_string(),
            title: "Daily GM".to_string(),
            criteria: vec![CriterionConfig::new("hasNFT", nft_read(), Check::AtLeast(1))],
            completed: Some(claimed_read()),
            deadline: Some(next_claim_read()),
            action: WriteCall::new(quest_contract(), WriteMethod::Claim),
            affects: vec![token_balance_read(), nft_read()],
            reward: RewardSource::Fixed { amount: dec!(25) },
        }
    }

    fn setup(reader: MockReader) -> (Arc<MockReader>, QuestContext, mpsc::Receiver<Event>) {
        let reader = Arc::new(reader);
        let (tx, rx) = mpsc::channel(64);
        let ctx = QuestContext::new(
            Arc::new(MockSession::connected()),
            reader.clone(),
            Arc::new(QueryCache::new(Duration::from_secs(600))),
            Arc::new(MonotonicClock::starting_at(T0)),
        )
        .with_events(tx);
        (reader, ctx, rx)
    }

    #[test]
    fn test_affected_reads_dedupes_in_order() {
        let reads = gm_config().affected_reads();
        assert_eq!(
            reads,
            vec![nft_read(), claimed_read(), next_claim_read(), token_balance_read()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_flow() {
        let reader = MockReader::new();
        reader.set(&nft_read(), Ok(Fact::Uint(U256::from(1))));
        reader.set(&claimed_read(), Ok(Fact::Bool(false)));
        let (reader, ctx, _rx) = setup(reader);
        let quest = Quest::new(gm_config(), ctx.clone(), QuestSettings::default());

        let Submission::Started(handle) = quest.claim().await else {
            panic!("Expected Started");
        };
        handle.await.unwrap();
        assert!(matches!(quest.status(), ActionStatus::Success { .. }));

        // Chain state flipped; the invalidated flag is re-read.
        reader.set(&claimed_read(), Ok(Fact::Bool(true)));
        let e = quest.eligibility().await;
        assert_eq!(e.gate(), Gate::AlreadyCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_claims_send_one_write() {
        let reader = Arc::new(MockReader::with_delay(Duration::from_millis(300)));
        reader.set(&nft_read(), Ok(Fact::Uint(U256::from(1))));
        reader.set(&claimed_read(), Ok(Fact::Bool(false)));
        let session = Arc::new(MockSession::connected());
        let ctx = QuestContext::new(
            session.clone(),
            reader.clone(),
            Arc::new(QueryCache::new(Duration::from_secs(600))),
            Arc::new(MonotonicClock::starting_at(T0)),
        );
        let quest = Quest::new(gm_config(), ctx, QuestSettings::default());

        // Both evaluations are still waiting on reads when the other starts
        let (a, b) = tokio::join!(quest.claim(), quest.claim());

        let mut started = Vec::new();
        let mut skipped = Vec::new();
        for submission in [a, b] {
            match submission {
                Submission::Started(handle) => started.push(handle),
                Submission::Skipped(reason) => skipped.push(reason),
            }
        }
        assert_eq!(started.len(), 1);
        assert_eq!(skipped, vec![Skip::InFlight]);

        for handle in started {
            handle.await.unwrap();
        }
        assert_eq!(session.submits(), 1);
        assert!(matches!(quest.status(), ActionStatus::Success { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_snapshot_invalidated_for_other_quest() {
        let reader = MockReader::new();
        reader.set(&nft_read(), Ok(Fact::Uint(U256::from(1))));
        reader.set(&claimed_read(), Ok(Fact::Bool(false)));
        reader.set(&token_balance_read(), Ok(Fact::Uint(U256::from(100))));
        let (_reader, ctx, _rx) = setup(reader);

        // A second widget showing the same balance
        let account = ctx.account();
        ctx.cache
            .fetch(ctx.reader.as_ref(), &token_balance_read(), account, None)
            .await
            .unwrap();

        let quest = Quest::new(gm_config(), ctx.clone(), QuestSettings::default());
        let Submission::Started(handle) = quest.claim().await else {
            panic!("Expected Started");
        };
        handle.await.unwrap();

        let key = QueryKey::for_read(&token_balance_read(), account);
        assert!(matches!(ctx.cache.peek(&key), SnapshotState::Stale(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expiry_refreshes_state() {
        let reader = MockReader::new();
        reader.set(&next_claim_read(), Ok(Fact::Uint(U256::from(T0 + 2))));
        reader.set(&claimed_read(), Ok(Fact::Bool(true)));
        let (reader, ctx, mut rx) = setup(reader);
        let quest = Quest::new(gm_config(), ctx.clone(), QuestSettings::default());
        quest.eligibility().await;
        let reads_before = reader.calls();

        let handle = quest.countdown().await;
        assert_eq!(handle.remaining(), 2);

        let mut ticks = Vec::new();
        loop {
            match rx.recv().await {
                Some(Event::CountdownTick { remaining, .. }) => ticks.push(remaining),
                Some(Event::CountdownExpired { quest }) => {
                    assert_eq!(quest, "gm");
                    break;
                }
                Some(_) => {}
                None => panic!("channel closed"),
            }
        }
        assert!(ticks.contains(&1));

        let account = ctx.account();
        let claimed_key = QueryKey::for_read(&claimed_read(), account);
        assert!(matches!(ctx.cache.peek(&claimed_key), SnapshotState::Stale(_)));

        reader.set(&claimed_read(), Ok(Fact::Bool(false)));
        let e = quest.eligibility().await;
        assert!(!e.already_done);
        assert!(reader.calls() > reads_before);
    }

    #[tokio::test]
    async fn test_deadline_absent_without_config() {
        let (_reader, ctx, _rx) = setup(MockReader::new());
        let mut config = gm_config();
        config.deadline = None;
        let quest = Quest::new(config, ctx, QuestSettings::default());

        assert_eq!(quest.deadline().await, None);
        let handle = quest.countdown().await;
        assert_eq!(handle.remaining(), 0);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_reward_sources() {
        let reward_read = ReadCall::new(quest_contract(), ReadMethod::RewardAmount);
        let reader = MockReader::new();
        reader.set(
            &reward_read,
            Ok(Fact::Uint(U256::from(15) * U256::from(10).pow(U256::from(17)))),
        );
        let (_reader, ctx, _rx) = setup(reader);

        let fixed = Quest::new(gm_config(), ctx.clone(), QuestSettings::default());
        assert_eq!(fixed.reward().await, Some(dec!(25)));

        let mut config = gm_config();
        config.reward = RewardSource::Remote {
            read: reward_read,
            decimals: 18,
        };
        let remote = Quest::new(config, ctx.clone(), QuestSettings::default());
        assert_eq!(remote.reward().await, Some(dec!(1.5)));

        let mut config = gm_config();
        config.reward = RewardSource::None;
        let none = Quest::new(config, ctx, QuestSettings::default());
        assert_eq!(none.reward().await, None);
    }
}
