use alloy_primitives::TxHash;
use serde::Deserialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::eligibility::Eligibility;
use super::QuestContext;
use crate::api::{ReadCall, WriteCall};
use crate::error::QuestError;
use crate::events::Event;
use crate::state::QueryKey;

/// Lifecycle of one user-triggered write.
///
/// `Idle → Pending → {Success, Error}`, `Error → Idle` after the display
/// window, `Success → Idle` only through [`ActionDispatcher::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Idle,
    Pending,
    Success { tx_hash: TxHash },
    Error { message: String },
}

impl ActionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Why `submit` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotConnected,
    Ineligible,
    AlreadyCompleted,
    /// A request is pending.
    InFlight,
    /// The last error is still on display.
    ShowingError,
}

#[derive(Debug)]
pub enum Submission {
    /// The write is running; the handle resolves when the status settles.
    Started(JoinHandle<()>),
    Skipped(Skip),
}

impl Submission {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// How long an error stays visible before returning to idle.
    pub error_display_secs: u64,
    /// Error messages are cut to this many characters.
    pub max_error_len: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            error_display_secs: 5,
            max_error_len: 50,
        }
    }
}

impl DispatchSettings {
    pub fn error_display(&self) -> Duration {
        Duration::from_secs(self.error_display_secs)
    }
}

/// Cut a message to at most `max` characters, on a char boundary.
pub fn truncate_message(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}

/// Owns the status of one action and is its only writer.
///
/// At most one write is in flight per dispatcher. The spawned task holds a
/// weak reference to the status, so once the dispatcher is dropped the
/// write still completes and invalidates the cache but publishes nothing.
pub struct ActionDispatcher {
    quest: String,
    call: WriteCall,
    affects: Vec<ReadCall>,
    ctx: QuestContext,
    settings: DispatchSettings,
    status: Arc<watch::Sender<ActionStatus>>,
}

impl ActionDispatcher {
    pub fn new(
        quest: impl Into<String>,
        call: WriteCall,
        affects: Vec<ReadCall>,
        ctx: QuestContext,
        settings: DispatchSettings,
    ) -> Self {
        let (tx, _rx) = watch::channel(ActionStatus::Idle);
        Self {
            quest: quest.into(),
            call,
            affects,
            ctx,
            settings,
            status: Arc::new(tx),
        }
    }

    pub fn status(&self) -> ActionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionStatus> {
        self.status.subscribe()
    }

    /// Keys invalidated after a confirmed write, for the given account.
    pub fn affected_keys(&self, account: Option<alloy_primitives::Address>) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .affects
            .iter()
            .map(|read| QueryKey::for_read(read, account))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Start the write if allowed. Moves `Idle → Pending` before returning.
    pub fn submit(&self, eligibility: &Eligibility) -> Submission {
        let Some(account) = self.ctx.account() else {
            return self.skip(Skip::NotConnected);
        };
        if eligibility.already_done {
            return self.skip(Skip::AlreadyCompleted);
        }
        if !eligibility.can_act {
            return self.skip(Skip::Ineligible);
        }

        let mut refused = None;
        self.status.send_if_modified(|status| match status {
            ActionStatus::Idle => {
                *status = ActionStatus::Pending;
                true
            }
            ActionStatus::Pending => {
                refused = Some(Skip::InFlight);
                false
            }
            ActionStatus::Success { .. } => {
                refused = Some(Skip::AlreadyCompleted);
                false
            }
            ActionStatus::Error { .. } => {
                refused = Some(Skip::ShowingError);
                false
            }
        });
        if let Some(reason) = refused {
            return self.skip(reason);
        }

        info!(quest = %self.quest, call = %self.call.method, "submitting");
        emit(&self.ctx, &self.quest, ActionStatus::Pending);

        let job = Job {
            quest: self.quest.clone(),
            call: self.call.clone(),
            keys: self.affected_keys(Some(account)),
            ctx: self.ctx.clone(),
            settings: self.settings,
            status: Arc::downgrade(&self.status),
        };
        Submission::Started(tokio::spawn(job.run()))
    }

    /// `Success → Idle`, for a widget that is shown again.
    pub fn reset(&self) -> bool {
        self.status.send_if_modified(|status| {
            if matches!(status, ActionStatus::Success { .. }) {
                *status = ActionStatus::Idle;
                true
            } else {
                false
            }
        })
    }

    fn skip(&self, reason: Skip) -> Submission {
        debug!(quest = %self.quest, ?reason, "submit skipped");
        Submission::Skipped(reason)
    }
}

fn publish(ctx: &QuestContext, quest: &str, status: &watch::Sender<ActionStatus>, next: ActionStatus) {
    status.send_replace(next.clone());
    emit(ctx, quest, next);
}

fn emit(ctx: &QuestContext, quest: &str, status: ActionStatus) {
    if let Some(tx) = &ctx.events {
        let _ = tx.try_send(Event::ActionStatus {
            quest: quest.to_string(),
            status,
        });
    }
}

/// One in-flight write.
struct Job {
    quest: String,
    call: WriteCall,
    keys: Vec<QueryKey>,
    ctx: QuestContext,
    settings: DispatchSettings,
    status: Weak<watch::Sender<ActionStatus>>,
}

impl Job {
    async fn run(self) {
        match self.execute().await {
            Ok(tx_hash) => {
                // Only after confirmation.
                let cached = self.ctx.cache.invalidate_all(&self.keys);
                info!(quest = %self.quest, %tx_hash, invalidated = cached, "action confirmed");
                self.set(ActionStatus::Success { tx_hash });
            }
            Err(e) => {
                let message = truncate_message(&e.to_string(), self.settings.max_error_len);
                warn!(quest = %self.quest, error = %e, "action failed");
                self.set(ActionStatus::Error { message });

                tokio::time::sleep(self.settings.error_display()).await;
                if let Some(status) = self.status.upgrade() {
                    let cleared = status.send_if_modified(|s| {
                        if matches!(s, ActionStatus::Error { .. }) {
                            *s = ActionStatus::Idle;
                            true
                        } else {
                            false
                        }
                    });
                    if cleared {
                        emit(&self.ctx, &self.quest, ActionStatus::Idle);
                    }
                }
            }
        }
    }

    async fn execute(&self) -> Result<TxHash, QuestError> {
        let tx_hash = self.ctx.session.submit(&self.call).await?;
        let receipt = self.ctx.session.wait_for_confirmation(tx_hash).await?;
        if !receipt.success {
            return Err(QuestError::Reverted { tx_hash });
        }
        Ok(tx_hash)
    }

    fn set(&self, next: ActionStatus) {
        match self.status.upgrade() {
            Some(status) => publish(&self.ctx, &self.quest, &status, next),
            None => debug!(quest = %self.quest, ?next, "dispatcher gone; status dropped"),
        }
    }
}
