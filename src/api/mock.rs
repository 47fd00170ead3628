//! In-memory collaborators for unit tests.

use alloy_primitives::{Address, TxHash, B256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::contract::{ContractReader, Fact, ReadCall, Receipt, WalletSession, WriteCall};
use crate::error::{QuestError, Result};

/// Reader answering from a table keyed by `(contract, method)`.
#[derive(Default)]
pub struct MockReader {
    answers: Mutex<HashMap<(Address, String), Result<Fact>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set(&self, call: &ReadCall, answer: Result<Fact>) {
        self.answers
            .lock()
            .unwrap()
            .insert((call.contract, call.method.to_string()), answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractReader for MockReader {
    async fn read(&self, call: &ReadCall, _account: Option<Address>) -> Result<Fact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .lock()
            .unwrap()
            .get(&(call.contract, call.method.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(QuestError::rpc("execution reverted")))
    }
}

/// Session with scripted submit and confirmation outcomes.
pub struct MockSession {
    account: Option<Address>,
    submit_result: Mutex<Result<TxHash>>,
    receipt_success: Mutex<Result<bool>>,
    confirm_delay: Duration,
    submits: AtomicUsize,
    waits: AtomicUsize,
}

impl MockSession {
    pub fn connected() -> Self {
        Self {
            account: Some(Address::repeat_byte(0xaa)),
            submit_result: Mutex::new(Ok(B256::repeat_byte(0x11))),
            receipt_success: Mutex::new(Ok(true)),
            confirm_delay: Duration::from_secs(2),
            submits: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            account: None,
            ..Self::connected()
        }
    }

    pub fn fail_submit(self, err: QuestError) -> Self {
        *self.submit_result.lock().unwrap() = Err(err);
        self
    }

    pub fn fail_confirmation(self, err: QuestError) -> Self {
        *self.receipt_success.lock().unwrap() = Err(err);
        self
    }

    pub fn revert(self) -> Self {
        *self.receipt_success.lock().unwrap() = Ok(false);
        self
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSession for MockSession {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn submit(&self, _call: &WriteCall) -> Result<TxHash> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submit_result.lock().unwrap().clone()
    }

    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<Receipt> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.confirm_delay).await;
        let success = self.receipt_success.lock().unwrap().clone()?;
        Ok(Receipt {
            tx_hash,
            block_number: Some(1),
            success,
        })
    }
}
