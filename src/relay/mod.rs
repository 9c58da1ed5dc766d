//! Relay coordinator
//!
//! Turns source-chain `TransferInitiated` events into `relayTransfer` calls on
//! the destination chain, at most once per transfer id:
//!
//! 1. skip ids already in the [`ProcessedSet`]
//! 2. take the per-transfer lock, re-check
//! 3. resolve the destination token (missing mapping is permanent)
//! 4. ask the destination contract whether it already knows the id
//! 5. submit and wait for the receipt
//!
//! Successful relays enter the processed set and move the ledger record to
//! `CONFIRMED`. Failed relays never enter the processed set, so the next
//! emission of the event, or the retry queue, can try again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chain::RelayContract;
use crate::metrics;
use crate::processed::{BoundedPendingCache, ProcessedSet};
use crate::token_map::TokenMap;
use crate::transfer::{TransferStateMachine, TransitionError};
use crate::types::{ChainId, RelayRequest, TransferId, TransferInitiatedEvent, TransferStatus};
use crate::watchers::TransferEventHandler;

pub mod retry;

pub use retry::{classify_error, ErrorClass, RetryAction, RetryConfig};

const PERMANENT_FAILURE_CAPACITY: usize = 10_000;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no token mapping for {token} on chain {source_chain}")]
    UnknownToken { source_chain: ChainId, token: Address },

    #[error("no relay client configured for destination chain {0}")]
    UnsupportedDestination(ChainId),

    #[error("failed to read destination record for {transfer_id}: {reason}")]
    RecordCheck {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("relay of {transfer_id} failed: {reason}")]
    Submission {
        transfer_id: TransferId,
        reason: String,
    },
}

impl RelayError {
    /// Configuration errors that no retry can fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownToken { .. } | RelayError::UnsupportedDestination(_)
        )
    }

    fn reason(&self) -> String {
        match self {
            RelayError::RecordCheck { reason, .. } | RelayError::Submission { reason, .. } => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            RelayError::UnknownToken { .. } => "unknown_token",
            RelayError::UnsupportedDestination(_) => "unsupported_destination",
            RelayError::RecordCheck { .. } => "record_check_failed",
            RelayError::Submission { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// This process already relayed the transfer
    AlreadyProcessed,
    /// The destination contract already holds a record for the transfer
    AlreadyRelayed,
    /// Submitted and confirmed in this call
    Relayed { tx_hash: String },
}

impl RelayOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            RelayOutcome::AlreadyProcessed => "already_processed",
            RelayOutcome::AlreadyRelayed => "already_relayed",
            RelayOutcome::Relayed { .. } => "relayed",
        }
    }
}

/// A transient failure waiting for its backoff to elapse
#[derive(Debug, Clone)]
struct PendingRelay {
    event: TransferInitiatedEvent,
    source_chain: ChainId,
    attempts: u32,
    next_attempt: Instant,
    last_error: String,
}

/// A failure that needs operator action
#[derive(Debug, Clone, Serialize)]
pub struct PermanentFailure {
    pub transfer_id: TransferId,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub token: Address,
    pub reason: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Counters for the status endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub processed: usize,
    pub pending_retries: usize,
    pub permanent_failures: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RelayCoordinator {
    token_map: TokenMap,
    destinations: HashMap<ChainId, Arc<dyn RelayContract>>,
    state_machine: Option<TransferStateMachine>,
    retry_config: RetryConfig,
    processed: Mutex<ProcessedSet>,
    in_flight: Mutex<HashMap<TransferId, Arc<tokio::sync::Mutex<()>>>>,
    retries: Mutex<BoundedPendingCache<PendingRelay>>,
    permanent_failures: Mutex<BoundedPendingCache<PermanentFailure>>,
}

impl RelayCoordinator {
    pub fn new(
        token_map: TokenMap,
        destinations: HashMap<ChainId, Arc<dyn RelayContract>>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            token_map,
            destinations,
            state_machine: None,
            retry_config,
            processed: Mutex::new(ProcessedSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            retries: Mutex::new(BoundedPendingCache::default()),
            permanent_failures: Mutex::new(BoundedPendingCache::new(PERMANENT_FAILURE_CAPACITY)),
        }
    }

    /// Advance ledger records on successful relays
    pub fn with_state_machine(mut self, state_machine: TransferStateMachine) -> Self {
        self.state_machine = Some(state_machine);
        self
    }

    pub fn is_processed(&self, transfer_id: &TransferId) -> bool {
        lock(&self.processed).contains(transfer_id)
    }

    /// Relay one event observed on `source_chain`
    pub async fn handle(
        &self,
        event: &TransferInitiatedEvent,
        source_chain: ChainId,
    ) -> Result<RelayOutcome, RelayError> {
        let transfer_id = event.transfer_id;

        if self.is_processed(&transfer_id) {
            debug!(transfer_id = %transfer_id, "Transfer already processed, skipping");
            metrics::record_relay(event.destination_chain, "already_processed");
            return Ok(RelayOutcome::AlreadyProcessed);
        }

        let slot = self.acquire_slot(transfer_id);
        let result = {
            let _guard = slot.lock().await;
            self.handle_locked(event, source_chain).await
        };
        self.release_slot(&transfer_id, slot);

        self.record_outcome(event, source_chain, &result);
        result
    }

    async fn handle_locked(
        &self,
        event: &TransferInitiatedEvent,
        source_chain: ChainId,
    ) -> Result<RelayOutcome, RelayError> {
        let transfer_id = event.transfer_id;

        // Another task may have finished this transfer while we waited
        if self.is_processed(&transfer_id) {
            return Ok(RelayOutcome::AlreadyProcessed);
        }

        let destination_token = self
            .token_map
            .resolve(source_chain, &event.token)
            .ok_or(RelayError::UnknownToken {
                source_chain,
                token: event.token,
            })?;

        let destination = self
            .destinations
            .get(&event.destination_chain)
            .ok_or(RelayError::UnsupportedDestination(event.destination_chain))?;

        let existing = destination
            .get_transfer(&transfer_id)
            .await
            .map_err(|e| RelayError::RecordCheck {
                transfer_id,
                reason: format!("{:#}", e),
            })?;
        if existing.is_some() {
            info!(
                transfer_id = %transfer_id,
                destination_chain = event.destination_chain,
                "Transfer already relayed on destination chain"
            );
            self.mark_processed(transfer_id);
            return Ok(RelayOutcome::AlreadyRelayed);
        }

        let request = RelayRequest::from_event(event, destination_token, source_chain);
        info!(
            transfer_id = %transfer_id,
            source_chain,
            destination_chain = event.destination_chain,
            token = %destination_token,
            amount = %event.amount,
            recipient = %event.recipient,
            "Relaying transfer"
        );

        let started = Instant::now();
        let tx_hash = destination
            .relay(&request)
            .await
            .map_err(|e| RelayError::Submission {
                transfer_id,
                reason: format!("{:#}", e),
            })?;
        metrics::record_relay_latency(event.destination_chain, started.elapsed().as_secs_f64());

        self.mark_processed(transfer_id);
        info!(
            transfer_id = %transfer_id,
            destination_chain = event.destination_chain,
            tx_hash = %tx_hash,
            "Transfer relayed"
        );

        self.advance_ledger(&transfer_id, &tx_hash).await;

        Ok(RelayOutcome::Relayed { tx_hash })
    }

    fn mark_processed(&self, transfer_id: TransferId) {
        let mut processed = lock(&self.processed);
        processed.insert(transfer_id);
        metrics::PROCESSED_SET_SIZE.set(processed.len() as f64);
    }

    /// LOCKED -> CONFIRMED with the destination hash. The relay already
    /// happened on-chain, so ledger problems are only logged.
    async fn advance_ledger(&self, transfer_id: &TransferId, tx_hash: &str) {
        let Some(state_machine) = &self.state_machine else {
            return;
        };

        match state_machine
            .update_status(transfer_id, TransferStatus::Confirmed, Some(tx_hash))
            .await
        {
            Ok(_) => {}
            Err(TransitionError::NotFound(_)) => {
                debug!(transfer_id = %transfer_id, "No ledger record for relayed transfer");
            }
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "Failed to advance ledger after relay");
            }
        }
    }

    fn acquire_slot(&self, transfer_id: TransferId) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.in_flight)
            .entry(transfer_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_slot(&self, transfer_id: &TransferId, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = lock(&self.in_flight);
        let ours = in_flight
            .get(transfer_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        // Map entry plus our handle: nobody else is waiting
        if ours && Arc::strong_count(&slot) <= 2 {
            in_flight.remove(transfer_id);
        }
    }

    fn record_outcome(
        &self,
        event: &TransferInitiatedEvent,
        source_chain: ChainId,
        result: &Result<RelayOutcome, RelayError>,
    ) {
        let transfer_id = event.transfer_id;
        match result {
            Ok(outcome) => {
                metrics::record_relay(event.destination_chain, outcome.metric_label());
                lock(&self.retries).remove(&transfer_id);
            }
            Err(e) if e.is_permanent() => {
                metrics::record_relay(event.destination_chain, e.metric_label());
                error!(transfer_id = %transfer_id, error = %e, "Permanent relay failure, operator action required");
                lock(&self.retries).remove(&transfer_id);
                lock(&self.permanent_failures).insert(
                    transfer_id,
                    PermanentFailure {
                        transfer_id,
                        source_chain,
                        destination_chain: event.destination_chain,
                        token: event.token,
                        reason: e.to_string(),
                        recorded_at: chrono::Utc::now(),
                    },
                );
            }
            Err(e) => {
                metrics::record_relay(event.destination_chain, e.metric_label());
                self.schedule_retry(event, source_chain, e);
            }
        }
        metrics::RETRY_QUEUE_SIZE.set(lock(&self.retries).len() as f64);
    }

    fn schedule_retry(&self, event: &TransferInitiatedEvent, source_chain: ChainId, err: &RelayError) {
        let transfer_id = event.transfer_id;
        let reason = err.reason();
        let mut retries = lock(&self.retries);
        let attempts = retries.get(&transfer_id).map_or(0, |p| p.attempts) + 1;

        match self.retry_config.next_action(attempts, &reason) {
            RetryAction::RetryAfter(backoff) => {
                warn!(
                    transfer_id = %transfer_id,
                    attempts,
                    ?backoff,
                    error = %err,
                    "Relay failed, scheduling retry"
                );
                retries.insert(
                    transfer_id,
                    PendingRelay {
                        event: event.clone(),
                        source_chain,
                        attempts,
                        next_attempt: Instant::now() + backoff,
                        last_error: reason,
                    },
                );
            }
            RetryAction::Abandon => {
                error!(
                    transfer_id = %transfer_id,
                    attempts,
                    error = %err,
                    "Relay failed, giving up automatic retries"
                );
                retries.remove(&transfer_id);
            }
        }
    }

    /// Re-drive queued relays whose backoff has elapsed. Returns how many were attempted.
    pub async fn retry_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(TransferInitiatedEvent, ChainId, u32, String)> = lock(&self.retries)
            .iter()
            .filter(|(_, pending)| pending.next_attempt <= now)
            .map(|(_, pending)| {
                (
                    pending.event.clone(),
                    pending.source_chain,
                    pending.attempts,
                    pending.last_error.clone(),
                )
            })
            .collect();

        for (event, source_chain, attempts, last_error) in &due {
            debug!(
                transfer_id = %event.transfer_id,
                attempts,
                last_error = %last_error,
                "Retrying relay"
            );
            if let Err(e) = self.handle(event, *source_chain).await {
                debug!(transfer_id = %event.transfer_id, error = %e, "Retry attempt failed");
            }
        }
        due.len()
    }

    /// Forget processed ids older than `max_age`
    pub fn prune_processed(&self, max_age: Duration) -> usize {
        let mut processed = lock(&self.processed);
        let removed = processed.prune(max_age);
        metrics::PROCESSED_SET_SIZE.set(processed.len() as f64);
        if removed > 0 {
            info!(removed, remaining = processed.len(), "Pruned processed transfer ids");
        }
        removed
    }

    pub fn permanent_failures(&self) -> Vec<PermanentFailure> {
        let mut failures: Vec<PermanentFailure> = lock(&self.permanent_failures)
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        failures.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        failures
    }

    pub fn pending_retries(&self) -> usize {
        lock(&self.retries).len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            processed: lock(&self.processed).len(),
            pending_retries: lock(&self.retries).len(),
            permanent_failures: lock(&self.permanent_failures).len(),
        }
    }
}

#[async_trait]
impl TransferEventHandler for RelayCoordinator {
    async fn handle_event(
        &self,
        event: &TransferInitiatedEvent,
        source_chain: ChainId,
    ) -> eyre::Result<()> {
        self.handle(event, source_chain).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_map::{BASE_MAINNET, BASE_USDC, ETHEREUM_MAINNET, ETHEREUM_USDC};
    use crate::types::OnChainTransfer;
    use alloy::primitives::{B256, U256};
    use eyre::eyre;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Destination contract double: records submissions, optionally fails them
    #[derive(Default)]
    struct MockDestination {
        relayed: Mutex<HashMap<TransferId, RelayRequest>>,
        submissions: AtomicUsize,
        failures_left: AtomicUsize,
        failure_message: Mutex<String>,
        delay: Option<Duration>,
    }

    impl MockDestination {
        fn failing(times: usize, message: &str) -> Self {
            let mock = Self::default();
            mock.failures_left.store(times, Ordering::SeqCst);
            *lock(&mock.failure_message) = message.to_string();
            mock
        }

        fn submissions(&self) -> usize {
            self.submissions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelayContract for MockDestination {
        async fn get_transfer(&self, transfer_id: &TransferId) -> eyre::Result<Option<OnChainTransfer>> {
            Ok(lock(&self.relayed).get(transfer_id).map(|r| OnChainTransfer {
                id: r.transfer_id,
                user: r.user,
                token: r.token,
                amount: r.amount,
                source_chain: U256::from(r.source_chain),
                status: 1,
                tx_hash: r.source_tx_hash.to_string(),
            }))
        }

        async fn relay(&self, request: &RelayRequest) -> eyre::Result<String> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(eyre!("{}", lock(&self.failure_message)));
            }
            lock(&self.relayed).insert(request.transfer_id, request.clone());
            Ok(format!("0x{}", "ff".repeat(32)))
        }
    }

    fn event(id: u8, token: Address) -> TransferInitiatedEvent {
        TransferInitiatedEvent {
            transfer_id: B256::repeat_byte(id),
            user: Address::repeat_byte(0x11),
            token,
            amount: U256::from(1_500_000u64),
            fee: U256::from(15_000u64),
            source_chain: ETHEREUM_MAINNET,
            destination_chain: BASE_MAINNET,
            recipient: Address::repeat_byte(0x22),
            source_tx_hash: B256::repeat_byte(0xee),
            block_number: 100,
        }
    }

    fn coordinator(destination: Arc<MockDestination>) -> RelayCoordinator {
        let mut destinations: HashMap<ChainId, Arc<dyn RelayContract>> = HashMap::new();
        destinations.insert(BASE_MAINNET, destination);
        RelayCoordinator::new(
            TokenMap::mainnet_defaults(),
            destinations,
            RetryConfig {
                initial_backoff: Duration::ZERO,
                ..RetryConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_relay_once_then_noop() {
        let destination = Arc::new(MockDestination::default());
        let coordinator = coordinator(destination.clone());
        let event = event(1, ETHEREUM_USDC);

        let first = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap();
        assert!(matches!(first, RelayOutcome::Relayed { .. }));
        let second = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap();
        assert_eq!(second, RelayOutcome::AlreadyProcessed);

        assert_eq!(destination.submissions(), 1);
        let request = lock(&destination.relayed).get(&event.transfer_id).cloned().unwrap();
        assert_eq!(request.token, BASE_USDC);
        assert_eq!(request.source_chain, ETHEREUM_MAINNET);
        assert_eq!(request.source_tx_hash, event.source_tx_hash);
    }

    #[tokio::test]
    async fn test_already_relayed_on_chain_is_not_resubmitted() {
        let destination = Arc::new(MockDestination::default());
        let event = event(2, ETHEREUM_USDC);
        lock(&destination.relayed).insert(
            event.transfer_id,
            RelayRequest::from_event(&event, BASE_USDC, ETHEREUM_MAINNET),
        );

        // Fresh process: nothing in the processed set yet
        let coordinator = coordinator(destination.clone());
        let outcome = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap();
        assert_eq!(outcome, RelayOutcome::AlreadyRelayed);
        assert_eq!(destination.submissions(), 0);
        assert!(coordinator.is_processed(&event.transfer_id));
    }

    #[tokio::test]
    async fn test_unknown_token_is_permanent_and_not_processed() {
        let destination = Arc::new(MockDestination::default());
        let coordinator = coordinator(destination.clone());
        let event = event(3, Address::repeat_byte(0x99));

        let err = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownToken { .. }));
        assert!(err.is_permanent());
        assert_eq!(destination.submissions(), 0);
        assert!(!coordinator.is_processed(&event.transfer_id));
        assert_eq!(coordinator.pending_retries(), 0);
        assert_eq!(coordinator.permanent_failures().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_destination_is_permanent() {
        let destination = Arc::new(MockDestination::default());
        let coordinator = coordinator(destination.clone());
        let mut event = event(4, ETHEREUM_USDC);
        event.destination_chain = 10;

        let err = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedDestination(10)));
        assert_eq!(coordinator.stats().permanent_failures, 1);
    }

    #[tokio::test]
    async fn test_failed_submission_is_retryable() {
        let destination = Arc::new(MockDestination::failing(1, "connection reset"));
        let coordinator = coordinator(destination.clone());
        let event = event(5, ETHEREUM_USDC);

        let err = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap_err();
        assert!(matches!(err, RelayError::Submission { .. }));
        assert!(!coordinator.is_processed(&event.transfer_id));
        assert_eq!(coordinator.pending_retries(), 1);

        // Zero backoff: due immediately
        assert_eq!(coordinator.retry_due().await, 1);
        assert!(coordinator.is_processed(&event.transfer_id));
        assert_eq!(coordinator.pending_retries(), 0);
        assert_eq!(destination.submissions(), 2);
    }

    #[tokio::test]
    async fn test_reverted_submission_is_not_queued() {
        let destination = Arc::new(MockDestination::failing(1, "Transaction 0xabc reverted"));
        let coordinator = coordinator(destination.clone());
        let event = event(6, ETHEREUM_USDC);

        assert!(coordinator.handle(&event, ETHEREUM_MAINNET).await.is_err());
        assert_eq!(coordinator.pending_retries(), 0);
        assert!(!coordinator.is_processed(&event.transfer_id));

        // A later emission of the same event can still succeed
        let outcome = coordinator.handle(&event, ETHEREUM_MAINNET).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { .. }));
    }

    #[tokio::test]
    async fn test_retries_stop_after_max() {
        let destination = Arc::new(MockDestination::failing(100, "timeout"));
        let coordinator = coordinator(destination.clone());
        let event = event(7, ETHEREUM_USDC);

        let _ = coordinator.handle(&event, ETHEREUM_MAINNET).await;
        let mut rounds = 0;
        while coordinator.pending_retries() > 0 && rounds < 20 {
            coordinator.retry_due().await;
            rounds += 1;
        }
        assert_eq!(coordinator.pending_retries(), 0);
        // First attempt plus max_retries - 1 automatic retries
        assert_eq!(destination.submissions(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_handles_submit_once() {
        let destination = Arc::new(MockDestination {
            delay: Some(Duration::from_millis(50)),
            ..MockDestination::default()
        });
        let coordinator = Arc::new(coordinator(destination.clone()));
        let event = event(8, ETHEREUM_USDC);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let event = event.clone();
                tokio::spawn(async move { coordinator.handle(&event, ETHEREUM_MAINNET).await })
            })
            .collect();
        let outcomes = futures::future::join_all(handles).await;

        let relayed = outcomes
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|o| matches!(o, RelayOutcome::Relayed { .. }))
            .count();
        assert_eq!(relayed, 1);
        assert_eq!(destination.submissions(), 1);
        assert!(lock(&coordinator.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_prune_processed() {
        let destination = Arc::new(MockDestination::default());
        let coordinator = coordinator(destination);
        coordinator
            .handle(&event(9, ETHEREUM_USDC), ETHEREUM_MAINNET)
            .await
            .unwrap();
        assert_eq!(coordinator.prune_processed(Duration::from_secs(3600)), 0);
        assert_eq!(coordinator.prune_processed(Duration::ZERO), 1);
        assert!(!coordinator.is_processed(&B256::repeat_byte(9)));
    }
}
