//! Per-chain polling watcher
//!
//! The cursor is the last block whose events were all handed to the handler.
//! Each tick scans `(cursor, height]` in chunks of at most `max_block_range`
//! blocks and advances the cursor chunk by chunk. A failed fetch leaves the
//! cursor in place and pins the next tick to the same target, so the failed
//! range is retried exactly before anything newer is scanned.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{CursorBoard, TransferEventHandler};
use crate::chain::TransferEventSource;
use crate::metrics;
use crate::types::{ChainId, TransferInitiatedEvent};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Largest block span requested from the RPC node at once
    pub max_block_range: u64,
    /// First block to scan. `None` starts `start_lag` blocks below the head.
    pub start_block: Option<u64>,
    pub start_lag: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(30_000),
            max_block_range: 2_000,
            start_block: None,
            start_lag: 100,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Cursor placed relative to the chain head
    Initialized { cursor: u64 },
    /// No new blocks
    Idle,
    /// Scanned `from..=to` and handed `events` to the handler
    Advanced { from: u64, to: u64, events: usize },
}

pub struct ChainWatcher {
    source: Arc<dyn TransferEventSource>,
    handler: Arc<dyn TransferEventHandler>,
    config: WatcherConfig,
    chain_id: ChainId,
    cursor: Option<u64>,
    retry_target: Option<u64>,
    board: Option<Arc<CursorBoard>>,
}

impl ChainWatcher {
    pub fn new(
        source: Arc<dyn TransferEventSource>,
        handler: Arc<dyn TransferEventHandler>,
        config: WatcherConfig,
    ) -> Self {
        let chain_id = source.chain_id();
        let cursor = config.start_block.map(|b| b.saturating_sub(1));
        Self {
            source,
            handler,
            config,
            chain_id,
            cursor,
            retry_target: None,
            board: None,
        }
    }

    pub fn with_cursor_board(mut self, board: Arc<CursorBoard>) -> Self {
        if let Some(cursor) = self.cursor {
            board.set(self.chain_id, cursor);
        }
        self.board = Some(board);
        self
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Poll until `shutdown` becomes true. Tick errors are logged and retried
    /// on the next interval; they never end the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            chain_id = self.chain_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            start_block = ?self.config.start_block,
            "Starting chain watcher"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(outcome) => {
                    metrics::record_successful_poll(self.chain_id);
                    if let TickOutcome::Advanced { from, to, events } = outcome {
                        debug!(chain_id = self.chain_id, from, to, events, "Tick complete");
                    }
                }
                Err(e) => {
                    metrics::record_error(self.chain_id, "watcher_tick");
                    warn!(
                        chain_id = self.chain_id,
                        cursor = ?self.cursor,
                        error = %format!("{:#}", e),
                        "Watcher tick failed, will retry"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(chain_id = self.chain_id, cursor = ?self.cursor, "Chain watcher stopped");
        Ok(())
    }

    /// One polling step
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let current = self.source.block_number().await?;

        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let cursor = current.saturating_sub(self.config.start_lag);
                info!(
                    chain_id = self.chain_id,
                    head = current,
                    cursor,
                    "Watcher cursor initialized below chain head"
                );
                self.set_cursor(cursor);
                return Ok(TickOutcome::Initialized { cursor });
            }
        };

        if current <= cursor {
            return Ok(TickOutcome::Idle);
        }

        let target = match self.retry_target.take() {
            Some(target) if target > cursor && target <= current => target,
            _ => current,
        };

        let range = self.config.max_block_range.max(1);
        let first = cursor + 1;
        let mut from = first;
        let mut handed = 0;

        while from <= target {
            let to = target.min(from.saturating_add(range - 1));

            let events = match self.source.transfer_initiated_events(from, to).await {
                Ok(events) => events,
                Err(e) => {
                    self.retry_target = Some(target);
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "Failed to fetch events for blocks {}..={} on chain {}",
                            from, to, self.chain_id
                        )
                    });
                }
            };

            handed += self.dispatch(events).await;
            metrics::record_blocks_scanned(self.chain_id, from, to);
            self.set_cursor(to);
            from = to + 1;
        }

        Ok(TickOutcome::Advanced {
            from: first,
            to: target,
            events: handed,
        })
    }

    /// Hand events to the handler in order. Same-chain transfers are dropped
    /// here and never reach it. Handler errors are logged and do not hold
    /// back the cursor; retrying is the handler's job.
    async fn dispatch(&self, events: Vec<TransferInitiatedEvent>) -> usize {
        let mut handed = 0;
        for event in events {
            if event.is_same_chain(self.chain_id) {
                debug!(
                    chain_id = self.chain_id,
                    transfer_id = %event.transfer_id,
                    "Skipping same-chain transfer"
                );
                metrics::record_event(self.chain_id, "same_chain");
                continue;
            }
            if event.source_chain != self.chain_id {
                warn!(
                    chain_id = self.chain_id,
                    event_source_chain = event.source_chain,
                    transfer_id = %event.transfer_id,
                    "Event source chain differs from watched chain"
                );
            }

            metrics::record_event(self.chain_id, "detected");
            info!(
                chain_id = self.chain_id,
                transfer_id = %event.transfer_id,
                destination_chain = event.destination_chain,
                block = event.block_number,
                amount = %event.amount,
                "TransferInitiated detected"
            );

            if let Err(e) = self.handler.handle_event(&event, self.chain_id).await {
                error!(
                    chain_id = self.chain_id,
                    transfer_id = %event.transfer_id,
                    error = %e,
                    "Failed to handle transfer event"
                );
            }
            handed += 1;
        }
        handed
    }

    fn set_cursor(&mut self, block: u64) {
        self.cursor = Some(block);
        if let Some(board) = &self.board {
            board.set(self.chain_id, block);
        }
    }
}
