use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::TransferEventSource;
use crate::types::{ChainId, TransferInitiatedEvent};

pub mod chain;

pub use chain::{ChainWatcher, TickOutcome, WatcherConfig};

/// Consumer of events emitted by a [`ChainWatcher`]
#[async_trait]
pub trait TransferEventHandler: Send + Sync {
    async fn handle_event(&self, event: &TransferInitiatedEvent, source_chain: ChainId)
        -> Result<()>;
}

/// Latest cursor per chain, read by the status endpoint
#[derive(Debug, Default)]
pub struct CursorBoard {
    cursors: RwLock<BTreeMap<ChainId, u64>>,
}

impl CursorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, chain_id: ChainId, block: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(chain_id, block);
        }
    }

    pub fn get(&self, chain_id: ChainId) -> Option<u64> {
        self.cursors
            .read()
            .ok()
            .and_then(|cursors| cursors.get(&chain_id).copied())
    }

    pub fn snapshot(&self) -> BTreeMap<ChainId, u64> {
        self.cursors
            .read()
            .map(|cursors| cursors.clone())
            .unwrap_or_default()
    }
}

/// Manages one watcher per source chain
pub struct WatcherManager {
    watchers: Vec<ChainWatcher>,
}

impl WatcherManager {
    /// Create a watcher for every source, all feeding `handler`
    pub fn new(
        sources: Vec<(Arc<dyn TransferEventSource>, WatcherConfig)>,
        handler: Arc<dyn TransferEventHandler>,
        board: Arc<CursorBoard>,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut watchers = Vec::with_capacity(sources.len());
        for (source, config) in sources {
            let chain_id = source.chain_id();
            if !seen.insert(chain_id) {
                warn!(chain_id, "Duplicate watcher for chain ignored");
                continue;
            }
            watchers.push(
                ChainWatcher::new(source, handler.clone(), config).with_cursor_board(board.clone()),
            );
        }

        info!(
            watchers = watchers.len(),
            chain_ids = ?seen,
            "Watcher manager created"
        );
        Self { watchers }
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Run all watchers concurrently until `shutdown` flips to true.
    /// Each watcher finishes its current tick before exiting.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for watcher in self.watchers {
            let shutdown = shutdown.clone();
            join_set.spawn(async move { watcher.run(shutdown).await });
        }

        while let Some(done) = join_set.join_next().await {
            match done {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("A watcher stopped with error: {:?}", e),
                Err(e) => error!("A watcher task panicked: {:?}", e),
            }
        }

        info!("All watchers stopped");
        Ok(())
    }
}
