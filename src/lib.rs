//! ChainSync relayer
//!
//! Watches settlement contracts on each configured chain for
//! `TransferInitiated` events and relays them to the destination chain,
//! tracking every transfer through its ledger lifecycle.

pub mod api;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod contracts;
pub mod hash;
pub mod metrics;
pub mod processed;
pub mod proof;
pub mod relay;
pub mod store;
pub mod token_map;
pub mod transfer;
pub mod types;
pub mod watchers;
