//! Contract ABI definitions for the settlement contract and ERC20 tokens

pub mod chainsync;

pub use chainsync::{ChainSync, IERC20};
