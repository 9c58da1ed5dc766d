//! Hash computation for transfer identifiers and Merkle nodes
//!
//! Layouts follow Solidity `abi.encode`: every value occupies one 32-byte
//! big-endian word, addresses are left-padded with zeros.

use alloy::primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Encode an address as an abi word (12 zero bytes + 20 address bytes)
pub fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..32].copy_from_slice(address.as_slice());
    word
}

/// Encode a uint256 as an abi word
pub fn u256_word(value: &U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

/// Compute the content-hash identifier of a same-chain transfer
///
/// keccak256(abi.encode(user, recipient, amount, nonce))
pub fn compute_transfer_id(user: &Address, recipient: &Address, amount: &U256, nonce: u64) -> B256 {
    let mut data = [0u8; 128];
    data[0..32].copy_from_slice(&address_word(user));
    data[32..64].copy_from_slice(&address_word(recipient));
    data[64..96].copy_from_slice(&u256_word(amount));
    data[96 + 24..128].copy_from_slice(&nonce.to_be_bytes());
    B256::from(keccak256(&data))
}

/// Compute the content-hash identifier of a cross-chain transfer
///
/// keccak256(abi.encode(user, recipient, amount, destinationChain, nonce))
pub fn compute_cross_chain_transfer_id(
    user: &Address,
    recipient: &Address,
    amount: &U256,
    destination_chain: u64,
    nonce: u64,
) -> B256 {
    let mut data = [0u8; 160];
    data[0..32].copy_from_slice(&address_word(user));
    data[32..64].copy_from_slice(&address_word(recipient));
    data[64..96].copy_from_slice(&u256_word(amount));
    data[96 + 24..128].copy_from_slice(&destination_chain.to_be_bytes());
    data[128 + 24..160].copy_from_slice(&nonce.to_be_bytes());
    B256::from(keccak256(&data))
}

/// Order-independent pair hash used by Merkle trees
///
/// keccak256(abi.encode(min(a, b), max(a, b)))
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[0..32].copy_from_slice(lo.as_slice());
    data[32..64].copy_from_slice(hi.as_slice());
    B256::from(keccak256(&data))
}

/// Convert bytes32 to 0x-prefixed lowercase hex string
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}
