//! Proof verification
//!
//! Signatures are EIP-191 personal messages. Address comparison is on the
//! 20-byte value, so it does not depend on the hex casing callers used.
//! A proof that does not verify is an ordinary `false`, never an error.

use std::collections::HashSet;

use alloy::primitives::{Address, Bytes, PrimitiveSignature, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hash::bytes32_to_hex;
use crate::metrics;
use crate::types::{ChainId, TransferId, ValidatorSet};

pub mod merkle;

pub use merkle::{generate_merkle_proof, merkle_root, verify_merkle_proof, MerkleProof};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("cannot build a Merkle tree without leaves")]
    EmptyLeaves,

    #[error("leaf index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProofKind {
    Signature,
    Merkle,
    Multisig,
    Crosschain,
}

impl ProofKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofKind::Signature => "SIGNATURE",
            ProofKind::Merkle => "MERKLE",
            ProofKind::Multisig => "MULTISIG",
            ProofKind::Crosschain => "CROSSCHAIN",
        }
    }
}

/// A proof attached to a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proof {
    Signature {
        signature: Bytes,
        validator: Address,
    },
    Merkle {
        leaf: B256,
        siblings: Vec<B256>,
        root: B256,
    },
    MultiSig {
        signatures: Vec<Bytes>,
        validators: Vec<Address>,
        threshold: usize,
    },
    /// Source-chain existence or zero-knowledge payload
    CrossChain { data: Bytes },
}

impl Proof {
    pub fn kind(&self) -> ProofKind {
        match self {
            Proof::Signature { .. } => ProofKind::Signature,
            Proof::Merkle { .. } => ProofKind::Merkle,
            Proof::MultiSig { .. } => ProofKind::Multisig,
            Proof::CrossChain { .. } => ProofKind::Crosschain,
        }
    }
}

/// Recover the EIP-191 signer of `message`
pub fn recover_signer(message: &[u8], signature: &[u8]) -> eyre::Result<Address> {
    let signature = PrimitiveSignature::try_from(signature)
        .map_err(|e| eyre::eyre!("Malformed signature: {}", e))?;
    signature
        .recover_address_from_msg(message)
        .map_err(|e| eyre::eyre!("Signature recovery failed: {}", e))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProofVerifier;

impl ProofVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Valid iff `signature` over `message` recovers to `expected`
    pub fn verify_signature(&self, message: &[u8], signature: &[u8], expected: &Address) -> bool {
        let valid = match recover_signer(message, signature) {
            Ok(recovered) => recovered == *expected,
            Err(e) => {
                debug!(error = %e, "Signature verification failed");
                false
            }
        };
        metrics::record_proof(ProofKind::Signature.as_str(), result_label(valid));
        valid
    }

    pub fn verify_merkle(&self, leaf: &B256, siblings: &[B256], root: &B256) -> bool {
        let valid = verify_merkle_proof(leaf, siblings, root);
        metrics::record_proof(ProofKind::Merkle.as_str(), result_label(valid));
        valid
    }

    /// At least `threshold` distinct listed validators signed `message`.
    ///
    /// Unrecoverable signatures and signers outside `validators` are skipped;
    /// several signatures from one validator count once.
    pub fn verify_multi_signature(
        &self,
        message: &[u8],
        signatures: &[Bytes],
        validators: &[Address],
        threshold: usize,
    ) -> bool {
        let valid = Self::count_distinct_signers(message, signatures, validators, threshold);
        metrics::record_proof(ProofKind::Multisig.as_str(), result_label(valid));
        valid
    }

    /// Threshold check against the active members of a validator set
    pub fn verify_with_validator_set(
        &self,
        message: &[u8],
        signatures: &[Bytes],
        validator_set: &ValidatorSet,
        threshold: usize,
    ) -> bool {
        self.verify_multi_signature(
            message,
            signatures,
            &validator_set.active_addresses(),
            threshold,
        )
    }

    /// Check a proof that `transfer_id` exists on its source chain.
    ///
    /// Signature-based kinds sign the transfer id as 0x-prefixed lowercase hex.
    /// Merkle and cross-chain payloads are accepted without verification until
    /// source-chain state verification is wired in.
    pub fn verify_cross_chain(
        &self,
        transfer_id: &TransferId,
        source_chain: ChainId,
        destination_chain: ChainId,
        proof: &Proof,
    ) -> bool {
        let message = bytes32_to_hex(&transfer_id.0);

        match proof {
            Proof::Signature {
                signature,
                validator,
            } => self.verify_signature(message.as_bytes(), signature, validator),
            Proof::MultiSig {
                signatures,
                validators,
                threshold,
            } => self.verify_multi_signature(message.as_bytes(), signatures, validators, *threshold),
            Proof::Merkle { .. } | Proof::CrossChain { .. } => {
                warn!(
                    transfer_id = %transfer_id,
                    source_chain,
                    destination_chain,
                    kind = proof.kind().as_str(),
                    "Accepting unverified cross-chain proof"
                );
                metrics::record_proof(proof.kind().as_str(), "stubbed");
                true
            }
        }
    }

    fn count_distinct_signers(
        message: &[u8],
        signatures: &[Bytes],
        validators: &[Address],
        threshold: usize,
    ) -> bool {
        if threshold == 0 {
            warn!("Rejecting multi-signature proof with zero threshold");
            return false;
        }
        if signatures.len() < threshold {
            return false;
        }

        let mut matched = HashSet::new();
        for signature in signatures {
            match recover_signer(message, signature) {
                Ok(signer) if validators.contains(&signer) => {
                    matched.insert(signer);
                }
                Ok(signer) => {
                    debug!(signer = %signer, "Signature from non-validator ignored");
                }
                Err(e) => {
                    debug!(error = %e, "Skipping invalid signature");
                }
            }
        }
        matched.len() >= threshold
    }
}

fn result_label(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "invalid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Validator;
    use alloy::primitives::U256;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;
    use std::str::FromStr;

    fn sign(signer: &PrivateKeySigner, message: &[u8]) -> Bytes {
        let signature = signer.sign_message_sync(message).unwrap();
        Bytes::from(signature.as_bytes().to_vec())
    }

    #[test]
    fn test_signature_valid_and_wrong_signer() {
        let verifier = ProofVerifier::new();
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let signature = sign(&signer, b"hello");

        assert!(verifier.verify_signature(b"hello", &signature, &signer.address()));
        assert!(!verifier.verify_signature(b"hello", &signature, &other.address()));
        assert!(!verifier.verify_signature(b"goodbye", &signature, &signer.address()));
    }

    #[test]
    fn test_signature_address_case_does_not_matter() {
        let verifier = ProofVerifier::new();
        let signer = PrivateKeySigner::random();
        let signature = sign(&signer, b"msg");

        let lower = format!("0x{}", hex::encode(signer.address()));
        let upper = format!("0x{}", hex::encode_upper(signer.address()));
        for text in [lower, upper] {
            let expected = Address::from_str(&text).unwrap();
            assert!(verifier.verify_signature(b"msg", &signature, &expected));
        }
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let verifier = ProofVerifier::new();
        assert!(!verifier.verify_signature(b"msg", &[0u8; 10], &Address::ZERO));
    }

    #[test]
    fn test_threshold_two_of_three_with_outsider() {
        let verifier = ProofVerifier::new();
        let validators: Vec<PrivateKeySigner> = (0..3).map(|_| PrivateKeySigner::random()).collect();
        let outsider = PrivateKeySigner::random();
        let addresses: Vec<Address> = validators.iter().map(|v| v.address()).collect();
        let message = b"batch-42";

        let signatures = vec![
            sign(&validators[0], message),
            sign(&validators[2], message),
            sign(&outsider, message),
        ];
        assert!(verifier.verify_multi_signature(message, &signatures, &addresses, 2));
        assert!(!verifier.verify_multi_signature(message, &signatures, &addresses, 3));
    }

    #[test]
    fn test_threshold_short_circuits_on_too_few_signatures() {
        let verifier = ProofVerifier::new();
        let signer = PrivateKeySigner::random();
        let signatures = vec![sign(&signer, b"m")];
        assert!(!verifier.verify_multi_signature(b"m", &signatures, &[signer.address()], 2));
        assert!(!verifier.verify_multi_signature(b"m", &[], &[signer.address()], 1));
    }

    #[test]
    fn test_duplicate_signer_counts_once() {
        let verifier = ProofVerifier::new();
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let signature = sign(&signer, b"m");
        let signatures = vec![signature.clone(), signature];
        let validators = vec![signer.address(), other.address()];
        assert!(!verifier.verify_multi_signature(b"m", &signatures, &validators, 2));
    }

    #[test]
    fn test_invalid_signature_is_skipped() {
        let verifier = ProofVerifier::new();
        let a = PrivateKeySigner::random();
        let b = PrivateKeySigner::random();
        let signatures = vec![
            Bytes::from(vec![0xde, 0xad]),
            sign(&a, b"m"),
            sign(&b, b"m"),
        ];
        assert!(verifier.verify_multi_signature(b"m", &signatures, &[a.address(), b.address()], 2));
    }

    #[test]
    fn test_validator_set_uses_active_members() {
        let verifier = ProofVerifier::new();
        let active = PrivateKeySigner::random();
        let inactive = PrivateKeySigner::random();
        let set = ValidatorSet::new(vec![
            Validator {
                address: active.address(),
                stake: U256::from(10u64),
                active: true,
                slash_amount: U256::ZERO,
            },
            Validator {
                address: inactive.address(),
                stake: U256::from(10u64),
                active: false,
                slash_amount: U256::ZERO,
            },
        ]);
        let signatures = vec![sign(&active, b"m"), sign(&inactive, b"m")];
        assert!(verifier.verify_with_validator_set(b"m", &signatures, &set, 1));
        assert!(!verifier.verify_with_validator_set(b"m", &signatures, &set, 2));
    }

    #[test]
    fn test_cross_chain_signature_signs_transfer_id_hex() {
        let verifier = ProofVerifier::new();
        let validator = PrivateKeySigner::random();
        let transfer_id = B256::repeat_byte(0xab);
        let message = format!("0x{}", "ab".repeat(32));

        let proof = Proof::Signature {
            signature: sign(&validator, message.as_bytes()),
            validator: validator.address(),
        };
        assert!(verifier.verify_cross_chain(&transfer_id, 1, 8453, &proof));
        assert!(!verifier.verify_cross_chain(&B256::repeat_byte(0xac), 1, 8453, &proof));
    }

    #[test]
    fn test_cross_chain_multisig_uses_threshold() {
        let verifier = ProofVerifier::new();
        let transfer_id = B256::repeat_byte(0x01);
        let message = bytes32_to_hex(&transfer_id.0);
        let a = PrivateKeySigner::random();
        let b = PrivateKeySigner::random();

        let proof = Proof::MultiSig {
            signatures: vec![sign(&a, message.as_bytes()), sign(&b, message.as_bytes())],
            validators: vec![a.address(), b.address()],
            threshold: 2,
        };
        assert!(verifier.verify_cross_chain(&transfer_id, 1, 8453, &proof));
    }

    #[test]
    fn test_stubbed_kinds_accept() {
        let verifier = ProofVerifier::new();
        let id = B256::repeat_byte(1);
        let merkle = Proof::Merkle {
            leaf: B256::ZERO,
            siblings: vec![],
            root: B256::repeat_byte(9),
        };
        let zk = Proof::CrossChain {
            data: Bytes::from_static(b"opaque"),
        };
        assert!(verifier.verify_cross_chain(&id, 1, 8453, &merkle));
        assert!(verifier.verify_cross_chain(&id, 1, 8453, &zk));
        assert_eq!(zk.kind().as_str(), "CROSSCHAIN");
    }
}
