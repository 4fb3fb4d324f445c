//! Protocol crypto: digests, roots, addresses, and P-256 signatures.
//!
//! Public keys serialize as SEC1 uncompressed points in hex, signatures as
//! ASN.1 DER `(r, s)` in hex, and an address is the hex SHA-256 of the
//! public key bytes. Signing always covers the raw 32-byte digest of the
//! signed record, so the signature never feeds back into any hash.

use p256::ecdsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::block::{Block, Transaction};
use crate::error::ChainError;
use crate::state::WorldState;

// ============================================================================
// DIGESTS AND ROOTS
// ============================================================================

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the wire address for a hex-encoded public key.
pub fn address_from_pubkey(pubkey_hex: &str) -> Result<String, ChainError> {
    let raw =
        hex::decode(pubkey_hex).map_err(|_| ChainError::Crypto("invalid pubkey hex".into()))?;
    Ok(sha256_hex(&raw))
}

/// Root over the ordered transaction list: a running SHA-256 of each
/// transaction digest. The empty list hashes to `SHA256("")`.
pub fn tx_root(txs: &[Transaction]) -> String {
    if txs.is_empty() {
        return sha256_hex(&[]);
    }
    let mut hasher = Sha256::new();
    for tx in txs {
        hasher.update(tx.digest());
    }
    hex::encode(hasher.finalize())
}

/// Root over the world state: `address:balance|nonce;` segments with
/// addresses sorted lexicographically, so the root is independent of map
/// iteration order. The empty state hashes to `SHA256("")`.
pub fn state_root(state: &WorldState) -> String {
    if state.is_empty() {
        return sha256_hex(&[]);
    }
    let mut keys: Vec<&String> = state.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        let account = &state[key];
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(account.balance.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(account.nonce.to_string().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// KEYS AND WALLETS
// ============================================================================

/// Hex-encode a verifying key as an uncompressed SEC1 point.
pub fn encode_pubkey(key: &VerifyingKey) -> String {
    hex::encode(key.to_encoded_point(false).as_bytes())
}

fn decode_pubkey(pubkey_hex: &str) -> Result<VerifyingKey, ChainError> {
    let raw =
        hex::decode(pubkey_hex).map_err(|_| ChainError::Crypto("invalid pubkey hex".into()))?;
    VerifyingKey::from_sec1_bytes(&raw).map_err(|_| ChainError::Crypto("invalid pubkey".into()))
}

/// Key material for one participant.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub signing_key: SigningKey,
    pub pubkey: String,
    pub address: String,
}

impl Wallet {
    /// Generate a fresh wallet from OS entropy.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = VerifyingKey::from(&signing_key).to_encoded_point(false);
        let pubkey = hex::encode(point.as_bytes());
        let address = sha256_hex(point.as_bytes());
        Self {
            signing_key,
            pubkey,
            address,
        }
    }
}

// ============================================================================
// TRANSACTION SIGNING
// ============================================================================

/// Fill `pubkey`, `from`, `hash`, and `signature` on a transaction.
pub fn sign_transaction(key: &SigningKey, tx: &mut Transaction) -> Result<(), ChainError> {
    tx.pubkey = encode_pubkey(&VerifyingKey::from(key));
    tx.from = address_from_pubkey(&tx.pubkey)?;
    let digest = tx.digest();
    tx.hash = hex::encode(digest);
    let signature: Signature = key
        .sign_prehash(&digest)
        .map_err(|e| ChainError::Crypto(e.to_string()))?;
    tx.signature = hex::encode(signature.to_der().as_bytes());
    Ok(())
}

/// Check a transaction end to end: key and signature decode, the sender
/// address matches the key, the recorded hash matches the recomputed digest,
/// and the DER signature verifies over that digest.
pub fn verify_transaction_signature(tx: &Transaction) -> Result<(), ChainError> {
    if tx.pubkey.is_empty() || tx.signature.is_empty() {
        return Err(ChainError::Crypto("missing pubkey or signature".into()));
    }
    let key = decode_pubkey(&tx.pubkey)?;
    if tx.from != address_from_pubkey(&tx.pubkey)? {
        return Err(ChainError::Crypto(
            "from address does not match pubkey".into(),
        ));
    }
    let raw = hex::decode(&tx.signature)
        .map_err(|_| ChainError::Crypto("invalid signature hex".into()))?;
    if tx.hash.is_empty() {
        return Err(ChainError::Crypto("missing tx hash".into()));
    }
    let digest = tx.digest();
    if tx.hash != hex::encode(digest) {
        return Err(ChainError::Crypto("tx hash mismatch".into()));
    }
    let signature =
        Signature::from_der(&raw).map_err(|_| ChainError::Crypto("malformed signature".into()))?;
    key.verify_prehash(&digest, &signature)
        .map_err(|_| ChainError::Crypto("invalid signature".into()))
}

/// Check every transaction in a block body, reporting the first offender.
pub fn verify_transactions(txs: &[Transaction]) -> Result<(), ChainError> {
    for (index, tx) in txs.iter().enumerate() {
        if verify_transaction_signature(tx).is_err() {
            return Err(ChainError::InvalidTxSignature { index });
        }
    }
    Ok(())
}

// ============================================================================
// BLOCK SIGNING
// ============================================================================

/// Sign a block header, filling `signature` and `hash`.
pub fn sign_block(key: &SigningKey, block: &mut Block) -> Result<(), ChainError> {
    let digest = block.digest();
    let signature: Signature = key
        .sign_prehash(&digest)
        .map_err(|e| ChainError::Crypto(e.to_string()))?;
    block.signature = hex::encode(signature.to_der().as_bytes());
    block.hash = hex::encode(digest);
    Ok(())
}

/// Verify a block's signature under the named validator's public key and
/// confirm the recorded hash matches the header digest.
pub fn verify_block_signature(block: &Block, pubkey_hex: &str) -> Result<(), ChainError> {
    if pubkey_hex.is_empty() {
        return Err(ChainError::Crypto("missing validator pubkey".into()));
    }
    let key = decode_pubkey(pubkey_hex)?;
    if block.signature.is_empty() {
        return Err(ChainError::Crypto("missing block signature".into()));
    }
    let raw = hex::decode(&block.signature).map_err(|_| ChainError::InvalidBlockSignature)?;
    let signature = Signature::from_der(&raw).map_err(|_| ChainError::InvalidBlockSignature)?;
    let digest = block.digest();
    key.verify_prehash(&digest, &signature)
        .map_err(|_| ChainError::InvalidBlockSignature)?;
    if block.hash != hex::encode(digest) {
        return Err(ChainError::InvalidBlockHash { index: block.index });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Account;

    #[test]
    fn address_is_sha256_of_pubkey_bytes() {
        let wallet = Wallet::generate();
        assert_eq!(wallet.address, address_from_pubkey(&wallet.pubkey).unwrap());
        assert_eq!(wallet.address.len(), 64);
        // Uncompressed SEC1 point: 0x04 prefix, 65 bytes, 130 hex chars.
        assert!(wallet.pubkey.starts_with("04"));
        assert_eq!(wallet.pubkey.len(), 130);
    }

    #[test]
    fn signed_transaction_round_trips() {
        let wallet = Wallet::generate();
        let mut tx = Transaction {
            to: "bob".into(),
            amount: 50,
            ..Transaction::default()
        };
        sign_transaction(&wallet.signing_key, &mut tx).unwrap();

        assert_eq!(tx.from, wallet.address);
        assert_eq!(tx.hash, hex::encode(tx.digest()));
        verify_transaction_signature(&tx).unwrap();
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let wallet = Wallet::generate();
        let mut tx = Transaction {
            to: "bob".into(),
            amount: 50,
            ..Transaction::default()
        };
        sign_transaction(&wallet.signing_key, &mut tx).unwrap();

        let mut bumped = tx.clone();
        bumped.amount = 500;
        assert!(verify_transaction_signature(&bumped).is_err());

        let mut corrupted = tx.clone();
        corrupted.signature = "00".into();
        assert!(verify_transaction_signature(&corrupted).is_err());

        let mut rerouted = tx;
        rerouted.from = "somebody-else".into();
        assert!(verify_transaction_signature(&rerouted).is_err());
    }

    #[test]
    fn verify_transactions_reports_offending_index() {
        let wallet = Wallet::generate();
        let mut good = Transaction {
            to: "bob".into(),
            amount: 10,
            ..Transaction::default()
        };
        sign_transaction(&wallet.signing_key, &mut good).unwrap();
        let mut bad = good.clone();
        bad.signature = "00".into();

        let err = verify_transactions(&[good, bad]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid transaction signature at index 1"
        );
    }

    #[test]
    fn block_signature_round_trips() {
        let wallet = Wallet::generate();
        let mut block = Block {
            index: 1,
            prev_hash: "GENESIS".into(),
            slot: 1,
            tick: 20,
            validator: "Alice".into(),
            ..Block::default()
        };
        sign_block(&wallet.signing_key, &mut block).unwrap();
        verify_block_signature(&block, &wallet.pubkey).unwrap();

        let other = Wallet::generate();
        assert!(verify_block_signature(&block, &other.pubkey).is_err());
    }

    #[test]
    fn empty_roots_hash_empty_input() {
        assert_eq!(tx_root(&[]), sha256_hex(&[]));
        assert_eq!(state_root(&WorldState::new()), sha256_hex(&[]));
    }

    #[test]
    fn state_root_is_insertion_order_independent() {
        let mut forward = WorldState::new();
        forward.insert("alice".into(), Account::with_balance(10));
        forward.insert("bob".into(), Account::with_balance(20));

        let mut reversed = WorldState::new();
        reversed.insert("bob".into(), Account::with_balance(20));
        reversed.insert("alice".into(), Account::with_balance(10));

        assert_eq!(state_root(&forward), state_root(&reversed));
    }

    #[test]
    fn state_root_tracks_nonce_changes() {
        let mut state = WorldState::new();
        state.insert("alice".into(), Account::with_balance(10));
        let base = state_root(&state);

        state.get_mut("alice").unwrap().nonce = 1;
        assert_ne!(base, state_root(&state));
    }
}
