//! Block and transaction records.
//!
//! Every digest in the protocol is a SHA-256 over a delimiter-joined ASCII
//! encoding with decimal integers. The encodings are part of the protocol
//! surface: reordering a field or changing a delimiter changes every hash in
//! the chain.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A transfer of balance between two addresses.
///
/// `from` is always derived from `pubkey` at signing time, never supplied by
/// the caller. `fee` and `nonce` participate in the digest even under the
/// minimal state transition so both variants agree on transaction identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub pubkey: String,
    pub signature: String,
    pub hash: String,
}

impl Transaction {
    /// Canonical digest: SHA-256 over `from|to|amount|fee|nonce|pubkey`.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_bytes());
        hasher.update(b"|");
        hasher.update(self.to.as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.fee.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.nonce.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.pubkey.as_bytes());
        hasher.finalize().into()
    }
}

/// A block in the DAG. Immutable once signed; the canonical chain is a
/// derived view, not an owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Parent block hash, or the genesis sentinel.
    pub prev_hash: String,
    pub slot: u64,
    pub tick: u64,
    /// Name of the producing validator.
    pub validator: String,
    pub tx_root: String,
    pub state_root: String,
    pub poh_hash: String,
    /// Hex ASN.1 DER signature over the header digest.
    pub signature: String,
    /// Hex of the header digest.
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Header digest over this block's own fields.
    pub fn digest(&self) -> [u8; 32] {
        block_digest(
            self.index,
            &self.prev_hash,
            self.slot,
            self.tick,
            &self.validator,
            &self.tx_root,
            &self.state_root,
            &self.poh_hash,
        )
    }
}

/// Header digest: SHA-256 over
/// `index|prev_hash|slot|tick|validator|tx_root|state_root|poh_hash`.
#[allow(clippy::too_many_arguments)]
pub fn block_digest(
    index: u64,
    prev_hash: &str,
    slot: u64,
    tick: u64,
    validator: &str,
    tx_root: &str,
    state_root: &str,
    poh_hash: &str,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(slot.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(tick.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(validator.as_bytes());
    hasher.update(b"|");
    hasher.update(tx_root.as_bytes());
    hasher.update(b"|");
    hasher.update(state_root.as_bytes());
    hasher.update(b"|");
    hasher.update(poh_hash.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_digest_is_field_sensitive() {
        let tx = Transaction {
            to: "bob".into(),
            amount: 50,
            ..Transaction::default()
        };
        let base = tx.digest();

        let mut bumped = tx.clone();
        bumped.amount = 51;
        assert_ne!(base, bumped.digest());

        let mut refeed = tx.clone();
        refeed.fee = 1;
        assert_ne!(base, refeed.digest());

        let mut renonced = tx;
        renonced.nonce = 1;
        assert_ne!(base, renonced.digest());
    }

    #[test]
    fn block_digest_matches_method() {
        let block = Block {
            index: 3,
            prev_hash: "aa".into(),
            slot: 2,
            tick: 40,
            validator: "Alice".into(),
            tx_root: "bb".into(),
            state_root: "cc".into(),
            poh_hash: "dd".into(),
            ..Block::default()
        };
        assert_eq!(
            block.digest(),
            block_digest(3, "aa", 2, 40, "Alice", "bb", "cc", "dd")
        );
    }

    #[test]
    fn block_digest_ignores_signature_and_hash() {
        let mut block = Block {
            index: 1,
            validator: "Alice".into(),
            ..Block::default()
        };
        let base = block.digest();
        block.signature = "sig".into();
        block.hash = "hash".into();
        assert_eq!(base, block.digest());
    }
}
