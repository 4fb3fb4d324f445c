//! World state and the deterministic transition.
//!
//! Two application variants exist. The minimal variant moves balances only
//! and is authoritative for state roots; the fee-crediting variant also
//! charges fees to the sender, credits them to the block producer, and
//! enforces sequential nonces. The mempool is the only consumer of the
//! extended variant, which keeps cross-variant inputs away from the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::Transaction;
use crate::error::ChainError;

/// Balance and replay counter for one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

impl Account {
    pub fn with_balance(balance: u64) -> Self {
        Self { balance, nonce: 0 }
    }
}

/// Address to account map.
pub type WorldState = HashMap<String, Account>;

/// Apply `txs` in order to a copy of `state`, minimal variant.
///
/// Rejects zero amounts, empty senders, and overspends. The first failure
/// aborts the whole batch; the input state is never partially modified.
/// A receiver account is created on first credit; a failed sender lookup is
/// reported as an insufficient balance, matching the zero-balance read.
pub fn apply_transactions(
    state: &WorldState,
    txs: &[Transaction],
) -> Result<WorldState, ChainError> {
    let mut next = state.clone();
    for (index, tx) in txs.iter().enumerate() {
        if tx.amount == 0 {
            return Err(ChainError::InvalidAmount { index });
        }
        if tx.from.is_empty() {
            return Err(ChainError::MissingSender { index });
        }
        match next.get_mut(&tx.from) {
            Some(sender) if sender.balance >= tx.amount => sender.balance -= tx.amount,
            _ => return Err(ChainError::InsufficientBalance { index }),
        }
        next.entry(tx.to.clone()).or_default().balance += tx.amount;
    }
    Ok(next)
}

/// Apply `txs` in order to a copy of `state`, fee-crediting variant.
///
/// The sender is debited `amount + fee` and must present the account's
/// current nonce; the receiver is credited `amount` and `producer` collects
/// the fee. Strictly more restrictive than [`apply_transactions`], so every
/// batch admitted here also applies cleanly under the minimal variant.
pub fn apply_with_fees(
    state: &WorldState,
    txs: &[Transaction],
    producer: &str,
) -> Result<WorldState, ChainError> {
    let mut next = state.clone();
    for (index, tx) in txs.iter().enumerate() {
        if tx.amount == 0 {
            return Err(ChainError::InvalidAmount { index });
        }
        if tx.from.is_empty() {
            return Err(ChainError::MissingSender { index });
        }
        let charge = tx
            .amount
            .checked_add(tx.fee)
            .ok_or(ChainError::InvalidAmount { index })?;
        let sender = match next.get_mut(&tx.from) {
            Some(sender) => sender,
            None => return Err(ChainError::InsufficientBalance { index }),
        };
        if sender.nonce != tx.nonce {
            return Err(ChainError::BadNonce { index });
        }
        if sender.balance < charge {
            return Err(ChainError::InsufficientBalance { index });
        }
        sender.balance -= charge;
        sender.nonce += 1;
        next.entry(tx.to.clone()).or_default().balance += tx.amount;
        if tx.fee > 0 && !producer.is_empty() {
            next.entry(producer.to_string()).or_default().balance += tx.fee;
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(entries: &[(&str, u64)]) -> WorldState {
        entries
            .iter()
            .map(|(addr, bal)| (addr.to_string(), Account::with_balance(*bal)))
            .collect()
    }

    fn transfer(from: &str, to: &str, amount: u64) -> Transaction {
        Transaction {
            from: from.into(),
            to: to.into(),
            amount,
            ..Transaction::default()
        }
    }

    #[test]
    fn minimal_apply_moves_balances() {
        let state = funded(&[("alice", 200), ("bob", 100)]);
        let next = apply_transactions(&state, &[transfer("alice", "bob", 50)]).unwrap();

        assert_eq!(next["alice"].balance, 150);
        assert_eq!(next["bob"].balance, 150);
        // Input state is untouched.
        assert_eq!(state["alice"].balance, 200);
    }

    #[test]
    fn minimal_apply_creates_receiver() {
        let state = funded(&[("alice", 100)]);
        let next = apply_transactions(&state, &[transfer("alice", "carol", 10)]).unwrap();
        assert_eq!(next["carol"].balance, 10);
        assert_eq!(next["carol"].nonce, 0);
    }

    #[test]
    fn minimal_apply_rejects_zero_amount() {
        let state = funded(&[("alice", 100)]);
        let err = apply_transactions(&state, &[transfer("alice", "bob", 0)]).unwrap_err();
        assert!(err.to_string().contains("invalid amount"));
    }

    #[test]
    fn minimal_apply_rejects_missing_sender() {
        let state = WorldState::new();
        let err = apply_transactions(&state, &[transfer("", "bob", 5)]).unwrap_err();
        assert!(err.to_string().contains("missing sender"));
    }

    #[test]
    fn minimal_apply_rejects_overspend_without_partial_effects() {
        let state = funded(&[("alice", 100), ("bob", 10)]);
        let txs = [transfer("alice", "bob", 60), transfer("bob", "alice", 500)];
        let err = apply_transactions(&state, &txs).unwrap_err();
        assert!(err.to_string().contains("insufficient balance at index 1"));
    }

    #[test]
    fn minimal_apply_ignores_fees_and_nonces() {
        let state = funded(&[("alice", 100)]);
        let mut tx = transfer("alice", "bob", 40);
        tx.fee = 7;
        tx.nonce = 99;
        let next = apply_transactions(&state, &[tx]).unwrap();
        assert_eq!(next["alice"].balance, 60);
        assert_eq!(next["alice"].nonce, 0);
    }

    #[test]
    fn fee_apply_charges_sender_and_credits_producer() {
        let state = funded(&[("alice", 100)]);
        let mut tx = transfer("alice", "bob", 40);
        tx.fee = 5;
        let next = apply_with_fees(&state, &[tx], "prod").unwrap();

        assert_eq!(next["alice"].balance, 55);
        assert_eq!(next["alice"].nonce, 1);
        assert_eq!(next["bob"].balance, 40);
        assert_eq!(next["prod"].balance, 5);
    }

    #[test]
    fn fee_apply_enforces_sequential_nonces() {
        let state = funded(&[("alice", 100)]);
        let mut first = transfer("alice", "bob", 10);
        let mut second = transfer("alice", "bob", 10);
        second.nonce = 1;
        assert!(apply_with_fees(&state, &[first.clone(), second.clone()], "prod").is_ok());

        // Replaying nonce zero twice fails on the second transaction.
        first.nonce = 0;
        second.nonce = 0;
        let err = apply_with_fees(&state, &[first, second], "prod").unwrap_err();
        assert!(err.to_string().contains("bad nonce at index 1"));
    }

    #[test]
    fn fee_apply_counts_fee_against_balance() {
        let state = funded(&[("alice", 44)]);
        let mut tx = transfer("alice", "bob", 40);
        tx.fee = 5;
        let err = apply_with_fees(&state, &[tx], "prod").unwrap_err();
        assert!(err.to_string().contains("insufficient balance"));
    }
}
