//! End-to-end consensus scenarios over the public API.
//!
//! All runs are deterministic: PoH seed 1, max reorg depth 2, finality
//! distance 2, 10% minimum reorg weight delta, 50-slot epochs. With stakes
//! Alice:100 Bob:60 Charlie:40 the leader draw picks Alice for slots 1-3
//! and Bob for slot 4.

use trident::crypto::{sign_transaction, state_root, tx_root, verify_block_signature};
use trident::poh::{hash_poh, parse_poh_hash_hex};
use trident::{Blockchain, ChainConfig, NopLogger, SystemClock, Transaction, Wallet};

fn deterministic_chain() -> Blockchain {
    let config = ChainConfig {
        deterministic_poh: true,
        poh_seed: 1,
        ..ChainConfig::default()
    };
    Blockchain::new(config, &SystemClock, Box::new(NopLogger))
}

struct TestNet {
    chain: Blockchain,
    alice: Wallet,
    bob: Wallet,
    charlie: Wallet,
}

/// Validators Alice:100 Bob:60 Charlie:40 with funded wallets
/// alice:200 bob:100 charlie:80.
fn standard_net() -> TestNet {
    let mut chain = deterministic_chain();
    let alice = Wallet::generate();
    let bob = Wallet::generate();
    let charlie = Wallet::generate();

    for (name, stake, wallet) in [
        ("Alice", 100, &alice),
        ("Bob", 60, &bob),
        ("Charlie", 40, &charlie),
    ] {
        chain
            .add_validator(name, stake, &wallet.pubkey, Some(wallet.signing_key.clone()))
            .unwrap();
    }
    chain.set_balance(&alice.address, 200);
    chain.set_balance(&bob.address, 100);
    chain.set_balance(&charlie.address, 80);

    TestNet {
        chain,
        alice,
        bob,
        charlie,
    }
}

fn transfer(wallet: &Wallet, to: &str, amount: u64) -> Transaction {
    let mut tx = Transaction {
        to: to.into(),
        amount,
        ..Transaction::default()
    };
    sign_transaction(&wallet.signing_key, &mut tx).unwrap();
    tx
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[test]
fn happy_path_produces_expected_balances() {
    let mut net = standard_net();

    net.chain
        .add_block(vec![transfer(&net.alice, &net.bob.address, 50)])
        .unwrap();
    net.chain
        .add_block(vec![transfer(&net.bob, &net.charlie.address, 20)])
        .unwrap();

    assert_eq!(net.chain.chain.len(), 3);
    assert_eq!(net.chain.state[&net.alice.address].balance, 150);
    assert_eq!(net.chain.state[&net.bob.address].balance, 130);
    assert_eq!(net.chain.state[&net.charlie.address].balance, 100);

    let stats = net.chain.reorg_stats();
    assert_eq!(stats.info, 0);
    assert_eq!(stats.warn, 0);
    assert_eq!(stats.error, 0);
    assert_eq!(stats.critical, 0);
}

#[test]
fn canonical_chain_satisfies_the_universal_invariants() {
    let mut net = standard_net();
    net.chain
        .add_block(vec![transfer(&net.alice, &net.bob.address, 50)])
        .unwrap();
    net.chain
        .add_block(vec![transfer(&net.bob, &net.charlie.address, 20)])
        .unwrap();

    let chain = net.chain.chain.clone();

    // Hash recomputation, signature, and root invariants per block.
    for block in chain.iter().skip(1) {
        assert_eq!(block.hash, hex::encode(block.digest()));
        let pubkey = net.chain.validators[&block.validator].pubkey.clone();
        verify_block_signature(block, &pubkey).unwrap();
        assert_eq!(tx_root(&block.transactions), block.tx_root);

        let pre_state = net.chain.state_at_tip(&block.prev_hash).unwrap();
        let post = trident::state::apply_transactions(&pre_state, &block.transactions).unwrap();
        assert_eq!(state_root(&post), block.state_root);
    }

    // PoH continuity from the genesis hash.
    let mut hash = parse_poh_hash_hex(&chain[0].poh_hash).unwrap();
    let mut tick = chain[0].tick;
    for block in chain.iter().skip(1) {
        while tick < block.tick {
            tick += 1;
            hash = hash_poh(&hash, tick);
        }
        assert_eq!(hex::encode(hash), block.poh_hash);
    }

    // Single producer per canonical slot.
    let mut seen = std::collections::HashSet::new();
    for block in chain.iter().skip(1) {
        assert!(seen.insert(block.slot), "slot {} produced twice", block.slot);
    }

    // The engine's own full replay agrees.
    net.chain.verify_chain().unwrap();
}

#[test]
fn identical_seeds_and_inputs_yield_identical_chains() {
    let alice = Wallet::generate();
    let bob = Wallet::generate();

    let run = |txs: &[Transaction]| {
        let mut chain = deterministic_chain();
        chain
            .add_validator("Alice", 100, &alice.pubkey, Some(alice.signing_key.clone()))
            .unwrap();
        chain.set_balance(&alice.address, 200);
        chain.set_balance(&bob.address, 100);
        for tx in txs {
            chain.add_block(vec![tx.clone()]).unwrap();
        }
        chain
    };

    let txs = vec![
        transfer(&alice, &bob.address, 50),
        transfer(&alice, &bob.address, 25),
    ];
    let first = run(&txs);
    let second = run(&txs);

    assert_eq!(first.chain.len(), second.chain.len());
    for (a, b) in first.chain.iter().zip(second.chain.iter()) {
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.poh_hash, b.poh_hash);
        assert_eq!(a.state_root, b.state_root);
    }
}

// ============================================================================
// PRODUCTION FAILURES
// ============================================================================

#[test]
fn corrupted_transaction_slashes_the_leader() {
    let mut chain = deterministic_chain();
    let alice = Wallet::generate();
    chain
        .add_validator("Alice", 100, &alice.pubkey, Some(alice.signing_key.clone()))
        .unwrap();
    chain.set_balance(&alice.address, 200);

    let mut tx = transfer(&alice, "receiver", 10);
    tx.signature = "00".into();

    let err = chain.add_block(vec![tx]).unwrap_err();
    assert!(err.to_string().contains("invalid transaction signature"));
    // Flat production penalty.
    assert_eq!(chain.validators["Alice"].stake, 95);
    assert_eq!(chain.chain.len(), 1);
}

#[test]
fn overspending_batch_slashes_the_leader_and_moves_nothing() {
    let mut chain = deterministic_chain();
    let alice = Wallet::generate();
    chain
        .add_validator("Alice", 100, &alice.pubkey, Some(alice.signing_key.clone()))
        .unwrap();
    chain.set_balance(&alice.address, 30);

    let err = chain
        .add_block(vec![transfer(&alice, "receiver", 500)])
        .unwrap_err();
    assert!(err.to_string().contains("insufficient balance"));
    assert_eq!(chain.validators["Alice"].stake, 95);
    assert_eq!(chain.state[&alice.address].balance, 30);
}

#[test]
fn unknown_parents_are_rejected_outright() {
    let mut net = standard_net();
    let err = net
        .chain
        .add_block_external("no-such-block", Vec::new())
        .unwrap_err();
    assert!(err.to_string().contains("unknown parent hash"));
}

// ============================================================================
// FORKS AND THE REORG GUARD
// ============================================================================

#[test]
fn equal_weight_fork_is_rejected_with_an_error_count() {
    let mut net = standard_net();
    net.chain
        .add_block(vec![transfer(&net.alice, &net.bob.address, 50)])
        .unwrap();
    net.chain
        .add_block(vec![transfer(&net.bob, &net.charlie.address, 20)])
        .unwrap();

    let before_tip = net.chain.canonical_tip_hash().to_string();

    // Slot 3 is Alice's, same as slots 1 and 2: the fork lands with the
    // same cumulative weight as the canonical chain.
    let parent = net.chain.chain[1].hash.clone();
    let fork = net
        .chain
        .add_block_external(&parent, vec![transfer(&net.charlie, &net.alice.address, 10)])
        .unwrap();

    assert_eq!(net.chain.canonical_tip_hash(), before_tip);
    assert_eq!(net.chain.reorg_stats().error, 1);
    assert_eq!(net.chain.reorg_stats().info, 0);
    // The fork block stays in the DAG.
    assert!(net.chain.blocks.contains_key(&fork));

    let canonical = net.chain.score_tip(&before_tip);
    let rival = net.chain.score_tip(&fork);
    assert_eq!(canonical.cumulative_weight, rival.cumulative_weight);
}

#[test]
fn sufficient_weight_fork_reorganizes_the_chain() {
    let mut net = standard_net();
    net.chain
        .add_block(vec![transfer(&net.alice, &net.bob.address, 50)])
        .unwrap();
    net.chain
        .add_block(vec![transfer(&net.bob, &net.charlie.address, 20)])
        .unwrap();

    let before_tip = net.chain.canonical_tip_hash().to_string();
    let before = net.chain.score_tip(&before_tip);

    let parent = net.chain.chain[1].hash.clone();
    let fork1 = net
        .chain
        .add_block_external(&parent, vec![transfer(&net.charlie, &net.alice.address, 10)])
        .unwrap();
    // Slot 4 belongs to Bob: +60 weight clears the 10% delta over 200.
    let fork2 = net
        .chain
        .add_block_external(&fork1, vec![transfer(&net.alice, &net.bob.address, 5)])
        .unwrap();

    assert_eq!(net.chain.canonical_tip_hash(), fork2);
    let after = net.chain.score_tip(&fork2);
    assert!(after.cumulative_weight >= before.cumulative_weight + 20);

    let stats = net.chain.reorg_stats();
    assert_eq!(stats.info + stats.warn, 1);
    assert_eq!(stats.error, 1); // the first, equal-weight attempt

    // The fork's transactions are now the canonical history.
    assert_eq!(net.chain.state[&net.alice.address].balance, 155);
    assert_eq!(net.chain.state[&net.bob.address].balance, 155);
    assert_eq!(net.chain.state[&net.charlie.address].balance, 70);

    // Replay still verifies after the reorg.
    net.chain.verify_chain().unwrap();
}

#[test]
fn finalized_slots_never_regress_and_gate_deep_forks() {
    let mut net = standard_net();
    let mut last_finalized = 0;
    for _ in 0..6 {
        net.chain.add_block(Vec::new()).unwrap();
        assert!(net.chain.finalized_slot >= last_finalized);
        last_finalized = net.chain.finalized_slot;
    }
    assert_eq!(net.chain.finalized_slot, 4);

    // Grow a fork off block 1 until it out-weighs the canonical chain.
    // It diverges at slot 2, behind the finalized frontier, so the guard
    // must refuse to move the tip no matter how heavy the fork gets.
    let before_tip = net.chain.canonical_tip_hash().to_string();
    let mut fork = net.chain.chain[1].hash.clone();
    for _ in 0..5 {
        fork = net.chain.add_block_external(&fork, Vec::new()).unwrap();
    }
    let canonical = net.chain.score_tip(&before_tip);
    let rival = net.chain.score_tip(&fork);
    assert!(rival.cumulative_weight > canonical.cumulative_weight);

    assert_eq!(net.chain.canonical_tip_hash(), before_tip);
    assert!(net.chain.reorg_stats().critical >= 1);
    assert_eq!(net.chain.finalized_slot, 4);
}

#[test]
fn snapshots_stay_frozen_for_their_epoch() {
    let mut net = standard_net();
    net.chain.add_block(Vec::new()).unwrap();

    let first_read = net.chain.epoch_snapshot(1);
    assert_eq!(first_read.total_stake, 200);

    // Rewards and later registry changes never reach the frozen epoch.
    net.chain.add_block(Vec::new()).unwrap();
    let second_read = net.chain.epoch_snapshot(1);

    assert_eq!(first_read.total_stake, second_read.total_stake);
    assert_eq!(first_read.validators, second_read.validators);
}
