// ============================================================================
// TRIDENT DEMO DRIVER
// ============================================================================
//
// Deterministic single-node run that exercises the whole consensus core:
//   1. Three validators, three funded wallets
//   2. Two produced blocks selected from the mempool
//   3. A four-block fork exercise against the reorg guard
//   4. Fork candidate ranking, reorg metrics, validator summaries
//
// Run:  cargo run
// The PoH seed is fixed, so two runs print identical chains.

use std::fmt::Write as _;

use tracing::info;
use tracing_subscriber::EnvFilter;

use trident::crypto::sign_transaction;
use trident::validator::leader_from_snapshot;
use trident::{
    AppConfig, ChainConfig, Node, SystemClock, TracingLogger, Transaction, Wallet,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // In-memory run: a persisted chain would not line up with the fresh
    // PoH seed on replay. Point `data_dir` at a directory to persist.
    let config = AppConfig {
        chain: ChainConfig {
            deterministic_poh: true,
            poh_seed: 1,
            ..ChainConfig::default()
        },
        data_dir: None,
    };

    let mut node = match Node::new(config, &SystemClock, Box::new(TracingLogger)) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("node startup failed: {e}");
            std::process::exit(1);
        }
    };

    let alice = Wallet::generate();
    let bob = Wallet::generate();
    let charlie = Wallet::generate();

    for (name, stake, wallet) in [
        ("Alice", 100, &alice),
        ("Bob", 60, &bob),
        ("Charlie", 40, &charlie),
    ] {
        node.chain
            .add_validator(name, stake, &wallet.pubkey, Some(wallet.signing_key.clone()))
            .expect("validator registration");
    }

    node.chain.set_balance(&alice.address, 200);
    node.chain.set_balance(&bob.address, 100);
    node.chain.set_balance(&charlie.address, 80);

    print_stake_summary("Stake (initial)", &node);

    // Two canonical blocks, transactions routed through the mempool.
    produce_block(&mut node, make_tx(&alice, &bob.address, 50));
    produce_block(&mut node, make_tx(&bob, &charlie.address, 20));

    // Fork exercise: build on block 1 instead of the tip, then extend the
    // fork until it out-weighs the canonical chain.
    let before_tip = node.chain.canonical_tip_hash().to_string();
    let before_score = node.chain.score_tip(&before_tip);

    let parent_hash = node.chain.chain[1].hash.clone();
    let mut fork_hash = node
        .chain
        .add_block_external(&parent_hash, vec![make_tx(&charlie, &alice.address, 10)])
        .expect("fork block");
    fork_hash = node
        .chain
        .add_block_external(&fork_hash, vec![make_tx(&alice, &bob.address, 5)])
        .expect("fork extension");

    // Additional tips for the candidate ranking.
    let _ = node
        .chain
        .add_block_external(&parent_hash, vec![make_tx(&bob, &alice.address, 2)])
        .expect("side fork");
    let fork_b = node
        .chain
        .add_block_external(&parent_hash, vec![make_tx(&alice, &bob.address, 3)])
        .expect("side fork b");
    let _ = node
        .chain
        .add_block_external(&fork_b, vec![make_tx(&bob, &charlie.address, 1)])
        .expect("side fork b extension");

    let fork_score = node.chain.score_tip(&fork_hash);
    let after_tip = node.chain.canonical_tip_hash().to_string();
    let after_score = node.chain.score_tip(&after_tip);
    let (required, actual) = node
        .chain
        .weight_delta_required(before_score.cumulative_weight, fork_score.cumulative_weight);

    println!("[Before]");
    println!("Tip Hash: {before_tip}");
    println!("Slot: {}  Weight: {}", before_score.slot, before_score.cumulative_weight);
    let snap = node.chain.epoch_snapshot(before_score.slot);
    println!(
        "Epoch: {}  ActiveStake: {}  Validators: {}\n",
        snap.epoch,
        snap.total_stake,
        snap.validators.len()
    );

    println!("[Insert]");
    println!("Fork Block: {fork_hash}");
    println!("Parent: {parent_hash}");
    println!("Slot: {}  Weight: {}\n", fork_score.slot, fork_score.cumulative_weight);

    println!("[Reorg]");
    if before_tip != after_tip {
        println!("Old Tip: {before_tip}");
        println!("New Tip: {after_tip}");
    } else {
        println!("No reorg (canonical unchanged)");
        println!("Rejected Fork: {fork_hash}");
    }
    println!();

    println!("[After]");
    println!("Tip Hash: {after_tip}");
    println!("Slot: {}  Weight: {}\n", after_score.slot, after_score.cumulative_weight);

    println!("Canonical Chain:");
    for block in &node.chain.chain {
        println!("Slot {} -> {}", block.slot, block.hash);
    }
    println!();

    println!("=== Fork Candidate Ranking ===");
    println!(
        "Canonical: slot={} weight={} hash={}",
        before_score.slot, before_score.cumulative_weight, before_tip
    );
    println!(
        "Fork:      slot={} weight={} hash={}",
        fork_score.slot, fork_score.cumulative_weight, fork_hash
    );
    println!(
        "Delta:     required={required} actual={actual} pass={}",
        actual >= required
    );
    println!("==============================");

    println!("=== Fork Candidates (All Tips) ===");
    let canonical_tip = node.chain.canonical_tip_hash().to_string();
    let base_weight = before_score.cumulative_weight;
    for candidate in node.chain.fork_candidates() {
        let (req, act) = node
            .chain
            .weight_delta_required(base_weight, candidate.cumulative_weight);
        let snap = node.chain.epoch_snapshot(candidate.slot);
        let mark = if candidate.hash == canonical_tip { "*" } else { " " };
        println!(
            "[{mark}] tip={} slot={} weight={} parent={} epoch={} activeStake={} deltaRequired={req} deltaActual={act} {}",
            candidate.hash,
            candidate.slot,
            candidate.cumulative_weight,
            candidate.parent,
            snap.epoch,
            snap.total_stake,
            if act >= req { "PASS" } else { "FAIL" }
        );
    }
    println!("==================================");

    let stats = node.chain.reorg_stats();
    println!("=== Reorg Metrics ===");
    println!("INFO: {}", stats.info);
    println!("WARN: {}", stats.warn);
    println!("ERROR: {}", stats.error);
    println!("CRITICAL: {}", stats.critical);
    println!("=====================\n");

    println!("=== Missed Slot Stats ===");
    for summary in node.chain.validator_summaries() {
        println!(
            "{:<8} -> Produced: {:<3} Missed: {:<3} MissRate: {:<5.1}% Slashed: {:<5} JailedUntil: {}",
            summary.name,
            summary.produced,
            summary.missed,
            summary.miss_rate * 100.0,
            summary.slashed,
            summary.jailed_until
        );
    }
    println!("=========================\n");

    match node.chain.verify_chain() {
        Ok(()) => info!("full-chain verification passed"),
        Err(e) => {
            eprintln!("full-chain verification failed: {e}");
            std::process::exit(1);
        }
    }

    print_stake_summary("Stake (final)", &node);
    write_epoch_snapshot_csv("epoch_snapshots.csv", &node);
}

fn make_tx(wallet: &Wallet, to: &str, amount: u64) -> Transaction {
    let mut tx = Transaction {
        to: to.to_string(),
        amount,
        ..Transaction::default()
    };
    sign_transaction(&wallet.signing_key, &mut tx).expect("sign transaction");
    tx
}

fn produce_block(node: &mut Node, tx: Transaction) {
    node.mempool.add(tx).expect("mempool admission");
    // The next production slot is one past the tip, so the leader can be
    // predicted and credited with fees during selection.
    let next_slot = node.chain.chain.last().map(|b| b.slot + 1).unwrap_or(1);
    let snapshot = node.chain.epoch_snapshot(next_slot);
    let producer = leader_from_snapshot(next_slot, &snapshot.validators);
    let max = node.chain.config.max_block_txs;
    let batch = node
        .mempool
        .pop_for_block(&node.chain.state, max, &producer);
    node.chain.add_block(batch).expect("block production");
    info!(
        tip = node.chain.canonical_tip_hash(),
        height = node.chain.chain.len() - 1,
        "block produced"
    );
}

fn print_stake_summary(label: &str, node: &Node) {
    println!("{label}");
    let mut names: Vec<&String> = node.chain.validators.keys().collect();
    names.sort();
    for name in names {
        println!("{name}: {}", node.chain.validators[name].stake);
    }
    println!();
}

fn write_epoch_snapshot_csv(path: &str, node: &Node) {
    let mut out = String::from("epoch,total_stake,validator,stake\n");
    for snapshot in node.chain.all_epoch_snapshots() {
        let mut names: Vec<&String> = snapshot.validators.keys().collect();
        names.sort();
        if names.is_empty() {
            let _ = writeln!(out, "{},{},,", snapshot.epoch, snapshot.total_stake);
            continue;
        }
        for name in names {
            let _ = writeln!(
                out,
                "{},{},{name},{}",
                snapshot.epoch, snapshot.total_stake, snapshot.validators[name]
            );
        }
    }
    if std::fs::write(path, out).is_ok() {
        println!("Wrote epoch snapshot CSV: {path}");
    }
}
