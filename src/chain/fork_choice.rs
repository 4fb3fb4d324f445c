//! Fork-choice scoring and reorganization measurement.

use crate::block::Block;

/// Score of a chain tip. Ordering is cumulative snapshot weight along the
/// ancestry, then tip slot, then tip hash as the final tie-breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainScore {
    pub slot: u64,
    pub cumulative_weight: u64,
    pub hash: String,
}

/// Strict fork-choice ordering: `a` must beat `b` to displace it. Equal
/// weight falls through to the higher slot, equal slot to the
/// lexicographically smaller hash.
pub fn better_score(a: &ChainScore, b: &ChainScore) -> bool {
    if a.cumulative_weight != b.cumulative_weight {
        return a.cumulative_weight > b.cumulative_weight;
    }
    if a.slot != b.slot {
        return a.slot > b.slot;
    }
    a.hash < b.hash
}

/// Measure a candidate reorganization: how many old-chain blocks would be
/// abandoned, and the slot at which the two histories split. Both inputs are
/// full canonical vectors from genesis.
pub fn reorg_depth_and_slot(old_chain: &[Block], new_chain: &[Block]) -> (usize, u64) {
    let min_len = old_chain.len().min(new_chain.len());
    let mut diverge = min_len;
    for i in 0..min_len {
        if old_chain[i].hash != new_chain[i].hash {
            diverge = i;
            break;
        }
    }
    let depth = old_chain.len() - diverge;
    let diverge_slot = if diverge < old_chain.len() {
        old_chain[diverge].slot
    } else if diverge < new_chain.len() {
        new_chain[diverge].slot
    } else {
        0
    };
    (depth, diverge_slot)
}

/// Reorg-guard decision counters, one per log severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorgMetrics {
    pub info: u64,
    pub warn: u64,
    pub error: u64,
    pub critical: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(weight: u64, slot: u64, hash: &str) -> ChainScore {
        ChainScore {
            slot,
            cumulative_weight: weight,
            hash: hash.into(),
        }
    }

    fn block(slot: u64, hash: &str) -> Block {
        Block {
            slot,
            hash: hash.into(),
            ..Block::default()
        }
    }

    #[test]
    fn weight_dominates_slot_and_hash() {
        assert!(better_score(&score(10, 1, "zz"), &score(9, 5, "aa")));
        assert!(!better_score(&score(9, 5, "aa"), &score(10, 1, "zz")));
    }

    #[test]
    fn equal_weight_prefers_higher_slot() {
        assert!(better_score(&score(10, 3, "zz"), &score(10, 2, "aa")));
    }

    #[test]
    fn full_tie_prefers_smaller_hash() {
        assert!(better_score(&score(10, 3, "aa"), &score(10, 3, "bb")));
        assert!(!better_score(&score(10, 3, "bb"), &score(10, 3, "aa")));
        // A tip never beats itself.
        assert!(!better_score(&score(10, 3, "aa"), &score(10, 3, "aa")));
    }

    #[test]
    fn extension_has_zero_depth() {
        let old = vec![block(0, "g"), block(1, "a")];
        let new = vec![block(0, "g"), block(1, "a"), block(2, "b")];
        assert_eq!(reorg_depth_and_slot(&old, &new), (0, 2));
    }

    #[test]
    fn divergence_is_measured_from_first_mismatch() {
        let old = vec![block(0, "g"), block(1, "a"), block(2, "b")];
        let new = vec![block(0, "g"), block(1, "a"), block(3, "c"), block(4, "d")];
        // One old block abandoned, split at the old chain's slot 2.
        assert_eq!(reorg_depth_and_slot(&old, &new), (1, 2));
    }

    #[test]
    fn deep_reorg_counts_all_abandoned_blocks() {
        let old = vec![block(0, "g"), block(1, "a"), block(2, "b"), block(3, "c")];
        let new = vec![block(0, "g"), block(1, "x"), block(2, "y")];
        assert_eq!(reorg_depth_and_slot(&old, &new), (3, 1));
    }
}
