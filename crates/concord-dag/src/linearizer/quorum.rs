//! Majority rank of a node.
//!
//! For each indexer `i`, `obs_i(x)` is the height of the first node in
//! `i`'s log that observes `x`. The rank of `x` is the majority-th
//! smallest `obs_i(x)`. Known values never change because logs only grow.
//! An unknown `obs_i(x)` belongs to a node `i` has not written yet, which
//! must sit above both `x` and `i`'s latest node, so the rank is bracketed
//! until a majority has been seen.

/// Bracket of a node's final rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankBounds {
    pub lower: u64,
    /// `u64::MAX` while fewer than a majority have observed the node.
    pub upper: u64,
}

impl RankBounds {
    /// `observed[i]` is `Some(obs_i)` or `None`; `unseen[i]` is the least
    /// height indexer `i`'s next node can have.
    pub fn compute(observed: &[Option<u64>], unseen: &[u64], majority: usize) -> Self {
        let mut lower: Vec<u64> = observed
            .iter()
            .zip(unseen)
            .map(|(obs, unseen)| obs.unwrap_or(*unseen))
            .collect();
        let mut upper: Vec<u64> = observed.iter().flatten().copied().collect();
        Self {
            lower: kth_smallest(&mut lower, majority),
            upper: kth_smallest(&mut upper, majority),
        }
    }

    pub fn settled(&self) -> bool {
        self.lower == self.upper
    }
}

/// Smallest rank any node not yet merged could still get, given the
/// height of each indexer's latest merged node.
pub fn unseen_floor(latest: &[u64], majority: usize) -> u64 {
    let mut floors: Vec<u64> = latest.iter().map(|h| h + 1).collect();
    kth_smallest(&mut floors, majority)
}

/// 1-based k-th smallest; `u64::MAX` when there are fewer than `k` values.
pub fn kth_smallest(values: &mut [u64], k: usize) -> u64 {
    if k == 0 || values.len() < k {
        return u64::MAX;
    }
    values.sort_unstable();
    values[k - 1]
}
