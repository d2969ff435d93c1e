//! Combinational arbiters over a request bitmask.
//!
//! Requests and grants are `u64` masks, bit `i` standing for requester `i`.
//! The grant is one-hot and a subset of the request, or zero when nothing
//! is requested.
//!
//! # Policies
//!
//! - **Round-robin**: the search starts strictly after the last granted
//!   index and wraps, so under constant contention every requester wins at
//!   least once every `N` grants.
//! - **Static**: lowest set bit wins. No state.
//!
//! [`Arbiter::select`] is pure and can be called any number of times in a
//! cycle. [`Arbiter::pick`] also commits the round-robin pointer.
//!
//! # Usage
//!
//! ```ignore
//! let mut arb = Arbiter::round_robin(4);
//! assert_eq!(arb.pick(0b1111), 0b0001);
//! assert_eq!(arb.pick(0b1111), 0b0010);
//! ```

/// Largest supported requester count.
pub const MAX_REQUESTERS: usize = 64;

/// Arbitration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterPolicy {
    RoundRobin,
    Static,
}

/// Index of the single set bit in `onehot`, or `None` when zero.
///
/// Panics if more than one bit is set.
pub fn one_hot_to_bin(onehot: u64) -> Option<usize> {
    if onehot == 0 {
        return None;
    }
    assert!(
        onehot.is_power_of_two(),
        "one_hot_to_bin: {:#b} has more than one bit set",
        onehot
    );
    Some(onehot.trailing_zeros() as usize)
}

/// Mask with the low `n` bits set.
pub fn all_ones(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Arbiter over `size` requesters.
#[derive(Debug, Clone)]
pub struct Arbiter {
    policy: ArbiterPolicy,
    size: usize,
    /// Last granted index (round-robin only).
    last: usize,
    /// Grants per requester.
    grants: Vec<u64>,
}

impl Arbiter {
    pub fn new(policy: ArbiterPolicy, size: usize) -> Self {
        assert!(
            (1..=MAX_REQUESTERS).contains(&size),
            "arbiter size {} outside 1..={}",
            size,
            MAX_REQUESTERS
        );
        Self {
            policy,
            size,
            last: size - 1,
            grants: vec![0; size],
        }
    }

    pub fn round_robin(size: usize) -> Self {
        Self::new(ArbiterPolicy::RoundRobin, size)
    }

    pub fn fixed_priority(size: usize) -> Self {
        Self::new(ArbiterPolicy::Static, size)
    }

    pub fn policy(&self) -> ArbiterPolicy {
        self.policy
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Last granted index.
    pub fn last_granted(&self) -> usize {
        self.last
    }

    /// Force the round-robin pointer, e.g. to start a search after `idx`.
    pub fn set_last_granted(&mut self, idx: usize) {
        assert!(idx < self.size, "arbiter index {} out of range", idx);
        self.last = idx;
    }

    /// Grant for `valid` without changing state.
    pub fn select(&self, valid: u64) -> u64 {
        let valid = valid & all_ones(self.size);
        if valid == 0 {
            return 0;
        }
        match self.policy {
            ArbiterPolicy::Static => valid & valid.wrapping_neg(),
            ArbiterPolicy::RoundRobin => {
                for off in 1..=self.size {
                    let idx = (self.last + off) % self.size;
                    if (valid >> idx) & 1 == 1 {
                        return 1 << idx;
                    }
                }
                0
            }
        }
    }

    /// Grant for `valid`, committing the round-robin pointer.
    pub fn pick(&mut self, valid: u64) -> u64 {
        let grant = self.select(valid);
        if let Some(idx) = one_hot_to_bin(grant) {
            if self.policy == ArbiterPolicy::RoundRobin {
                self.last = idx;
            }
            self.grants[idx] += 1;
            log::trace!("arbiter grant {} from {:#b}", idx, valid);
        }
        grant
    }

    /// [`pick`](Self::pick) returning the winner's index.
    pub fn pick_index(&mut self, valid: u64) -> Option<usize> {
        one_hot_to_bin(self.pick(valid))
    }

    /// Grants per requester so far.
    pub fn grants(&self) -> &[u64] {
        &self.grants
    }

    /// Round-robin pointer back to the start; lane 0 wins first.
    pub fn reset(&mut self) {
        self.last = self.size - 1;
        for g in &mut self.grants {
            *g = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_to_bin() {
        assert_eq!(one_hot_to_bin(0), None);
        assert_eq!(one_hot_to_bin(0b1000), Some(3));
        assert_eq!(one_hot_to_bin(1 << 63), Some(63));
    }

    #[test]
    #[should_panic(expected = "more than one bit")]
    fn test_one_hot_to_bin_rejects_multi_hot() {
        one_hot_to_bin(0b0110);
    }

    #[test]
    fn test_round_robin_sequence() {
        let mut arb = Arbiter::round_robin(4);
        arb.set_last_granted(3);
        let masks = [0b1111, 0b1111, 0b1111, 0b1111, 0b0000, 0b1111];
        let picks: Vec<Option<usize>> = masks.iter().map(|&m| arb.pick_index(m)).collect();
        assert_eq!(picks, vec![Some(0), Some(1), Some(2), Some(3), None, Some(0)]);
    }

    #[test]
    fn test_select_is_idempotent() {
        let mut arb = Arbiter::round_robin(4);
        arb.pick(0b0001);
        assert_eq!(arb.select(0b0101), 0b0100);
        assert_eq!(arb.select(0b0101), 0b0100);
        assert_eq!(arb.pick(0b0101), 0b0100);
        assert_eq!(arb.select(0b0101), 0b0001);
    }

    #[test]
    fn test_round_robin_fairness() {
        let n = 5;
        let k = 23;
        let mut arb = Arbiter::round_robin(n);
        for _ in 0..k {
            assert_ne!(arb.pick(all_ones(n)), 0);
        }
        for &g in arb.grants() {
            assert!(g >= (k / n) as u64);
        }
    }

    #[test]
    fn test_static_priority() {
        let mut arb = Arbiter::fixed_priority(8);
        assert_eq!(arb.pick(0b1010_0100), 0b100);
        assert_eq!(arb.pick(0b1010_0100), 0b100);
        assert_eq!(arb.pick(0), 0);
    }

    #[test]
    fn test_ignores_bits_above_size() {
        let arb = Arbiter::round_robin(2);
        assert_eq!(arb.select(0b100), 0);
    }

    #[test]
    fn test_reset_restarts_at_zero() {
        let mut arb = Arbiter::round_robin(3);
        arb.pick(0b111);
        arb.pick(0b111);
        arb.reset();
        assert_eq!(arb.pick(0b111), 0b001);
        assert_eq!(arb.grants(), &[1, 0, 0]);
    }
}
