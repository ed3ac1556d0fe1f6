//! Maxmemory eviction (§4.10): policy selection plus sampled-K candidate
//! selection. Grounded on spec.md §4.10 directly — no single
//! `original_source/` file in the retrieved set covers this in isolation,
//! though `tests/test_maxmemory.cpp` names the same policy set.

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::envelope::Envelope;

pub const SAMPLE_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    VolatileLru,
    VolatileLfu,
    VolatileRandom,
    VolatileTtl,
    AllKeysLru,
    AllKeysLfu,
    AllKeysRandom,
}

impl EvictionPolicy {
    /// Only keys carrying a TTL are eviction candidates under the
    /// `Volatile*` policies (§4.10).
    pub fn volatile_only(self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileRandom
                | EvictionPolicy::VolatileTtl
        )
    }
}

/// Picks an eviction victim among a sample of `SAMPLE_K` candidate
/// (key, envelope) pairs, rather than scanning the full key space.
pub struct Evictor {
    policy: EvictionPolicy,
}

impl Evictor {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the key to evict from a restricted candidate set (already
    /// filtered to volatile keys by the caller, when the policy requires
    /// it), or `None` if eviction should not proceed (NOEVICTION, or no
    /// candidates).
    pub fn select_victim<'a>(&self, candidates: &'a [(Vec<u8>, Envelope)]) -> Option<&'a [u8]> {
        if self.policy == EvictionPolicy::NoEviction || candidates.is_empty() {
            return None;
        }

        let mut rng = thread_rng();
        let sample: Vec<&(Vec<u8>, Envelope)> = {
            let mut idxs: Vec<usize> = (0..candidates.len()).collect();
            idxs.shuffle(&mut rng);
            idxs.into_iter().take(SAMPLE_K).map(|i| &candidates[i]).collect()
        };

        let victim = match self.policy {
            EvictionPolicy::VolatileLru | EvictionPolicy::AllKeysLru => {
                sample.into_iter().min_by_key(|(_, e)| e.last_access)
            }
            EvictionPolicy::VolatileLfu | EvictionPolicy::AllKeysLfu => {
                sample.into_iter().min_by_key(|(_, e)| e.access_freq)
            }
            EvictionPolicy::VolatileTtl => {
                sample.into_iter().min_by_key(|(_, e)| e.expire_at.unwrap_or(u64::MAX))
            }
            EvictionPolicy::VolatileRandom | EvictionPolicy::AllKeysRandom => sample.first().copied(),
            EvictionPolicy::NoEviction => None,
        };
        victim.map(|(k, _)| k.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn env_with(last_access: u64, access_freq: u64) -> Envelope {
        let mut e = Envelope::new(Value::Str(b"v".to_vec()), 1);
        e.last_access = last_access;
        e.access_freq = access_freq;
        e
    }

    #[test]
    fn noeviction_never_selects_a_victim() {
        let evictor = Evictor::new(EvictionPolicy::NoEviction);
        let candidates = vec![(b"a".to_vec(), env_with(1, 1))];
        assert!(evictor.select_victim(&candidates).is_none());
    }

    #[test]
    fn lru_picks_the_least_recently_accessed() {
        let evictor = Evictor::new(EvictionPolicy::AllKeysLru);
        let candidates =
            vec![(b"old".to_vec(), env_with(1, 5)), (b"new".to_vec(), env_with(100, 5))];
        assert_eq!(evictor.select_victim(&candidates), Some(b"old".as_slice()));
    }

    #[test]
    fn lfu_picks_the_least_frequently_used() {
        let evictor = Evictor::new(EvictionPolicy::AllKeysLfu);
        let candidates =
            vec![(b"cold".to_vec(), env_with(1, 1)), (b"hot".to_vec(), env_with(1, 50))];
        assert_eq!(evictor.select_victim(&candidates), Some(b"cold".as_slice()));
    }

    #[test]
    fn volatile_policy_flag_matches_variant() {
        assert!(EvictionPolicy::VolatileLru.volatile_only());
        assert!(!EvictionPolicy::AllKeysLru.volatile_only());
    }
}
