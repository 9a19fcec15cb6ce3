use crate::patterns::{self, AnalysisResult};
use crate::stats::FreqTable;
use ahash::{AHashMap, RandomState};
use std::hash::{BuildHasher, Hasher};

pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

// Same fixed-seed discipline as the pipeline fingerprints: keys must be
// deterministic across runs.
const KEY_SEEDS: (u64, u64, u64, u64) = (
    0x51_7c_c1_b7_27_22_0a_94,
    0xfe_13_ab_e8_fa_9a_6e_e0,
    0x6c_62_27_2e_9c_d0_4d_63,
    0x2f_86_5b_df_91_d7_d6_a8,
);

/// Bounded key-value store with no eviction: inserts are rejected once
/// capacity is reached. Hits must be bit-for-bit identical to a fresh
/// computation, so only deterministic values belong here.
pub struct ResultCache<T> {
    map: AHashMap<u64, T>,
    capacity: usize,
}

impl<T> ResultCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self { map: AHashMap::new(), capacity }
    }

    pub fn get(&self, key: u64) -> Option<&T> {
        self.map.get(&key)
    }

    /// Store a value unless the cache is full; replacing an existing key is
    /// always allowed. Returns whether the value was stored.
    pub fn insert(&mut self, key: u64, value: T) -> bool {
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, value);
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.map.len() >= self.capacity
    }
}

/// Content key for a set of frequency tables: table sizes, totals, and the
/// heaviest entry of each table. O(1) in table size (totals are cached sums
/// over small tables), deliberately not a hash of every entry.
pub fn stats_key(processes: &FreqTable, operations: &FreqTable, results: &FreqTable) -> u64 {
    let state = RandomState::with_seeds(KEY_SEEDS.0, KEY_SEEDS.1, KEY_SEEDS.2, KEY_SEEDS.3);
    let mut hasher = state.build_hasher();
    for table in [processes, operations, results] {
        hasher.write_usize(table.len());
        hasher.write_usize(table.total());
        if let Some(top) = table.top_n(1).first() {
            hasher.write(top.value.as_bytes());
            hasher.write_usize(top.count);
        }
        hasher.write_u8(0x1f);
    }
    hasher.finish()
}

/// Memoizing front for `patterns::analyze`. One engine per logical pipeline
/// run, or shared deliberately across runs for cross-run reuse.
pub struct PatternEngine {
    cache: ResultCache<AnalysisResult>,
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl PatternEngine {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { cache: ResultCache::new(capacity) }
    }

    pub fn analyze(
        &mut self,
        processes: &FreqTable,
        operations: &FreqTable,
        results: &FreqTable,
    ) -> AnalysisResult {
        let key = stats_key(processes, operations, results);
        if let Some(hit) = self.cache.get(key) {
            return hit.clone();
        }
        let result = patterns::analyze(processes, operations, results);
        self.cache.insert(key, result.clone());
        result
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }
}
