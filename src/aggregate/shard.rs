use std::collections::HashMap;
use std::hash::Hasher;
use std::num::NonZeroUsize;

use parking_lot::Mutex;
use rustc_hash::FxHasher;

use super::quarter::Quarter;
use super::Consolidated;

/// Running totals for one entity, keyed by quarter.
pub type QuarterTotals = HashMap<Quarter, f64>;

/// Entity accumulator owned by a single shard.
type ShardData = HashMap<u64, QuarterTotals>;

/// Maximum decimal digits of a `u64`.
pub(crate) const MAX_DECIMAL_DIGITS: usize = 20;

/// Fixed-size set of independently locked accumulators.
///
/// Every entity is owned by exactly one shard, chosen by a stable hash of
/// its decimal form. Writers only contend when they hash to the same shard;
/// there is no table-wide lock.
pub struct ShardTable {
    shards: Box<[Mutex<ShardData>]>,
}

impl std::fmt::Debug for ShardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardTable")
            .field("num_shards", &self.shards.len())
            .finish()
    }
}

impl ShardTable {
    /// Allocates `num_shards` empty shards.
    pub fn new(num_shards: NonZeroUsize) -> Self {
        let shards = (0..num_shards.get())
            .map(|_| Mutex::new(ShardData::new()))
            .collect();
        Self { shards }
    }

    /// Replaces every shard with `num_shards` empty ones, discarding all
    /// accumulated state.
    pub fn initialize(&mut self, num_shards: NonZeroUsize) {
        *self = Self::new(num_shards);
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard that owns `entity`.
    pub fn route(&self, entity: u64) -> usize {
        shard_index(entity, self.shards.len())
    }

    /// Adds `measurement` to the running total of `(entity, quarter)`.
    pub fn add(&self, entity: u64, quarter: Quarter, measurement: f64) {
        let mut shard = self.shards[self.route(entity)].lock();
        *shard
            .entry(entity)
            .or_default()
            .entry(quarter)
            .or_insert(0.0) += measurement;
    }

    /// Current running total of `(entity, quarter)`, if any reading landed there.
    pub fn get(&self, entity: u64, quarter: Quarter) -> Option<f64> {
        let shard = self.shards[self.route(entity)].lock();
        shard.get(&entity).and_then(|q| q.get(&quarter)).copied()
    }

    /// Number of entities owned by the shard at `index`.
    pub fn shard_len(&self, index: usize) -> Option<usize> {
        self.shards.get(index).map(|shard| shard.lock().len())
    }

    /// Merges all shards into a single result.
    ///
    /// Must only run once writers are finished. Shard contents are left in
    /// place, so repeated calls without writes in between return equal
    /// results.
    pub fn drain(&self) -> Consolidated {
        let mut result = Consolidated::default();
        for shard in self.shards.iter() {
            let data = shard.lock();
            for (entity, quarters) in data.iter() {
                for (quarter, total) in quarters {
                    result.add(*entity, *quarter, *total);
                }
            }
        }
        result
    }
}

/// Stable shard index for `entity` among `num_shards` shards.
pub fn shard_index(entity: u64, num_shards: usize) -> usize {
    let mut buf = [0u8; MAX_DECIMAL_DIGITS];
    let mut hasher = FxHasher::default();
    hasher.write(decimal_digits(entity, &mut buf));
    (hasher.finish() % num_shards as u64) as usize
}

pub(crate) fn decimal_digits(mut n: u64, buf: &mut [u8; MAX_DECIMAL_DIGITS]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[pos..]
}
