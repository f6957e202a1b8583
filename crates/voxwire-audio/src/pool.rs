//! Adaptive, core-sharded buffer pool for packet construction.
//!
//! Every outbound packet is built in a buffer rented here. The contract is
//! deliberately one-sided: `rent` never blocks and never fails — when every
//! slot collection is empty it allocates fresh memory instead. Returns that
//! find every collection full simply drop the buffer.
//!
//! Layout: a fixed array of per-core slot collections selected by a
//! thread-affinity hash masked down to the live shard count, plus a growable
//! list of global overflow collections. A periodic sampler reads usage
//! counters and resizes: the shard mask doubles while the pool is below its
//! fully-grown threshold, after which whole global collections are added or
//! removed in pairs around a per-connection capacity target.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use voxwire_protocol::rtp;
use voxwire_protocol::voice::{FrameDuration, MAX_OPUS_FRAME, MAX_OPUS_PACKET, SILENCE_PAYLOAD};

/// How often the usage sampler runs.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(3);

/// Slots per per-core collection.
const SHARD_SLOTS: usize = 32;

/// Shard count at which doubling stops and the next growth step jumps
/// straight to [`MAX_SHARDS`].
const SHARD_DOUBLING_CAP: usize = 64;

/// Shard count of a fully-grown pool. Power of two, fixed at construction.
const MAX_SHARDS: usize = 256;

/// Slots per global overflow collection.
const GLOBAL_SLOTS: usize = 128;

/// Global collections are added and removed this many at a time.
const GLOBAL_STEP: usize = 2;

/// Retarget tolerance in buffers, to keep the sampler from oscillating.
const HYSTERESIS_BUFFERS: usize = 256;

/// Capacity target per estimated active connection.
const TARGET_PER_CONNECTION: usize = 128;

/// Below this idle ratio a not-yet-fully-grown pool doubles its shard set.
const GROW_IDLE_RATIO: f64 = 0.10;

/// Above this idle ratio a fully-grown pool retargets its global capacity.
const RETARGET_IDLE_RATIO: f64 = 0.65;

/// Named pool tier; fixes the buffer length for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolTier {
    Ms20,
    Ms120,
    Silence,
}

impl PoolTier {
    /// Fixed buffer length for this tier: RTP header plus the worst-case
    /// Opus payload the tier can carry.
    pub fn buffer_len(self) -> usize {
        match self {
            PoolTier::Ms20 => rtp::HEADER_LEN + MAX_OPUS_FRAME,
            PoolTier::Ms120 => rtp::HEADER_LEN + MAX_OPUS_PACKET,
            PoolTier::Silence => rtp::HEADER_LEN + SILENCE_PAYLOAD.len(),
        }
    }

    /// Buffers one connection is expected to return per sample interval,
    /// used to estimate the active-connection count from the return rate.
    fn returns_per_connection(self) -> usize {
        match self {
            // 50 packets/s at 20 ms frames.
            PoolTier::Ms20 => 150,
            PoolTier::Ms120 => 25,
            // Silence frames are only sent at the tail of a transmission.
            PoolTier::Silence => 10,
        }
    }
}

impl From<FrameDuration> for PoolTier {
    fn from(duration: FrameDuration) -> Self {
        match duration {
            FrameDuration::Ms20 => PoolTier::Ms20,
            FrameDuration::Ms120 => PoolTier::Ms120,
        }
    }
}

type Slot = Box<[u8]>;

/// One tier of reusable packet buffers. See the module docs for the layout.
pub struct PacketPool {
    tier: PoolTier,
    buf_len: usize,
    /// All shards exist up front; `shard_mask` bounds the live subset.
    shards: Box<[ArrayQueue<Slot>]>,
    shard_mask: AtomicUsize,
    /// Overflow collections, touched by rent/return only via `try_read` so
    /// a concurrent resize can never stall them.
    globals: RwLock<Vec<Arc<ArrayQueue<Slot>>>>,
    outstanding: AtomicUsize,
    returns_since_sample: AtomicUsize,
}

impl PacketPool {
    pub fn new(tier: PoolTier) -> Arc<Self> {
        let shards: Box<[ArrayQueue<Slot>]> = (0..MAX_SHARDS)
            .map(|_| ArrayQueue::new(SHARD_SLOTS))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let initial_shards = cores.next_power_of_two().min(MAX_SHARDS);

        Arc::new(Self {
            tier,
            buf_len: tier.buffer_len(),
            shards,
            shard_mask: AtomicUsize::new(initial_shards - 1),
            globals: RwLock::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            returns_since_sample: AtomicUsize::new(0),
        })
    }

    pub fn tier(&self) -> PoolTier {
        self.tier
    }

    /// Rent a buffer. Never blocks, never fails: probes the caller's
    /// core-affine shard, then the global collections, then allocates.
    pub fn rent(self: &Arc<Self>) -> PacketLease {
        let buf = self
            .try_pop()
            .unwrap_or_else(|| vec![0u8; self.buf_len].into_boxed_slice());
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PacketLease {
            pool: Arc::clone(self),
            buf: Some(buf),
            filled: 0,
        }
    }

    fn try_pop(&self) -> Option<Slot> {
        let mask = self.shard_mask.load(Ordering::Acquire);
        if let Some(buf) = self.shards[core_hint() & mask].pop() {
            return Some(buf);
        }
        if let Ok(globals) = self.globals.try_read() {
            for queue in globals.iter() {
                if let Some(buf) = queue.pop() {
                    return Some(buf);
                }
            }
        }
        None
    }

    /// Return a buffer's memory to the pool. Buffers whose length does not
    /// match this tier are silently absorbed; a return that finds every
    /// collection full drops the buffer.
    pub fn recycle(&self, buf: Slot) {
        if buf.len() != self.buf_len {
            trace!(tier = ?self.tier, len = buf.len(), "absorbing foreign-sized buffer");
            return;
        }
        self.returns_since_sample.fetch_add(1, Ordering::Relaxed);

        // Affine shard first, then the rest of the live shards, then the
        // overflow collections.
        let mask = self.shard_mask.load(Ordering::Acquire);
        let start = core_hint() & mask;
        let mut buf = buf;
        for offset in 0..=mask {
            match self.shards[(start + offset) & mask].push(buf) {
                Ok(()) => return,
                Err(rejected) => buf = rejected,
            }
        }
        if let Ok(globals) = self.globals.try_read() {
            for queue in globals.iter() {
                match queue.push(buf) {
                    Ok(()) => return,
                    Err(rejected) => buf = rejected,
                }
            }
        }
        // Every collection full: let the allocation go.
        drop(buf);
    }

    /// Buffers rented and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Buffers currently sitting idle in slot collections.
    pub fn pooled(&self) -> usize {
        let mask = self.shard_mask.load(Ordering::Acquire);
        let mut count: usize = self.shards[..=mask].iter().map(ArrayQueue::len).sum();
        if let Ok(globals) = self.globals.try_read() {
            count += globals.iter().map(|q| q.len()).sum::<usize>();
        }
        count
    }

    /// Total declared slot capacity across live shards and globals.
    pub fn capacity(&self) -> usize {
        let live_shards = self.shard_mask.load(Ordering::Acquire) + 1;
        let mut capacity = live_shards * SHARD_SLOTS;
        if let Ok(globals) = self.globals.try_read() {
            capacity += globals.len() * GLOBAL_SLOTS;
        }
        capacity
    }

    fn fully_grown(&self) -> bool {
        self.shard_mask.load(Ordering::Acquire) + 1 >= MAX_SHARDS
    }

    /// One sampler pass: read the usage counters and resize if warranted.
    /// Runs on the maintenance task; safe to call directly.
    pub fn resample(&self) {
        let returned = self.returns_since_sample.swap(0, Ordering::Relaxed);
        let pooled = self.pooled();
        let capacity = self.capacity();
        let estimated_connections = returned.div_ceil(self.tier.returns_per_connection());
        let idle = if capacity == 0 {
            1.0
        } else {
            pooled as f64 / capacity as f64
        };
        trace!(
            tier = ?self.tier,
            pooled,
            capacity,
            returned,
            estimated_connections,
            "pool sample"
        );

        if !self.fully_grown() {
            if idle < GROW_IDLE_RATIO {
                self.grow_shards();
            }
            return;
        }
        if idle <= RETARGET_IDLE_RATIO {
            // Under-filled but not critical: leave the structure alone.
            return;
        }

        let target = estimated_connections.max(1) * TARGET_PER_CONNECTION;
        let base = MAX_SHARDS * SHARD_SLOTS;
        let Ok(mut globals) = self.globals.write() else {
            return;
        };
        loop {
            let declared = base + globals.len() * GLOBAL_SLOTS;
            if declared + HYSTERESIS_BUFFERS < target {
                for _ in 0..GLOBAL_STEP {
                    globals.push(Arc::new(ArrayQueue::new(GLOBAL_SLOTS)));
                }
            } else if declared > target + HYSTERESIS_BUFFERS && globals.len() >= GLOBAL_STEP {
                // Pooled buffers inside the removed collections are freed;
                // outstanding ones still return through the remaining set.
                for _ in 0..GLOBAL_STEP {
                    globals.pop();
                }
            } else {
                break;
            }
        }
        debug!(
            tier = ?self.tier,
            globals = globals.len(),
            target,
            "pool retargeted global capacity"
        );
    }

    fn grow_shards(&self) {
        let live = self.shard_mask.load(Ordering::Acquire) + 1;
        if live >= MAX_SHARDS {
            return;
        }
        let next = if live < SHARD_DOUBLING_CAP {
            (live * 2).min(MAX_SHARDS)
        } else {
            MAX_SHARDS
        };
        self.shard_mask.store(next - 1, Ordering::Release);
        debug!(tier = ?self.tier, shards = next, "pool doubled per-core shard set");
    }

    /// Spawn the periodic sampler on the current tokio runtime. The task is
    /// aborted when the returned guard drops.
    pub fn spawn_maintenance(self: &Arc<Self>) -> PoolMaintenance {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the first sample
            // covers a whole interval.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.resample();
            }
        });
        PoolMaintenance { handle }
    }
}

/// Guard for the background sampler; aborts the task on drop.
pub struct PoolMaintenance {
    handle: JoinHandle<()>,
}

impl Drop for PoolMaintenance {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Per-thread shard affinity. A hash of the thread id stands in for the
/// core index; what matters is that one thread keeps hitting one shard.
fn core_hint() -> usize {
    thread_local! {
        static HINT: usize = {
            let mut hasher = DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            hasher.finish() as usize
        };
    }
    HINT.with(|hint| *hint)
}

/// A rented buffer with exactly one owner; the memory returns to its pool
/// when the lease drops. Dereferences to the filled prefix.
pub struct PacketLease {
    pool: Arc<PacketPool>,
    buf: Option<Slot>,
    filled: usize,
}

impl PacketLease {
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// The whole backing buffer, for filling.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    /// Mark the first `len` bytes as the packet contents.
    pub fn set_filled(&mut self, len: usize) {
        assert!(len <= self.capacity(), "filled length exceeds buffer");
        self.filled = len;
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }
}

impl std::ops::Deref for PacketLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf.as_deref().unwrap_or(&[])[..self.filled]
    }
}

impl Drop for PacketLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
            self.pool.recycle(buf);
        }
    }
}

/// The three pool tiers of one voice engine, constructed once and passed
/// into encoder construction — no ambient global pools.
pub struct VoicePools {
    pub ms20: Arc<PacketPool>,
    pub ms120: Arc<PacketPool>,
    pub silence: Arc<PacketPool>,
}

impl VoicePools {
    pub fn new() -> Self {
        Self {
            ms20: PacketPool::new(PoolTier::Ms20),
            ms120: PacketPool::new(PoolTier::Ms120),
            silence: PacketPool::new(PoolTier::Silence),
        }
    }

    pub fn for_duration(&self, duration: FrameDuration) -> &Arc<PacketPool> {
        match duration {
            FrameDuration::Ms20 => &self.ms20,
            FrameDuration::Ms120 => &self.ms120,
        }
    }
}

impl Default for VoicePools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_and_return_restores_baseline() {
        let pool = PacketPool::new(PoolTier::Ms20);
        let baseline = pool.outstanding();

        let leases: Vec<_> = (0..100).map(|_| pool.rent()).collect();
        assert_eq!(pool.outstanding(), baseline + 100);
        for lease in &leases {
            assert_eq!(lease.capacity(), PoolTier::Ms20.buffer_len());
        }
        drop(leases);
        assert_eq!(pool.outstanding(), baseline);
        // The returned buffers are now pooled and get reused.
        assert!(pool.pooled() > 0);
        let before = pool.pooled();
        let lease = pool.rent();
        assert_eq!(pool.pooled(), before - 1);
        drop(lease);
    }

    #[test]
    fn lease_tracks_filled_region() {
        let pool = PacketPool::new(PoolTier::Silence);
        let mut lease = pool.rent();
        assert!(lease.is_empty());
        lease.buf_mut()[..3].copy_from_slice(&[1, 2, 3]);
        lease.set_filled(3);
        assert_eq!(&*lease, &[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "filled length exceeds buffer")]
    fn overfilled_lease_panics() {
        let pool = PacketPool::new(PoolTier::Silence);
        let mut lease = pool.rent();
        lease.set_filled(lease.capacity() + 1);
    }

    #[test]
    fn foreign_sized_buffer_is_absorbed() {
        let pool = PacketPool::new(PoolTier::Ms20);
        let before = pool.pooled();
        pool.recycle(vec![0u8; 5].into_boxed_slice());
        assert_eq!(pool.pooled(), before);
    }

    #[test]
    fn drained_pool_grows_until_fully_grown() {
        let pool = PacketPool::new(PoolTier::Silence);
        let mut capacity = pool.capacity();
        // An empty pool has idle ratio 0, which is below the growth
        // threshold; each sample doubles the shard set.
        while !pool.fully_grown() {
            pool.resample();
            let grown = pool.capacity();
            assert!(grown > capacity);
            capacity = grown;
        }
        assert_eq!(capacity, MAX_SHARDS * SHARD_SLOTS);
        // Fully grown with idle below the retarget threshold: no change.
        pool.resample();
        assert_eq!(pool.capacity(), capacity);
    }

    #[test]
    fn retarget_adds_and_removes_global_collections() {
        let pool = PacketPool::new(PoolTier::Silence);
        while !pool.fully_grown() {
            pool.resample();
        }
        let base = pool.capacity();

        // A busy interval: 18k returns at 10 per connection estimates 1800
        // connections, targeting 1800 * 128 buffers.
        for _ in 0..18_000 {
            pool.recycle(vec![0u8; pool.buf_len].into_boxed_slice());
        }
        assert_eq!(pool.pooled(), base); // collections are full
        pool.resample();
        let expanded = pool.capacity();
        assert!(expanded > base);
        assert!(expanded.abs_diff(1800 * TARGET_PER_CONNECTION) <= HYSTERESIS_BUFFERS);

        // Fill the new collections, then simulate an interval with no
        // traffic at all: high idle, tiny target, globals come back out.
        for _ in 0..(expanded - base) {
            pool.recycle(vec![0u8; pool.buf_len].into_boxed_slice());
        }
        assert!(pool.pooled() as f64 / pool.capacity() as f64 > RETARGET_IDLE_RATIO);
        pool.returns_since_sample.store(0, Ordering::Relaxed);
        pool.resample();
        assert_eq!(pool.capacity(), base);
        assert_eq!(pool.globals.read().unwrap().len(), 0);
    }

    #[test]
    fn concurrent_rent_and_return() {
        let pool = PacketPool::new(PoolTier::Ms20);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let mut lease = pool.rent();
                    lease.buf_mut()[0] = 0xAB;
                    lease.set_filled(1);
                    drop(lease);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn maintenance_task_stops_on_drop() {
        let pool = PacketPool::new(PoolTier::Ms20);
        let maintenance = pool.spawn_maintenance();
        drop(maintenance);
        // The abort must tear the task down without disturbing the pool.
        let lease = pool.rent();
        assert_eq!(pool.outstanding(), 1);
        drop(lease);
    }

    #[test]
    fn pools_are_per_duration_handles() {
        let pools = VoicePools::new();
        assert_eq!(pools.for_duration(FrameDuration::Ms20).tier(), PoolTier::Ms20);
        assert_eq!(pools.for_duration(FrameDuration::Ms120).tier(), PoolTier::Ms120);
        assert_eq!(pools.silence.tier(), PoolTier::Silence);
    }
}
