//! Binning layer: bounded per-worker bin queues and the collective flush.
//!
//! Producer `t` appends into its own `bin_sets[t]`, counted by
//! `sync.bins_used[t]`. A flush is collective and lock-free, coordinated by
//! the single `sync.flush` counter:
//!
//! 1. Phase 1: each worker `fetch_add`s the counter; the returned slot is its
//!    tile id for this epoch and doubles as the announce order. It publishes
//!    its worker id into `bins_ready[slot]` (release) and spins until the
//!    counter reaches N, at which point every producer's bins are visible.
//! 2. Every worker rasterizes every published bin, restricted to scan-lines
//!    `y % N == tile`. With blending off, own bins come first and the rest
//!    follow in announce order; with blending on, the combined bin list is
//!    sorted back-to-front by minimum vertex depth first.
//! 3. Phase 2: each worker `fetch_add`s again. The worker whose increment
//!    lands on `2N - 1` is the last writer: it resets the bin counts, the
//!    ready slots, and finally the counter. Everyone else spins until the
//!    counter drops below N.
//!
//! Overflow back-pressure: a producer with a full bin array starts a flush
//! and blocks in phase 1; every other worker joins at its next primitive
//! boundary (`VertexWorker::poll_flush`) or from its end-of-stream wait loop,
//! so the counter always reaches N and the blocked producer makes progress.
//!
//! Draw termination rides on the same barrier. Workers decrement `sync.busy`
//! when their slice is exhausted; an epoch that observes `busy == 0` after
//! its phase-1 barrier is the draw's last. The read is race-free because all
//! N workers are inside the epoch at that point, and every decrement by a
//! participant is ordered before its announcement.

use crate::context::DepthOrder;
use crate::pipeline::raster::FragmentProcessor;
use crate::pipeline::{DrawTask, MAX_BINNED_PRIMS, READY_SENTINEL};
use crate::shader::BlendMode;
use std::sync::atomic::Ordering;

/// One published bin plus its sort key.
#[derive(Copy, Clone)]
pub(crate) struct BinRef {
    pub producer: u32,
    pub index: u32,
    pub key: f32,
}

/// Appends a bin to the producing worker's array, flushing first when full.
pub(crate) fn push_bin(
    task: &DrawTask,
    worker_id: usize,
    frag: &mut FragmentProcessor,
    bin: crate::pipeline::FragmentBin,
) {
    let used = &task.sync.bins_used[worker_id].0;
    let mut idx = used.load(Ordering::Relaxed) as usize;
    if idx == MAX_BINNED_PRIMS {
        // The producer is counted in `busy`, so this epoch is never final.
        let _ = flush_bins(task, worker_id, frag);
        idx = 0;
        debug_assert_eq!(used.load(Ordering::Relaxed), 0);
    }
    // SAFETY: this worker is the only writer of its own bin array, and slot
    // `idx` is not yet published.
    unsafe { task.bin_sets[worker_id].write(idx, bin) };
    used.store(idx as u32 + 1, Ordering::Release);
}

/// Spins until the announce slot is published and returns the producer id.
#[inline(always)]
fn wait_ready(task: &DrawTask, slot: usize) -> usize {
    let cell = &task.sync.bins_ready[slot].0;
    loop {
        let v = cell.load(Ordering::Acquire);
        if v != READY_SENTINEL {
            return v as usize;
        }
        std::hint::spin_loop();
    }
}

/// Runs one collective flush epoch. Every live worker calls this exactly once
/// per epoch; see the module docs for the protocol.
///
/// Returns whether this was the draw's final epoch. Between the phase-1
/// barrier and the phase-2 reset every worker is inside the epoch, so nobody
/// can be decrementing `busy` concurrently: all participants read the same
/// value and agree on finality.
pub(crate) fn flush_bins(task: &DrawTask, worker_id: usize, frag: &mut FragmentProcessor) -> bool {
    let sync = task.sync;
    let n = task.num_workers as u64;

    // Phase 1: announce readiness. The pre-increment value is this worker's
    // tile id for the epoch.
    let tile = sync.flush.fetch_add(1, Ordering::AcqRel);
    debug_assert!(tile < n, "flush counter out of phase");
    sync.bins_ready[tile as usize]
        .0
        .store(worker_id as u32, Ordering::Release);
    while sync.flush.load(Ordering::Acquire) < n {
        std::hint::spin_loop();
    }

    let is_final = sync.busy.load(Ordering::Acquire) == 0;
    frag.begin_epoch(tile as usize);

    if task.shader.frag.blend == BlendMode::Off {
        // Own bins first (their lines are hot), then the rest in announce
        // order. The depth test makes cross-worker order unobservable.
        raster_producer(task, frag, worker_id);
        for slot in 0..task.num_workers {
            let producer = wait_ready(task, slot);
            if producer != worker_id {
                raster_producer(task, frag, producer);
            }
        }
    } else {
        // Blending needs back-to-front: gather every published bin, sort by
        // minimum vertex depth (ties by bin id), rasterize in that order.
        // Every worker computes the same order independently.
        let mut refs = gather_bins(task);
        sort_bins(&mut refs, task.depth_order);
        for r in &refs {
            frag.raster_one(r.producer as usize, r.index as usize);
        }
    }

    // Phase 2: the worker that completes the epoch resets shared state;
    // everyone else waits for the reset to become visible.
    let prev = sync.flush.fetch_add(1, Ordering::AcqRel);
    if prev == 2 * n - 1 {
        for used in &sync.bins_used {
            used.0.store(0, Ordering::Relaxed);
        }
        for ready in &sync.bins_ready {
            ready.0.store(READY_SENTINEL, Ordering::Relaxed);
        }
        sync.flush.store(0, Ordering::Release);
    } else {
        while sync.flush.load(Ordering::Acquire) >= n {
            std::hint::spin_loop();
        }
    }
    is_final
}

fn raster_producer(task: &DrawTask, frag: &mut FragmentProcessor, producer: usize) {
    let count = task.sync.bins_used[producer].0.load(Ordering::Acquire) as usize;
    debug_assert!(count <= MAX_BINNED_PRIMS);
    for index in 0..count {
        frag.raster_one(producer, index);
    }
}

fn gather_bins(task: &DrawTask) -> Vec<BinRef> {
    let mut refs = Vec::new();
    for slot in 0..task.num_workers {
        let producer = wait_ready(task, slot);
        let count = task.sync.bins_used[producer].0.load(Ordering::Acquire) as usize;
        refs.reserve(count);
        for index in 0..count {
            // SAFETY: slot `index` was published by the phase-1 barrier.
            let bin = unsafe { task.bin_sets[producer].read(index) };
            refs.push(BinRef {
                producer: producer as u32,
                index: index as u32,
                key: bin.min_z,
            });
        }
    }
    refs
}

/// Strict "a rasterizes before b" order: back-to-front by key, ties broken by
/// bin id so every worker agrees.
#[inline(always)]
fn before(a: &BinRef, b: &BinRef, order: DepthOrder) -> bool {
    if a.key != b.key {
        return match order {
            // Normal depth: larger z is farther away, so it goes first.
            DepthOrder::Normal => a.key > b.key,
            DepthOrder::Reversed => a.key < b.key,
        };
    }
    (a.producer, a.index) < (b.producer, b.index)
}

/// Non-recursive quicksort over the bin list.
pub(crate) fn sort_bins(refs: &mut [BinRef], order: DepthOrder) {
    if refs.len() < 2 {
        return;
    }
    let mut stack: Vec<(usize, usize)> = Vec::with_capacity(32);
    stack.push((0, refs.len() - 1));

    while let Some((lo, hi)) = stack.pop() {
        if lo >= hi {
            continue;
        }
        // Hoare partition around the middle element.
        let pivot = refs[lo + (hi - lo) / 2];
        let mut i = lo;
        let mut j = hi;
        let split = loop {
            while before(&refs[i], &pivot, order) {
                i += 1;
            }
            while before(&pivot, &refs[j], order) {
                j -= 1;
            }
            if i >= j {
                break j;
            }
            refs.swap(i, j);
            i += 1;
            j -= 1;
        };
        stack.push((lo, split));
        stack.push((split + 1, hi));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(refs: &[BinRef]) -> Vec<f32> {
        refs.iter().map(|r| r.key).collect()
    }

    #[test]
    fn sort_back_to_front_normal() {
        let mut refs: Vec<BinRef> = [0.3f32, 0.9, 0.1, 0.5, 0.7]
            .iter()
            .enumerate()
            .map(|(i, &key)| BinRef {
                producer: 0,
                index: i as u32,
                key,
            })
            .collect();
        sort_bins(&mut refs, DepthOrder::Normal);
        assert_eq!(keys(&refs), vec![0.9, 0.7, 0.5, 0.3, 0.1]);
    }

    #[test]
    fn sort_back_to_front_reversed() {
        let mut refs: Vec<BinRef> = [0.3f32, 0.9, 0.1]
            .iter()
            .enumerate()
            .map(|(i, &key)| BinRef {
                producer: 0,
                index: i as u32,
                key,
            })
            .collect();
        sort_bins(&mut refs, DepthOrder::Reversed);
        assert_eq!(keys(&refs), vec![0.1, 0.3, 0.9]);
    }

    #[test]
    fn equal_keys_fall_back_to_bin_id() {
        let mut refs: Vec<BinRef> = (0..6)
            .rev()
            .map(|i| BinRef {
                producer: (i % 2) as u32,
                index: i as u32,
                key: 0.5,
            })
            .collect();
        sort_bins(&mut refs, DepthOrder::Normal);
        let ids: Vec<(u32, u32)> = refs.iter().map(|r| (r.producer, r.index)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn large_random_sort_is_ordered() {
        // Deterministic pseudo-random keys; enough elements to exercise many
        // partitions of the explicit stack.
        let mut state = 0x2545F491u32;
        let mut refs = Vec::new();
        for i in 0..999u32 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            refs.push(BinRef {
                producer: i % 7,
                index: i,
                key: (state % 1000) as f32 / 1000.0,
            });
        }
        sort_bins(&mut refs, DepthOrder::Normal);
        for pair in refs.windows(2) {
            assert!(!before(&pair[1], &pair[0], DepthOrder::Normal));
        }
    }
}
