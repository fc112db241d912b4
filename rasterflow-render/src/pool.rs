//! Fixed-size worker pool.
//!
//! The pool holds `N - 1` OS threads; the thread issuing a draw participates
//! as worker 0, so `num_workers` counts it too. Every thread has a fixed
//! worker id, and a dispatch is one shared closure invoked once per worker
//! with that id. There is no job queue: the pool publishes the closure in a
//! single generation-stamped slot, rings a doorbell, and the dispatching call
//! blocks on a completion barrier until every worker has run it. That barrier
//! is also what lets the closure borrow caller-stack data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::JoinHandle;

use log::info;

/// Doorbell spins before a worker parks on the condvar. Draw dispatch is
/// bursty, and a condvar round-trip costs more than the handoff itself.
const DOORBELL_SPINS: u32 = 4000;

/// One published dispatch: the shared per-worker closure and the barrier
/// every participant (workers and caller) completes it on.
#[derive(Clone)]
struct Dispatch {
    /// Lifetime-erased borrow; [`WorkerPool::run`] keeps the real closure
    /// alive past the completion barrier.
    run: &'static (dyn Fn(usize) + Sync),
    done: Arc<Barrier>,
}

/// The slot the pool publishes dispatches through. `generation` increments
/// once per dispatch; a worker runs a dispatch iff its stamp is new to it.
struct Slot {
    generation: u64,
    dispatch: Option<Dispatch>,
}

/// State shared between the pool handle and its threads.
struct Doorbell {
    /// Mirror of `Slot::generation` for the lock-free spin phase.
    generation: AtomicU64,
    shutdown: AtomicBool,
    slot: Mutex<Slot>,
    ring: Condvar,
}

impl Doorbell {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                generation: 0,
                dispatch: None,
            }),
            ring: Condvar::new(),
        }
    }

    /// Publishes a dispatch and wakes every parked worker.
    fn publish(&self, dispatch: Dispatch) {
        {
            let mut slot = self.slot.lock().unwrap();
            slot.generation += 1;
            slot.dispatch = Some(dispatch);
            self.generation.store(slot.generation, Ordering::Release);
        }
        self.ring.notify_all();
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Take the lock so no worker can park between its shutdown check and
        // the wait; then every parked worker is guaranteed a wakeup.
        drop(self.slot.lock().unwrap());
        self.ring.notify_all();
    }
}

/// Body of one pool thread. `worker_id` is fixed for the thread's lifetime;
/// each published generation is run exactly once with it.
fn worker_loop(bell: &Doorbell, worker_id: usize) {
    let mut seen = 0u64;
    loop {
        // Spin on the generation mirror first.
        let mut spins = 0u32;
        while spins < DOORBELL_SPINS && bell.generation.load(Ordering::Acquire) == seen {
            if bell.shutdown.load(Ordering::Acquire) {
                return;
            }
            spins += 1;
            std::hint::spin_loop();
        }

        // Park until the generation moves (or confirm it already has).
        let dispatch = {
            let mut slot = bell.slot.lock().unwrap();
            loop {
                if bell.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if slot.generation != seen {
                    seen = slot.generation;
                    break slot.dispatch.clone();
                }
                slot = bell.ring.wait(slot).unwrap();
            }
        };

        if let Some(dispatch) = dispatch {
            (dispatch.run)(worker_id);
            dispatch.done.wait();
        }
    }
}

/// A raw pointer workers may share during one dispatch.
///
/// The dispatching call owns the pointee, partitions access by worker id, and
/// joins every job before returning, which is what justifies `Send`/`Sync`.
#[derive(Copy, Clone)]
pub(crate) struct SendPtr<T>(pub *mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// The draw-call worker pool.
pub(crate) struct WorkerPool {
    bell: Arc<Doorbell>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool for `num_workers` total workers (`num_workers - 1`
    /// threads; the caller is the extra worker).
    pub(crate) fn new(num_workers: usize) -> Self {
        let mut pool = Self {
            bell: Arc::new(Doorbell::new()),
            threads: Vec::new(),
        };
        pool.resize(num_workers);
        pool
    }

    /// Total worker count, including the calling thread.
    #[inline(always)]
    pub(crate) fn num_workers(&self) -> usize {
        self.threads.len() + 1
    }

    /// Grows or shrinks to `num_workers` total workers. Idempotent.
    pub(crate) fn resize(&mut self, num_workers: usize) {
        let target_threads = num_workers.saturating_sub(1);
        if target_threads == self.threads.len() {
            return;
        }
        // Shrinking re-creates the doorbell so parked threads drain out
        // cleanly; there is never a dispatch in flight between calls.
        if target_threads < self.threads.len() {
            self.bell.shutdown();
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
            self.bell = Arc::new(Doorbell::new());
        }
        while self.threads.len() < target_threads {
            let bell = Arc::clone(&self.bell);
            let worker_id = self.threads.len() + 1;
            let handle = std::thread::Builder::new()
                .name(format!("rasterflow-worker-{worker_id}"))
                .spawn(move || worker_loop(&bell, worker_id))
                .expect("spawning render worker");
            self.threads.push(handle);
        }
        info!("worker pool resized to {} workers", self.num_workers());
    }

    /// Runs `f(worker_id)` on every worker, ids `0..num_workers`, with the
    /// calling thread as worker 0. Returns after every invocation completes.
    pub(crate) fn run(&self, f: &(dyn Fn(usize) + Sync)) {
        let n = self.num_workers();
        if n == 1 {
            f(0);
            return;
        }

        let barrier = Arc::new(Barrier::new(n));
        // SAFETY: the lifetime is erased so the dispatch satisfies 'static.
        // The barrier below keeps `f` (and everything it borrows) alive until
        // every worker has finished using it.
        let f_static: &'static (dyn Fn(usize) + Sync) = unsafe {
            std::mem::transmute::<&(dyn Fn(usize) + Sync), &'static (dyn Fn(usize) + Sync)>(f)
        };

        self.bell.publish(Dispatch {
            run: f_static,
            done: Arc::clone(&barrier),
        });

        f(0);
        barrier.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.bell.shutdown();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn every_worker_runs_once() {
        let pool = WorkerPool::new(4);
        let mut seen = [0u32; 4];
        let counters: Vec<AtomicU32> = (0..4).map(|_| AtomicU32::new(0)).collect();
        pool.run(&|id| {
            counters[id].fetch_add(1, Ordering::Relaxed);
        });
        for (i, c) in counters.iter().enumerate() {
            seen[i] = c.load(Ordering::Relaxed);
        }
        assert_eq!(seen, [1, 1, 1, 1]);
    }

    #[test]
    fn consecutive_dispatches_each_run_everywhere() {
        let pool = WorkerPool::new(3);
        let hits = AtomicU32::new(0);
        for _ in 0..50 {
            pool.run(&|_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(hits.load(Ordering::Relaxed), 150);
    }

    #[test]
    fn resize_is_idempotent() {
        let mut pool = WorkerPool::new(3);
        assert_eq!(pool.num_workers(), 3);
        pool.resize(3);
        assert_eq!(pool.num_workers(), 3);
        pool.resize(1);
        assert_eq!(pool.num_workers(), 1);
        pool.resize(2);
        let hits = AtomicU32::new(0);
        pool.run(&|_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
