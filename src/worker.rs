// this_file: src/worker.rs

//! Tile workers.
//!
//! Each worker loops: claim a work item, lease a buffer, fill the tile row
//! by row, hand the result to the completion queue. A worker exits as soon
//! as any of those steps reports the pipeline closed, or when the cancel
//! token is set mid-tile. Workers never close a queue themselves; shutdown
//! is the controller's job.

use crate::bufpool::{BufferPool, PooledBuffer};
use crate::compositor::{CompletionItem, CompletionQueue};
use crate::error::{Error, Result};
use crate::iterate::fill_row;
use crate::work_queue::{WorkItem, WorkQueue};
use crossbeam::sync::WaitGroup;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type WorkerBody = Box<dyn FnOnce() -> usize + Send + 'static>;

/// Shared cancellation flag, checked between tile rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a worker needs, shared with the controller.
#[derive(Clone)]
pub struct WorkerContext {
    pub work: Arc<WorkQueue>,
    pub pool: BufferPool,
    pub completions: Arc<CompletionQueue>,
    pub cancel: CancelToken,
    pub max_iterations: u32,
    /// Texels per row of the pixel buffer tiles are composited into
    pub stride: usize,
}

/// Handle to a set of running tile workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<usize>>,
}

impl WorkerPool {
    /// Start `count` workers. Returns once every worker is running.
    ///
    /// If a thread fails to spawn, the context's queues are closed and the
    /// workers already started are joined before the error is returned.
    pub fn spawn(count: usize, ctx: WorkerContext) -> Result<Self> {
        Self::spawn_with(count, ctx, |builder, body| builder.spawn(body))
    }

    fn spawn_with<S>(count: usize, ctx: WorkerContext, mut spawn_thread: S) -> Result<Self>
    where
        S: FnMut(thread::Builder, WorkerBody) -> io::Result<JoinHandle<usize>>,
    {
        let started = WaitGroup::new();
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker_ctx = ctx.clone();
            let ready = started.clone();
            let body: WorkerBody = Box::new(move || {
                drop(ready);
                run(id, worker_ctx)
            });
            let builder = thread::Builder::new().name(format!("tile-worker-{}", id));
            match spawn_thread(builder, body) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!("Spawning tile-worker-{} failed, stopping {} started", id, handles.len());
                    ctx.cancel.cancel();
                    ctx.work.close();
                    ctx.pool.close();
                    ctx.completions.close();
                    if let Err(join_err) = (Self { handles }).join() {
                        warn!("{}", join_err);
                    }
                    return Err(Error::Thread(format!("spawning tile-worker-{}: {}", id, e)));
                }
            }
        }
        started.wait();
        debug!("Started {} tile workers", count);
        Ok(Self { handles })
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. Returns how many tiles each computed.
    /// The queues must already be closed or this blocks forever.
    pub fn join(self) -> Result<Vec<usize>> {
        let mut computed = Vec::with_capacity(self.handles.len());
        let mut panicked = Vec::new();
        for (id, handle) in self.handles.into_iter().enumerate() {
            match handle.join() {
                Ok(n) => computed.push(n),
                Err(_) => panicked.push(id),
            }
        }
        if !panicked.is_empty() {
            return Err(Error::Thread(format!("tile workers {:?} panicked", panicked)));
        }
        Ok(computed)
    }
}

fn run(id: usize, ctx: WorkerContext) -> usize {
    debug!("tile-worker-{} started", id);
    let mut computed = 0;
    loop {
        let Ok(work) = ctx.work.take() else {
            break;
        };
        let Ok(mut buffer) = ctx.pool.acquire() else {
            break;
        };
        if !compute(&ctx, &work, &mut buffer) {
            debug!("tile-worker-{} cancelled mid-tile", id);
            break;
        }
        trace!("tile-worker-{} finished slot {:?}", id, work.slot);
        let done = CompletionItem::new(work, ctx.stride, buffer);
        if ctx.completions.send(done).is_err() {
            break;
        }
        computed += 1;
    }
    debug!("tile-worker-{} exiting after {} tiles", id, computed);
    computed
}

/// Fill every row, giving up between rows once cancelled.
fn compute(ctx: &WorkerContext, work: &WorkItem, buffer: &mut PooledBuffer) -> bool {
    for row in 0..buffer.side() {
        if ctx.cancel.is_cancelled() {
            return false;
        }
        fill_row(buffer, row, work.origin, work.scale, ctx.max_iterations);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::PixelBuffer;
    use crate::grid::{PlanePoint, SlotIndex, TexelPoint};
    use crate::iterate::{iterate, sample_point};
    use std::time::{Duration, Instant};

    fn context(pool_capacity: usize, tile: usize) -> WorkerContext {
        WorkerContext {
            work: Arc::new(WorkQueue::new()),
            pool: BufferPool::new(pool_capacity, tile).unwrap(),
            completions: Arc::new(CompletionQueue::new()),
            cancel: CancelToken::new(),
            max_iterations: 64,
            stride: tile * 4,
        }
    }

    fn work(slot: usize, tile: usize) -> WorkItem {
        WorkItem {
            slot: SlotIndex(slot),
            origin: PlanePoint::new(-1.5 + slot as f64 * 0.4, 0.5),
            scale: 0.05,
            dest: TexelPoint { x: slot * tile, y: 0 },
        }
    }

    fn shutdown(ctx: &WorkerContext, pool: WorkerPool) -> Vec<usize> {
        ctx.cancel.cancel();
        ctx.work.close();
        ctx.pool.close();
        ctx.completions.close();
        pool.join().unwrap()
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn workers_compute_and_return_tiles() {
        let tile = 4;
        let ctx = context(1, tile);
        let workers = WorkerPool::spawn(2, ctx.clone()).unwrap();
        assert_eq!(workers.len(), 2);
        for slot in 0..4 {
            ctx.work.submit(work(slot, tile)).unwrap();
        }

        let pixels = PixelBuffer::new(tile * 4, tile).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut composited = 0;
        while composited < 4 && Instant::now() < deadline {
            composited += ctx
                .completions
                .drain_ready(&mut pixels.lock(), ctx.max_iterations, |_| true)
                .composited;
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(composited, 4);

        // Pixel (1, 2) of slot 3 matches a direct evaluation.
        let w = work(3, tile);
        let c = sample_point(w.origin, w.scale, 1, 2);
        let v = crate::iterate::intensity(iterate(c.re, c.im, 64), 64);
        assert_eq!(pixels.lock().pixel(3 * tile + 1, 2), Some([v, v, v, 255]));

        let counts = shutdown(&ctx, workers);
        assert_eq!(counts.iter().sum::<usize>(), 4);
    }

    #[test]
    fn idle_workers_exit_when_queues_close() {
        let ctx = context(1, 2);
        let workers = WorkerPool::spawn(3, ctx.clone()).unwrap();
        assert_eq!(shutdown(&ctx, workers), vec![0, 0, 0]);
    }

    #[test]
    fn worker_blocked_on_pool_exits_on_close() {
        let ctx = context(1, 2);
        let held = ctx.pool.acquire().unwrap();
        let workers = WorkerPool::spawn(1, ctx.clone()).unwrap();
        ctx.work.submit(work(0, 2)).unwrap();
        thread::sleep(Duration::from_millis(20));
        let counts = shutdown(&ctx, workers);
        assert_eq!(counts, vec![0]);
        drop(held);
    }

    #[test]
    fn failed_spawn_closes_queues_and_joins_started_workers() {
        let ctx = context(1, 2);
        let mut attempts = 0;
        let result = WorkerPool::spawn_with(4, ctx.clone(), |builder, body| {
            attempts += 1;
            if attempts == 3 {
                return Err(io::Error::new(io::ErrorKind::Other, "thread limit"));
            }
            builder.spawn(body)
        });
        assert!(matches!(result, Err(Error::Thread(_))));
        assert_eq!(attempts, 3);
        assert!(ctx.pool.acquire().is_err());
        assert!(ctx.work.submit(work(0, 2)).is_err());
        // Only this test still holds the context once the started workers are joined.
        assert_eq!(Arc::strong_count(&ctx.work), 1);
        assert_eq!(Arc::strong_count(&ctx.completions), 1);
    }

    #[test]
    fn cancelled_worker_abandons_tile() {
        let ctx = context(1, 8);
        ctx.cancel.cancel();
        let workers = WorkerPool::spawn(1, ctx.clone()).unwrap();
        ctx.work.submit(work(0, 8)).unwrap();
        let counts = workers.join().unwrap();
        assert_eq!(counts, vec![0]);
        assert!(ctx.completions.is_empty());
        assert_eq!(ctx.pool.stats().available, 1);
    }
}
