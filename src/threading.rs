//! Partitioned parallel dispatch.
//!
//! Every threaded kernel in the crate funnels through [`run_partitioned`]:
//! the row-major iteration space `[0, n)` is split into one contiguous range
//! per configured thread, each range runs as an independent task on the
//! context's pool, and the calling thread blocks until all tasks return.
//! Below the threshold (or with a single thread) the work runs directly on the
//! calling thread with no pool involvement.
//!
//! A kernel invoked from inside a rayon worker also runs on the calling
//! thread. The kernel holds its buffer locks for the whole call, and a worker
//! waiting at a join steals queued jobs; a stolen job locking the same buffer
//! would wait on a frame further down its own stack.

use std::ops::Range;

use rayon::prelude::*;

use crate::context::ExecutionContext;
use crate::Result;

/// Split `[0, n)` into `parts` contiguous ranges.
///
/// Range `i` is `[i*q, (i+1)*q)` with `q = n / parts`; the last range absorbs
/// the remainder, so every index is covered exactly once.
pub fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let span = n / parts;
    (0..parts)
        .map(|i| {
            let start = i * span;
            let end = if i + 1 == parts { n } else { start + span };
            start..end
        })
        .collect()
}

/// Whether the calling thread is a worker of any rayon pool.
#[inline]
pub(crate) fn on_pool_worker() -> bool {
    rayon::current_thread_index().is_some()
}

/// Whether a kernel over `n` elements should take the parallel path.
#[inline]
pub(crate) fn use_parallel(ctx: &ExecutionContext, n: usize) -> bool {
    ctx.threads() > 1 && n >= ctx.threshold() && !on_pool_worker()
}

/// Run `f` over `[0, n)`, partitioned across the context's threads when the
/// work is large enough.
///
/// Returns one result per executed range, in partition order. The sequential
/// path yields exactly one result for `0..n`. If any task fails, the first
/// failure in partition order is returned after every task has finished.
pub fn run_partitioned<R, F>(ctx: &ExecutionContext, n: usize, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> Result<R> + Sync,
{
    if !use_parallel(ctx, n) {
        tracing::debug!(
            work = n,
            threads = ctx.threads(),
            threshold = ctx.threshold(),
            on_worker = on_pool_worker(),
            "sequential kernel"
        );
        return Ok(vec![f(0..n)?]);
    }
    tracing::debug!(
        work = n,
        threads = ctx.threads(),
        threshold = ctx.threshold(),
        "parallel kernel"
    );
    run_tasks(ctx, partition(n, ctx.threads()), f)
}

/// Submit one task per range and wait for all of them.
///
/// On a pool worker the ranges run in order on the calling thread.
pub(crate) fn run_tasks<R, F>(
    ctx: &ExecutionContext,
    ranges: Vec<Range<usize>>,
    f: F,
) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> Result<R> + Sync,
{
    if on_pool_worker() {
        return ranges.into_iter().map(f).collect();
    }
    let outcomes: Vec<Result<R>> = ctx.install(|| {
        ranges
            .into_par_iter()
            .enumerate()
            .map(|(task, range)| {
                tracing::trace!(task, start = range.start, end = range.end, "dispatch");
                f(range)
            })
            .collect()
    });
    outcomes.into_iter().collect()
}

/// Fold per-partition partial results in partition order.
///
/// `None` marks a partition that saw no element. Returns `None` only if every
/// partition was empty.
pub fn combine_in_order<T, C>(partials: Vec<Option<T>>, mut combiner: C) -> Option<T>
where
    C: FnMut(T, T) -> T,
{
    partials.into_iter().flatten().reduce(|acc, next| combiner(acc, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StridedError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_partition_covers_range() {
        let ranges = partition(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);

        let ranges = partition(2, 4);
        assert_eq!(ranges, vec![0..0, 0..0, 0..0, 0..2]);

        assert_eq!(partition(7, 0), vec![0..7]);
    }

    #[test]
    fn test_use_parallel() {
        let seq = ExecutionContext::sequential().with_threshold(0);
        assert!(!use_parallel(&seq, 1_000_000));

        let par = ExecutionContext::new(2).unwrap().with_threshold(100);
        assert!(!use_parallel(&par, 99));
        assert!(use_parallel(&par, 100));
    }

    #[test]
    fn test_sequential_single_partition() {
        let ctx = ExecutionContext::sequential();
        let parts = run_partitioned(&ctx, 42, |r| Ok(r)).unwrap();
        assert_eq!(parts, vec![0..42]);
    }

    #[test]
    fn test_parallel_results_in_partition_order() {
        let ctx = ExecutionContext::new(4).unwrap().with_threshold(0);
        let parts = run_partitioned(&ctx, 103, |r| Ok(r.start)).unwrap();
        assert_eq!(parts, vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_failure_waits_for_all_tasks() {
        let ctx = ExecutionContext::new(4).unwrap().with_threshold(0);
        let finished = AtomicUsize::new(0);
        let result: Result<Vec<()>> = run_partitioned(&ctx, 8, |r| {
            finished.fetch_add(1, Ordering::SeqCst);
            if r.start == 2 {
                Err(StridedError::EmptyOperand)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(StridedError::EmptyOperand)));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_pool_worker_runs_on_calling_thread() {
        let ctx = ExecutionContext::new(4).unwrap().with_threshold(0);
        let outer = ExecutionContext::new(2).unwrap();
        let (parallel, parts) = outer.install(|| {
            let caller = std::thread::current().id();
            let parts = run_tasks(&ctx, partition(40, 4), |r| {
                assert_eq!(std::thread::current().id(), caller);
                Ok(r.start)
            })
            .unwrap();
            (use_parallel(&ctx, 1_000_000), parts)
        });
        assert!(!parallel);
        assert_eq!(parts, vec![0, 10, 20, 30]);
        assert!(use_parallel(&ctx, 1_000_000));
    }

    #[test]
    fn test_combine_in_order_non_commutative() {
        let partials = vec![Some("a".to_string()), None, Some("b".into()), Some("c".into())];
        let joined = combine_in_order(partials, |x, y| x + &y);
        assert_eq!(joined.as_deref(), Some("abc"));
        assert_eq!(combine_in_order::<i32, _>(vec![None, None], |x, y| x + y), None);
    }
}
