//! Bounded worker pool for per-input and per-batch merge units.
//!
//! Each unit runs on tokio's blocking thread pool. At most `workers` units
//! are in flight; results are folded on the calling task as they complete,
//! so only `workers` unfolded results exist at any time.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::error::CoverageError;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// One worker per available CPU.
    pub fn available() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `unit` over every item and fold the results in completion order.
    ///
    /// The first failure (from a unit, the fold, or a panicking worker) stops
    /// new units from starting; the pool waits for running units to finish
    /// before the error is returned.
    pub async fn fold<T, R, A, E, F, G>(
        &self,
        items: Vec<T>,
        init: A,
        unit: F,
        mut fold: G,
    ) -> Result<A, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<CoverageError> + Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
        G: FnMut(A, R) -> Result<A, E>,
    {
        let total = items.len();
        let unit = Arc::new(unit);
        let mut pending = items.into_iter();
        let mut set = JoinSet::new();
        let mut acc = init;
        let mut done = 0;

        loop {
            while set.len() < self.workers {
                let Some(item) = pending.next() else { break };
                let unit = Arc::clone(&unit);
                set.spawn_blocking(move || unit(item));
            }
            let Some(joined) = set.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(Ok(result)) => fold(acc, result),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(CoverageError::Worker(e.to_string()).into()),
            };
            match outcome {
                Ok(next) => acc = next,
                Err(e) => {
                    set.shutdown().await;
                    debug!(done, total, "worker pool aborted");
                    return Err(e);
                }
            }
            done += 1;
        }

        debug!(total, workers = self.workers, "worker pool drained");
        Ok(acc)
    }

    /// Run `unit` over every item, collecting results in completion order.
    pub async fn map<T, R, E, F>(&self, items: Vec<T>, unit: F) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<CoverageError> + Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let capacity = items.len();
        self.fold(items, Vec::with_capacity(capacity), unit, |mut out, r| {
            out.push(r);
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn folds_every_result() {
        let pool = WorkerPool::new(3);
        let total: Result<u64, CoverageError> = pool
            .fold((1..=100u64).collect::<Vec<_>>(), 0, |n| Ok(n * 2), |acc, n| Ok(acc + n))
            .await;
        assert_eq!(total.unwrap(), 10100);
    }

    #[tokio::test]
    async fn never_exceeds_worker_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let pool = WorkerPool::new(2);
        let out: Vec<()> = pool
            .map((0..12).collect::<Vec<_>>(), move |_: i32| -> Result<(), CoverageError> {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                r.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unit_failure_aborts_the_run() {
        let pool = WorkerPool::new(4);
        let result: Result<Vec<i32>, CoverageError> = pool
            .map((0..20).collect::<Vec<_>>(), |n: i32| {
                if n == 7 {
                    Err(CoverageError::Malformed("bad input".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert!(matches!(result, Err(CoverageError::Malformed(_))));
    }

    #[tokio::test]
    async fn panicking_unit_is_a_worker_error() {
        let pool = WorkerPool::new(1);
        let result: Result<Vec<i32>, CoverageError> = pool
            .map(vec![1], |_: i32| -> Result<i32, CoverageError> { panic!("boom") })
            .await;
        assert!(matches!(result, Err(CoverageError::Worker(_))));
    }
}
