//! Bounded-concurrency worker pool over crossbeam channels.
//!
//! Jobs are queued on a channel and drained by a fixed number of scoped
//! worker threads. Results flow back on a second channel to the calling
//! thread, which is the only place completion callbacks run.

use std::thread;

use crossbeam_channel::unbounded;

use crate::cancel::CancelToken;

pub struct WorkerPool {
    workers: usize,
    cancel: Option<CancelToken>,
}

impl WorkerPool {
    /// Create a pool running at most `workers` jobs at once (minimum 1).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: None,
        }
    }

    /// Stop handing out jobs once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` over every job.
    ///
    /// `on_complete` is called on the current thread once per finished job, in
    /// completion order. Results are returned sorted by job index; jobs that
    /// never started because of cancellation are absent.
    pub fn run<J, R, T, C>(&self, jobs: Vec<J>, task: T, mut on_complete: C) -> Vec<(usize, R)>
    where
        J: Send,
        R: Send,
        T: Fn(usize, J) -> R + Sync,
        C: FnMut(usize, &R),
    {
        if jobs.is_empty() {
            return Vec::new();
        }

        let worker_count = self.workers.min(jobs.len());
        let (job_tx, job_rx) = unbounded::<(usize, J)>();
        let (result_tx, result_rx) = unbounded::<(usize, R)>();

        for job in jobs.into_iter().enumerate() {
            // Receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let task = &task;
        let cancel = self.cancel.as_ref();
        let mut results = Vec::new();

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok((index, job)) = job_rx.recv() {
                        if cancel.is_some_and(|c| c.is_cancelled()) {
                            break;
                        }
                        let result = task(index, job);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, result) in result_rx.iter() {
                on_complete(index, &result);
                results.push((index, result));
            }
        });

        results.sort_by_key(|(index, _)| *index);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn never_exceeds_worker_limit() {
        let pool = WorkerPool::new(3);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = pool.run(
            (0..20).collect(),
            |_, job: u64| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5 + job % 3));
                active.fetch_sub(1, Ordering::SeqCst);
                job * 2
            },
            |_, _| {},
        );

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn results_are_sorted_by_job_index() {
        let pool = WorkerPool::new(4);

        let results = pool.run(
            vec![30u64, 1, 20, 5],
            |_, delay| {
                thread::sleep(Duration::from_millis(delay));
                delay
            },
            |_, _| {},
        );

        let indices: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(results[0].1, 30);
    }

    #[test]
    fn completion_callback_runs_once_per_job() {
        let pool = WorkerPool::new(2);
        let mut completed = Vec::new();

        pool.run((0..6).collect(), |_, job: usize| job, |index, _| completed.push(index));

        completed.sort();
        assert_eq!(completed, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_job_list() {
        let pool = WorkerPool::new(2);
        let results: Vec<(usize, ())> = pool.run(Vec::<()>::new(), |_, _| (), |_, _| {});
        assert!(results.is_empty());
    }

    #[test]
    fn zero_workers_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        let results = pool.run(vec![1, 2], |_, j: i32| j + 1, |_, _| {});
        assert_eq!(results, vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn cancellation_stops_new_jobs() {
        let token = CancelToken::new();
        let pool = WorkerPool::new(1).with_cancel(token.clone());

        let results = pool.run(
            (0..10).collect(),
            |index, job: usize| {
                if index == 2 {
                    token.cancel();
                }
                job
            },
            |_, _| {},
        );

        assert_eq!(results.len(), 3);
    }
}
