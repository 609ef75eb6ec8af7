use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::Mutex;

use crate::models::UploadTask;
use crate::services::storage::CommittedFile;
use crate::services::uploader::{ChunkedUploader, UploadError};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Result of one scheduled upload
#[derive(Debug)]
pub struct TaskOutcome {
    pub file_name: String,
    pub destination_path: String,
    pub size: usize,
    pub result: Result<CommittedFile, UploadError>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs tasks with at most `max_concurrency` in flight.
///
/// A fixed set of workers pulls from one FIFO queue until it is empty, so a
/// slot is refilled as soon as its task finishes. Failures are collected,
/// never short-circuited, and results come back in submission order.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyScheduler {
    max_concurrency: usize,
}

impl Default for ConcurrencyScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl ConcurrencyScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Uploads every task through `uploader`
    pub async fn run(
        &self,
        tasks: Vec<UploadTask>,
        uploader: &ChunkedUploader,
    ) -> Vec<TaskOutcome> {
        self.run_with(tasks, |task| async move {
            tracing::info!(
                file = %task.file_name,
                path = %task.destination_path,
                size = task.size(),
                "⬆️  Uploading file"
            );
            let result = uploader
                .upload(&task.destination_path, task.payload.clone())
                .await;
            if let Err(e) = &result {
                tracing::error!(file = %task.file_name, "❌ File upload failed: {}", e);
            }
            TaskOutcome {
                size: task.size(),
                file_name: task.file_name,
                destination_path: task.destination_path,
                result,
            }
        })
        .await
    }

    /// Runs `job` once per task and returns the outputs in submission order
    pub async fn run_with<T, R, F, Fut>(&self, tasks: Vec<T>, job: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let workers = self.max_concurrency.min(tasks.len());
        let queue = Mutex::new(tasks.into_iter().enumerate().collect::<VecDeque<_>>());

        let worker = |_: usize| {
            let queue = &queue;
            let job = &job;
            async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, task)) = next else {
                        break;
                    };
                    done.push((index, job(task).await));
                }
                done
            }
        };

        let mut results: Vec<(usize, R)> = futures::future::join_all((0..workers).map(worker))
            .await
            .into_iter()
            .flatten()
            .collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::memory::InMemoryStorage;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_bound_and_runs_each_task_once() {
        for (n, k) in [(0usize, 4usize), (1, 4), (3, 4), (10, 4), (10, 1), (7, 3)] {
            let active = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);
            let runs: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();

            let out = ConcurrencyScheduler::new(k)
                .run_with((0..n).collect(), |i: usize| {
                    let active = &active;
                    let peak = &peak;
                    let runs = &runs;
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5 + (i as u64 * 7) % 13)).await;
                        runs[i].fetch_add(1, Ordering::SeqCst);
                        active.fetch_sub(1, Ordering::SeqCst);
                        i * 10
                    }
                })
                .await;

            assert!(peak.load(Ordering::SeqCst) <= k, "n={} k={}", n, k);
            assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
            assert_eq!(out, (0..n).map(|i| i * 10).collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_refill_without_batch_barrier() {
        let events = std::sync::Mutex::new(Vec::new());
        let durations = [50u64, 10, 10, 10];

        ConcurrencyScheduler::new(2)
            .run_with((0..durations.len()).collect(), |i: usize| {
                let events = &events;
                async move {
                    events.lock().unwrap().push(format!("start {}", i));
                    tokio::time::sleep(Duration::from_millis(durations[i])).await;
                    events.lock().unwrap().push(format!("end {}", i));
                }
            })
            .await;

        let events = events.into_inner().unwrap();
        let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
        // FIFO start order
        assert!(pos("start 0") < pos("start 1"));
        assert!(pos("start 1") < pos("start 2"));
        assert!(pos("start 2") < pos("start 3"));
        // Task 3 ran in the slot freed by task 1/2 while task 0 was still running
        assert!(pos("start 3") < pos("end 0"));
    }

    #[tokio::test]
    async fn test_failures_are_collected_not_short_circuited() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_uploads_matching("file-1");
        let uploader = ChunkedUploader::with_chunk_size(storage.clone(), 4);

        let tasks = (0..5)
            .map(|i| {
                UploadTask::new(
                    format!("file-{}.txt", i),
                    format!("/c/file-{}.txt", i),
                    Bytes::from(vec![i as u8; 9]),
                )
            })
            .collect();
        let outcomes = ConcurrencyScheduler::default().run(tasks, &uploader).await;

        assert_eq!(outcomes.len(), 5);
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.file_name.as_str())
            .collect();
        assert_eq!(failed, vec!["file-1.txt"]);
        assert_eq!(storage.file_paths().len(), 4);
    }
}
