use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kv::KvStore;

/// A unit of queued work. The payload is opaque to the queue; handlers are
/// idempotent against their target entity, so at-least-once delivery is safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
}

type Handler =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

struct QueueInner {
    name: String,
    pending: Mutex<VecDeque<Job>>,
    notify: Notify,
    handler: Handler,
    concurrency: usize,
    in_flight: AtomicUsize,
    max_retries: u32,
    retry_base_ms: u64,
}

/// Durable named queues dispatching to async handlers with bounded
/// per-queue concurrency. Job bodies are persisted in the shared K/V
/// store until the handler finishes, so a crash can re-deliver them.
pub struct JobQueue {
    kv: Arc<KvStore>,
    queues: Mutex<Vec<Arc<QueueInner>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self {
            kv,
            queues: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a named queue and spawn its workers.
    pub async fn register<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        concurrency: usize,
        max_retries: u32,
        retry_base_ms: u64,
        handler: F,
    ) where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |job| Box::pin(handler(job)));
        let inner = Arc::new(QueueInner {
            name: name.to_string(),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            handler,
            concurrency: concurrency.max(1),
            in_flight: AtomicUsize::new(0),
            max_retries,
            retry_base_ms,
        });

        for worker in 0..inner.concurrency {
            let queue = Arc::clone(&inner);
            let kv = Arc::clone(&self.kv);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                run_worker(queue, kv, shutdown, worker).await;
            });
        }

        self.queues.lock().await.push(inner);
        info!(queue = name, concurrency, "queue registered");
    }

    /// Enqueue a job. Returns the job id.
    pub async fn put(&self, name: &str, payload: serde_json::Value) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            queue: name.to_string(),
            payload,
            attempt: 0,
        };

        let queues = self.queues.lock().await;
        let queue = queues
            .iter()
            .find(|q| q.name == name)
            .ok_or_else(|| anyhow::anyhow!("unknown queue: {name}"))?;

        self.kv.set(
            &format!("queue:{name}:{id}"),
            &serde_json::to_string(&job)?,
        );
        queue.pending.lock().await.push_back(job);
        queue.notify.notify_one();
        Ok(id)
    }

    /// Stop intake and wait for in-flight handlers to drain.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        loop {
            let busy = {
                let queues = self.queues.lock().await;
                queues
                    .iter()
                    .map(|q| q.in_flight.load(Ordering::Acquire))
                    .sum::<usize>()
            };
            if busy == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        info!("job queues drained");
    }

    pub async fn depth(&self, name: &str) -> usize {
        let queues = self.queues.lock().await;
        match queues.iter().find(|q| q.name == name) {
            Some(q) => q.pending.lock().await.len(),
            None => 0,
        }
    }
}

async fn run_worker(
    queue: Arc<QueueInner>,
    kv: Arc<KvStore>,
    shutdown: CancellationToken,
    worker: usize,
) {
    loop {
        // Stop taking new work once shutdown starts; pending jobs stay in
        // the K/V store for restart retry.
        if shutdown.is_cancelled() {
            return;
        }
        let job = {
            let mut pending = queue.pending.lock().await;
            pending.pop_front()
        };

        let Some(job) = job else {
            tokio::select! {
                _ = queue.notify.notified() => continue,
                _ = shutdown.cancelled() => return,
            }
        };

        queue.in_flight.fetch_add(1, Ordering::AcqRel);
        let job_id = job.id;
        let attempt = job.attempt;
        let result = (queue.handler)(job.clone()).await;
        queue.in_flight.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(()) => {
                kv.remove(&format!("queue:{}:{}", queue.name, job_id));
            }
            Err(e) if attempt < queue.max_retries => {
                let delay = queue.retry_base_ms.saturating_mul(1u64 << attempt.min(10));
                warn!(
                    queue = %queue.name,
                    job_id,
                    attempt,
                    delay_ms = delay,
                    "job failed, retrying: {e:#}"
                );
                let retry = Job {
                    attempt: attempt + 1,
                    ..job
                };
                let queue2 = Arc::clone(&queue);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    queue2.pending.lock().await.push_back(retry);
                    queue2.notify.notify_one();
                });
            }
            Err(e) => {
                error!(queue = %queue.name, job_id, worker, "job failed: {e:#}");
                kv.remove(&format!("queue:{}:{}", queue.name, job_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn dispatches_jobs_to_handler() {
        let kv = Arc::new(KvStore::new());
        let queue = Arc::new(JobQueue::new(Arc::clone(&kv)));
        let seen = Arc::new(AtomicU32::new(0));

        let seen2 = Arc::clone(&seen);
        queue
            .register("analyze", 2, 0, 10, move |_job| {
                let seen = Arc::clone(&seen2);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        for i in 0..5 {
            queue.put("analyze", json!({ "i": i })).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        // Completed jobs are removed from the durable store.
        assert!(kv.keys_with_prefix("queue:analyze:").is_empty());
    }

    #[tokio::test]
    async fn failed_job_retries_with_backoff() {
        let kv = Arc::new(KvStore::new());
        let queue = Arc::new(JobQueue::new(kv));
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = Arc::clone(&calls);
        queue
            .register("autofix", 1, 2, 1, move |_job| {
                let calls = Arc::clone(&calls2);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        anyhow::bail!("transient");
                    }
                    Ok(())
                }
            })
            .await;

        queue.put("autofix", json!({})).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_queue_is_an_error() {
        let queue = Arc::new(JobQueue::new(Arc::new(KvStore::new())));
        assert!(queue.put("nope", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight() {
        let kv = Arc::new(KvStore::new());
        let queue = Arc::new(JobQueue::new(kv));
        let done = Arc::new(AtomicU32::new(0));

        let done2 = Arc::clone(&done);
        queue
            .register("apply", 1, 0, 10, move |_job| {
                let done = Arc::clone(&done2);
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        queue.put("apply", json!({})).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
