use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::client::{ApiRequest, Dispatch};
use crate::error::ApiError;

type Reply = oneshot::Sender<Result<Value, ApiError>>;

struct Pending {
    jobs: VecDeque<(ApiRequest, Reply)>,
    /// True while a worker task is draining `jobs`. Guarded by the same lock
    /// as the deque so a push can never race a worker that is about to exit.
    running: bool,
}

struct Inner<D> {
    dispatcher: D,
    pending: Mutex<Pending>,
    spacing: Duration,
}

/// FIFO request serializer. At most one request is dispatched at a time and
/// the worker pauses `spacing` after each one, which caps the outbound rate
/// regardless of how many callers are waiting.
pub struct RequestQueue<D> {
    inner: Arc<Inner<D>>,
}

impl<D: Dispatch> RequestQueue<D> {
    pub fn new(dispatcher: D, spacing: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                pending: Mutex::new(Pending {
                    jobs: VecDeque::new(),
                    running: false,
                }),
                spacing,
            }),
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.inner.dispatcher
    }

    /// Number of requests waiting behind the one in flight.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).jobs.len()
    }

    /// Queue a request and wait for its turn and its result.
    pub async fn enqueue(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let start_worker = {
            let mut pending = lock(&self.inner.pending);
            pending.jobs.push_back((request, reply_tx));
            !std::mem::replace(&mut pending.running, true)
        };

        if start_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Err(ApiError::network("request queue closed before the request completed")))
    }
}

impl<D: Dispatch> Inner<D> {
    async fn drain(self: Arc<Self>) {
        debug!("[QUEUE] worker started");
        loop {
            let next = {
                let mut pending = lock(&self.pending);
                match pending.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        pending.running = false;
                        break;
                    }
                }
            };

            let (request, reply) = next;
            trace!(method = %request.method, path = %request.path, "[QUEUE] dispatching");
            let result = self.dispatcher.dispatch(request).await;
            // The caller may have stopped waiting; the request still counted.
            let _ = reply.send(result);

            if !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }
        }
        debug!("[QUEUE] worker idle");
    }
}

fn lock(m: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use crate::types::Endpoint;
    use futures_util::future::join_all;
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        order: Mutex<Vec<String>>,
        started: Mutex<Vec<Instant>>,
    }

    #[derive(Clone, Default)]
    struct FakeDispatch(Arc<Recorder>);

    impl Dispatch for FakeDispatch {
        fn dispatch(&self, request: ApiRequest) -> impl Future<Output = Result<Value, ApiError>> + Send {
            let rec = Arc::clone(&self.0);
            async move {
                let now = rec.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                rec.max_in_flight.fetch_max(now, Ordering::SeqCst);
                rec.order.lock().unwrap().push(request.path.clone());
                rec.started.lock().unwrap().push(Instant::now());

                tokio::time::sleep(Duration::from_millis(5)).await;
                rec.in_flight.fetch_sub(1, Ordering::SeqCst);

                if request.path.ends_with("/FAIL") {
                    Err(ApiError::new(ApiErrorKind::Api, "rejected", 404))
                } else {
                    Ok(json!({ "path": request.path }))
                }
            }
        }
    }

    fn fundamentals(symbol: &str) -> ApiRequest {
        ApiRequest::get(Endpoint::Fundamentals, format!("/fundamentals/{symbol}"))
    }

    #[tokio::test(start_paused = true)]
    async fn processes_in_arrival_order_one_at_a_time() {
        let fake = FakeDispatch::default();
        let queue = RequestQueue::new(fake.clone(), Duration::from_millis(100));

        let symbols: Vec<String> = (0..8).map(|i| format!("SYM{i}")).collect();
        let results = join_all(symbols.iter().map(|s| queue.enqueue(fundamentals(s)))).await;

        for (s, r) in symbols.iter().zip(&results) {
            assert_eq!(r.as_ref().unwrap()["path"], format!("/fundamentals/{s}"));
        }
        let order = fake.0.order.lock().unwrap().clone();
        let expected: Vec<String> = symbols.iter().map(|s| format!("/fundamentals/{s}")).collect();
        assert_eq!(order, expected);
        assert_eq!(fake.0.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_consecutive_requests() {
        let fake = FakeDispatch::default();
        let spacing = Duration::from_millis(100);
        let queue = RequestQueue::new(fake.clone(), spacing);

        join_all((0..4).map(|i| queue.enqueue(fundamentals(&i.to_string())))).await;

        let started = fake.0.started.lock().unwrap().clone();
        assert_eq!(started.len(), 4);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= spacing, "gap {:?} shorter than spacing", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_from_many_tasks_share_one_worker() {
        let fake = FakeDispatch::default();
        let queue = Arc::new(RequestQueue::new(fake.clone(), Duration::from_millis(10)));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.enqueue(fundamentals(&format!("T{i}"))).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(fake.0.order.lock().unwrap().len(), 16);
        assert_eq!(fake.0.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_only_its_caller() {
        let fake = FakeDispatch::default();
        let queue = RequestQueue::new(fake, Duration::ZERO);

        let (ok, failed, ok2) = tokio::join!(
            queue.enqueue(fundamentals("A")),
            queue.enqueue(fundamentals("FAIL")),
            queue.enqueue(fundamentals("B")),
        );
        assert!(ok.is_ok());
        assert_eq!(failed.unwrap_err().status, 404);
        assert!(ok2.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_restarts_after_going_idle() {
        let fake = FakeDispatch::default();
        let queue = RequestQueue::new(fake.clone(), Duration::from_millis(10));

        queue.enqueue(fundamentals("A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(fundamentals("B")).await.unwrap();

        assert_eq!(fake.0.order.lock().unwrap().len(), 2);
    }
}
