//! Batch coalescer: gathers individual JSON-RPC calls into timed wire-level batches.
//!
//! Every call becomes an *intent* with one or more waiters. Identical concurrent calls
//! share one intent (dedupe fan-out). Intents are queued per [`Priority`], drained
//! highest priority first into batches of at most `max_batch_size`, sent through the
//! [`TokenBucket`], and the response entries are matched back by id.
//!
//! An intent completes exactly once: batch result, retry exhaustion, its own timeout or
//! shutdown race for the `completed` flag, and only the winner touches the waiters, the
//! dedupe table and the stats.

use futures::future::{join_all, try_join_all};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::oneshot, task::AbortHandle, time::Instant};

use crate::{
    batch::token_bucket::TokenBucket,
    metrics::MetricsCollector,
    types::{JsonRpcRequest, JsonRpcResponse, Priority, TransportKind},
    upstream::{
        errors::UpstreamError, executor::DirectExecutor, registry::EndpointRegistry,
        selector::SelectOptions, transport::RpcTransport,
    },
};

type Outcome = Result<Value, UpstreamError>;

/// Tuning of the batch coalescer.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// Debounce window between the first queued call and the drain.
    pub batch_delay: Duration,
    pub max_pending_requests: usize,
    pub max_retries: u32,
    /// Delay before the n-th retry; the last entry repeats.
    pub backoff: Vec<Duration>,
    /// Default deadline of a queued call, from enqueue to completion.
    pub request_timeout: Duration,
    /// Deadline of a single wire-level batch call.
    pub wire_timeout: Duration,
    pub dedupe_ttl: Duration,
    pub rate_per_second: f64,
    pub bucket_capacity: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_delay: Duration::from_millis(10),
            max_pending_requests: 10_000,
            max_retries: 3,
            backoff: [100, 200, 300, 500, 800].into_iter().map(Duration::from_millis).collect(),
            request_timeout: Duration::from_secs(30),
            wire_timeout: Duration::from_secs(10),
            dedupe_ttl: Duration::from_secs(5),
            rate_per_second: 50.0,
            bucket_capacity: 100,
        }
    }
}

impl BatchConfig {
    /// Backoff before retry number `retry` (one-based).
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = usize::try_from(retry.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff[index.min(self.backoff.len() - 1)]
    }
}

/// Where batches are sent.
#[derive(Clone)]
pub enum BatchRoute {
    /// Always post to this URL.
    Fixed(String),
    /// Ask the registry for an endpoint of `kind` on every dispatch and record the
    /// outcome against it.
    Registry { registry: Arc<EndpointRegistry>, kind: TransportKind },
}

impl std::fmt::Debug for BatchRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("Fixed"),
            Self::Registry { kind, .. } => write!(f, "Registry({kind})"),
        }
    }
}

/// Per-call options of [`BatchCoalescer::queue_request`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub priority: Priority,
    /// Overrides [`BatchConfig::request_timeout`].
    pub timeout: Option<Duration>,
    /// Share an in-flight identical call instead of issuing a new one.
    pub dedupe: bool,
    /// Explicit dedupe key; defaults to the method and serialized params.
    pub cache_key: Option<String>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { priority: Priority::Normal, timeout: None, dedupe: true, cache_key: None }
    }
}

impl QueueOptions {
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// One entry of [`BatchCoalescer::queue_batch`].
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub method: String,
    pub params: Option<Value>,
    pub cache_key: Option<String>,
}

impl BatchRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { method: method.into(), params, cache_key: None }
    }
}

/// Options of [`BatchCoalescer::queue_batch`].
#[derive(Debug, Clone, Default)]
pub struct QueueBatchOptions {
    /// Fail the whole batch on the first error instead of returning per-item results.
    pub stop_on_error: bool,
    pub timeout: Option<Duration>,
}

/// Completion handle of a queued call.
///
/// Dropping the handle discards this caller's result; the call itself still runs and
/// other waiters sharing it are unaffected.
#[derive(Debug)]
pub struct RequestHandle {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for RequestHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| received.unwrap_or(Err(UpstreamError::Shutdown)))
    }
}

/// Snapshot of coalescer activity.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatcherStats {
    pub queued: u64,
    pub deduplicated: u64,
    pub batches_dispatched: u64,
    pub wire_failures: u64,
    pub retried: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub immediate: u64,
    pub pending: usize,
    pub queue_depth: BTreeMap<Priority, usize>,
    pub dedupe_entries: usize,
    pub tokens_available: f64,
}

#[derive(Default)]
struct BatcherCounters {
    queued: AtomicU64,
    deduplicated: AtomicU64,
    batches_dispatched: AtomicU64,
    wire_failures: AtomicU64,
    retried: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    immediate: AtomicU64,
}

struct Intent {
    id: u64,
    method: String,
    params: Option<Value>,
    priority: Priority,
    dedupe_key: Option<String>,
    enqueued_at: Instant,
    completed: AtomicBool,
    /// `None` once the intent completed and its waiters were taken.
    waiters: Mutex<Option<Vec<oneshot::Sender<Outcome>>>>,
    retries: AtomicU32,
    timeout_task: Mutex<Option<AbortHandle>>,
}

impl Intent {
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn attach(&self) -> Option<RequestHandle> {
        let mut waiters = self.waiters.lock();
        let waiters = waiters.as_mut()?;
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        Some(RequestHandle { rx })
    }
}

struct DedupeEntry {
    intent: Arc<Intent>,
    expires_at: Instant,
}

struct QueueState {
    queues: [VecDeque<Arc<Intent>>; Priority::LEVELS],
    dedupe: HashMap<String, DedupeEntry>,
    /// Every intent not yet completed: queued, in flight or waiting for a retry.
    live: HashMap<u64, Arc<Intent>>,
    timer_armed: bool,
    processing: bool,
    stopped: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            queues: std::array::from_fn(|_| VecDeque::new()),
            dedupe: HashMap::new(),
            live: HashMap::new(),
            timer_armed: false,
            processing: false,
            stopped: false,
        }
    }
}

impl QueueState {
    /// Pops up to `max` live intents, highest priority first and FIFO within a level.
    fn drain(&mut self, max: usize) -> Vec<Arc<Intent>> {
        let mut batch = Vec::with_capacity(max.min(self.live.len()));
        for priority in Priority::DRAIN_ORDER {
            let queue = &mut self.queues[priority.index()];
            while batch.len() < max {
                let Some(intent) = queue.pop_front() else { break };
                if !intent.is_completed() {
                    batch.push(intent);
                }
            }
            if batch.len() >= max {
                break;
            }
        }
        batch
    }

    fn has_queued(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }
}

struct Inner {
    config: BatchConfig,
    route: BatchRoute,
    transport: Arc<dyn RpcTransport>,
    immediate: DirectExecutor,
    token_bucket: TokenBucket,
    metrics_collector: Arc<MetricsCollector>,
    state: Mutex<QueueState>,
    counters: BatcherCounters,
    next_id: AtomicU64,
}

/// Coalesces individual calls into rate-limited JSON-RPC batches.
///
/// Cloning is cheap and shares the same queues.
#[derive(Clone)]
pub struct BatchCoalescer {
    inner: Arc<Inner>,
}

impl BatchCoalescer {
    #[must_use]
    pub fn new(
        config: BatchConfig,
        route: BatchRoute,
        transport: Arc<dyn RpcTransport>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let token_bucket = TokenBucket::new(config.bucket_capacity, config.rate_per_second);
        let config = BatchConfig { max_batch_size: config.max_batch_size.max(1), ..config };
        Self {
            inner: Arc::new(Inner {
                immediate: DirectExecutor::new(Arc::clone(&transport)),
                config,
                route,
                transport,
                token_bucket,
                metrics_collector,
                state: Mutex::new(QueueState::default()),
                counters: BatcherCounters::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Queues one call and returns its completion handle without waiting.
    ///
    /// Must be called from within a Tokio runtime; the drain cycle and the per-call
    /// timeout run as spawned tasks.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::QueueFull`] if `max_pending_requests` calls are outstanding
    /// - [`UpstreamError::InvalidRequest`] if `method` is empty
    /// - [`UpstreamError::Shutdown`] after [`shutdown`](Self::shutdown)
    pub fn queue_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: QueueOptions,
    ) -> Result<RequestHandle, UpstreamError> {
        if method.is_empty() {
            return Err(UpstreamError::InvalidRequest("method is empty".to_string()));
        }
        let inner = &self.inner;
        let timeout = options.timeout.unwrap_or(inner.config.request_timeout);

        let dedupe_key = options.dedupe.then(|| {
            options.cache_key.clone().unwrap_or_else(|| {
                let serialized = params.as_ref().map(Value::to_string).unwrap_or_default();
                format!("{method}{serialized}")
            })
        });

        let mut state = inner.state.lock();
        if state.stopped {
            return Err(UpstreamError::Shutdown);
        }
        if state.live.len() >= inner.config.max_pending_requests {
            drop(state);
            inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            inner.metrics_collector.record_queue_rejected();
            tracing::debug!(method, max_pending = inner.config.max_pending_requests, "request queue full");
            return Err(UpstreamError::QueueFull { max_pending: inner.config.max_pending_requests });
        }

        let now = Instant::now();
        if let Some(key) = &dedupe_key {
            let existing = state
                .dedupe
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| Arc::clone(&entry.intent));
            if let Some(handle) = existing.and_then(|intent| intent.attach()) {
                drop(state);
                inner.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                inner.metrics_collector.record_request_queued(options.priority, true);
                tracing::trace!(method, "attached to in-flight request");
                return Ok(handle);
            }
        }

        let (tx, rx) = oneshot::channel();
        let intent = Arc::new(Intent {
            id: inner.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
            priority: options.priority,
            dedupe_key: dedupe_key.clone(),
            enqueued_at: now,
            completed: AtomicBool::new(false),
            waiters: Mutex::new(Some(vec![tx])),
            retries: AtomicU32::new(0),
            timeout_task: Mutex::new(None),
        });

        if let Some(key) = dedupe_key {
            state.dedupe.insert(
                key,
                DedupeEntry { intent: Arc::clone(&intent), expires_at: now + inner.config.dedupe_ttl },
            );
        }
        state.queues[intent.priority.index()].push_back(Arc::clone(&intent));
        state.live.insert(intent.id, Arc::clone(&intent));
        let pending = state.live.len();
        drop(state);

        inner.counters.queued.fetch_add(1, Ordering::Relaxed);
        inner.metrics_collector.record_request_queued(intent.priority, false);
        inner.metrics_collector.record_pending_requests(pending);

        Inner::arm_timeout(inner, &intent, timeout);
        Inner::schedule_batch(inner);

        Ok(RequestHandle { rx })
    }

    /// Queues every request at [`Priority::Batch`] and waits for all of them.
    ///
    /// With `stop_on_error` the first failure is returned; otherwise each item carries
    /// its own outcome.
    ///
    /// # Errors
    ///
    /// Only with `stop_on_error`: the first error of any item.
    pub async fn queue_batch(
        &self,
        requests: Vec<BatchRequest>,
        options: QueueBatchOptions,
    ) -> Result<Vec<Outcome>, UpstreamError> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let mut queue_options = QueueOptions::default().priority(Priority::Batch);
            queue_options.timeout = options.timeout;
            queue_options.cache_key = request.cache_key;
            let queued = self.queue_request(&request.method, request.params, queue_options);
            match queued {
                Ok(handle) => handles.push(handle),
                Err(e) if options.stop_on_error => return Err(e),
                Err(e) => {
                    let (tx, rx) = oneshot::channel();
                    let _ = tx.send(Err(e));
                    handles.push(RequestHandle { rx });
                }
            }
        }

        if options.stop_on_error {
            let values = try_join_all(handles).await?;
            Ok(values.into_iter().map(Ok).collect())
        } else {
            Ok(join_all(handles).await)
        }
    }

    /// Sends one call straight to the route, bypassing queueing, dedupe, rate limiting
    /// and retries.
    ///
    /// # Errors
    ///
    /// Any error of the single attempt, or [`UpstreamError::NoHealthyEndpoint`] when
    /// the registry route has no endpoint.
    pub async fn execute_immediate(&self, method: &str, params: Option<Value>) -> Outcome {
        let inner = &self.inner;
        inner.counters.immediate.fetch_add(1, Ordering::Relaxed);
        let (url, endpoint_id) = inner.resolve_route()?;

        let outcome =
            inner.immediate.execute_url(&url, method, params, inner.config.wire_timeout).await;
        if let (Some(id), BatchRoute::Registry { registry, .. }) = (&endpoint_id, &inner.route) {
            match &outcome {
                Ok(execution) => registry.record_request_success(id, execution.latency_ms()),
                Err(e) => registry.record_request_failure(id, e),
            }
        }
        outcome.map(|execution| execution.result)
    }

    /// Stops scheduling and completes every outstanding call with
    /// [`UpstreamError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        let outstanding: Vec<Arc<Intent>> = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.live.values().cloned().collect()
        };
        let count = outstanding.len();
        for intent in outstanding {
            self.inner.complete(&intent, Err(UpstreamError::Shutdown));
        }
        tracing::info!(cancelled = count, "batch coalescer shut down");
    }

    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        let inner = &self.inner;
        let (pending, queue_depth, dedupe_entries) = {
            let state = inner.state.lock();
            let depth = Priority::DRAIN_ORDER
                .iter()
                .map(|p| (*p, state.queues[p.index()].len()))
                .collect::<BTreeMap<_, _>>();
            (state.live.len(), depth, state.dedupe.len())
        };
        let counters = &inner.counters;
        BatcherStats {
            queued: counters.queued.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            batches_dispatched: counters.batches_dispatched.load(Ordering::Relaxed),
            wire_failures: counters.wire_failures.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            immediate: counters.immediate.load(Ordering::Relaxed),
            pending,
            queue_depth,
            dedupe_entries,
            tokens_available: inner.token_bucket.available(),
        }
    }
}

impl Inner {
    fn arm_timeout(this: &Arc<Self>, intent: &Arc<Intent>, timeout: Duration) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let target = Arc::clone(intent);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                if inner.complete(&target, Err(UpstreamError::RequestTimeout(timeout))) {
                    tracing::debug!(
                        method = %target.method,
                        queued_ms = target.enqueued_at.elapsed().as_millis(),
                        "queued request timed out"
                    );
                }
            }
        });

        *intent.timeout_task.lock() = Some(task.abort_handle());
        // Completed before the handle was stored: nobody else will abort it.
        if intent.is_completed() {
            if let Some(handle) = intent.timeout_task.lock().take() {
                handle.abort();
            }
        }
    }

    /// Arms the debounce timer unless one is armed or a drain is running.
    fn schedule_batch(this: &Arc<Self>) {
        {
            let mut state = this.state.lock();
            if state.timer_armed || state.processing || state.stopped {
                return;
            }
            state.timer_armed = true;
        }

        let weak = Arc::downgrade(this);
        let delay = this.config.batch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Self::process_batch(&inner).await;
            }
        });
    }

    async fn process_batch(this: &Arc<Self>) {
        let drained = {
            let mut state = this.state.lock();
            state.timer_armed = false;
            if state.stopped {
                return;
            }
            state.processing = true;
            state.drain(this.config.max_batch_size)
        };

        if !drained.is_empty() {
            this.dispatch(drained).await;
        }

        let more = {
            let mut state = this.state.lock();
            state.processing = false;
            !state.stopped && state.has_queued()
        };
        if more {
            Self::schedule_batch(this);
        }
    }

    fn resolve_route(&self) -> Result<(String, Option<String>), UpstreamError> {
        match &self.route {
            BatchRoute::Fixed(url) => Ok((url.clone(), None)),
            BatchRoute::Registry { registry, kind } => registry
                .select_endpoint(*kind, &SelectOptions::default())
                .map(|endpoint| (endpoint.request_url().to_string(), Some(endpoint.id.clone())))
                .ok_or(UpstreamError::NoHealthyEndpoint(*kind)),
        }
    }

    async fn dispatch(self: &Arc<Self>, intents: Vec<Arc<Intent>>) {
        let batch_size = intents.len();
        let waited = self.token_bucket.acquire(u32::try_from(batch_size).unwrap_or(u32::MAX)).await;
        self.metrics_collector.record_tokens_available(self.token_bucket.available());

        let (url, endpoint_id) = match self.resolve_route() {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(batch_size, error = %e, "no endpoint for batch");
                for intent in &intents {
                    self.complete(intent, Err(e.clone()));
                }
                return;
            }
        };

        let started = Instant::now();
        let outcome = self.send(&url, &intents).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics_collector.record_batch_dispatch(batch_size, latency_ms, outcome.is_ok());

        if let (Some(id), BatchRoute::Registry { registry, .. }) = (&endpoint_id, &self.route) {
            match &outcome {
                Ok(_) => registry.record_request_success(id, latency_ms),
                Err(e) => registry.record_request_failure(id, e),
            }
        }

        match outcome {
            Ok(responses) => {
                self.counters.batches_dispatched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    batch_size,
                    responses = responses.len(),
                    latency_ms,
                    rate_limit_wait_ms = waited.as_millis(),
                    "batch dispatched"
                );
                self.resolve(intents, responses);
            }
            Err(e) => {
                self.counters.wire_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(batch_size, error = %e, "batch dispatch failed");
                self.retry_or_fail(intents, &e);
            }
        }
    }

    async fn send(
        &self,
        url: &str,
        intents: &[Arc<Intent>],
    ) -> Result<HashMap<u64, JsonRpcResponse>, UpstreamError> {
        let requests: Vec<JsonRpcRequest> = intents
            .iter()
            .map(|intent| {
                JsonRpcRequest::new(intent.method.clone(), intent.params.clone(), Value::from(intent.id))
            })
            .collect();
        let body = serde_json::to_vec(&requests).map_err(|e| {
            UpstreamError::InvalidRequest(format!("Failed to serialize batch: {e}"))
        })?;

        let timeout = self.config.wire_timeout;
        let bytes = tokio::time::timeout(timeout, self.transport.post(url, body.into(), timeout))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

        match value {
            Value::Array(entries) => Ok(entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value::<JsonRpcResponse>(entry).ok())
                .filter_map(|response| response.id.as_u64().map(|id| (id, response)))
                .collect()),
            // Some providers answer a rejected batch with a single error object.
            Value::Object(_) => {
                let response: JsonRpcResponse = serde_json::from_value(value)
                    .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;
                match response.error {
                    Some(error) => Err(UpstreamError::RpcError(error.code, error.message)),
                    None => Err(UpstreamError::InvalidResponse(
                        "expected an array for a batch request".to_string(),
                    )),
                }
            }
            _ => Err(UpstreamError::InvalidResponse("expected an array for a batch request".to_string())),
        }
    }

    fn resolve(&self, intents: Vec<Arc<Intent>>, mut responses: HashMap<u64, JsonRpcResponse>) {
        for intent in intents {
            let outcome = match responses.remove(&intent.id) {
                None => Err(UpstreamError::MissingResponse(intent.id)),
                Some(JsonRpcResponse { error: Some(error), .. }) => {
                    Err(UpstreamError::RpcError(error.code, error.message))
                }
                Some(response) => Ok(response.result.unwrap_or(Value::Null)),
            };
            self.complete(&intent, outcome);
        }
    }

    fn retry_or_fail(self: &Arc<Self>, intents: Vec<Arc<Intent>>, error: &UpstreamError) {
        let mut retried = 0usize;
        for intent in intents {
            if intent.is_completed() {
                continue;
            }
            let retries = intent.retries.load(Ordering::Relaxed);
            if error.is_retryable() && retries < self.config.max_retries {
                let retry = retries + 1;
                intent.retries.store(retry, Ordering::Relaxed);
                retried += 1;
                self.requeue_after(intent, self.config.backoff_for(retry));
            } else {
                tracing::debug!(method = %intent.method, retries, "batch retries exhausted");
                self.complete(&intent, Err(error.clone()));
            }
        }
        if retried > 0 {
            self.counters.retried.fetch_add(retried as u64, Ordering::Relaxed);
            self.metrics_collector.record_batch_retry(retried);
        }
    }

    fn requeue_after(self: &Arc<Self>, intent: Arc<Intent>, delay: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            {
                let mut state = inner.state.lock();
                if state.stopped || intent.is_completed() {
                    return;
                }
                state.queues[intent.priority.index()].push_back(intent);
            }
            Self::schedule_batch(&inner);
        });
    }

    /// Completes `intent` with `outcome` if nothing else has. Returns whether this call
    /// won.
    fn complete(&self, intent: &Arc<Intent>, outcome: Outcome) -> bool {
        if intent
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let waiters = intent.waiters.lock().take().unwrap_or_default();
        if let Some(timer) = intent.timeout_task.lock().take() {
            timer.abort();
        }

        let pending = {
            let mut state = self.state.lock();
            if let Some(key) = &intent.dedupe_key {
                if state.dedupe.get(key).is_some_and(|entry| entry.intent.id == intent.id) {
                    state.dedupe.remove(key);
                }
            }
            let queue = &mut state.queues[intent.priority.index()];
            if let Some(position) = queue.iter().position(|queued| queued.id == intent.id) {
                queue.remove(position);
            }
            state.live.remove(&intent.id);
            state.live.len()
        };

        let label = match &outcome {
            Ok(_) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                "success"
            }
            Err(UpstreamError::RequestTimeout(_)) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                "timeout"
            }
            Err(UpstreamError::Shutdown) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                "shutdown"
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                "error"
            }
        };
        self.metrics_collector.record_intent_completed(label);
        self.metrics_collector.record_pending_requests(pending);

        for waiter in waiters {
            // The caller may have dropped its handle.
            let _ = waiter.send(outcome.clone());
        }
        true
    }
}
