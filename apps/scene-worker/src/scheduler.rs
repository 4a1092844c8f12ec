//! Bounded-concurrency priority scheduler for asset fetches.
//!
//! Requests wait in an unordered queue. Whenever capacity frees up the scheduler starts the
//! queued request with the highest method priority, breaking ties in favour of the most
//! recently enqueued one. Each request moves `Queued -> Running -> Done`; `on_settled` is the
//! only way out of `Running`, so the running set is the capacity count.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::metrics;
use crate::priority::priority_for;
use crate::tile_width::TileWidthTable;

pub type RequestId = u64;
pub type FetchOutcome = Result<FetchResponse, FetchError>;

/// Caller payload carried with a request. `method` selects the priority and is echoed back in
/// error reports together with `params`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Queued,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active: usize,
    pub max_active: usize,
}

struct PendingRequest {
    id: RequestId,
    priority: u32,
    request: FetchRequest,
    context: RequestContext,
    completion: oneshot::Sender<FetchOutcome>,
}

struct RunningRequest {
    context: RequestContext,
    completion: oneshot::Sender<FetchOutcome>,
}

struct SchedulerState {
    queue: Vec<PendingRequest>,
    running: HashMap<RequestId, RunningRequest>,
    max_active: usize,
    next_id: RequestId,
}

impl SchedulerState {
    fn select_next(&self) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .max_by_key(|(_, pending)| (pending.priority, pending.id))
            .map(|(idx, _)| idx)
    }

    /// Moves as many queued requests to `Running` as capacity allows.
    fn take_startable(&mut self) -> Vec<(RequestId, FetchRequest, String)> {
        let mut started = Vec::new();
        while self.running.len() < self.max_active {
            let Some(idx) = self.select_next() else {
                break;
            };
            let pending = self.queue.swap_remove(idx);
            let method = pending.context.method.clone();
            self.running.insert(
                pending.id,
                RunningRequest {
                    context: pending.context,
                    completion: pending.completion,
                },
            );
            started.push((pending.id, pending.request, method));
        }
        started
    }
}

/// Completion handle returned by [`RequestScheduler::enqueue`].
#[derive(Debug)]
pub struct FetchHandle {
    id: RequestId,
    receiver: oneshot::Receiver<FetchOutcome>,
}

impl FetchHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub async fn settled(self) -> FetchOutcome {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(FetchError::transport("request abandoned before completion")))
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    fetcher: Arc<dyn Fetcher>,
    tiles: Arc<TileWidthTable>,
}

/// Cheap to clone; clones share one queue. Must be used from within a Tokio runtime because
/// starting a request spawns its network call.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl RequestScheduler {
    pub fn new(fetcher: Arc<dyn Fetcher>, tiles: Arc<TileWidthTable>, max_active: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState {
                    queue: Vec::new(),
                    running: HashMap::new(),
                    max_active: max_active.max(1),
                    next_id: 1,
                }),
                fetcher,
                tiles,
            }),
        }
    }

    pub fn tiles(&self) -> &Arc<TileWidthTable> {
        &self.inner.tiles
    }

    /// Queues a fetch and starts whatever capacity allows. All failures surface through the
    /// returned handle.
    pub fn enqueue(&self, request: FetchRequest, context: RequestContext) -> FetchHandle {
        let priority = priority_for(&context.method);
        let (completion, receiver) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            debug!(
                request_id = id,
                method = %context.method,
                priority,
                queued = state.queue.len() + 1,
                "queued fetch"
            );
            state.queue.push(PendingRequest {
                id,
                priority,
                request,
                context,
                completion,
            });
            id
        };
        self.drain();
        FetchHandle { id, receiver }
    }

    /// Applies to future scheduling decisions only; running requests are never cancelled.
    pub fn set_concurrency_limit(&self, max_active: usize) {
        let max_active = if max_active == 0 {
            warn!("max active requests must be positive; using 1");
            1
        } else {
            max_active
        };
        self.inner.state.lock().max_active = max_active;
        debug!(max_active, "updated concurrency limit");
        self.drain();
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            queued: state.queue.len(),
            active: state.running.len(),
            max_active: state.max_active,
        }
    }

    pub fn phase(&self, id: RequestId) -> RequestPhase {
        let state = self.inner.state.lock();
        if state.running.contains_key(&id) {
            RequestPhase::Running
        } else if state.queue.iter().any(|pending| pending.id == id) {
            RequestPhase::Queued
        } else {
            RequestPhase::Done
        }
    }

    /// Transitions a running request to `Done`: releases its capacity slot, records the
    /// tile-width hint of a successful response, resolves the caller's handle and drains the
    /// queue again. Settling an id that is not running is ignored.
    pub fn on_settled(&self, id: RequestId, outcome: FetchOutcome) {
        let Some(running) = self.inner.state.lock().running.remove(&id) else {
            warn!(request_id = id, "settled a request that is not running");
            return;
        };
        metrics::ACTIVE_REQUESTS.dec();

        match &outcome {
            Ok(response) => {
                if let Some(width) = &response.tile_width {
                    self.inner.tiles.record_tile_width(&response.url, width);
                }
                debug!(request_id = id, method = %running.context.method, "fetch settled");
            }
            Err(err) => {
                warn!(
                    request_id = id,
                    method = %running.context.method,
                    status = err.status,
                    error = %err.message,
                    "fetch failed"
                );
            }
        }

        if running.completion.send(outcome).is_err() {
            debug!(request_id = id, "fetch handle dropped before completion");
        }
        self.drain();
    }

    fn drain(&self) {
        let started = self.inner.state.lock().take_startable();
        for (id, request, method) in started {
            self.start(id, request, &method);
        }
    }

    fn start(&self, id: RequestId, request: FetchRequest, method: &str) {
        debug!(request_id = id, method, url = %request.url, "starting fetch");
        metrics::REQUESTS_STARTED.with_label_values(&[method]).inc();
        metrics::ACTIVE_REQUESTS.inc();
        let scheduler = self.clone();
        let fetcher = Arc::clone(&self.inner.fetcher);
        tokio::spawn(async move {
            // The fetch runs on its own task so a panicking fetcher still settles its slot.
            let outcome = match tokio::spawn(async move { fetcher.fetch(request).await }).await {
                Ok(outcome) => outcome,
                Err(err) => Err(FetchError::transport(format!("fetch task failed: {err}"))),
            };
            scheduler.on_settled(id, outcome);
        });
    }
}
