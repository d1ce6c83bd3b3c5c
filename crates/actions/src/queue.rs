use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    dbhq_cache::{PinGuard, StateCache},
    dbhq_common::{CoreEvent, Error, ErrorKind, RestRequest, RestResponse, TelemetrySink},
    dbhq_ratelimit::{ExponentialBackoff, LimitedRest},
    futures::FutureExt,
    tokio::sync::{Semaphore, oneshot},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, warn},
};

use crate::{
    action::{Action, ActionId},
    error::ActionError,
    handle::{ActionHandle, ActionReceipt, Lifecycle, Outcome},
};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retries after the first attempt before an action is failed.
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
    /// Longest retry delay an action will sleep out. A remote demand beyond
    /// it fails the action with [`Error::RateLimitTimeout`].
    pub max_retry_delay: Duration,
    /// Actions allowed to be in a remote call at the same time.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: ExponentialBackoff::default(),
            max_retry_delay: Duration::from_secs(30),
            workers: 8,
        }
    }
}

struct Queued {
    id: ActionId,
    action: Action,
    lifecycle: Arc<Lifecycle>,
    reply: oneshot::Sender<Outcome>,
    _pin: Option<PinGuard>,
}

pub(crate) struct Inner {
    rest: LimitedRest,
    cache: Option<Arc<StateCache>>,
    config: QueueConfig,
    sink: Arc<dyn TelemetrySink>,
    /// A lane exists while a worker owns it; the running action is not in it.
    lanes: Mutex<HashMap<String, VecDeque<Queued>>>,
    permits: Semaphore,
    next_id: AtomicU64,
    tracker: TaskTracker,
    stop: CancellationToken,
    closed: AtomicBool,
    abandoned: AtomicUsize,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Runs actions with per-resource FIFO ordering and bounded concurrency.
///
/// Each resource key gets a lane drained by a single task. A retry keeps the
/// action at the head of its lane, so later actions on the same key wait for
/// it to resolve; the pool permit is given back while the retry delay runs.
#[derive(Clone, Debug)]
pub struct ActionQueue {
    inner: Arc<Inner>,
}

impl ActionQueue {
    /// `cache`, when given, has action targets pinned while pending and is
    /// reconciled after not-found and conflict failures.
    #[must_use]
    pub fn new(
        rest: LimitedRest,
        cache: Option<Arc<StateCache>>,
        config: QueueConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let permits = Semaphore::new(config.workers.max(1));
        Self {
            inner: Arc::new(Inner {
                rest,
                cache,
                config,
                sink,
                lanes: Mutex::new(HashMap::new()),
                permits,
                next_id: AtomicU64::new(0),
                tracker: TaskTracker::new(),
                stop: CancellationToken::new(),
                closed: AtomicBool::new(false),
                abandoned: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueue `action` behind earlier actions on the same resource.
    ///
    /// After [`shutdown`](Self::shutdown) has begun the handle resolves
    /// immediately with [`Error::ShuttingDown`].
    pub fn submit(&self, action: impl Into<Action>) -> ActionHandle {
        let inner = &self.inner;
        let action = action.into();
        let id = ActionId(inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let resource = action.resource();
        let lifecycle = Arc::new(Lifecycle::default());
        let (reply, rx) = oneshot::channel();
        let handle = ActionHandle::new(
            id,
            resource.clone(),
            Arc::clone(&lifecycle),
            rx,
            Arc::downgrade(inner),
        );

        if inner.closed.load(Ordering::Acquire) {
            warn!(action_id = %id, action = action.name(), "action submitted after shutdown");
            let _ = reply.send(Err(ActionError::new(id, 0, Error::ShuttingDown)));
            return handle;
        }

        inner.sink.emit(&CoreEvent::ActionSubmitted {
            action_id: id.0,
            action: action.name(),
            resource: resource.clone(),
        });
        debug!(action_id = %id, action = action.name(), resource = %resource, "action queued");

        let pin = inner
            .cache
            .as_ref()
            .zip(action.target())
            .map(|(cache, key)| cache.pin(&key));
        let queued = Queued {
            id,
            action,
            lifecycle,
            reply,
            _pin: pin,
        };

        let start_worker = {
            let mut lanes = inner.lanes();
            match lanes.get_mut(&resource) {
                Some(lane) => {
                    lane.push_back(queued);
                    false
                },
                None => {
                    lanes.insert(resource.clone(), VecDeque::from([queued]));
                    true
                },
            }
        };
        if start_worker {
            inner.tracker.spawn(run_lane(Arc::clone(inner), resource));
        }
        handle
    }

    /// Actions waiting behind a running one, across all lanes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lanes().values().map(VecDeque::len).sum()
    }

    /// Stop accepting actions and let queued ones finish for up to `grace`.
    ///
    /// Whatever is still queued or in flight when `grace` runs out resolves
    /// with [`Error::ShuttingDown`]. Returns how many actions that was.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::Release);
        inner.tracker.close();

        if tokio::time::timeout(grace, inner.tracker.wait()).await.is_err() {
            warn!(
                pending = self.pending(),
                grace_ms = grace.as_millis() as u64,
                "shutdown grace elapsed, abandoning remaining actions"
            );
            inner.stop.cancel();
            inner.tracker.wait().await;
        }

        let abandoned = inner.abandoned.load(Ordering::Acquire);
        info!(abandoned, "action queue stopped");
        abandoned
    }
}

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Queued>>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop a cancelled action from its lane, releasing its pin.
    pub(crate) fn forget(&self, resource: &str, id: ActionId) {
        let removed = {
            let mut lanes = self.lanes();
            lanes.get_mut(resource).and_then(|lane| {
                let pos = lane.iter().position(|q| q.id == id)?;
                lane.remove(pos)
            })
        };
        if let Some(queued) = removed {
            debug!(action_id = %id, resource, "action cancelled before start");
            self.sink.emit(&CoreEvent::ActionCancelled {
                action_id: id.0,
                action: queued.action.name(),
            });
        }
    }

    async fn execute(&self, queued: &Queued) -> Result<(RestResponse, u32), (Error, u32)> {
        let request = queued.action.request();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.stop.cancelled() => return Err((Error::ShuttingDown, attempt - 1)),
                result = self.attempt(&request) => result,
            };

            let error = match result {
                Ok(response) => return Ok((response, attempt)),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => e,
                Err(e) => return Err((e, attempt)),
            };

            let delay = error
                .retry_after()
                .unwrap_or_else(|| self.config.backoff.delay(attempt - 1));
            if delay > self.config.max_retry_delay {
                warn!(
                    action_id = %queued.id,
                    delay_ms = delay.as_millis() as u64,
                    limit_ms = self.config.max_retry_delay.as_millis() as u64,
                    "retry delay too long, giving up"
                );
                return Err((
                    Error::RateLimitTimeout {
                        route: request.route.to_string(),
                        timeout: self.config.max_retry_delay,
                    },
                    attempt,
                ));
            }
            debug!(
                action_id = %queued.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying action"
            );
            self.sink.emit(&CoreEvent::ActionRetried {
                action_id: queued.id.0,
                action: queued.action.name(),
                attempt,
                delay,
                error: error.to_string(),
            });

            tokio::select! {
                biased;
                () = self.stop.cancelled() => return Err((Error::ShuttingDown, attempt)),
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    async fn attempt(&self, request: &RestRequest) -> dbhq_common::Result<RestResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        self.rest.send(request).await
    }

    fn finish(&self, queued: Queued, outcome: Result<(RestResponse, u32), (Error, u32)>) {
        let Queued {
            id,
            action,
            reply,
            _pin: pin,
            ..
        } = queued;
        drop(pin);

        let result = match outcome {
            Ok((response, attempts)) => {
                debug!(action_id = %id, action = action.name(), attempts, "action succeeded");
                self.sink.emit(&CoreEvent::ActionSucceeded {
                    action_id: id.0,
                    action: action.name(),
                    attempts,
                });
                Ok(ActionReceipt {
                    id,
                    attempts,
                    response,
                })
            },
            Err((error, attempts)) => {
                if error.kind() == ErrorKind::ShuttingDown {
                    self.abandoned.fetch_add(1, Ordering::AcqRel);
                    self.sink.emit(&CoreEvent::ActionCancelled {
                        action_id: id.0,
                        action: action.name(),
                    });
                } else {
                    warn!(
                        action_id = %id,
                        action = action.name(),
                        attempts,
                        error = %error,
                        "action failed"
                    );
                    self.sink.emit(&CoreEvent::ActionFailed {
                        action_id: id.0,
                        action: action.name(),
                        attempts,
                        error_kind: error.kind(),
                        error: error.to_string(),
                    });
                }
                if error.should_reconcile() {
                    self.reconcile_target(&action);
                }
                Err(ActionError::new(id, attempts, error))
            },
        };
        let _ = reply.send(result);
    }

    /// The remote side disagrees with our view of the target; refresh it in
    /// the background.
    fn reconcile_target(&self, action: &Action) {
        let (Some(cache), Some(key)) = (self.cache.as_ref(), action.target()) else {
            return;
        };
        let cache = Arc::clone(cache);
        self.tracker.spawn(async move {
            match cache.reconcile(&key).await {
                Ok(entity) => debug!(key = %key, found = entity.is_some(), "target reconciled"),
                Err(e) => debug!(key = %key, error = %e, "target reconcile failed"),
            }
        });
    }
}

/// Keeps a lane serviced if its worker unwinds: the lane is handed to a new
/// worker, or removed when nothing is left in it.
struct LaneGuard {
    inner: Arc<Inner>,
    resource: String,
    armed: bool,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let respawn = {
            let mut lanes = self.inner.lanes();
            match lanes.get(&self.resource) {
                Some(lane) if !lane.is_empty() => true,
                _ => {
                    lanes.remove(&self.resource);
                    false
                },
            }
        };
        if respawn {
            warn!(resource = %self.resource, "lane worker exited abnormally, restarting");
            self.inner.tracker.spawn(run_lane(
                Arc::clone(&self.inner),
                std::mem::take(&mut self.resource),
            ));
        }
    }
}

async fn run_lane(inner: Arc<Inner>, resource: String) {
    let mut guard = LaneGuard {
        inner: Arc::clone(&inner),
        resource: resource.clone(),
        armed: true,
    };
    loop {
        let next = {
            let mut lanes = inner.lanes();
            match lanes.get_mut(&resource).and_then(VecDeque::pop_front) {
                Some(queued) => queued,
                None => {
                    lanes.remove(&resource);
                    guard.armed = false;
                    return;
                },
            }
        };
        if !next.lifecycle.start() {
            continue;
        }
        let outcome = if inner.stop.is_cancelled() {
            Err((Error::ShuttingDown, 0))
        } else {
            match AssertUnwindSafe(inner.execute(&next)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(action_id = %next.id, resource = %resource, "action attempt panicked");
                    Err((Error::message("action attempt panicked"), 0))
                },
            }
        };
        inner.finish(next, outcome);
    }
}
