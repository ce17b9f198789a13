//! Fan-out/fan-in request lifecycle.
//!
//! A request is split into units of work, each unit reports exactly one
//! completion, and the request finalizes once after the last completion. The
//! pending counter is decremented with a compare-and-swap so two completions can
//! never both observe the last-one-out transition.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::env::StorageEnv;
use crate::error::{EngineCode, ErrorCode};
use crate::types::{ExecResponse, GraphSpaceId, KeyValue, PartitionId, PartitionResult};

type Finalizer = Box<dyn FnOnce(Vec<PartitionResult>) + Send>;

/// Completion bookkeeping for one request.
pub struct CallTracker {
    space_id: GraphSpaceId,
    env: StorageEnv,
    pending: AtomicUsize,
    results: Mutex<Vec<PartitionResult>>,
    finalizer: Mutex<Option<Finalizer>>,
}

impl CallTracker {
    /// Creates a tracker expecting `calling_num` completions.
    ///
    /// With `calling_num == 0` the finalizer runs before this returns.
    pub fn new(
        env: StorageEnv,
        space_id: GraphSpaceId,
        calling_num: usize,
        finalizer: impl FnOnce(Vec<PartitionResult>) + Send + 'static,
    ) -> Arc<Self> {
        let tracker = Arc::new(Self {
            space_id,
            env,
            pending: AtomicUsize::new(calling_num),
            results: Mutex::new(Vec::new()),
            finalizer: Mutex::new(Some(Box::new(finalizer))),
        });
        if calling_num == 0 {
            tracker.finalize();
        }
        tracker
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Records one unit's outcome and finalizes if it was the last one.
    pub fn complete(&self, part: PartitionId, code: ErrorCode) {
        if let Some(entry) = self.result_entry(part, code) {
            warn!(
                space = self.space_id,
                part,
                code = ?entry.code,
                leader = ?entry.leader,
                "partition operation failed"
            );
            let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            // At most one entry per partition; the first failure wins.
            if !results.iter().any(|result| result.part_id == part) {
                results.push(entry);
            }
        } else {
            debug!(space = self.space_id, part, "partition operation succeeded");
        }

        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.finalize(),
            Ok(_) => {}
            Err(_) => error!(
                space = self.space_id,
                part, "completion reported after the request already finished"
            ),
        }
    }

    /// Leader lookup happens only for the reporting partition, outside any lock.
    fn result_entry(&self, part: PartitionId, code: ErrorCode) -> Option<PartitionResult> {
        match code {
            ErrorCode::Succeeded => None,
            ErrorCode::LeaderChanged => {
                let entry = match self.env.gateway.part_leader(self.space_id, part) {
                    Ok(leader) => PartitionResult {
                        part_id: part,
                        code: ErrorCode::LeaderChanged,
                        leader: Some(leader),
                    },
                    Err(lookup) => {
                        warn!(
                            space = self.space_id,
                            part,
                            code = ?lookup,
                            "failed to resolve partition leader"
                        );
                        PartitionResult {
                            part_id: part,
                            code: ErrorCode::from(lookup),
                            leader: None,
                        }
                    }
                };
                Some(entry)
            }
            code => Some(PartitionResult {
                part_id: part,
                code,
                leader: None,
            }),
        }
    }

    fn finalize(&self) {
        let results = std::mem::take(
            &mut *self.results.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let finalizer = self
            .finalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match finalizer {
            Some(finalizer) => finalizer(results),
            None => error!(space = self.space_id, "request finalized twice"),
        }
    }
}

/// Shared base of every processor: dispatch helpers plus the completion protocol.
pub struct BaseProcessor {
    env: StorageEnv,
    space_id: GraphSpaceId,
    tracker: Arc<CallTracker>,
    done: oneshot::Receiver<Vec<PartitionResult>>,
    dispatched: Mutex<BTreeSet<PartitionId>>,
    started: Instant,
}

impl BaseProcessor {
    pub fn new(env: StorageEnv, space_id: GraphSpaceId, calling_num: usize) -> Self {
        let (tx, done) = oneshot::channel();
        let tracker = CallTracker::new(env.clone(), space_id, calling_num, move |results| {
            let _ = tx.send(results);
        });
        Self {
            env,
            space_id,
            tracker,
            done,
            dispatched: Mutex::new(BTreeSet::new()),
            started: Instant::now(),
        }
    }

    pub fn env(&self) -> &StorageEnv {
        &self.env
    }

    pub fn space_id(&self) -> GraphSpaceId {
        self.space_id
    }

    pub fn tracker(&self) -> Arc<CallTracker> {
        self.tracker.clone()
    }

    /// Completion handler for engine outcomes.
    pub fn handle_async(&self, part: PartitionId, code: EngineCode) {
        self.tracker.complete(part, ErrorCode::from(code));
    }

    /// Completion handler for units that failed (or succeeded) without I/O.
    pub fn handle_error_code(&self, part: PartitionId, code: ErrorCode) {
        self.tracker.complete(part, code);
    }

    pub fn do_put(&self, part: PartitionId, batch: Vec<KeyValue>) {
        let gateway = self.env.gateway.clone();
        let space = self.space_id;
        self.spawn_unit(part, async move { gateway.multi_put(space, part, batch).await });
    }

    pub fn do_remove(&self, part: PartitionId, keys: Vec<Vec<u8>>) {
        let gateway = self.env.gateway.clone();
        let space = self.space_id;
        self.spawn_unit(part, async move { gateway.multi_remove(space, part, keys).await });
    }

    pub fn do_remove_range(&self, part: PartitionId, start: Vec<u8>, end: Vec<u8>) {
        let gateway = self.env.gateway.clone();
        let space = self.space_id;
        self.spawn_unit(part, async move {
            gateway.remove_range(space, part, start, end).await
        });
    }

    /// Awaits one put inline; the outcome is returned, not fed to the tracker.
    pub async fn do_sync_put(&self, part: PartitionId, batch: Vec<KeyValue>) -> EngineCode {
        self.env.gateway.multi_put(self.space_id, part, batch).await
    }

    /// Awaits one atomic remove-then-put inline; the outcome is returned, not
    /// fed to the tracker.
    pub async fn do_sync_atomic_write(
        &self,
        part: PartitionId,
        removes: Vec<Vec<u8>>,
        puts: Vec<KeyValue>,
    ) -> EngineCode {
        self.env
            .gateway
            .atomic_write(self.space_id, part, removes, puts)
            .await
    }

    fn spawn_unit<F>(&self, part: PartitionId, op: F)
    where
        F: std::future::Future<Output = EngineCode> + Send + 'static,
    {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(part);
        let tracker = self.tracker.clone();
        let space = self.space_id;
        tokio::spawn(async move {
            let code = match AssertUnwindSafe(op).catch_unwind().await {
                Ok(code) => ErrorCode::from(code),
                Err(_) => {
                    error!(space, part, "partition operation panicked");
                    ErrorCode::Unknown
                }
            };
            tracker.complete(part, code);
        });
    }

    /// Waits for the last completion and builds the aggregated response.
    pub async fn finish(self) -> ExecResponse {
        let failed_parts = match self.done.await {
            Ok(results) => results,
            Err(_) => {
                // Only reachable when the runtime dropped in-flight units.
                error!(space = self.space_id, "request completion channel closed");
                self.dispatched
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|part| PartitionResult {
                        part_id: *part,
                        code: ErrorCode::Unknown,
                        leader: None,
                    })
                    .collect()
            }
        };
        let latency_us = self.started.elapsed().as_micros() as u64;
        debug!(
            space = self.space_id,
            failed = failed_parts.len(),
            latency_us,
            "request finished"
        );
        ExecResponse {
            failed_parts,
            request_code: None,
            latency_us,
        }
    }
}
