//! Handoff channel between the compaction pipeline and a delivery surface.
//!
//! Finished essence payloads travel through an unbounded multi-producer,
//! single-consumer queue. The consumer drains on a dedicated loop and must
//! tolerate a temporarily unavailable delivery surface by polling instead of
//! dropping payloads.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};


#[derive(Debug, Clone, PartialEq, Eq)]
/// Finished essence document plus the metadata it travels with.
///
/// Produced once per compaction run and consumed exactly once.
pub struct HandoffPayload {
    pub session_id: String,
    pub mode: String,
    pub text: String,
    /// Asks the delivery collaborator for a fresh delivery surface.
    pub open_new_session: bool,
    /// File-name label of the source transcript, for traceability.
    pub source_label: String,
    /// File-name label of the written essence artifact.
    pub artifact_label: String,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<HandoffPayload>,
    completed: bool,
}

#[derive(Debug, Default)]
/// Unbounded MPSC queue carrying finished handoff payloads.
pub struct HandoffQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a payload. Empty-text payloads are dropped, as are payloads
    /// arriving after [`HandoffQueue::complete`].
    pub fn enqueue(&self, payload: HandoffPayload) -> bool {
        if payload.text.trim().is_empty() {
            debug!(session_id = payload.session_id, "dropped empty handoff payload");
            return false;
        }
        let mut state = self.lock_state();
        if state.completed {
            warn!(
                session_id = payload.session_id,
                "handoff queue already completed; payload dropped"
            );
            return false;
        }
        state.items.push_back(payload);
        drop(state);
        // notify_one stores a permit, so a wakeup between the consumer's
        // state check and its await is never lost.
        self.notify.notify_one();
        true
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<HandoffPayload> {
        self.lock_state().items.pop_front()
    }

    /// Waits until a payload is available or the queue is completed and
    /// drained, in which case `None` signals shutdown.
    pub async fn wait_for_payload(&self) -> Option<HandoffPayload> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock_state();
                if let Some(payload) = state.items.pop_front() {
                    return Some(payload);
                }
                if state.completed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Drops all queued payloads, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.lock_state();
        let discarded = state.items.len();
        state.items.clear();
        discarded
    }

    /// Marks the queue completed: producers are refused and the consumer
    /// unblocks once the backlog drains.
    pub fn complete(&self) {
        self.lock_state().completed = true;
        self.notify.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.lock_state().completed
    }

    pub fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Drains the queue on a consumer loop, retrying a temporarily unavailable
/// delivery surface with a fixed poll interval. A payload is abandoned only
/// after `max_attempts` consecutive delivery refusals; the loop itself runs
/// until the queue completes.
pub async fn drain_with_retry<F>(
    queue: &HandoffQueue,
    mut deliver: F,
    poll_interval: Duration,
    max_attempts: u32,
) -> u64
where
    F: FnMut(&HandoffPayload) -> bool,
{
    let mut delivered = 0u64;
    while let Some(payload) = queue.wait_for_payload().await {
        let mut attempts = 0u32;
        loop {
            if deliver(&payload) {
                delivered += 1;
                break;
            }
            attempts += 1;
            if attempts >= max_attempts {
                warn!(
                    session_id = payload.session_id,
                    attempts, "delivery surface unavailable; payload abandoned"
                );
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
    delivered
}
