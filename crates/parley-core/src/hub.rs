//! Broadcast fan-out for Parley.
//!
//! Every admitted session owns a bounded outbound queue that its connection
//! task drains. Announcing an event enqueues it on each queue without
//! waiting, so a slow or dying client only loses its own events.

use crate::event::BroadcastEvent;
use crate::session::{Session, SessionId, UserId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Default per-session outbound queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Events buffered per session before new ones are dropped for it.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Receiving end of a session's outbound queue.
pub type Outbound = mpsc::Receiver<Arc<BroadcastEvent>>;

struct SessionQueue {
    user_id: UserId,
    sender: mpsc::Sender<Arc<BroadcastEvent>>,
}

/// Fan-out primitive over all admitted sessions.
pub struct BroadcastHub {
    sessions: DashMap<SessionId, SessionQueue>,
    dropped: AtomicU64,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        debug!("Creating broadcast hub with config: {:?}", config);
        Self {
            sessions: DashMap::new(),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Attach a session and return the receiving end of its queue.
    ///
    /// Registering the same session twice replaces its queue.
    pub fn register(&self, session: &Session) -> Outbound {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        self.sessions.insert(
            session.id,
            SessionQueue {
                user_id: session.user.id.clone(),
                sender,
            },
        );
        debug!(session = %session.id, user = %session.user.id, "Hub: session attached");
        receiver
    }

    /// Detach a session. Returns `false` if it was not attached.
    ///
    /// Dropping the queue's sender ends the session's outbound stream once
    /// the already-queued events are drained.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!(session = %session_id, "Hub: session detached");
        }
        removed
    }

    /// Deliver an event to every attached session except `exclude`.
    ///
    /// Returns the number of sessions the event was queued for. Full or
    /// closed queues are skipped.
    pub fn announce(&self, event: BroadcastEvent, exclude: Option<&SessionId>) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;

        for entry in self.sessions.iter() {
            if exclude == Some(entry.key()) {
                continue;
            }

            match entry.sender.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        session = %entry.key(),
                        user = %entry.user_id,
                        event = event.kind(),
                        "Outbound queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(session = %entry.key(), "Outbound queue closed, skipping");
                }
            }
        }

        trace!(event = event.kind(), recipients = delivered, "Announced event");
        delivered
    }

    /// Number of attached sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether a session is attached.
    #[must_use]
    pub fn is_attached(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Total events dropped because a session's queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
