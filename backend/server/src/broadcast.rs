//! # Change Broadcaster
//!
//! Fan-out of coarse change notifications to every connected session.
//!
//! - One bounded topic per session, no persistence or replay
//! - Publishing never blocks: a full topic misses the event, a closed topic is pruned
//! - Payloads are hints only, sessions re-read full state when one arrives
//! - Callers publish strictly after their commit succeeded
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub type SessionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeEvent {
    MenuChanged,
    TallyChanged,
    AdmissionChanged { closed: bool },
    ParticipantsChanged,
    CycleReset,
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::MenuChanged => "menuChanged",
            ChangeEvent::TallyChanged => "tallyChanged",
            ChangeEvent::AdmissionChanged { .. } => "admissionChanged",
            ChangeEvent::ParticipantsChanged => "participantsChanged",
            ChangeEvent::CycleReset => "cycleReset",
        }
    }
}

#[derive(Default)]
struct Sessions {
    next_id: SessionId,
    topics: BTreeMap<SessionId, mpsc::Sender<ChangeEvent>>,
}

#[derive(Clone)]
pub struct Broadcaster {
    sessions: Arc<Mutex<Sessions>>,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(Sessions::default())),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);

        let mut sessions = lock(&self.sessions);
        sessions.next_id += 1;
        let id = sessions.next_id;
        sessions.topics.insert(id, sender);

        debug!(session = id, "Session subscribed");

        Subscription {
            id,
            receiver,
            sessions: Arc::downgrade(&self.sessions),
        }
    }

    pub fn unsubscribe(&self, id: SessionId) -> bool {
        lock(&self.sessions).topics.remove(&id).is_some()
    }

    /// Returns how many sessions took the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut sessions = lock(&self.sessions);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, topic) in &sessions.topics {
            match topic.try_send(event) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session = id, kind = event.kind(), "Session lagging, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            sessions.topics.remove(&id);
        }

        #[cfg(feature = "verbose")]
        tracing::info!(kind = event.kind(), delivered, "Published change");

        delivered
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).topics.len()
    }
}

/// A session's topic. Dropping it unsubscribes.
pub struct Subscription {
    id: SessionId,
    receiver: mpsc::Receiver<ChangeEvent>,
    sessions: Weak<Mutex<Sessions>>,
}

impl Subscription {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(sessions) = self.sessions.upgrade() {
            lock(&sessions).topics.remove(&self.id);
            debug!(session = self.id, "Session unsubscribed");
        }
    }
}

fn lock(sessions: &Mutex<Sessions>) -> MutexGuard<'_, Sessions> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}
