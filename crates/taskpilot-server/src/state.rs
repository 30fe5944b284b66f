use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use taskpilot::conversation::Conversation;
use taskpilot::errors::AgentResult;
use taskpilot::tasks::{build_task, Task, TaskContext, TaskKind};

pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// One conversation with one task. The mutex makes each turn the only writer.
pub struct SessionSlot {
    pub task: Box<dyn Task>,
    pub conversation: Mutex<Conversation>,
    last_used: AtomicU64,
}

type SessionKey = (TaskKind, String);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    context: TaskContext,
    sessions: Arc<Mutex<HashMap<SessionKey, Arc<SessionSlot>>>>,
    max_sessions: usize,
    clock: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(context: TaskContext) -> Self {
        Self {
            context,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_sessions: DEFAULT_MAX_SESSIONS,
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Keep at most `max` sessions; the least recently used one is dropped to make room
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// The session `id` of `kind`, started on first use
    pub async fn session(&self, kind: TaskKind, id: &str) -> AgentResult<Arc<SessionSlot>> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get(&(kind, id.to_string())) {
            slot.last_used.store(tick, Ordering::Relaxed);
            return Ok(slot.clone());
        }

        let task = build_task(kind, &self.context.for_session(kind, id))?;
        let conversation = task.start()?;
        let slot = Arc::new(SessionSlot {
            task,
            conversation: Mutex::new(conversation),
            last_used: AtomicU64::new(tick),
        });

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                // a turn still running keeps its own handle on the slot
                sessions.remove(&key);
                tracing::info!(task = %key.0, id = %key.1, "idle session dropped");
            }
        }

        sessions.insert((kind, id.to_string()), slot.clone());
        tracing::info!(task = %kind, id = %id, "session started");
        Ok(slot)
    }

    /// Forget a session; returns whether it existed
    pub async fn reset(&self, kind: TaskKind, id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .remove(&(kind, id.to_string()))
            .is_some()
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, kind: TaskKind, id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .contains_key(&(kind, id.to_string()))
    }
}
