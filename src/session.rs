use crate::error::SessionError;
use crate::generate::ScoreResult;
use crate::types::SessionEvent;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Position of a session in the fixed interview script.  Transitions only
/// ever move forward along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Introduction,
    Question1,
    Question2,
    QnA,
    Scoring,
    Terminated,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Interviewer,
    Candidate,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Read-only snapshot handed to the response generator.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub job_role: String,
    pub job_description: String,
    pub history: Vec<Turn>,
}

/// Full mutable state for one phone call, from placement to termination.
pub struct CallSession {
    pub call_sid: String,
    pub phone: String,
    pub phase: Phase,
    pub job_role: String,
    pub job_description: String,
    /// Append-only; insertion order forms the prompt context and the
    /// final transcript.
    pub history: Vec<Turn>,
    pub questions_asked: u8,
    /// Set once the greeting has been spoken; capture restarts replay
    /// CallStarted and must not greet twice.
    pub greeted: bool,
    /// Set once the "do you have questions for me" prompt has been
    /// spoken.
    pub conclusion_offered: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Populated during finalization, immediately before teardown.
    pub score: Option<ScoreResult>,
}

impl CallSession {
    pub fn new(call_sid: String, phone: String, job_role: String, job_description: String) -> Self {
        let now = Instant::now();
        Self {
            call_sid,
            phone,
            phase: Phase::Introduction,
            job_role,
            job_description,
            history: Vec::new(),
            questions_asked: 0,
            greeted: false,
            conclusion_offered: false,
            created_at: now,
            last_activity: now,
            score: None,
        }
    }

    /// Monotonic phase transition.  A backward request indicates an event
    /// arriving out of order; it is logged and ignored, never applied.
    pub fn advance(&mut self, next: Phase) {
        if next < self.phase {
            warn!(call=%self.call_sid, from=?self.phase, to=?next, "ignoring backward phase transition");
            return;
        }
        if next != self.phase {
            debug!(call=%self.call_sid, from=?self.phase, to=?next, "phase transition");
            self.phase = next;
        }
    }

    pub fn push_turn(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.history.push(Turn {
            speaker,
            text: text.into(),
        });
    }

    pub fn prompt_context(&self) -> PromptContext {
        PromptContext {
            job_role: self.job_role.clone(),
            job_description: self.job_description.clone(),
            history: self.history.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

struct SessionEntry {
    session: Arc<Mutex<CallSession>>,
    events: mpsc::Sender<SessionEvent>,
}

/// The one globally shared mutable structure: call sid to session
/// registry.  All mutation funnels through `mutate` so concurrent webhook
/// deliveries for the same call cannot interleave partial updates.  Lock
/// poisoning here indicates a structural concurrency bug and is allowed to
/// be fatal.
pub struct SessionStore {
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(
        &self,
        session: CallSession,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<(), SessionError> {
        let call_sid = session.call_sid.clone();
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&call_sid) {
            return Err(SessionError::Duplicate(call_sid));
        }
        inner.insert(
            call_sid,
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                events,
            },
        );
        Ok(())
    }

    pub fn get(&self, call_sid: &str) -> Option<Arc<Mutex<CallSession>>> {
        let inner = self.inner.lock().unwrap();
        inner.get(call_sid).map(|e| e.session.clone())
    }

    pub fn sender(&self, call_sid: &str) -> Option<mpsc::Sender<SessionEvent>> {
        let inner = self.inner.lock().unwrap();
        inner.get(call_sid).map(|e| e.events.clone())
    }

    pub fn mutate<R>(
        &self,
        call_sid: &str,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> Result<R, SessionError> {
        let session = self
            .get(call_sid)
            .ok_or_else(|| SessionError::UnknownCall(call_sid.to_string()))?;
        let mut session = session.lock().unwrap();
        Ok(f(&mut session))
    }

    /// Push a normalized event onto the call's ordered queue.  Unknown
    /// call sids are the caller's error to surface; a closed queue means
    /// the session is tearing down and the event is dropped.
    pub async fn dispatch(&self, call_sid: &str, event: SessionEvent) -> Result<(), SessionError> {
        let sender = self
            .sender(call_sid)
            .ok_or_else(|| SessionError::UnknownCall(call_sid.to_string()))?;
        if sender.send(event).await.is_err() {
            debug!(call=%call_sid, "session queue closed; event dropped");
        }
        Ok(())
    }

    pub fn remove(&self, call_sid: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.remove(call_sid).is_some()
    }

    pub fn live_calls(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Call sids idle beyond the bound, for zombie-session reclamation.
    pub fn idle_calls(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner
            .iter()
            .filter(|(_, e)| e.session.lock().unwrap().idle_for(now) > max_idle)
            .map(|(sid, _)| sid.clone())
            .collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
