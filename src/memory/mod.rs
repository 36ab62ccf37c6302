//! Conversation memory
//!
//! Bounded per-session turn history. Sessions are created on first use and each has
//! its own lock, so appends to one session never wait on another. Once the session
//! limit is reached the least recently used session is dropped.
//!
//! Sessions can be saved to and restored from JSON files so a conversation survives
//! across processes.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{RagError, Result};

const DEFAULT_MAX_SESSIONS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Position of the turn within its session, never reused after eviction
    pub ordinal: u64,
}

#[derive(Debug, Default)]
struct Session {
    turns: VecDeque<ConversationTurn>,
    next_ordinal: u64,
}

impl Session {
    fn restore(turns: Vec<ConversationTurn>, max_turns: usize) -> Self {
        let next_ordinal = turns.iter().map(|t| t.ordinal + 1).max().unwrap_or(0);
        let skip = turns.len().saturating_sub(max_turns);
        Self {
            turns: turns.into_iter().skip(skip).collect(),
            next_ordinal,
        }
    }

    fn push(&mut self, role: Role, text: String, max_turns: usize) {
        self.turns.push_back(ConversationTurn {
            role,
            text,
            ordinal: self.next_ordinal,
        });
        self.next_ordinal += 1;

        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    /// Tick of the last access, for least-recently-used eviction
    last_used: AtomicU64,
    session: Mutex<Session>,
}

/// On-disk form of one session
#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    session_id: String,
    turns: Vec<ConversationTurn>,
}

#[derive(Debug)]
pub struct ConversationMemory {
    max_turns: usize,
    max_sessions: usize,
    clock: AtomicU64,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl ConversationMemory {
    /// Memory keeping the `max_turns` most recent turns of each session
    #[inline]
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            max_sessions: DEFAULT_MAX_SESSIONS,
            clock: AtomicU64::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Cap on sessions held at once
    #[inline]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    #[inline]
    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[inline]
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Turns of `session_id`, oldest first; unknown sessions have no history
    #[inline]
    pub async fn get_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        let slot = self.sessions.read().await.get(session_id).cloned();
        match slot {
            Some(slot) => {
                self.touch(&slot);
                slot.session.lock().await.turns.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    #[inline]
    pub async fn append(&self, session_id: &str, role: Role, text: impl Into<String>) {
        let slot = self.session(session_id).await;
        slot.session
            .lock()
            .await
            .push(role, text.into(), self.max_turns);
    }

    /// Record a question and its answer under one lock so they stay adjacent
    #[inline]
    pub async fn append_exchange(
        &self,
        session_id: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) {
        let slot = self.session(session_id).await;
        let mut guard = slot.session.lock().await;
        guard.push(Role::User, question.into(), self.max_turns);
        guard.push(Role::Assistant, answer.into(), self.max_turns);
        debug!(
            "Session {} now holds {} turns",
            session_id,
            guard.turns.len()
        );
    }

    /// Forget a session entirely
    #[inline]
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    #[inline]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Replace a session's history, keeping only the most recent turns that fit
    #[inline]
    pub async fn restore(&self, session_id: &str, turns: Vec<ConversationTurn>) {
        let slot = self.session(session_id).await;
        *slot.session.lock().await = Session::restore(turns, self.max_turns);
    }

    /// Load `session_id` from `dir` if it was saved there; returns whether it was found
    #[inline]
    pub async fn load_session(&self, dir: &Path, session_id: &str) -> Result<bool> {
        let path = session_file(dir, session_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved session at {}", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let saved: SavedSession = serde_json::from_str(&contents).map_err(|e| {
            RagError::Config(format!("Corrupt session file {}: {}", path.display(), e))
        })?;
        debug!(
            "Restoring session {} with {} turns",
            saved.session_id,
            saved.turns.len()
        );
        self.restore(session_id, saved.turns).await;
        Ok(true)
    }

    /// Write the current history of `session_id` to `dir`
    #[inline]
    pub async fn save_session(&self, dir: &Path, session_id: &str) -> Result<()> {
        let path = session_file(dir, session_id)?;
        let saved = SavedSession {
            session_id: session_id.to_string(),
            turns: self.get_history(session_id).await,
        };
        let json = serde_json::to_string_pretty(&saved)
            .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to encode session: {}", e)))?;

        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, json).await?;
        info!("Saved session {} to {}", session_id, path.display());
        Ok(())
    }

    fn touch(&self, slot: &SessionSlot) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        slot.last_used.store(tick, Ordering::Relaxed);
    }

    async fn session(&self, session_id: &str) -> Arc<SessionSlot> {
        let existing = self.sessions.read().await.get(session_id).cloned();
        if let Some(slot) = existing {
            self.touch(&slot);
            return slot;
        }

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("Session limit reached, dropping session {}", oldest);
                sessions.remove(&oldest);
            }
        }

        let slot = Arc::clone(sessions.entry(session_id.to_string()).or_default());
        self.touch(&slot);
        slot
    }
}

/// Session ids become file names, so only plain ids are accepted
fn session_file(dir: &Path, session_id: &str) -> Result<PathBuf> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(dir.join(format!("{session_id}.json")))
    } else {
        Err(RagError::Config(format!(
            "Invalid session id '{}': use letters, digits, '-' or '_'",
            session_id
        )))
    }
}
