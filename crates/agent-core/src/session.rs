use crate::config::AppConfig;
use crate::error::AgentError;
use crate::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A single conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Facts the user asked the agent to keep, appended to the system prompt.
    #[serde(default)]
    pub memories: Vec<String>,
    /// Arbitrary metadata attached to this session.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            memories: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a message and update the timestamp.
    pub fn push_message(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Store a memory. Blank and duplicate memories are ignored; returns
    /// whether anything was added.
    pub fn remember(&mut self, memory: &str) -> bool {
        let memory = memory.trim();
        if memory.is_empty() || self.memories.iter().any(|m| m == memory) {
            return false;
        }
        self.memories.push(memory.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Remove the memory at the 1-based `index` shown by `/memories`.
    pub fn forget(&mut self, index: usize) -> Option<String> {
        if index == 0 || index > self.memories.len() {
            return None;
        }
        self.updated_at = Utc::now();
        Some(self.memories.remove(index - 1))
    }

    /// Get the most recent N messages for the context window.
    pub fn recent_messages(&self, max: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(max);
        &self.messages[start..]
    }

    /// Persist this session to disk as JSON.
    pub fn save_to(&self, dir: &Path) -> Result<(), AgentError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a session from a JSON file.
    pub fn load_from(path: &Path) -> Result<Self, AgentError> {
        let json = std::fs::read_to_string(path)?;
        let session: Self = serde_json::from_str(&json)?;
        Ok(session)
    }
}

/// Manages multiple sessions with persistence.
pub struct SessionManager {
    sessions: HashMap<String, Session>,
    active_session_id: Option<String>,
    sessions_dir: PathBuf,
    max_history: usize,
    auto_save: bool,
}

impl SessionManager {
    /// Create a new session manager. Loads existing sessions from disk.
    pub fn new(config: &AppConfig) -> Result<Self, AgentError> {
        let sessions_dir = config
            .session
            .history_dir
            .clone()
            .unwrap_or_else(|| AppConfig::data_dir().join("sessions"));
        std::fs::create_dir_all(&sessions_dir)?;

        let mut manager = Self {
            sessions: HashMap::new(),
            active_session_id: None,
            sessions_dir,
            max_history: config.session.max_history,
            auto_save: config.session.auto_save,
        };
        manager.load_all()?;

        if manager.sessions.is_empty() {
            manager.create_session("default")?;
        } else {
            // Activate the most recently updated session.
            manager.active_session_id = manager
                .sessions
                .values()
                .max_by_key(|s| s.updated_at)
                .map(|s| s.id.clone());
        }

        Ok(manager)
    }

    /// Load all sessions from the sessions directory.
    fn load_all(&mut self) -> Result<(), AgentError> {
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                match Session::load_from(&path) {
                    Ok(session) => {
                        self.sessions.insert(session.id.clone(), session);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load session from {:?}: {}", path, e);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session_id
            .as_ref()
            .and_then(|id| self.sessions.get(id))
    }

    pub fn active_session_mut(&mut self) -> Option<&mut Session> {
        self.active_session_id
            .as_ref()
            .and_then(|id| self.sessions.get_mut(id))
    }

    fn require_active(&mut self) -> Result<&mut Session, AgentError> {
        self.active_session_mut()
            .ok_or_else(|| AgentError::Session("No active session".into()))
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    /// Create a new session and make it active.
    pub fn create_session(&mut self, name: impl Into<String>) -> Result<&Session, AgentError> {
        let session = Session::new(name);
        let id = session.id.clone();
        if self.auto_save {
            session.save_to(&self.sessions_dir)?;
        }
        self.active_session_id = Some(id.clone());
        Ok(self.sessions.entry(id).or_insert(session))
    }

    /// Switch to an existing session by ID or unique ID prefix.
    pub fn switch_session(&mut self, id: &str) -> Result<(), AgentError> {
        let matches: Vec<&String> = self.sessions.keys().filter(|k| k.starts_with(id)).collect();
        match matches.as_slice() {
            [only] => {
                self.active_session_id = Some((*only).clone());
                Ok(())
            }
            [] => Err(AgentError::Session(format!("Session not found: {}", id))),
            _ => Err(AgentError::Session(format!("Ambiguous session id: {}", id))),
        }
    }

    /// Delete a session by ID.
    pub fn delete_session(&mut self, id: &str) -> Result<(), AgentError> {
        self.sessions.remove(id);
        let path = self.sessions_dir.join(format!("{}.json", id));
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if self.active_session_id.as_deref() == Some(id) {
            self.active_session_id = self.sessions.keys().next().cloned();
            if self.active_session_id.is_none() {
                self.create_session("default")?;
            }
        }
        Ok(())
    }

    /// List all sessions as (id, name, updated_at, message_count), newest first.
    pub fn list_sessions(&self) -> Vec<(&str, &str, DateTime<Utc>, usize)> {
        let mut list: Vec<_> = self
            .sessions
            .values()
            .map(|s| (s.id.as_str(), s.name.as_str(), s.updated_at, s.messages.len()))
            .collect();
        list.sort_by(|a, b| b.2.cmp(&a.2));
        list
    }

    /// Add a message to the active session.
    pub fn push_message(&mut self, message: Message) -> Result<(), AgentError> {
        self.require_active()?.push_message(message);
        self.autosave()
    }

    /// Drop the active session's messages, keeping its memories.
    pub fn clear_history(&mut self) -> Result<(), AgentError> {
        let session = self.require_active()?;
        session.messages.clear();
        session.updated_at = Utc::now();
        self.autosave()
    }

    /// Add a memory to the active session.
    pub fn remember(&mut self, memory: &str) -> Result<bool, AgentError> {
        let added = self.require_active()?.remember(memory);
        if added {
            self.autosave()?;
        }
        Ok(added)
    }

    /// Remove a memory from the active session by 1-based index.
    pub fn forget(&mut self, index: usize) -> Result<Option<String>, AgentError> {
        let removed = self.require_active()?.forget(index);
        if removed.is_some() {
            self.autosave()?;
        }
        Ok(removed)
    }

    /// Memories of the active session.
    pub fn memories(&self) -> &[String] {
        self.active_session()
            .map(|s| s.memories.as_slice())
            .unwrap_or_default()
    }

    /// Get the recent message history for the active session (for the context window).
    pub fn recent_messages(&self) -> Vec<Message> {
        self.active_session()
            .map(|s| s.recent_messages(self.max_history).to_vec())
            .unwrap_or_default()
    }

    /// Save the active session to disk.
    pub fn save_active(&self) -> Result<(), AgentError> {
        if let Some(session) = self.active_session() {
            session.save_to(&self.sessions_dir)?;
        }
        Ok(())
    }

    fn autosave(&self) -> Result<(), AgentError> {
        if self.auto_save {
            self.save_active()?;
        }
        Ok(())
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.session.history_dir = Some(dir.to_path_buf());
        config.session.max_history = 2;
        config
    }

    // ── Session ─────────────────────────────────────────────────

    #[test]
    fn test_remember_ignores_blank_and_duplicates() {
        let mut session = Session::new("s");
        assert!(session.remember("  prefers metric units "));
        assert!(!session.remember("prefers metric units"));
        assert!(!session.remember("   "));
        assert_eq!(session.memories, vec!["prefers metric units"]);
    }

    #[test]
    fn test_forget_is_one_based() {
        let mut session = Session::new("s");
        session.remember("a");
        session.remember("b");
        assert_eq!(session.forget(0), None);
        assert_eq!(session.forget(3), None);
        assert_eq!(session.forget(1).as_deref(), Some("a"));
        assert_eq!(session.memories, vec!["b"]);
    }

    #[test]
    fn test_recent_messages_window() {
        let mut session = Session::new("s");
        for i in 0..5 {
            session.push_message(Message::user(format!("m{}", i)));
        }
        let recent = session.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
    }

    #[test]
    fn test_session_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new("s");
        session.remember("lives in Lisbon");
        session.push_message(Message::user("hi"));
        session.save_to(dir.path()).unwrap();

        let loaded = Session::load_from(&dir.path().join(format!("{}.json", session.id))).unwrap();
        assert_eq!(loaded.memories, vec!["lives in Lisbon"]);
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn test_older_files_without_memories_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        std::fs::write(
            &path,
            r#"{"id":"old","name":"n","messages":[],"created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let loaded = Session::load_from(&path).unwrap();
        assert!(loaded.memories.is_empty());
    }

    // ── SessionManager ──────────────────────────────────────────

    #[test]
    fn test_manager_creates_default_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(&config_in(dir.path())).unwrap();
        assert_eq!(manager.list_sessions().len(), 1);
        assert_eq!(manager.active_session().unwrap().name, "default");
    }

    #[test]
    fn test_manager_persists_memories_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        {
            let mut manager = SessionManager::new(&config).unwrap();
            assert!(manager.remember("likes tea").unwrap());
            manager.push_message(Message::user("one")).unwrap();
            manager.push_message(Message::user("two")).unwrap();
            manager.push_message(Message::user("three")).unwrap();
        }
        let mut manager = SessionManager::new(&config).unwrap();
        assert_eq!(manager.memories(), ["likes tea".to_string()]);
        let recent = manager.recent_messages();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].content, "three");

        manager.clear_history().unwrap();
        assert!(manager.recent_messages().is_empty());
        assert_eq!(manager.memories().len(), 1);

        assert_eq!(manager.forget(1).unwrap().as_deref(), Some("likes tea"));
        assert!(manager.memories().is_empty());
    }

    #[test]
    fn test_switch_by_prefix_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SessionManager::new(&config_in(dir.path())).unwrap();
        let first = manager.active_session_id().unwrap().to_string();
        let second = manager.create_session("work").unwrap().id.clone();
        assert_eq!(manager.active_session_id(), Some(second.as_str()));

        manager.switch_session(&first[..8]).unwrap();
        assert_eq!(manager.active_session_id(), Some(first.as_str()));
        assert!(manager.switch_session("zzzz").is_err());

        manager.delete_session(&first).unwrap();
        assert_eq!(manager.active_session_id(), Some(second.as_str()));
        assert!(!dir.path().join(format!("{}.json", first)).exists());
    }
}
