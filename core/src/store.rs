use crate::state::SessionSnapshot;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Option<SessionSnapshot>;
    fn save(&self, snapshot: &SessionSnapshot);
}

#[derive(Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<SessionSnapshot>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.snapshot.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load(&self) -> Option<SessionSnapshot> {
        self.snapshot()
    }

    fn save(&self, snapshot: &SessionSnapshot) {
        *self.snapshot.lock() = Some(snapshot.clone());
        *self.saves.lock() += 1;
    }
}

/// One JSON document on disk, replaced atomically on every save.
#[derive(Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_data_dir() -> Option<Self> {
        let dirs = directories::ProjectDirs::from("dev", "comet", "comet")?;
        Some(Self::new(dirs.data_dir().join("sessions.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn write(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let serialized = serde_json::to_vec_pretty(snapshot)?;
        let tmp = dir.join(format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("sessions.json")
        ));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl SessionPersistence for JsonFilePersistence {
    fn load(&self) -> Option<SessionSnapshot> {
        match self.read() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable session file: {err:#}");
                None
            }
        }
    }

    fn save(&self, snapshot: &SessionSnapshot) {
        if let Err(err) = self.write(snapshot) {
            tracing::error!(path = %self.path.display(), "failed to persist sessions: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChatMessage, ChatSession, MessageRole};
    use tempfile::TempDir;

    fn snapshot_with(text: &str) -> SessionSnapshot {
        let mut session = ChatSession::new();
        session.add_message(ChatMessage::new(MessageRole::User, text));
        SessionSnapshot {
            current_session: Some(session.id),
            sessions: vec![session],
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn file_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let persistence = JsonFilePersistence::new(dir.path().join("nested").join("sessions.json"));
        assert!(persistence.load().is_none());

        persistence.save(&snapshot_with("hello"));
        let loaded = persistence.load().expect("snapshot");
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.sessions[0].messages[0].content, "hello");
        assert_eq!(loaded.current_session, Some(loaded.sessions[0].id));
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("sessions.json");
        fs::write(&path, b"{not json").expect("write");
        assert!(JsonFilePersistence::new(path).load().is_none());
    }

    #[test]
    fn memory_counts_saves() {
        let persistence = MemoryPersistence::default();
        persistence.save(&snapshot_with("a"));
        persistence.save(&snapshot_with("b"));
        assert_eq!(persistence.save_count(), 2);
        assert_eq!(
            persistence.load().expect("snapshot").sessions[0].messages[0].content,
            "b"
        );
    }
}
