use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cost::CostTotals;
use crate::formats::{CoveredPoints, GenerationStatus, SectionPlan, SectionResult};

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to show a previous run again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: GenerationStatus,
    pub content: String,
    pub sections: Vec<SectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<SectionPlan>,
    #[serde(default)]
    pub covered_points: CoveredPoints,
    #[serde(default)]
    pub cost: CostTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>>;
    async fn put(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()>;
    async fn delete(&self, session_id: &str) -> anyhow::Result<()>;
}

fn validate_session_id(session_id: &str) -> anyhow::Result<()> {
    if session_id.is_empty()
        || !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("invalid session id: {session_id:?}");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalFsSessionStore {
    base_dir: PathBuf,
}

impl LocalFsSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join("sessions").join(session_id)
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("snapshot.json")
    }
}

#[async_trait]
impl SessionStore for LocalFsSessionStore {
    async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        validate_session_id(session_id)?;
        let path = self.snapshot_path(session_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        validate_session_id(session_id)?;
        write_json_atomic(&self.snapshot_path(session_id), snapshot)
            .await
            .context("write snapshot.json")
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove session dir: {}", dir.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.lock().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .await
            .insert(session_id.to_owned(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.snapshots.lock().await.remove(session_id);
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

/// Persists run snapshots for one session. Regular updates are throttled;
/// `flush` always writes. Store failures are logged and never interrupt a run.
pub struct SessionRecorder {
    store: Arc<dyn SessionStore>,
    session_id: String,
    interval: Duration,
    last_write: Option<Instant>,
    restored: bool,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            last_write: None,
            restored: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Loads the stored snapshot. Only the first call reads the store.
    pub async fn restore(&mut self) -> Option<SessionSnapshot> {
        if self.restored {
            return None;
        }
        self.restored = true;
        match self.store.get(&self.session_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, ?err, "failed to restore session");
                None
            }
        }
    }

    pub async fn record(&mut self, snapshot: &SessionSnapshot) {
        if let Some(last) = self.last_write
            && last.elapsed() < self.interval
        {
            return;
        }
        self.flush(snapshot).await;
    }

    pub async fn flush(&mut self, snapshot: &SessionSnapshot) {
        self.last_write = Some(Instant::now());
        let mut snapshot = snapshot.clone();
        snapshot.updated_at = Some(chrono::Utc::now());
        if let Err(err) = self.store.put(&self.session_id, &snapshot).await {
            tracing::warn!(session_id = %self.session_id, ?err, "failed to save session");
        }
    }

    pub async fn clear(&mut self) -> anyhow::Result<()> {
        self.store
            .delete(&self.session_id)
            .await
            .with_context(|| format!("delete session: {}", self.session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(content: &str) -> SessionSnapshot {
        SessionSnapshot {
            status: GenerationStatus::Streaming,
            content: content.to_owned(),
            ..SessionSnapshot::default()
        }
    }

    #[tokio::test]
    async fn local_store_round_trips_and_deletes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsSessionStore::new(dir.path());

        assert!(store.get("s1").await?.is_none());
        let mut covered = CoveredPoints::new();
        covered.insert("fact");
        let saved = SessionSnapshot {
            covered_points: covered,
            ..snapshot("## Intro")
        };
        store.put("s1", &saved).await?;

        assert_eq!(store.get("s1").await?, Some(saved));
        assert!(dir.path().join("sessions/s1/snapshot.json").exists());

        store.delete("s1").await?;
        store.delete("s1").await?;
        assert!(store.get("s1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn local_store_rejects_path_like_ids() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsSessionStore::new(dir.path());
        assert!(store.put("../escape", &snapshot("x")).await.is_err());
        assert!(store.get("").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn recorder_throttles_until_flush() -> anyhow::Result<()> {
        let store = Arc::new(MemorySessionStore::new());
        let mut recorder =
            SessionRecorder::new(store.clone(), "s").with_interval(Duration::from_secs(3600));

        recorder.record(&snapshot("first")).await;
        recorder.record(&snapshot("second")).await;
        let stored = store.get("s").await?.map(|s| s.content);
        assert_eq!(stored.as_deref(), Some("first"));

        recorder.flush(&snapshot("third")).await;
        let stored = store.get("s").await?;
        assert_eq!(stored.as_ref().map(|s| s.content.as_str()), Some("third"));
        assert!(stored.and_then(|s| s.updated_at).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn recorder_clear_removes_the_saved_session() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(LocalFsSessionStore::new(dir.path()));
        let mut recorder = SessionRecorder::new(store.clone(), "draft-7");
        assert_eq!(recorder.session_id(), "draft-7");

        recorder.flush(&snapshot("saved")).await;
        assert!(store.get("draft-7").await?.is_some());

        recorder.clear().await?;
        assert!(store.get("draft-7").await?.is_none());
        assert!(!dir.path().join("sessions/draft-7").exists());
        Ok(())
    }

    #[tokio::test]
    async fn restore_reads_the_store_once() -> anyhow::Result<()> {
        let store = Arc::new(MemorySessionStore::new());
        store.put("s", &snapshot("saved")).await?;
        let mut recorder = SessionRecorder::new(store, "s");

        let restored = recorder.restore().await.map(|s| s.content);
        assert_eq!(restored.as_deref(), Some("saved"));
        assert!(recorder.restore().await.is_none());
        Ok(())
    }
}
