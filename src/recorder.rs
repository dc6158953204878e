//! Session persistence.
//!
//! [`SessionRecorder`] is the storage boundary the session protocol writes
//! through. Two backends ship with the crate: [`MemoryRecorder`], which also
//! serves read-only history queries, and [`JsonlRecorder`], an append-only
//! journal with one JSON event per line, flushed on every write.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::pose::LandmarkFrame;
use crate::session::record::{ScoreSnapshot, SessionId, SessionRecord};

pub trait SessionRecorder: Send + Sync + 'static {
    /// Stores a new active session and assigns its id.
    fn create_session(
        &self,
        user_id: u64,
        started_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<SessionRecord>> + Send;

    fn save_calibration(
        &self,
        session_id: SessionId,
        baseline: &LandmarkFrame,
    ) -> impl Future<Output = Result<()>> + Send;

    fn save_snapshot(&self, snapshot: ScoreSnapshot) -> impl Future<Output = Result<()>> + Send;

    /// Writes the final state of a session (end time, average, inactive).
    fn finalize_session(&self, session: &SessionRecord) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryStore {
    last_id: SessionId,
    sessions: Vec<SessionRecord>,
    snapshots: Vec<ScoreSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryRecorder {
    store: Mutex<MemoryStore>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut MemoryStore) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.with_store(|store| {
            let mut sessions = store.sessions.clone();
            sessions.sort_by_key(|s| s.started_at);
            sessions
        })
    }

    pub fn session(&self, id: SessionId) -> Option<SessionRecord> {
        self.with_store(|store| store.sessions.iter().find(|s| s.id == id).cloned())
    }

    /// Snapshots of one session, oldest first.
    pub fn snapshots(&self, session_id: SessionId) -> Vec<ScoreSnapshot> {
        self.with_store(|store| {
            let mut snapshots: Vec<_> = store
                .snapshots
                .iter()
                .filter(|s| s.session_id == session_id)
                .cloned()
                .collect();
            snapshots.sort_by_key(|s| s.timestamp);
            snapshots
        })
    }
}

impl SessionRecorder for MemoryRecorder {
    async fn create_session(&self, user_id: u64, started_at: DateTime<Utc>) -> Result<SessionRecord> {
        Ok(self.with_store(|store| {
            store.last_id += 1;
            let record = SessionRecord {
                id: store.last_id,
                user_id,
                started_at,
                ended_at: None,
                average_score: None,
                calibration: None,
                is_active: true,
            };
            store.sessions.push(record.clone());
            record
        }))
    }

    async fn save_calibration(&self, session_id: SessionId, baseline: &LandmarkFrame) -> Result<()> {
        self.with_store(|store| {
            let Some(record) = store.sessions.iter_mut().find(|s| s.id == session_id) else {
                bail!("unknown session {session_id}");
            };
            record.calibration = Some(baseline.clone());
            Ok(())
        })
    }

    async fn save_snapshot(&self, snapshot: ScoreSnapshot) -> Result<()> {
        self.with_store(|store| {
            if !store.sessions.iter().any(|s| s.id == snapshot.session_id) {
                bail!("unknown session {}", snapshot.session_id);
            }
            store.snapshots.push(snapshot);
            Ok(())
        })
    }

    async fn finalize_session(&self, session: &SessionRecord) -> Result<()> {
        self.with_store(|store| {
            let Some(record) = store.sessions.iter_mut().find(|s| s.id == session.id) else {
                bail!("unknown session {}", session.id);
            };
            *record = session.clone();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// JSON-lines journal
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalEntry<'a> {
    SessionStarted {
        session: &'a SessionRecord,
    },
    Calibration {
        session_id: SessionId,
        recorded_at: DateTime<Utc>,
        baseline: &'a LandmarkFrame,
    },
    Snapshot {
        snapshot: &'a ScoreSnapshot,
    },
    SessionEnded {
        session: &'a SessionRecord,
    },
}

pub struct JsonlRecorder {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
    last_id: AtomicU64,
}

impl JsonlRecorder {
    /// Opens (or creates) the journal; new session ids continue after the
    /// highest one already in it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let last_id = match tokio::fs::read_to_string(&path).await {
            Ok(content) => last_session_id(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
            last_id: AtomicU64::new(last_id),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry<'_>) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

fn last_session_id(content: &str) -> SessionId {
    content
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|entry| entry.get("session")?.get("id")?.as_u64())
        .max()
        .unwrap_or(0)
}

impl SessionRecorder for JsonlRecorder {
    async fn create_session(&self, user_id: u64, started_at: DateTime<Utc>) -> Result<SessionRecord> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = SessionRecord {
            id,
            user_id,
            started_at,
            ended_at: None,
            average_score: None,
            calibration: None,
            is_active: true,
        };
        self.append(&JournalEntry::SessionStarted { session: &record })
            .await?;
        Ok(record)
    }

    async fn save_calibration(&self, session_id: SessionId, baseline: &LandmarkFrame) -> Result<()> {
        self.append(&JournalEntry::Calibration {
            session_id,
            recorded_at: Utc::now(),
            baseline,
        })
        .await
    }

    async fn save_snapshot(&self, snapshot: ScoreSnapshot) -> Result<()> {
        self.append(&JournalEntry::Snapshot {
            snapshot: &snapshot,
        })
        .await
    }

    async fn finalize_session(&self, session: &SessionRecord) -> Result<()> {
        self.append(&JournalEntry::SessionEnded { session }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::upright_frame;
    use chrono::Duration;

    fn snapshot(session_id: SessionId, at: DateTime<Utc>, overall: f64) -> ScoreSnapshot {
        ScoreSnapshot {
            session_id,
            timestamp: at,
            overall_score: overall,
            head_position_score: overall,
            shoulder_levelness_score: overall,
            shoulder_rounding_score: overall,
            spine_alignment_score: overall,
            issues: Vec::new(),
        }
    }

    fn temp_journal(name: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("posture-server-{}", std::process::id()))
            .join(format!("{name}.jsonl"));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_memory_assigns_sequential_ids() {
        let recorder = MemoryRecorder::new();
        let a = recorder.create_session(1, Utc::now()).await.unwrap();
        let b = recorder.create_session(2, Utc::now()).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(a.is_active);
        assert_eq!(recorder.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_snapshots_ordered_by_time() {
        let recorder = MemoryRecorder::new();
        let session = recorder.create_session(1, Utc::now()).await.unwrap();
        let t0 = Utc::now();
        recorder
            .save_snapshot(snapshot(session.id, t0 + Duration::seconds(2), 60.0))
            .await
            .unwrap();
        recorder
            .save_snapshot(snapshot(session.id, t0, 80.0))
            .await
            .unwrap();

        let scores: Vec<f64> = recorder
            .snapshots(session.id)
            .iter()
            .map(|s| s.overall_score)
            .collect();
        assert_eq!(scores, vec![80.0, 60.0]);
        assert!(recorder.snapshots(session.id + 1).is_empty());
    }

    #[tokio::test]
    async fn test_memory_rejects_unknown_session() {
        let recorder = MemoryRecorder::new();
        assert!(recorder.save_snapshot(snapshot(9, Utc::now(), 1.0)).await.is_err());
        assert!(recorder.save_calibration(9, &upright_frame()).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_finalize_and_calibration() {
        let recorder = MemoryRecorder::new();
        let mut session = recorder.create_session(1, Utc::now()).await.unwrap();
        recorder
            .save_calibration(session.id, &upright_frame())
            .await
            .unwrap();
        assert_eq!(
            recorder.session(session.id).unwrap().calibration,
            Some(upright_frame())
        );

        session.is_active = false;
        session.ended_at = Some(Utc::now());
        session.average_score = Some(77.5);
        recorder.finalize_session(&session).await.unwrap();

        let stored = recorder.session(session.id).unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.average_score, Some(77.5));
    }

    #[tokio::test]
    async fn test_jsonl_appends_events() {
        let path = temp_journal("appends");
        let recorder = JsonlRecorder::open(&path).await.unwrap();
        let mut session = recorder.create_session(5, Utc::now()).await.unwrap();
        recorder
            .save_snapshot(snapshot(session.id, Utc::now(), 91.0))
            .await
            .unwrap();
        session.is_active = false;
        recorder.finalize_session(&session).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<String> = content
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, ["session_started", "snapshot", "session_ended"]);
    }

    #[tokio::test]
    async fn test_jsonl_ids_continue_after_reopen() {
        let path = temp_journal("reopen");
        {
            let recorder = JsonlRecorder::open(&path).await.unwrap();
            recorder.create_session(1, Utc::now()).await.unwrap();
            recorder.create_session(1, Utc::now()).await.unwrap();
        }
        let recorder = JsonlRecorder::open(&path).await.unwrap();
        let session = recorder.create_session(1, Utc::now()).await.unwrap();
        assert_eq!(session.id, 3);
    }

    #[test]
    fn test_last_session_id_skips_garbage() {
        let content = "{\"event\":\"session_started\",\"session\":{\"id\":4}}\nnot json\n{\"event\":\"snapshot\"}\n";
        assert_eq!(last_session_id(content), 4);
        assert_eq!(last_session_id(""), 0);
    }
}
