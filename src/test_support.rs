//! Fixtures shared by the unit tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use tokio::sync::Notify;

use crate::auth::Principal;
use crate::config::SessionConfig;
use crate::pose::{
    Base64ImageDecoder, ExtractorFactory, Landmark, LandmarkFrame, LandmarkIndex, PoseExtractor,
};
use crate::recorder::{MemoryRecorder, SessionRecorder};
use crate::session::{ScoreSnapshot, SessionId, SessionRecord, SessionServices};
use crate::worker::WorkerPool;

/// Frame with the six tracked landmarks at `points` (left ear, right ear,
/// left shoulder, right shoulder, left hip, right hip); everything visible.
pub(crate) fn posture_frame(points: [(f32, f32); 6]) -> LandmarkFrame {
    let mut frame = LandmarkFrame::new([Landmark::new(0.5, 0.5, 0.0, 0.9); LandmarkIndex::COUNT]);
    for (index, (x, y)) in LandmarkIndex::TRACKED.into_iter().zip(points) {
        frame.set(index, Landmark::new(x, y, 0.0, 0.9));
    }
    frame
}

/// Level, centered, straight-backed sitter.
pub(crate) fn upright_frame() -> LandmarkFrame {
    posture_frame([
        (0.45, 0.20),
        (0.55, 0.20),
        (0.35, 0.40),
        (0.65, 0.40),
        (0.40, 0.80),
        (0.60, 0.80),
    ])
}

/// 8x6 PNG as plain base64.
pub(crate) fn encoded_frame() -> String {
    let image = RgbImage::from_pixel(8, 6, Rgb([120, 80, 40]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(bytes)
}

pub(crate) fn principal() -> Principal {
    Principal {
        user_id: 7,
        username: "tester".to_string(),
    }
}

pub(crate) fn services<R: SessionRecorder>(recorder: Arc<R>, poses: &ScriptedPoses) -> SessionServices<R> {
    SessionServices {
        recorder,
        pool: WorkerPool::new(2).unwrap(),
        decoder: Arc::new(Base64ImageDecoder),
        extractors: Arc::new(poses.clone()),
        config: SessionConfig::default(),
    }
}

#[derive(Default)]
struct ScriptState {
    next: Mutex<Option<LandmarkFrame>>,
    created: AtomicUsize,
    released: AtomicUsize,
    detections: AtomicUsize,
}

/// Extractor factory whose extractors all return the same scripted pose.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPoses {
    state: Arc<ScriptState>,
}

impl ScriptedPoses {
    pub(crate) fn returning(frame: Option<LandmarkFrame>) -> Self {
        let poses = Self::default();
        poses.set(frame);
        poses
    }

    pub(crate) fn set(&self, frame: Option<LandmarkFrame>) {
        *self.state.next.lock().unwrap() = frame;
    }

    pub(crate) fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    pub(crate) fn detections(&self) -> usize {
        self.state.detections.load(Ordering::SeqCst)
    }
}

impl ExtractorFactory for ScriptedPoses {
    fn create(&self) -> Result<Box<dyn PoseExtractor>> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedExtractor {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedExtractor {
    state: Arc<ScriptState>,
}

impl PoseExtractor for ScriptedExtractor {
    fn detect(&mut self, _image: &RgbImage) -> Result<Option<LandmarkFrame>> {
        self.state.detections.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.next.lock().unwrap().clone())
    }
}

impl Drop for ScriptedExtractor {
    fn drop(&mut self) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory recorder that can be told to fail snapshot or finalize writes,
/// or to panic while saving a calibration.
#[derive(Default)]
pub(crate) struct FlakyRecorder {
    inner: MemoryRecorder,
    fail_snapshots: AtomicBool,
    fail_finalize: AtomicBool,
    panic_on_calibration: AtomicBool,
}

impl FlakyRecorder {
    pub(crate) fn failing_snapshots() -> Self {
        let recorder = Self::default();
        recorder.fail_snapshots.store(true, Ordering::SeqCst);
        recorder
    }

    pub(crate) fn failing_finalize() -> Self {
        let recorder = Self::default();
        recorder.fail_finalize.store(true, Ordering::SeqCst);
        recorder
    }

    pub(crate) fn panicking_on_calibration() -> Self {
        let recorder = Self::default();
        recorder.panic_on_calibration.store(true, Ordering::SeqCst);
        recorder
    }

    pub(crate) fn session(&self, id: SessionId) -> Option<SessionRecord> {
        self.inner.session(id)
    }
}

impl SessionRecorder for FlakyRecorder {
    async fn create_session(&self, user_id: u64, started_at: DateTime<Utc>) -> Result<SessionRecord> {
        self.inner.create_session(user_id, started_at).await
    }

    async fn save_calibration(&self, session_id: SessionId, baseline: &LandmarkFrame) -> Result<()> {
        if self.panic_on_calibration.load(Ordering::SeqCst) {
            panic!("calibration store exploded");
        }
        self.inner.save_calibration(session_id, baseline).await
    }

    async fn save_snapshot(&self, snapshot: ScoreSnapshot) -> Result<()> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            bail!("snapshot store offline");
        }
        self.inner.save_snapshot(snapshot).await
    }

    async fn finalize_session(&self, session: &SessionRecord) -> Result<()> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            bail!("session store offline");
        }
        self.inner.finalize_session(session).await
    }
}

/// In-memory recorder whose snapshot writes wait until [`GatedRecorder::release`].
#[derive(Default)]
pub(crate) struct GatedRecorder {
    inner: MemoryRecorder,
    gate: Notify,
}

impl GatedRecorder {
    /// Lets one parked (or the next) snapshot write through.
    pub(crate) fn release(&self) {
        self.gate.notify_one();
    }

    pub(crate) fn snapshots(&self, session_id: SessionId) -> Vec<ScoreSnapshot> {
        self.inner.snapshots(session_id)
    }
}

impl SessionRecorder for GatedRecorder {
    async fn create_session(&self, user_id: u64, started_at: DateTime<Utc>) -> Result<SessionRecord> {
        self.inner.create_session(user_id, started_at).await
    }

    async fn save_calibration(&self, session_id: SessionId, baseline: &LandmarkFrame) -> Result<()> {
        self.inner.save_calibration(session_id, baseline).await
    }

    async fn save_snapshot(&self, snapshot: ScoreSnapshot) -> Result<()> {
        self.gate.notified().await;
        self.inner.save_snapshot(snapshot).await
    }

    async fn finalize_session(&self, session: &SessionRecord) -> Result<()> {
        self.inner.finalize_session(session).await
    }
}
