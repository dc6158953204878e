//! One posture session per connection.
//!
//! [`SessionContext`] owns everything a connection needs (state, scorer,
//! calibration buffer, counters, the pose extractor) and is driven one
//! message at a time through `&mut self`. A frame is handed to the worker
//! pool together with the session's extractor and the handler awaits both
//! back before returning, so a second frame can never start while one is in
//! flight.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::{JoinError, JoinSet};

use super::error::SessionError;
use super::record::{ScoreSnapshot, SessionId, SessionRecord, SessionSummary};
use crate::auth::Principal;
use crate::config::SessionConfig;
use crate::pose::landmark::round_to;
use crate::pose::{ExtractorFactory, FrameDecoder, LandmarkFrame, PoseExtractor, PostureLandmarks};
use crate::posture::{CalibrationAccumulator, CalibrationStep, PostureScorer};
use crate::protocol::{ClientMessage, PostureResult, ServerMessage};
use crate::recorder::SessionRecorder;
use crate::worker::WorkerPool;

/// Shared, per-server collaborators handed to every session.
pub struct SessionServices<R> {
    pub recorder: Arc<R>,
    pub pool: WorkerPool,
    pub decoder: Arc<dyn FrameDecoder>,
    pub extractors: Arc<dyn ExtractorFactory>,
    pub config: SessionConfig,
}

impl<R> Clone for SessionServices<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            pool: self.pool.clone(),
            decoder: Arc::clone(&self.decoder),
            extractors: Arc::clone(&self.extractors),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    Calibrating,
    Ended,
}

struct LiveSession {
    record: SessionRecord,
    scorer: PostureScorer,
    /// Empty while a frame is in flight, or after a worker job was lost.
    extractor: Option<Box<dyn PoseExtractor>>,
    frames_analyzed: u64,
    score_sum: f64,
    scores_recorded: u64,
    pending_snapshots: JoinSet<anyhow::Result<()>>,
}

impl LiveSession {
    fn new(record: SessionRecord, scorer: PostureScorer, extractor: Box<dyn PoseExtractor>) -> Self {
        Self {
            record,
            scorer,
            extractor: Some(extractor),
            frames_analyzed: 0,
            score_sum: 0.0,
            scores_recorded: 0,
            pending_snapshots: JoinSet::new(),
        }
    }

    fn count_snapshot(&mut self, joined: Result<anyhow::Result<()>, JoinError>) {
        match joined {
            Ok(Ok(())) => self.scores_recorded += 1,
            Ok(Err(err)) => warn!("session {}: snapshot not saved: {err:#}", self.record.id),
            Err(err) => warn!("session {}: snapshot task failed: {err}", self.record.id),
        }
    }

    fn reap_snapshots(&mut self) {
        while let Some(joined) = self.pending_snapshots.try_join_next() {
            self.count_snapshot(joined);
        }
    }

    async fn drain_snapshots(&mut self) {
        while let Some(joined) = self.pending_snapshots.join_next().await {
            self.count_snapshot(joined);
        }
    }
}

enum SessionState {
    Idle,
    Active(LiveSession),
    Calibrating(LiveSession, CalibrationAccumulator),
    /// Connection gone; nothing more is accepted.
    Ended,
}

pub struct SessionContext<R: SessionRecorder> {
    principal: Principal,
    services: SessionServices<R>,
    state: SessionState,
}

impl<R: SessionRecorder> SessionContext<R> {
    pub fn new(principal: Principal, services: SessionServices<R>) -> Self {
        Self {
            principal,
            services,
            state: SessionState::Idle,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::Calibrating(..) => SessionPhase::Calibrating,
            SessionState::Ended => SessionPhase::Ended,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match &self.state {
            SessionState::Active(live) | SessionState::Calibrating(live, _) => Some(live.record.id),
            SessionState::Idle | SessionState::Ended => None,
        }
    }

    /// Handles one raw text message from the client.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(message).await,
            Err(err) => vec![self.reply_error(err)],
        }
    }

    /// Handles one client message. Failures become an `error` reply and
    /// leave the session as it was.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        match self.dispatch(message).await {
            Ok(replies) => replies,
            Err(err) => vec![self.reply_error(err)],
        }
    }

    fn reply_error(&self, err: SessionError) -> ServerMessage {
        if err.is_protocol() {
            debug!("user {}: {err}", self.principal.user_id);
        } else {
            warn!("user {}: {err}", self.principal.user_id);
        }
        ServerMessage::from(&err)
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>, SessionError> {
        match message {
            ClientMessage::StartSession => Ok(vec![self.start_session().await?]),
            ClientMessage::Calibrate => Ok(vec![self.begin_calibration()?]),
            ClientMessage::Frame { frame } => self.submit_frame(frame).await,
            ClientMessage::EndSession => Ok(vec![self.end_session().await?]),
            ClientMessage::Unknown => Err(SessionError::UnrecognizedAction),
        }
    }

    async fn start_session(&mut self) -> Result<ServerMessage, SessionError> {
        match &self.state {
            SessionState::Idle => {}
            SessionState::Active(_) | SessionState::Calibrating(..) => {
                return Err(SessionError::AlreadyActive)
            }
            SessionState::Ended => return Err(SessionError::Closed),
        }

        // extractor first: a failed model load must not leave an active record behind
        let extractor = create_extractor(&self.services).await?;
        let record = self
            .services
            .recorder
            .create_session(self.principal.user_id, Utc::now())
            .await
            .map_err(SessionError::Persistence)?;
        let session_id = record.id;

        let scorer = PostureScorer::new().with_min_visibility(self.services.config.min_visibility);
        self.state = SessionState::Active(LiveSession::new(record, scorer, extractor));
        info!("session {session_id} started for {}", self.principal.username);

        Ok(ServerMessage::SessionStarted { session_id })
    }

    /// Starts (or restarts) collecting the calibration window.
    fn begin_calibration(&mut self) -> Result<ServerMessage, SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Active(live) | SessionState::Calibrating(live, _) => {
                debug!(
                    "session {}: calibrating (replacing baseline: {})",
                    live.record.id,
                    live.scorer.is_calibrated()
                );
                let window = CalibrationAccumulator::new(self.services.config.calibration_frames);
                self.state = SessionState::Calibrating(live, window);
                Ok(ServerMessage::CalibrationStarted)
            }
            SessionState::Idle => Err(SessionError::NoActiveSession),
            SessionState::Ended => {
                self.state = SessionState::Ended;
                Err(SessionError::Closed)
            }
        }
    }

    async fn submit_frame(&mut self, payload: String) -> Result<Vec<ServerMessage>, SessionError> {
        let live = match &mut self.state {
            SessionState::Active(live) | SessionState::Calibrating(live, _) => live,
            SessionState::Idle => return Err(SessionError::NoActiveSession),
            SessionState::Ended => return Err(SessionError::Closed),
        };
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let extractor = match live.extractor.take() {
            Some(extractor) => extractor,
            None => create_extractor(&self.services).await?,
        };
        let decoder = Arc::clone(&self.services.decoder);
        let (extractor, detected) = self
            .services
            .pool
            .run(move || {
                let mut extractor = extractor;
                let detected = detect_pose(decoder.as_ref(), extractor.as_mut(), &payload);
                (extractor, detected)
            })
            .await?;
        live.extractor = Some(extractor);

        match detected? {
            Some(frame) => self.accept_landmarks(frame).await,
            None => {
                debug!("session {}: no pose in frame", live.record.id);
                Ok(vec![ServerMessage::PostureResult(PostureResult::no_pose())])
            }
        }
    }

    async fn accept_landmarks(&mut self, frame: LandmarkFrame) -> Result<Vec<ServerMessage>, SessionError> {
        let landmarks = PostureLandmarks::from_frame(&frame);

        if let SessionState::Calibrating(_, window) = &mut self.state {
            return match window.push(frame) {
                CalibrationStep::Collecting { progress } => Ok(vec![ServerMessage::CalibrationProgress {
                    progress: round_to(progress, 2),
                    landmarks,
                }]),
                CalibrationStep::Complete { baseline } => {
                    let progress = ServerMessage::CalibrationProgress {
                        progress: 1.0,
                        landmarks,
                    };
                    let complete = self.complete_calibration(baseline).await?;
                    Ok(vec![progress, complete])
                }
            };
        }

        let SessionState::Active(live) = &mut self.state else {
            return Err(SessionError::NoActiveSession);
        };

        let score = match live.scorer.score(&frame) {
            Ok(score) => score,
            Err(err) => {
                debug!("session {}: {err}", live.record.id);
                return Ok(vec![ServerMessage::PostureResult(
                    PostureResult::insufficient_visibility(),
                )]);
            }
        };

        debug!(
            "session {}: score {} ({})",
            live.record.id,
            score.overall,
            score.label.as_str()
        );
        live.frames_analyzed += 1;
        live.score_sum += score.overall;
        live.reap_snapshots();

        let every = self.services.config.snapshot_every.max(1);
        if live.frames_analyzed % every == 0 {
            let snapshot = ScoreSnapshot::from_score(live.record.id, Utc::now(), &score);
            let recorder = Arc::clone(&self.services.recorder);
            live.pending_snapshots
                .spawn(async move { recorder.save_snapshot(snapshot).await });
        }

        let ideal = live.scorer.baseline().map(PostureLandmarks::from_frame);
        Ok(vec![ServerMessage::PostureResult(PostureResult::scored(
            score, landmarks, ideal,
        ))])
    }

    async fn complete_calibration(&mut self, baseline: LandmarkFrame) -> Result<ServerMessage, SessionError> {
        let mut live = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Calibrating(live, _) => live,
            other => {
                self.state = other;
                return Err(SessionError::NoActiveSession);
            }
        };

        let session_id = live.record.id;
        let ideal_landmarks = PostureLandmarks::from_frame(&baseline);
        live.record.calibration = Some(baseline.clone());
        live.scorer.set_baseline(baseline.clone());
        self.state = SessionState::Active(live);

        if let Err(err) = self
            .services
            .recorder
            .save_calibration(session_id, &baseline)
            .await
        {
            warn!("session {session_id}: calibration not saved: {err:#}");
        }
        info!("session {session_id}: calibration complete");

        Ok(ServerMessage::CalibrationComplete { ideal_landmarks })
    }

    async fn end_session(&mut self) -> Result<ServerMessage, SessionError> {
        let live = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Active(live) | SessionState::Calibrating(live, _) => live,
            SessionState::Idle => return Err(SessionError::NoActiveSession),
            SessionState::Ended => {
                self.state = SessionState::Ended;
                return Err(SessionError::Closed);
            }
        };

        let summary = self.finalize(live).await?;
        Ok(ServerMessage::SessionEnded { summary })
    }

    /// Disconnect path: finalizes a running session exactly like
    /// `end_session` and refuses anything afterwards.
    pub async fn close(&mut self) -> Result<Option<SessionSummary>, SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Ended) {
            SessionState::Active(live) | SessionState::Calibrating(live, _) => {
                let session_id = live.record.id;
                match self.finalize(live).await {
                    Ok(summary) => Ok(Some(summary)),
                    Err(err) => {
                        error!("session {session_id}: finalize on disconnect failed: {err}");
                        Err(err)
                    }
                }
            }
            SessionState::Idle | SessionState::Ended => Ok(None),
        }
    }

    /// Stamps the end, persists the final record and releases the extractor,
    /// even when persisting fails.
    async fn finalize(&mut self, mut live: LiveSession) -> Result<SessionSummary, SessionError> {
        live.drain_snapshots().await;

        let LiveSession {
            mut record,
            extractor,
            frames_analyzed,
            score_sum,
            scores_recorded,
            ..
        } = live;

        let ended_at = Utc::now();
        record.ended_at = Some(ended_at);
        record.is_active = false;
        record.average_score =
            (frames_analyzed > 0).then(|| round_to(score_sum / frames_analyzed as f64, 1));

        let persisted = self.services.recorder.finalize_session(&record).await;
        drop(extractor);
        debug!("session {}: pose extractor released", record.id);
        persisted.map_err(SessionError::Persistence)?;

        let duration_seconds = (ended_at - record.started_at)
            .to_std()
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        info!(
            "session {} ended: {} frames, average {:?}",
            record.id, frames_analyzed, record.average_score
        );

        Ok(SessionSummary {
            session_id: record.id,
            duration_seconds,
            average_score: record.average_score,
            total_frames_analyzed: frames_analyzed,
            scores_recorded,
        })
    }
}

impl<R: SessionRecorder> Drop for SessionContext<R> {
    fn drop(&mut self) {
        if let Some(id) = self.session_id() {
            warn!("session {id} dropped without being finalized");
        }
    }
}

async fn create_extractor<R>(services: &SessionServices<R>) -> Result<Box<dyn PoseExtractor>, SessionError> {
    let factory = Arc::clone(&services.extractors);
    services
        .pool
        .run(move || factory.create())
        .await?
        .map_err(SessionError::Extraction)
}

fn detect_pose(
    decoder: &dyn FrameDecoder,
    extractor: &mut dyn PoseExtractor,
    payload: &str,
) -> Result<Option<LandmarkFrame>, SessionError> {
    let image = decoder.decode(payload)?;
    extractor.detect(&image).map_err(SessionError::Extraction)
}
