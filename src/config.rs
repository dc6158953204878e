use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::auth::UserToken;
use crate::posture::calibration::DEFAULT_CALIBRATION_FRAMES;
use crate::posture::scorer::MIN_VISIBILITY;

pub const DEFAULT_CONFIG_PATH: &str = "posture_server.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_listen_addr() -> String { "0.0.0.0:8000".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            session: SessionConfig::default(),
            pose: PoseConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Frames averaged into a calibration baseline
    #[serde(default = "default_calibration_frames")]
    pub calibration_frames: usize,
    /// Persist a snapshot every N analyzed frames
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Tracked landmarks below this visibility skip scoring
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f32,
}

fn default_calibration_frames() -> usize { DEFAULT_CALIBRATION_FRAMES }
fn default_snapshot_every() -> u64 { 15 }
fn default_min_visibility() -> f32 { MIN_VISIBILITY }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibration_frames: default_calibration_frames(),
            snapshot_every: default_snapshot_every(),
            min_visibility: default_min_visibility(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Pose presence below this is reported as "no pose"
    #[serde(default = "default_presence_threshold")]
    pub presence_threshold: f32,
    /// 0 = one per available core
    #[serde(default)]
    pub worker_threads: usize,
}

fn default_model_path() -> String { "models/pose_landmark_full.onnx".to_string() }
fn default_presence_threshold() -> f32 { 0.5 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            presence_threshold: default_presence_threshold(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// JSON-lines session journal
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String { "data/posture_sessions.jsonl".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserToken>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Missing file means defaults; a file that exists but does not parse is
    /// still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::metadata(path.as_ref()) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            _ => Self::load(path),
        }
    }
}
