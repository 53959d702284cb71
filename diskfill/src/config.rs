use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::JobError;

pub static STATUS_FILE: &str = "status.txt";
pub static STOP_FILE: &str = "stop.txt";
pub static CHUNK_PREFIX: &str = "data_chunk_";
pub static CHUNK_SUFFIX: &str = ".dat";

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Upper bound of a single write call while generating a chunk.
pub const SUB_CHUNK_BYTES: usize = 10 * MIB as usize;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How long `clear` waits for a stopped worker to go away.
pub const CLEAR_GRACE: Duration = Duration::from_secs(1);

pub const DEFAULT_TARGET_GB: f64 = 0.1;
pub const DEFAULT_CHUNK_MB: u64 = 100;
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Parameters of one write job. Created once by the controller and handed
/// to the worker unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteJobConfig {
    pub target_size_bytes: f64,
    pub chunk_size_bytes: u64,
    pub work_dir: PathBuf,
    pub run_id: String,
}

impl WriteJobConfig {
    pub fn new(
        target_size_bytes: f64,
        chunk_size_bytes: u64,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target_size_bytes,
            chunk_size_bytes,
            work_dir: work_dir.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Build a config from the units operators usually think in.
    pub fn from_gb_mb(target_gb: f64, chunk_mb: u64, work_dir: impl Into<PathBuf>) -> Self {
        Self::new(target_gb * GIB as f64, chunk_mb * MIB, work_dir)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if !self.target_size_bytes.is_finite() || self.target_size_bytes <= 0.0 {
            return Err(JobError::InvalidConfig(format!(
                "target size must be a positive number of bytes, got {}",
                self.target_size_bytes
            )));
        }
        if self.chunk_size_bytes == 0 {
            return Err(JobError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.run_id.trim().is_empty() || self.run_id.contains('\n') {
            return Err(JobError::InvalidConfig(format!(
                "invalid run id {:?}",
                self.run_id
            )));
        }
        Ok(())
    }

    pub fn target_size_gb(&self) -> f64 {
        self.target_size_bytes / GIB as f64
    }

    pub fn status_path(&self) -> PathBuf {
        status_path(&self.work_dir)
    }

    pub fn stop_path(&self) -> PathBuf {
        stop_path(&self.work_dir)
    }
}

pub fn status_path(work_dir: &Path) -> PathBuf {
    work_dir.join(STATUS_FILE)
}

pub fn stop_path(work_dir: &Path) -> PathBuf {
    work_dir.join(STOP_FILE)
}

/// Operator defaults persisted with confy, e.g. `~/.config/diskfill/diskfill.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub target_gb: f64,
    pub chunk_mb: u64,
    pub poll_interval_ms: u64,
    pub list_limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_gb: DEFAULT_TARGET_GB,
            chunk_mb: DEFAULT_CHUNK_MB,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            list_limit: DEFAULT_LIST_LIMIT,
            work_dir: None,
        }
    }
}

impl Settings {
    const APP_NAME: &'static str = "diskfill";
    const CONFIG_NAME: &'static str = "diskfill";

    pub fn load() -> anyhow::Result<Self> {
        confy::load::<Self>(Self::APP_NAME, Self::CONFIG_NAME).with_context(|| {
            format!(
                "failed to load config file `{}.{}`",
                Self::APP_NAME,
                Self::CONFIG_NAME,
            )
        })
    }

    /// Like [`Settings::load`], but an unreadable config only costs a warning.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("{e:#}, using built-in defaults");
            Self::default()
        })
    }

    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms == 0 {
            POLL_INTERVAL
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }

    /// The configured directory, or `<data dir>/diskfill`.
    pub fn resolve_work_dir(&self, explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        if let Some(dir) = explicit.or_else(|| self.work_dir.clone()) {
            return Ok(dir);
        }
        let data_dir = dirs::data_dir().context("Failed to get user data directory")?;
        Ok(data_dir.join("diskfill"))
    }
}
