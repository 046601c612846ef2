use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rendering::domain::exemption_policy::ExemptLabelPair;
use crate::shared::constants::DEFAULT_CLASSIFICATION_PERMITS;

pub const DEFAULT_BLUR_STRENGTH: usize = 201;
pub const DEFAULT_DETECTION_CONFIDENCE: f64 = 0.5;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Tunables for one pipeline session, persisted as JSON.
///
/// Missing keys fall back to their defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Semaphore capacity K: classification tasks allowed to run at once.
    pub classification_permits: usize,
    /// Worker pool size. Raised to `classification_permits + 1` if lower.
    pub worker_threads: usize,
    /// The one (gender, race) outcome that is never blurred.
    pub exempt_labels: ExemptLabelPair,
    /// Gaussian kernel size for the blur (positive, odd).
    pub blur_strength: usize,
    pub detection_confidence: f64,
    /// Abandon a cycle stuck in flight for longer than this. `None` waits
    /// forever.
    pub stall_timeout_ms: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classification_permits: DEFAULT_CLASSIFICATION_PERMITS,
            worker_threads: DEFAULT_CLASSIFICATION_PERMITS + 1,
            exempt_labels: ExemptLabelPair::default(),
            blur_strength: DEFAULT_BLUR_STRENGTH,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            stall_timeout_ms: None,
        }
    }
}

impl PipelineSettings {
    /// `<config dir>/faceblur/settings.json`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("faceblur").join("settings.json"))
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads `path` when it exists, defaults otherwise. A file that exists
    /// but cannot be parsed is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Encode)?;
        fs::write(path, json).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.classification_permits == 0 {
            return Err(SettingsError::Invalid(
                "classification_permits must be at least 1".into(),
            ));
        }
        if self.blur_strength == 0 || self.blur_strength % 2 == 0 {
            return Err(SettingsError::Invalid(format!(
                "blur_strength must be a positive odd integer, got {}",
                self.blur_strength
            )));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(SettingsError::Invalid(format!(
                "detection_confidence must be between 0.0 and 1.0, got {}",
                self.detection_confidence
            )));
        }
        if self.exempt_labels.gender.trim().is_empty() || self.exempt_labels.race.trim().is_empty()
        {
            return Err(SettingsError::Invalid(
                "exempt_labels needs both a gender and a race label".into(),
            ));
        }
        if self.stall_timeout_ms == Some(0) {
            return Err(SettingsError::Invalid(
                "stall_timeout_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Worker pool size actually used: enough threads that the detection job
    /// blocked on permits cannot starve the classification jobs.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.max(self.classification_permits + 1)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }
}
