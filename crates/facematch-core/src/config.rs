use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::quality::QualityThresholds;
use crate::search::DEFAULT_CANDIDATE_LIMIT;

// --- Named constants ---
const DEFAULT_DATA_ROOT: &str = "./data";
const DEFAULT_DB_FILE: &str = "facematch.db";
const DEFAULT_LISTEN_ADDR: &str = ":8080";
const DEFAULT_STATIC_DIR: &str = "web/static";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config: read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config: parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Service configuration, loaded from `FACEMATCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the embedding sidecar. Empty when unset.
    pub ai_endpoint: String,
    /// Root of the ingest directories and the default database location.
    pub data_root: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// HTTP listen address; a bare ":port" binds all interfaces.
    pub listen_addr: String,
    /// Static web assets served by the HTTP service when present.
    pub static_dir: PathBuf,
    pub request_timeout_secs: u64,
    /// Nearest-neighbor rows fetched per search.
    pub search_candidates: usize,
    pub quality: QualityThresholds,
}

impl Settings {
    /// Load settings from the environment with defaults.
    ///
    /// Quality thresholds start from the TOML file named by
    /// `FACEMATCH_QUALITY_FILE` (if any), then per-field variables override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_root = std::env::var("FACEMATCH_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_ROOT));

        let db_path = std::env::var("FACEMATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join(DEFAULT_DB_FILE));

        let mut quality = match std::env::var("FACEMATCH_QUALITY_FILE") {
            Ok(path) => load_quality_file(Path::new(&path))?,
            Err(_) => QualityThresholds::default(),
        };
        quality.min_det_score = env_f64("FACEMATCH_MIN_DET_SCORE", quality.min_det_score);
        quality.require_det_score = env_bool("FACEMATCH_REQUIRE_DET_SCORE", quality.require_det_score);
        quality.min_face_height = env_f64("FACEMATCH_MIN_FACE_HEIGHT", quality.min_face_height);
        quality.min_crop_side = env_u32("FACEMATCH_MIN_CROP_SIDE", quality.min_crop_side);
        quality.min_sharpness = env_f64("FACEMATCH_MIN_SHARPNESS", quality.min_sharpness);

        Ok(Self {
            ai_endpoint: std::env::var("FACEMATCH_AI_ENDPOINT").unwrap_or_default(),
            data_root,
            db_path,
            listen_addr: std::env::var("FACEMATCH_LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            static_dir: std::env::var("FACEMATCH_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATIC_DIR)),
            request_timeout_secs: env_u64("FACEMATCH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            search_candidates: env_usize("FACEMATCH_SEARCH_CANDIDATES", DEFAULT_CANDIDATE_LIMIT),
            quality,
        })
    }

    /// Point the data root somewhere else, keeping an explicitly set database path.
    pub fn with_data_root(mut self, data_root: PathBuf) -> Self {
        if self.db_path == self.data_root.join(DEFAULT_DB_FILE) {
            self.db_path = data_root.join(DEFAULT_DB_FILE);
        }
        self.data_root = data_root;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory holding photos waiting to be imported.
    pub fn input_dir(&self) -> PathBuf {
        self.data_root.join("ingest").join("input")
    }

    /// Directory imported photos are moved to.
    pub fn finished_dir(&self) -> PathBuf {
        self.data_root.join("ingest").join("finished")
    }
}

pub fn load_quality_file(path: &Path) -> Result<QualityThresholds, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let thresholds = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded quality thresholds");
    Ok(thresholds)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
