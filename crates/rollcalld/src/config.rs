use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables, each layer overriding the previous one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logical camera index (`/dev/video{index}`).
    pub camera_index: u32,
    /// Milliseconds between capture ticks.
    pub tick_interval_ms: u64,
    /// Every Nth acquired frame goes to recognition.
    pub recognition_interval: u32,
    /// Maximum Euclidean distance accepted as a match.
    pub match_threshold: f32,
    /// Top-label probability below which emotion is reported as neutral.
    pub emotion_floor: f32,
    /// Samples at or below this confidence are left out of trends.
    pub emotion_history_floor: f32,
    pub emotion_enabled: bool,
    /// Base directory for the catalog and database when their paths are
    /// not given explicitly.
    pub data_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/models`.
    pub model_dir: Option<PathBuf>,
    pub detector_model: String,
    pub embedder_model: String,
    pub emotion_model: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local/share"))
            .join("rollcall");

        Self {
            camera_index: 0,
            tick_interval_ms: 33,
            recognition_interval: 15,
            match_threshold: rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD,
            emotion_floor: rollcall_core::emotion::DEFAULT_CONFIDENCE_FLOOR,
            emotion_history_floor: rollcall_core::trends::DEFAULT_HISTORY_FLOOR,
            emotion_enabled: true,
            data_dir,
            catalog_path: None,
            db_path: None,
            model_dir: None,
            detector_model: "version-RFB-320.onnx".to_string(),
            embedder_model: "face_embedding.onnx".to_string(),
            emotion_model: "emotion-ferplus-8.onnx".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration: defaults, then the config file if there is one,
    /// then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if std::env::var_os("ROLLCALL_CONFIG").is_some() => {
                tracing::warn!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay `ROLLCALL_*` environment variables.
    pub fn apply_env(&mut self) {
        self.camera_index = env_parse("ROLLCALL_CAMERA_INDEX", self.camera_index);
        self.tick_interval_ms = env_parse("ROLLCALL_TICK_INTERVAL_MS", self.tick_interval_ms);
        self.recognition_interval = env_parse("ROLLCALL_RECOGNITION_INTERVAL", self.recognition_interval);
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.emotion_floor = env_parse("ROLLCALL_EMOTION_FLOOR", self.emotion_floor);
        self.emotion_history_floor = env_parse("ROLLCALL_EMOTION_HISTORY_FLOOR", self.emotion_history_floor);
        self.emotion_enabled = env_bool("ROLLCALL_EMOTION_ENABLED", self.emotion_enabled);

        if let Some(dir) = env_path("ROLLCALL_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(path) = env_path("ROLLCALL_CATALOG_PATH") {
            self.catalog_path = Some(path);
        }
        if let Some(path) = env_path("ROLLCALL_DB_PATH") {
            self.db_path = Some(path);
        }
        if let Some(dir) = env_path("ROLLCALL_MODEL_DIR") {
            self.model_dir = Some(dir);
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("facial_data").join("encodings.json"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("attendance.db"))
    }

    pub fn detector_model_path(&self) -> String {
        self.model_path(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> String {
        self.model_path(&self.embedder_model)
    }

    pub fn emotion_model_path(&self) -> String {
        self.model_path(&self.emotion_model)
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir().join(file).to_string_lossy().into_owned()
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// `ROLLCALL_CONFIG`, else `$XDG_CONFIG_HOME/rollcall/config.toml`.
fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".config"));
    Some(base.join("rollcall").join("config.toml"))
}

fn env_parse<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment override");
            current
        }),
        Err(_) => current,
    }
}

fn env_bool(key: &str, current: bool) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(current)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.tick_interval(), Duration::from_millis(33));
        assert_eq!(config.recognition_interval, 15);
        assert!((config.match_threshold - 0.6).abs() < 1e-6);
        assert!((config.emotion_floor - 0.3).abs() < 1e-6);
        assert!((config.emotion_history_floor - 0.5).abs() < 1e-6);
        assert!(config.emotion_enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            camera_index = 2
            match_threshold = 0.5
            data_dir = "/srv/rollcall"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_index, 2);
        assert!((config.match_threshold - 0.5).abs() < 1e-6);
        assert_eq!(config.recognition_interval, 15);
        assert_eq!(config.db_path(), PathBuf::from("/srv/rollcall/attendance.db"));
        assert_eq!(
            config.catalog_path(),
            PathBuf::from("/srv/rollcall/facial_data/encodings.json")
        );
    }

    #[test]
    fn test_model_dir_follows_data_dir() {
        let config = Config::from_toml(
            r#"
            data_dir = "/srv/rollcall"
            embedder_model = "emb.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(config.model_dir(), PathBuf::from("/srv/rollcall/models"));
        assert_eq!(config.embedder_model_path(), "/srv/rollcall/models/emb.onnx");

        let mut config = Config::default();
        config.data_dir = PathBuf::from("/var/lib/rollcall");
        assert_eq!(
            config.emotion_model_path(),
            "/var/lib/rollcall/models/emotion-ferplus-8.onnx"
        );
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = Config::from_toml(
            r#"
            catalog_path = "/tmp/enc.json"
            model_dir = "/opt/models"
            detector_model = "det.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog_path(), PathBuf::from("/tmp/enc.json"));
        assert_eq!(config.detector_model_path(), "/opt/models/det.onnx");
    }

    #[test]
    fn test_unknown_types_rejected() {
        assert!(Config::from_toml("camera_index = \"front\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "recognition_interval = 5\nemotion_enabled = false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.recognition_interval, 5);
        assert!(!config.emotion_enabled);
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
