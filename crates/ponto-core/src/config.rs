//! Process settings.
//!
//! Loaded once at startup from an optional TOML file, overridden by
//! `PONTO_*` environment variables, then validated. Components receive
//! typed values from here; nothing probes configuration ad hoc.

use crate::lockout::FAILURE_WINDOW;
use crate::notify::NotificationPolicy;
use crate::work_window::WorkWindowPolicy;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Upper bounds keeping timestamp arithmetic well inside chrono's range.
const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;
const MAX_LOCKOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("failed to render configuration: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recognition: ControllerConfig,
    pub backend: BackendConfig,
    pub notifications: NotifyConfig,
    pub storage: StorageConfig,
}

/// Decision-pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum face distance for a match, in [0, 1]. Lower is stricter.
    pub tolerance: f32,
    /// Minimum seconds between two accepted events for one identity.
    pub cooldown_secs: u64,
    /// `"none"` disables the bound.
    #[serde(with = "time_of_day::option")]
    pub work_start: Option<NaiveTime>,
    #[serde(with = "time_of_day::option")]
    pub work_end: Option<NaiveTime>,
    pub allow_after_hours: bool,
    pub max_failed_attempts: u32,
    pub lockout_secs: u64,
    pub failure_window_secs: u64,
    pub cache_enabled: bool,
    pub max_cache_size: usize,
    pub save_unknown_faces: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            cooldown_secs: 10,
            work_start: NaiveTime::from_hms_opt(7, 0, 0),
            work_end: NaiveTime::from_hms_opt(19, 0, 0),
            allow_after_hours: true,
            max_failed_attempts: 10,
            lockout_secs: 300,
            failure_window_secs: FAILURE_WINDOW.as_secs(),
            cache_enabled: true,
            max_cache_size: 1000,
            save_unknown_faces: false,
        }
    }
}

impl ControllerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn work_window(&self) -> WorkWindowPolicy {
        WorkWindowPolicy::new(self.work_start, self.work_end)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if !(0.0..=1.0).contains(&self.tolerance) {
            errors.push(format!("recognition.tolerance must be within [0, 1], got {}", self.tolerance));
        }
        if let (Some(start), Some(end)) = (self.work_start, self.work_end) {
            if start >= end {
                errors.push(format!("recognition.work_start ({start}) must be before work_end ({end})"));
            }
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            errors.push(format!("recognition.cooldown_secs must be <= {MAX_COOLDOWN_SECS}"));
        }
        if self.max_failed_attempts == 0 {
            errors.push("recognition.max_failed_attempts must be >= 1".to_string());
        }
        if self.lockout_secs > MAX_LOCKOUT_SECS {
            errors.push(format!("recognition.lockout_secs must be <= {MAX_LOCKOUT_SECS}"));
        }
        if self.failure_window_secs == 0 {
            errors.push("recognition.failure_window_secs must be >= 1".to_string());
        }
    }
}

/// Attendance store endpoint and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; the store is reached at `{url}/timecard`.
    pub url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/api".to_string(),
            timeout_secs: 10,
            max_retries: 3,
            retry_interval_ms: 1000,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if !is_http_url(&self.url) {
            errors.push(format!("backend.url must be an http(s) URL, got {:?}", self.url));
        }
        if self.timeout_secs == 0 {
            errors.push("backend.timeout_secs must be >= 1".to_string());
        }
        if self.max_retries == 0 {
            errors.push("backend.max_retries must be >= 1".to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub on_first_entry: bool,
    pub on_late_arrival: bool,
    pub on_early_departure: bool,
    pub on_unknown_face: bool,
    #[serde(with = "time_of_day")]
    pub late_arrival_time: NaiveTime,
    #[serde(with = "time_of_day")]
    pub early_departure_time: NaiveTime,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let policy = NotificationPolicy::default();
        Self {
            webhook_url: None,
            webhook_timeout_secs: 5,
            on_first_entry: policy.on_first_entry,
            on_late_arrival: policy.on_late_arrival,
            on_early_departure: policy.on_early_departure,
            on_unknown_face: policy.on_unknown_face,
            late_arrival_time: policy.late_arrival_after,
            early_departure_time: policy.early_departure_before,
        }
    }
}

impl NotifyConfig {
    pub fn policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            on_first_entry: self.on_first_entry,
            on_late_arrival: self.on_late_arrival,
            on_early_departure: self.on_early_departure,
            on_unknown_face: self.on_unknown_face,
            late_arrival_after: self.late_arrival_time,
            early_departure_before: self.early_departure_time,
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if let Some(url) = &self.webhook_url {
            if !is_http_url(url) {
                errors.push(format!("notifications.webhook_url must be an http(s) URL, got {url:?}"));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gallery_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    pub auto_backup: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            gallery_path: None,
            evidence_dir: None,
            backup_dir: None,
            auto_backup: true,
            max_backups: 7,
        }
    }
}

impl StorageConfig {
    pub fn gallery_path(&self) -> PathBuf {
        self.gallery_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("gallery.db"))
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.evidence_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("unknown_faces"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("ponto")
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Settings {
    /// Load from `path` (or `$PONTO_CONFIG`), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PONTO_CONFIG").map(PathBuf::from));

        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Render as a TOML document that [`Settings::from_toml`] reads back unchanged.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
    }

    /// Apply `PONTO_*` overrides through `lookup`. Unparseable values are errors.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rec = &mut self.recognition;
        if let Some(v) = env_parse(&lookup, "PONTO_FACE_TOLERANCE")? {
            rec.tolerance = v;
        }
        if let Some(v) = env_parse(&lookup, "PONTO_RECOGNITION_COOLDOWN")? {
            rec.cooldown_secs = v;
        }
        if let Some(v) = env_time(&lookup, "PONTO_WORK_START")? {
            rec.work_start = v;
        }
        if let Some(v) = env_time(&lookup, "PONTO_WORK_END")? {
            rec.work_end = v;
        }
        if let Some(v) = env_bool(&lookup, "PONTO_ALLOW_AFTER_HOURS")? {
            rec.allow_after_hours = v;
        }
        if let Some(v) = env_parse(&lookup, "PONTO_MAX_FAILED_ATTEMPTS")? {
            rec.max_failed_attempts = v;
        }
        if let Some(v) = env_parse(&lookup, "PONTO_LOCKOUT_TIME")? {
            rec.lockout_secs = v;
        }
        if let Some(v) = env_bool(&lookup, "PONTO_SAVE_UNKNOWN_FACES")? {
            rec.save_unknown_faces = v;
        }

        let backend = &mut self.backend;
        if let Some(v) = lookup("PONTO_BACKEND_URL") {
            backend.url = v;
        }
        if let Some(v) = env_parse(&lookup, "PONTO_BACKEND_TIMEOUT")? {
            backend.timeout_secs = v;
        }
        if let Some(v) = env_parse(&lookup, "PONTO_MAX_RETRIES")? {
            backend.max_retries = v;
        }

        if let Some(v) = lookup("PONTO_WEBHOOK_URL") {
            self.notifications.webhook_url = (!v.trim().is_empty()).then_some(v);
        }
        if let Some(v) = env_bool(&lookup, "PONTO_NOTIFY_ON_UNKNOWN_FACE")? {
            self.notifications.on_unknown_face = v;
        }

        if let Some(v) = lookup("PONTO_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PONTO_GALLERY_PATH") {
            self.storage.gallery_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check every range at once and report all violations together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.recognition.validate(&mut errors);
        self.backend.validate(&mut errors);
        self.notifications.validate(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn env_parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        })
        .transpose()
}

/// Empty or `none` clears the bound.
fn env_time<F>(lookup: &F, key: &str) -> Result<Option<Option<NaiveTime>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                return Ok(None);
            }
            time_of_day::parse(trimmed)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value: value.clone(),
                })
        })
        .transpose()
}

/// `"HH:MM"` / `"HH:MM:SS"` (de)serialization for time-of-day fields.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(text: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(text, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| de::Error::custom(format!("invalid time of day {text:?}, expected HH:MM")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_str("none"),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            let text = String::deserialize(deserializer)?;
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                return Ok(None);
            }
            super::parse(trimmed)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day {text:?}, expected HH:MM")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.recognition.cooldown(), Duration::from_secs(10));
        assert_eq!(settings.recognition.work_start, Some(hm(7, 0)));
        assert_eq!(settings.recognition.max_failed_attempts, 10);
        assert_eq!(settings.recognition.lockout(), Duration::from_secs(300));
        assert_eq!(settings.backend.max_retries, 3);
        assert_eq!(settings.backend.retry_interval(), Duration::from_secs(1));
        assert_eq!(settings.recognition.max_cache_size, 1000);
    }

    #[test]
    fn test_toml_sections_and_short_times() {
        let settings = Settings::from_toml(
            r#"
            [recognition]
            tolerance = 0.5
            cooldown_secs = 5
            work_start = "08:00"
            work_end = "18:00:00"
            allow_after_hours = false

            [backend]
            url = "https://ponto.example.com/api"

            [notifications]
            webhook_url = "https://hooks.example.com/x"
            late_arrival_time = "08:30"
            "#,
        )
        .unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.recognition.tolerance, 0.5);
        assert_eq!(settings.recognition.work_start, Some(hm(8, 0)));
        assert_eq!(settings.recognition.work_end, Some(hm(18, 0)));
        assert!(!settings.recognition.allow_after_hours);
        // Unspecified fields keep their defaults.
        assert_eq!(settings.recognition.lockout_secs, 300);
        assert_eq!(settings.notifications.policy().late_arrival_after, hm(8, 30));
        assert_eq!(settings.notifications.early_departure_time, hm(17, 0));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("PONTO_FACE_TOLERANCE", "0.45"),
                ("PONTO_RECOGNITION_COOLDOWN", "30"),
                ("PONTO_WORK_START", ""),
                ("PONTO_SAVE_UNKNOWN_FACES", "true"),
                ("PONTO_BACKEND_URL", "http://store:8080/api"),
                ("PONTO_WEBHOOK_URL", "http://hooks/x"),
                ("PONTO_DATA_DIR", "/var/lib/ponto"),
            ]))
            .unwrap();
        assert_eq!(settings.recognition.tolerance, 0.45);
        assert_eq!(settings.recognition.cooldown_secs, 30);
        assert_eq!(settings.recognition.work_start, None);
        assert!(settings.recognition.save_unknown_faces);
        assert_eq!(settings.backend.url, "http://store:8080/api");
        assert_eq!(settings.notifications.webhook_url.as_deref(), Some("http://hooks/x"));
        assert_eq!(settings.storage.gallery_path(), PathBuf::from("/var/lib/ponto/gallery.db"));
    }

    #[test]
    fn test_env_parse_failure_is_reported() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env(&[("PONTO_LOCKOUT_TIME", "five minutes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "PONTO_LOCKOUT_TIME"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut settings = Settings::default();
        settings.recognition.tolerance = 1.5;
        settings.recognition.work_start = Some(hm(19, 0));
        settings.recognition.work_end = Some(hm(7, 0));
        settings.backend.max_retries = 0;
        settings.backend.url = "localhost:5000".to_string();

        match settings.validate() {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 4, "{errors:?}"),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_time_in_file_is_parse_error() {
        let err = Settings::from_toml("[recognition]\nwork_start = \"7am\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut settings = Settings::default();
        settings.recognition.work_end = None;
        let text = settings.to_toml().unwrap();
        let back = Settings::from_toml(&text).unwrap();
        assert_eq!(back.recognition.work_end, None);
        assert_eq!(back.recognition.work_start, Some(hm(7, 0)));
    }
}
