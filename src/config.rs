use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ReportError;

pub const CONFIG_PATH_ENV: &str = "POCKET_REPORT_CONFIG";
pub const DB_PATH_ENV: &str = "POCKET_REPORT_DB_PATH";
pub const CACHE_TTL_ENV: &str = "POCKET_REPORT_CACHE_TTL_SECS";

const DEFAULT_DB_RELATIVE_PATH: &str = "data/pocket_report.db";
const MIN_CACHE_TTL_SECS: u64 = 300;
const MAX_CACHE_TTL_SECS: u64 = 900;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub last_updated_ttl_secs: u64,
    pub default_period_label: String,
    pub fallback_vehicles: Vec<String>,
    pub fallback_months: Vec<String>,
    pub fallback_families: HashMap<String, Vec<String>>,
    /// username -> lowercase SHA-1 hex digest of the password
    pub authorized_users: HashMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            db_path: PathBuf::from(DEFAULT_DB_RELATIVE_PATH),
            busy_timeout_ms: 10_000,
            cache_ttl_secs: MAX_CACHE_TTL_SECS,
            last_updated_ttl_secs: MIN_CACHE_TTL_SECS,
            default_period_label: "Jan/24".into(),
            fallback_vehicles: vec![
                "H6 Pocket Report".into(),
                "ORA Pocket Report".into(),
                "H9 Pocket Report".into(),
                "POER Pocket Report".into(),
                "TANK Pocket Report".into(),
            ],
            fallback_months: vec![
                "Jan/24".into(),
                "Feb/24".into(),
                "Mar/24".into(),
                "Apr/24".into(),
                "May/24".into(),
                "Jun/24".into(),
            ],
            fallback_families: HashMap::from([(
                "H6".to_string(),
                vec![
                    "H6 Hev2".to_string(),
                    "H6 PHev19".to_string(),
                    "H6 PHvev35".to_string(),
                    "H6 GT".to_string(),
                ],
            )]),
            authorized_users: HashMap::new(),
        }
    }
}

impl ReportConfig {
    /// Loads from `POCKET_REPORT_CONFIG` when set, then applies the
    /// single-value env overrides.
    pub fn from_env() -> Result<Self, ReportError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => ReportConfig::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.db_path = PathBuf::from(db_path.trim());
            }
        }
        if let Ok(raw) = std::env::var(CACHE_TTL_ENV) {
            config.cache_ttl_secs = raw.trim().parse().map_err(|_| {
                ReportError::Config(format!("{CACHE_TTL_ENV} must be an integer: {raw}"))
            })?;
        }

        Ok(config.normalized())
    }

    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!("failed to read {}: {e}", path.to_string_lossy()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ReportError> {
        let config: ReportConfig = serde_json::from_str(raw)
            .map_err(|e| ReportError::Config(format!("invalid config json: {e}")))?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.cache_ttl_secs = self
            .cache_ttl_secs
            .clamp(MIN_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS);
        self.authorized_users = self
            .authorized_users
            .into_iter()
            .map(|(user, digest)| (user.trim().to_string(), digest.trim().to_lowercase()))
            .collect();
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn last_updated_ttl(&self) -> Duration {
        Duration::from_secs(self.last_updated_ttl_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn fallback_families_for(&self, vehicle: &str) -> Vec<String> {
        self.fallback_families
            .get(vehicle)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config = ReportConfig::from_json_str(
            r#"{
                "db_path": "/tmp/facts.db",
                "authorized_users": { " ops@example.com ": "ABCDEF" }
            }"#,
        )
        .expect("parse config");

        assert_eq!(config.db_path, PathBuf::from("/tmp/facts.db"));
        assert_eq!(config.cache_ttl_secs, 900);
        assert_eq!(config.default_period_label, "Jan/24");
        assert_eq!(config.fallback_vehicles.len(), 5);
        assert_eq!(
            config.authorized_users.get("ops@example.com").map(String::as_str),
            Some("abcdef")
        );
        assert_eq!(config.fallback_families_for("H6").len(), 4);
        assert!(config.fallback_families_for("ORA").is_empty());
    }

    #[test]
    fn cache_ttl_is_clamped_to_batch_window() {
        let short = ReportConfig::from_json_str(r#"{"cache_ttl_secs": 5}"#).expect("short");
        assert_eq!(short.cache_ttl(), Duration::from_secs(300));
        let long = ReportConfig::from_json_str(r#"{"cache_ttl_secs": 86400}"#).expect("long");
        assert_eq!(long.cache_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = ReportConfig::from_json_str("{ not json").expect_err("should fail");
        assert!(matches!(err, ReportError::Config(_)));
    }
}
