use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// File name of the SQLite database inside the state directory.
pub const DATABASE_FILE: &str = "crowdreview.db";

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Engine tuning that tests can build directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often a version conflict is retried before it is surfaced.
    pub max_conflict_retries: u32,
    /// Run the assignment engine as soon as a task is created.
    pub auto_assign: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            auto_assign: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let state_dir = env::var("CROWDREVIEW_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let max_conflict_retries = env::var("CROWDREVIEW_MAX_CONFLICT_RETRIES")
            .unwrap_or_else(|_| DEFAULT_MAX_CONFLICT_RETRIES.to_string())
            .parse::<u32>()
            .context("CROWDREVIEW_MAX_CONFLICT_RETRIES must be a valid number")?;

        let auto_assign = parse_flag(env::var("CROWDREVIEW_AUTO_ASSIGN").ok(), true);

        Ok(Config {
            state_dir,
            engine: EngineConfig {
                max_conflict_retries,
                auto_assign,
            },
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }
}

/// Parse a boolean switch.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case. Missing,
/// blank or unrecognised values fall back to `default`.
pub fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_missing_uses_default() {
        assert!(parse_flag(None, true));
        assert!(!parse_flag(None, false));
    }

    #[test]
    fn test_parse_flag_accepts_common_spellings() {
        assert!(parse_flag(Some("TRUE".to_string()), false));
        assert!(parse_flag(Some(" on ".to_string()), false));
        assert!(!parse_flag(Some("0".to_string()), true));
        assert!(!parse_flag(Some("No".to_string()), true));
    }

    #[test]
    fn test_parse_flag_garbage_uses_default() {
        // Blank and unknown values should not silently flip the switch
        assert!(parse_flag(Some("".to_string()), true));
        assert!(!parse_flag(Some("maybe".to_string()), false));
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_conflict_retries, 3);
        assert!(config.auto_assign);
    }

    #[test]
    fn test_database_path_joins_state_dir() {
        let config = Config {
            state_dir: PathBuf::from("/var/lib/crowdreview"),
            engine: EngineConfig::default(),
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/crowdreview/crowdreview.db")
        );
    }
}
