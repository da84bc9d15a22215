use rollcall_core::liveness::{BlinkConfig, DEFAULT_EAR_THRESHOLD, DEFAULT_REQUIRED_BLINKS};
use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::recorder::DEFAULT_DEDUP_WINDOW_SECS;
use rollcall_core::DecisionParams;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the dedup window (one year).
const MAX_DEDUP_WINDOW_SECS: u64 = 365 * 24 * 3600;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file (encodings, profiles, attendance).
    pub db_path: PathBuf,
    /// JSON-lines observation feed from the face pipeline (`-` = stdin).
    pub feed_path: String,
    /// Directory of identity photos named `{id}.jpg|.jpeg|.png`.
    pub photo_dir: PathBuf,
    /// Euclidean distance below which a probe matches a gallery entry.
    pub match_threshold: f32,
    /// EAR below which the eyes count as closed.
    pub ear_threshold: f32,
    /// Blinks needed before an identity is verified.
    pub required_blinks: u32,
    /// Minimum spacing between two attendance records for one identity.
    pub dedup_window_secs: u64,
    /// Frame loop tick in milliseconds.
    pub frame_tick_ms: u64,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        let photo_dir = std::env::var("ROLLCALL_PHOTO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        Self {
            db_path,
            feed_path: std::env::var("ROLLCALL_FEED_PATH").unwrap_or_else(|_| "-".to_string()),
            photo_dir,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            ear_threshold: env_f32("ROLLCALL_EAR_THRESHOLD", DEFAULT_EAR_THRESHOLD),
            required_blinks: env_u32("ROLLCALL_REQUIRED_BLINKS", DEFAULT_REQUIRED_BLINKS),
            dedup_window_secs: env_u64(
                "ROLLCALL_DEDUP_WINDOW_SECS",
                DEFAULT_DEDUP_WINDOW_SECS as u64,
            )
            .min(MAX_DEDUP_WINDOW_SECS),
            frame_tick_ms: env_u64("ROLLCALL_FRAME_TICK_MS", 20),
            session_bus: std::env::var("ROLLCALL_SESSION_BUS").is_ok(),
        }
    }

    /// Decision-layer parameters derived from this configuration.
    pub fn decision_params(&self) -> DecisionParams {
        DecisionParams {
            match_threshold: self.match_threshold,
            blink: BlinkConfig {
                ear_threshold: self.ear_threshold,
                required_blinks: self.required_blinks,
            },
            dedup_window: chrono::Duration::seconds(self.dedup_window_secs as i64),
        }
    }

    pub fn frame_tick(&self) -> Duration {
        Duration::from_millis(self.frame_tick_ms)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_params_mapping() {
        let cfg = Config {
            db_path: PathBuf::from(":memory:"),
            feed_path: "-".into(),
            photo_dir: PathBuf::from("/tmp"),
            match_threshold: 0.5,
            ear_threshold: 0.2,
            required_blinks: 2,
            dedup_window_secs: 60,
            frame_tick_ms: 33,
            session_bus: true,
        };
        let p = cfg.decision_params();
        assert_eq!(p.match_threshold, 0.5);
        assert_eq!(p.blink.ear_threshold, 0.2);
        assert_eq!(p.blink.required_blinks, 2);
        assert_eq!(p.dedup_window, chrono::Duration::seconds(60));
        assert_eq!(cfg.frame_tick(), Duration::from_millis(33));
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_f32("ROLLCALL_TEST_UNSET_F32", 0.45), 0.45);
        assert_eq!(env_u64("ROLLCALL_TEST_UNSET_U64", 600), 600);
    }
}
