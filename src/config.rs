//! Service configuration from the environment

use crate::stream::StreamConfig;
use crate::valuation::WorkerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    /// JSON file overriding the built-in assistant copy
    pub prompts_path: Option<PathBuf>,
    /// Pricing collaborator endpoint; the worker only runs when set
    pub valuation_url: Option<String>,
    pub valuation_timeout: Duration,
    /// Re-derive every conversation projection from the log at startup
    pub rebuild_projections: bool,
    pub stream: StreamConfig,
    pub worker: WorkerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparsable numbers fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |name: &str, default: u64| parse_or(lookup(name), default);
        let stream_defaults = StreamConfig::default();
        let worker_defaults = WorkerConfig::default();

        let db_path = lookup("WIDGET_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".appraisal-chat").join("widget.db")
            },
            PathBuf::from,
        );

        Self {
            db_path,
            port: parse_or(lookup("WIDGET_PORT"), 8000),
            prompts_path: lookup("WIDGET_PROMPTS_PATH").map(PathBuf::from),
            valuation_url: lookup("VALUATION_COMPUTE_URL").filter(|u| !u.trim().is_empty()),
            valuation_timeout: Duration::from_secs(number("VALUATION_TIMEOUT_SECS", 30)),
            rebuild_projections: lookup("WIDGET_REBUILD_PROJECTIONS")
                .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true")),
            stream: StreamConfig {
                replay_limit: parse_or(
                    lookup("STREAM_REPLAY_LIMIT"),
                    stream_defaults.replay_limit,
                ),
                lifetime: Duration::from_secs(number(
                    "STREAM_LIFETIME_SECS",
                    stream_defaults.lifetime.as_secs(),
                )),
                poll_interval: Duration::from_secs(number(
                    "STREAM_POLL_SECS",
                    stream_defaults.poll_interval.as_secs(),
                )),
                retry: Duration::from_millis(number("STREAM_RETRY_MS", 3000)),
            },
            worker: WorkerConfig {
                max_attempts: parse_or(
                    lookup("VALUATION_MAX_ATTEMPTS"),
                    worker_defaults.max_attempts,
                )
                .max(1),
                backoff: Duration::from_secs(number(
                    "VALUATION_BACKOFF_SECS",
                    worker_defaults.backoff.as_secs(),
                )),
                poll_interval: Duration::from_secs(number(
                    "VALUATION_POLL_SECS",
                    worker_defaults.poll_interval.as_secs(),
                )),
                ..worker_defaults
            },
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/widget")]);
        assert_eq!(
            c.db_path,
            PathBuf::from("/home/widget/.appraisal-chat/widget.db")
        );
        assert_eq!(c.port, 8000);
        assert!(c.prompts_path.is_none());
        assert!(c.valuation_url.is_none());
        assert!(!c.rebuild_projections);
        assert_eq!(c.stream.replay_limit, 500);
        assert_eq!(c.stream.lifetime, Duration::from_secs(60));
        assert_eq!(c.stream.poll_interval, Duration::from_secs(15));
        assert_eq!(c.stream.retry, Duration::from_millis(3000));
        assert_eq!(c.worker.max_attempts, 3);
        assert_eq!(c.worker.backoff, Duration::from_secs(2));
        assert_eq!(c.worker.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("WIDGET_DB_PATH", "/data/w.db"),
            ("WIDGET_PORT", "9001"),
            ("VALUATION_COMPUTE_URL", "http://pricing:8080/compute"),
            ("STREAM_REPLAY_LIMIT", "50"),
            ("VALUATION_MAX_ATTEMPTS", "5"),
        ]);
        assert_eq!(c.db_path, PathBuf::from("/data/w.db"));
        assert_eq!(c.port, 9001);
        assert_eq!(c.valuation_url.as_deref(), Some("http://pricing:8080/compute"));
        assert_eq!(c.stream.replay_limit, 50);
        assert_eq!(c.worker.max_attempts, 5);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[
            ("WIDGET_PORT", "not-a-port"),
            ("VALUATION_MAX_ATTEMPTS", "0"),
            ("VALUATION_COMPUTE_URL", "  "),
        ]);
        assert_eq!(c.port, 8000);
        assert_eq!(c.worker.max_attempts, 1);
        assert!(c.valuation_url.is_none());
    }

    #[test]
    fn test_rebuild_flag() {
        assert!(config(&[("WIDGET_REBUILD_PROJECTIONS", "1")]).rebuild_projections);
        assert!(config(&[("WIDGET_REBUILD_PROJECTIONS", "TRUE")]).rebuild_projections);
        assert!(!config(&[("WIDGET_REBUILD_PROJECTIONS", "no")]).rebuild_projections);
    }
}
