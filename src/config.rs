use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::RetryPolicy;

/// Server settings, read once at startup from `HOSTEL_*` environment
/// variables. Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub retry: RetryPolicy,
    /// JSON array of rooms to seed on startup.
    pub seed_file: Option<PathBuf>,
    /// Seed the built-in room list when no seed file is given.
    pub seed_default: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            metrics_port: None,
            compact_threshold: 1000,
            retry: RetryPolicy::default(),
            seed_file: None,
            seed_default: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "HOSTEL_TX_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry.max_attempts),
            base_backoff: parse_var(&lookup, "HOSTEL_TX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_backoff),
        };

        Self {
            bind: lookup("HOSTEL_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "HOSTEL_PORT").unwrap_or(defaults.port),
            data_dir: lookup("HOSTEL_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parse_var(&lookup, "HOSTEL_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections)
                .max(1),
            metrics_port: parse_var(&lookup, "HOSTEL_METRICS_PORT"),
            compact_threshold: parse_var(&lookup, "HOSTEL_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            retry,
            seed_file: lookup("HOSTEL_SEED_FILE").map(PathBuf::from),
            seed_default: lookup("HOSTEL_SEED_DEFAULT")
                .map_or(defaults.seed_default, |v| !matches!(v.trim(), "0" | "false" | "no")),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]), Config::default());
    }

    #[test]
    fn values_are_read_and_bad_ones_ignored() {
        let cfg = config(&[
            ("HOSTEL_PORT", "9000"),
            ("HOSTEL_MAX_CONNECTIONS", "lots"),
            ("HOSTEL_METRICS_PORT", "9100"),
            ("HOSTEL_TX_MAX_ATTEMPTS", "8"),
            ("HOSTEL_TX_BACKOFF_MS", "25"),
            ("HOSTEL_DATA_DIR", "/var/lib/hostel"),
            ("HOSTEL_SEED_DEFAULT", "false"),
        ]);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.retry.max_attempts, 8);
        assert_eq!(cfg.retry.base_backoff, Duration::from_millis(25));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/hostel/ledger.wal"));
        assert!(!cfg.seed_default);
    }
}
