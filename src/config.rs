use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the engine and the bundled `MemoryStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfig {
    /// Directory holding `docket.wal`.
    pub data_dir: PathBuf,
    /// Bound on each lock wait inside a transaction.
    pub lock_timeout: Duration,
    /// When true, Cancelled and NoShow appointments keep blocking their slot.
    pub cancelled_blocks_slot: bool,
    /// WAL records appended since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How often the compactor wakes up.
    pub compact_interval: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_secs(5),
            cancelled_blocks_slot: false,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
        }
    }
}

impl BookingConfig {
    /// Read `DOCKET_*` environment variables, falling back to defaults for
    /// anything missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("DOCKET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parse("DOCKET_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            cancelled_blocks_slot: lookup("DOCKET_CANCELLED_BLOCKS_SLOT")
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.cancelled_blocks_slot),
            compact_threshold: parse("DOCKET_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parse("DOCKET_COMPACT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.compact_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("docket.wal")
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => bool::from_str(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = BookingConfig::from_lookup(|_| None);
        assert_eq!(cfg, BookingConfig::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/docket.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let cfg = BookingConfig::from_lookup(lookup_from(&[
            ("DOCKET_DATA_DIR", "/var/lib/docket"),
            ("DOCKET_LOCK_TIMEOUT_MS", "250"),
            ("DOCKET_CANCELLED_BLOCKS_SLOT", "yes"),
            ("DOCKET_COMPACT_THRESHOLD", "42"),
            ("DOCKET_COMPACT_INTERVAL_MS", "1500"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/docket"));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert!(cfg.cancelled_blocks_slot);
        assert_eq!(cfg.compact_threshold, 42);
        assert_eq!(cfg.compact_interval, Duration::from_millis(1500));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = BookingConfig::from_lookup(lookup_from(&[
            ("DOCKET_LOCK_TIMEOUT_MS", "soon"),
            ("DOCKET_CANCELLED_BLOCKS_SLOT", "maybe"),
            ("DOCKET_COMPACT_THRESHOLD", "-3"),
        ]));
        assert_eq!(cfg.lock_timeout, Duration::from_secs(5));
        assert!(!cfg.cancelled_blocks_slot);
        assert_eq!(cfg.compact_threshold, 1000);
    }
}
