use crate::models::LogLevel;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Application configuration from `mknettest.yaml`
///
/// Every section has defaults, so an absent file (or an absent section)
/// yields a configuration that runs the built-in demo engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nettest: NettestSection,
    pub engine: EngineConfig,
    pub resources: ResourcesSection,
    pub logging: LoggingSection,
}

/// Which test to run and the engine options that shape it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NettestSection {
    /// Test selector handed to the engine (e.g. `Ndt`)
    pub name: String,

    pub log_level: LogLevel,

    /// Ask the engine not to write a report file
    pub no_file_report: bool,

    /// Optional DNS engine override
    pub dns_engine: Option<String>,

    /// Provision and pass the bundled CA certificates
    pub use_ca_bundle: bool,
}

impl Default for NettestSection {
    fn default() -> Self {
        Self {
            name: "Ndt".to_string(),
            log_level: LogLevel::Info,
            no_file_report: true,
            dns_engine: None,
            use_ca_bundle: false,
        }
    }
}

/// How to reach the measurement engine.
///
/// `program` wins over `replay_file`; with neither set the built-in demo
/// script is replayed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// External engine executable that prints one JSON event per line
    pub program: Option<Utf8PathBuf>,

    /// Extra arguments for `program`
    pub args: Vec<String>,

    /// JSON-lines file of recorded events to replay
    pub replay_file: Option<Utf8PathBuf>,

    /// Delay between replayed events, in milliseconds
    pub replay_delay_ms: u64,

    /// How long the worker waits for one event before polling again
    pub poll_timeout_ms: u64,
}

impl EngineConfig {
    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 250;

    pub fn poll_timeout(&self) -> std::time::Duration {
        let ms = if self.poll_timeout_ms == 0 {
            Self::DEFAULT_POLL_TIMEOUT_MS
        } else {
            self.poll_timeout_ms
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Where bundled data files come from and where they are copied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    /// Directory holding the bundled GeoIP databases and CA bundle
    pub bundle_dir: Utf8PathBuf,

    /// Application-private directory the engine reads them from
    pub storage_dir: Utf8PathBuf,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            bundle_dir: Utf8PathBuf::from("resources"),
            storage_dir: Utf8PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub dir: String,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
    /// Write the log file as JSON lines
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            prefix: "mknettest".to_string(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nettest_defaults() {
        let section = NettestSection::default();
        assert_eq!(section.name, "Ndt");
        assert_eq!(section.log_level, LogLevel::Info);
        assert!(section.no_file_report);
        assert!(!section.use_ca_bundle);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "nettest:\n  name: WebConnectivity\nlogging:\n  debug: true\n";
        let config: AppConfig = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.nettest.name, "WebConnectivity");
        assert_eq!(config.nettest.log_level, LogLevel::Info);
        assert!(config.logging.debug);
        assert_eq!(config.logging.prefix, "mknettest");
        assert_eq!(config.resources.bundle_dir, Utf8PathBuf::from("resources"));
    }

    #[test]
    fn test_poll_timeout_default() {
        let engine = EngineConfig::default();
        assert_eq!(engine.poll_timeout().as_millis(), 250);

        let engine = EngineConfig {
            poll_timeout_ms: 40,
            ..EngineConfig::default()
        };
        assert_eq!(engine.poll_timeout().as_millis(), 40);
    }
}
