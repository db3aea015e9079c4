use crate::models::{LogLevel, OptionValue, Settings};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use thiserror::Error;

/// Engine option keys written by [`SettingsBuilder`]
pub mod keys {
    pub const GEOIP_COUNTRY_PATH: &str = "geoip_country_path";
    pub const GEOIP_ASN_PATH: &str = "geoip_asn_path";
    pub const CA_BUNDLE_PATH: &str = "net_ca_bundle_path";
    pub const NO_FILE_REPORT: &str = "no_file_report";
    pub const DNS_ENGINE: &str = "dns_engine";
}

/// Missing mandatory inputs
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("test name is not set")]
    MissingName,

    #[error("mandatory option {0} is not set")]
    MissingOption(&'static str),
}

/// Assembles the [`Settings`] document for one run.
///
/// Pure: no I/O happens here. The GeoIP paths must already point at
/// provisioned files; `build()` only checks that they are present.
///
/// # Example
/// ```ignore
/// let settings = SettingsBuilder::new("Ndt")
///     .log_level(LogLevel::Info)
///     .geoip_country_path("/data/GeoIP.dat")
///     .geoip_asn_path("/data/GeoIPASNum.dat")
///     .no_file_report(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    name: String,
    log_level: LogLevel,
    geoip_country_path: Option<Utf8PathBuf>,
    geoip_asn_path: Option<Utf8PathBuf>,
    ca_bundle_path: Option<Utf8PathBuf>,
    no_file_report: Option<bool>,
    dns_engine: Option<String>,
    extra: Vec<(String, OptionValue)>,
}

impl SettingsBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn geoip_country_path(mut self, path: impl AsRef<Utf8Path>) -> Self {
        self.geoip_country_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn geoip_asn_path(mut self, path: impl AsRef<Utf8Path>) -> Self {
        self.geoip_asn_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn ca_bundle_path(mut self, path: Option<impl AsRef<Utf8Path>>) -> Self {
        self.ca_bundle_path = path.map(|p| p.as_ref().to_path_buf());
        self
    }

    pub fn no_file_report(mut self, enabled: bool) -> Self {
        self.no_file_report = Some(enabled);
        self
    }

    pub fn dns_engine(mut self, engine: Option<String>) -> Self {
        self.dns_engine = engine.filter(|e| !e.is_empty());
        self
    }

    /// Add an option not covered by the named setters. Later values for the
    /// same key replace earlier ones.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Produce the settings document.
    ///
    /// # Errors
    /// [`ConfigurationError`] when the name or a GeoIP path is missing or empty.
    pub fn build(self) -> Result<Settings, ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::MissingName);
        }
        let country = non_empty(self.geoip_country_path)
            .ok_or(ConfigurationError::MissingOption(keys::GEOIP_COUNTRY_PATH))?;
        let asn = non_empty(self.geoip_asn_path)
            .ok_or(ConfigurationError::MissingOption(keys::GEOIP_ASN_PATH))?;

        let mut options = IndexMap::new();
        options.insert(keys::GEOIP_COUNTRY_PATH.to_string(), OptionValue::from(country.into_string()));
        options.insert(keys::GEOIP_ASN_PATH.to_string(), OptionValue::from(asn.into_string()));

        if let Some(ca) = non_empty(self.ca_bundle_path) {
            options.insert(keys::CA_BUNDLE_PATH.to_string(), OptionValue::from(ca.into_string()));
        }
        if let Some(no_file_report) = self.no_file_report {
            // The engine reads this flag as an integer
            options.insert(
                keys::NO_FILE_REPORT.to_string(),
                OptionValue::Int(i64::from(no_file_report)),
            );
        }
        if let Some(dns) = self.dns_engine {
            options.insert(keys::DNS_ENGINE.to_string(), OptionValue::from(dns));
        }
        for (key, value) in self.extra {
            options.insert(key, value);
        }

        Ok(Settings {
            name: self.name,
            log_level: self.log_level,
            options,
        })
    }
}

fn non_empty(path: Option<Utf8PathBuf>) -> Option<Utf8PathBuf> {
    path.filter(|p| !p.as_str().is_empty())
}
