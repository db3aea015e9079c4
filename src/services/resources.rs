use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;
use thiserror::Error;

/// Standard file names of the bundled data files
pub const GEOIP_COUNTRY_FILE: &str = "GeoIP.dat";
pub const GEOIP_ASN_FILE: &str = "GeoIPASNum.dat";
pub const CA_BUNDLE_FILE: &str = "ca-bundle.pem";

/// Errors that can occur while copying bundled resources
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("bundled resource not found: {0}")]
    MissingSource(Utf8PathBuf),

    #[error("invalid resource file name: {0:?}")]
    InvalidName(String),

    #[error("failed to provision {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisioningError {
    fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        ProvisioningError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where a bundled resource's bytes come from
#[derive(Debug, Clone)]
pub enum ResourceSource {
    /// Bytes compiled into the binary
    Embedded(&'static [u8]),
    /// A file shipped next to the application
    File(Utf8PathBuf),
}

/// One data file the engine needs on disk
#[derive(Debug, Clone)]
pub struct BundledResource {
    pub file_name: String,
    pub source: ResourceSource,
}

impl BundledResource {
    pub fn embedded(file_name: impl Into<String>, bytes: &'static [u8]) -> Self {
        Self {
            file_name: file_name.into(),
            source: ResourceSource::Embedded(bytes),
        }
    }

    pub fn file(file_name: impl Into<String>, source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            source: ResourceSource::File(source.into()),
        }
    }
}

/// The resources one Nettest needs
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    pub geoip_country: BundledResource,
    pub geoip_asn: BundledResource,
    pub ca_bundle: Option<BundledResource>,
}

impl ResourceBundle {
    /// Bundle made of the standard files found in `bundle_dir`
    pub fn from_dir(bundle_dir: &Utf8Path, include_ca_bundle: bool) -> Self {
        let file = |name: &str| BundledResource::file(name, bundle_dir.join(name));
        Self {
            geoip_country: file(GEOIP_COUNTRY_FILE),
            geoip_asn: file(GEOIP_ASN_FILE),
            ca_bundle: include_ca_bundle.then(|| file(CA_BUNDLE_FILE)),
        }
    }
}

/// Filesystem paths of provisioned resources, ready for the settings document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResources {
    pub geoip_country_path: Utf8PathBuf,
    pub geoip_asn_path: Utf8PathBuf,
    pub ca_bundle_path: Option<Utf8PathBuf>,
}

/// Copies bundled resources into application storage.
///
/// The destination of a resource is always `storage_dir/<file_name>`. A
/// destination that already exists is reused untouched, so provisioning is
/// a one-time cost per installation.
#[derive(Debug, Clone)]
pub struct ResourceProvisioner {
    storage_dir: Utf8PathBuf,
}

impl ResourceProvisioner {
    pub fn new(storage_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Utf8Path {
        &self.storage_dir
    }

    /// Destination path for `resource`, whether or not it exists yet
    pub fn destination(&self, resource: &BundledResource) -> Result<Utf8PathBuf, ProvisioningError> {
        validate_file_name(&resource.file_name)?;
        Ok(self.storage_dir.join(&resource.file_name))
    }

    pub fn is_provisioned(&self, resource: &BundledResource) -> bool {
        self.destination(resource)
            .map(|dest| dest.is_file())
            .unwrap_or(false)
    }

    /// Copy `resource` into storage unless already present and return its path.
    ///
    /// The bytes are written to a temporary file in the storage directory and
    /// renamed into place, so an interrupted copy never leaves a truncated
    /// destination behind.
    pub fn provision(&self, resource: &BundledResource) -> Result<Utf8PathBuf, ProvisioningError> {
        let dest = self.destination(resource)?;
        if dest.is_file() {
            tracing::debug!("Resource already provisioned: {}", dest);
            return Ok(dest);
        }

        fs::create_dir_all(&self.storage_dir)
            .map_err(|e| ProvisioningError::io(&self.storage_dir, e))?;

        let bytes = match &resource.source {
            ResourceSource::Embedded(bytes) => std::borrow::Cow::Borrowed(*bytes),
            ResourceSource::File(source) => {
                if !source.is_file() {
                    return Err(ProvisioningError::MissingSource(source.clone()));
                }
                std::borrow::Cow::Owned(fs::read(source).map_err(|e| ProvisioningError::io(source, e))?)
            }
        };

        let partial = self
            .storage_dir
            .join(format!(".{}.partial", resource.file_name));
        let write_result = fs::File::create(&partial).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(e) = write_result {
            let _ = fs::remove_file(&partial);
            return Err(ProvisioningError::io(&partial, e));
        }
        if let Err(e) = fs::rename(&partial, &dest) {
            let _ = fs::remove_file(&partial);
            return Err(ProvisioningError::io(&dest, e));
        }

        tracing::info!("Provisioned {} ({} bytes)", dest, bytes.len());
        Ok(dest)
    }

    /// Provision every resource in `bundle`
    pub fn provision_bundle(
        &self,
        bundle: &ResourceBundle,
    ) -> Result<ProvisionedResources, ProvisioningError> {
        Ok(ProvisionedResources {
            geoip_country_path: self.provision(&bundle.geoip_country)?,
            geoip_asn_path: self.provision(&bundle.geoip_asn)?,
            ca_bundle_path: bundle
                .ca_bundle
                .as_ref()
                .map(|ca| self.provision(ca))
                .transpose()?,
        })
    }
}

fn validate_file_name(name: &str) -> Result<(), ProvisioningError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ProvisioningError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, ResourceProvisioner) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("storage")).unwrap();
        (temp_dir, ResourceProvisioner::new(path))
    }

    #[test]
    fn test_provision_embedded() {
        let (_temp_dir, provisioner) = storage();
        let resource = BundledResource::embedded("GeoIP.dat", b"country-db");

        let path = provisioner.provision(&resource).unwrap();

        assert_eq!(path, provisioner.storage_dir().join("GeoIP.dat"));
        assert_eq!(fs::read(&path).unwrap(), b"country-db");
        assert!(provisioner.is_provisioned(&resource));
    }

    #[test]
    fn test_provision_leaves_no_partial_file() {
        let (_temp_dir, provisioner) = storage();
        let resource = BundledResource::embedded("GeoIPASNum.dat", b"asn-db");
        provisioner.provision(&resource).unwrap();

        let names: Vec<String> = fs::read_dir(provisioner.storage_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["GeoIPASNum.dat".to_string()]);
    }

    #[test]
    fn test_missing_file_source() {
        let (temp_dir, provisioner) = storage();
        let missing = Utf8PathBuf::try_from(temp_dir.path().join("nope.dat")).unwrap();
        let resource = BundledResource::file("GeoIP.dat", missing.clone());

        match provisioner.provision(&resource) {
            Err(ProvisioningError::MissingSource(path)) => assert_eq!(path, missing),
            other => panic!("Expected MissingSource, got {:?}", other),
        }
        assert!(!provisioner.is_provisioned(&resource));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_temp_dir, provisioner) = storage();
        for name in ["", "..", "../escape.dat", "nested/file.dat", ".hidden"] {
            let resource = BundledResource::embedded(name, b"x");
            assert!(
                matches!(
                    provisioner.provision(&resource),
                    Err(ProvisioningError::InvalidName(_))
                ),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_bundle_from_dir_names() {
        let bundle = ResourceBundle::from_dir(Utf8Path::new("res"), true);
        assert_eq!(bundle.geoip_country.file_name, GEOIP_COUNTRY_FILE);
        assert_eq!(bundle.geoip_asn.file_name, GEOIP_ASN_FILE);
        assert_eq!(
            bundle.ca_bundle.as_ref().map(|r| r.file_name.as_str()),
            Some(CA_BUNDLE_FILE)
        );

        let without_ca = ResourceBundle::from_dir(Utf8Path::new("res"), false);
        assert!(without_ca.ca_bundle.is_none());
    }
}
