//! Register-map catalog (§4.1, C1). Loads the per-vendor JSON descriptor
//! files once at startup and caches them for the process lifetime, mirroring
//! `load_register_map` in the source but reading every file up front instead
//! of lazily per plant.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::vendor::Vendor;

use super::descriptor::PointDescriptor;

/// The two device classes that carry a register map (§4.1). Environment
/// sensors are not catalog-driven; they read a single fixed input register
/// (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Logger,
    Ess,
}

impl DeviceClass {
    fn dir_name(self) -> &'static str {
        match self {
            DeviceClass::Logger => "logger",
            DeviceClass::Ess => "ess",
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorFile(HashMap<String, PointDescriptor>);

/// Read-only after construction; safe for unsynchronised concurrent reads
/// from every pipeline (§5).
pub struct RegisterCatalog {
    maps: HashMap<(DeviceClass, Vendor), HashMap<String, PointDescriptor>>,
}

impl RegisterCatalog {
    /// Eagerly load every `(device-class, vendor)` descriptor file found
    /// under `base_dir`. A descriptor referenced later but absent from disk
    /// is a [`ConfigError::MissingDescriptor`] fatal at startup (§7 taxonomy
    /// 4), raised here rather than deferred to first use.
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_dir = base_dir.as_ref();
        let mut maps = HashMap::new();

        for class in [DeviceClass::Logger, DeviceClass::Ess] {
            for vendor in [Vendor::Huawei, Vendor::Fronius, Vendor::Hithium] {
                let path = descriptor_path(base_dir, class, vendor);
                if !path.exists() {
                    // Not every vendor supports every device class (e.g. no
                    // Hithium logger); skip silently, the gap surfaces as a
                    // MissingDescriptor the first time a plant actually asks
                    // for it.
                    continue;
                }
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::ReadFile {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                let parsed: DescriptorFile =
                    serde_json::from_str(&contents).map_err(|source| {
                        ConfigError::ParseDescriptor {
                            path: path.display().to_string(),
                            source,
                        }
                    })?;
                maps.insert((class, vendor), parsed.0);
            }
        }

        Ok(Self { maps })
    }

    /// Look up one point descriptor. Returns [`ConfigError::MissingDescriptor`]
    /// naming the `(class, vendor, point)` triple if either the vendor has no
    /// descriptor file for this class, or the file doesn't define that point.
    pub fn get(
        &self,
        class: DeviceClass,
        vendor: Vendor,
        point: &str,
    ) -> Result<&PointDescriptor, ConfigError> {
        self.maps
            .get(&(class, vendor))
            .and_then(|points| points.get(point))
            .ok_or_else(|| {
                ConfigError::MissingDescriptor(format!(
                    "{:?}/{:?}/{point}",
                    class, vendor
                ))
            })
    }
}

fn descriptor_path(base_dir: &Path, class: DeviceClass, vendor: Vendor) -> PathBuf {
    base_dir
        .join(class.dir_name())
        .join(format!("{}.json", vendor.descriptor_file_stem()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_descriptor(dir: &Path, class: DeviceClass, vendor: Vendor, json: &str) {
        let path = descriptor_path(dir, class, vendor);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
    }

    #[test]
    fn loads_and_looks_up_a_point() {
        let dir = tempdir();
        write_descriptor(
            dir.path(),
            DeviceClass::Logger,
            Vendor::Huawei,
            r#"{"sum_active_power": {"address": 100, "quantity": 2, "function_code": "holding", "signed": true, "gain": 10.0}}"#,
        );
        let catalog = RegisterCatalog::load(dir.path()).unwrap();
        let point = catalog
            .get(DeviceClass::Logger, Vendor::Huawei, "sum_active_power")
            .unwrap();
        assert_eq!(point.address, 100);
        assert_eq!(point.gain, 10.0);
    }

    #[test]
    fn missing_point_is_a_config_error() {
        let dir = tempdir();
        write_descriptor(dir.path(), DeviceClass::Logger, Vendor::Huawei, r#"{}"#);
        let catalog = RegisterCatalog::load(dir.path()).unwrap();
        let err = catalog
            .get(DeviceClass::Logger, Vendor::Huawei, "cos_phi")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingDescriptor(_)));
    }

    #[test]
    fn malformed_descriptor_file_fails_to_load() {
        let dir = tempdir();
        write_descriptor(dir.path(), DeviceClass::Logger, Vendor::Huawei, "not json");
        let err = RegisterCatalog::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseDescriptor { .. }));
    }

    /// Minimal temp-dir helper; avoids pulling in the `tempfile` crate for a
    /// handful of catalog tests.
    fn tempdir() -> TempDir {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "site_controller_register_map_test_{}_{:?}",
            std::process::id(),
            std::time::Instant::now()
        ));
        std::fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }

    struct TempDir(PathBuf);

    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
