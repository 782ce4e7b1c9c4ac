use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File locations of one device snapshot: `<name>.db` and `<name>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub db: PathBuf,
    pub sidecar: PathBuf,
}

impl SnapshotPaths {
    /// Accepts a bare name or a name ending in `.db`.
    pub fn for_name(name: impl AsRef<Path>) -> Self {
        let name = name.as_ref();
        let base = if name.extension().is_some_and(|ext| ext == "db") {
            name.with_extension("")
        } else {
            name.to_path_buf()
        };
        Self {
            db: append_extension(&base, "db"),
            sidecar: append_extension(&base, "json"),
        }
    }

    pub fn exists(&self) -> bool {
        self.db.is_file() && self.sidecar.is_file()
    }
}

fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Device-level metadata needed to bring a device back offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMeta {
    pub name: String,
    pub address: String,
    pub device_id: u32,
    #[serde(default)]
    pub vendor_id: Option<u32>,
    #[serde(default)]
    pub segmentation_supported: bool,
    #[serde(default)]
    pub poll_delay_secs: Option<u64>,
    #[serde(default)]
    pub save_resampling: Option<String>,
    pub history_size: Option<usize>,
    /// Objects as `type:instance`.
    #[serde(default)]
    pub object_list: Vec<String>,
}

/// Per-point metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointMeta {
    pub name: String,
    pub object_type: String,
    pub instance: u32,
    /// `numeric`, `boolean`, `enumerated` or `virtual`.
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub device: DeviceMeta,
    pub points: BTreeMap<String, PointMeta>,
}

impl Sidecar {
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingSidecar(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn point(&self, name: &str) -> Result<&PointMeta, StoreError> {
        self.points
            .get(name)
            .ok_or_else(|| StoreError::RemovedPoint(name.to_string()))
    }
}
