//! Structured projection of a hypervisor domain document.
//!
//! A concrete hypervisor binding owns the raw encoding (libvirt speaks an XML
//! dialect); what crosses into this crate is a JSON document with the fields
//! below. Unknown attribute values parse into `Other` variants so that a
//! domain with exotic disks is still inspectable; selection rejects them
//! later instead of the parse failing.

use crate::types::{DeviceName, DomainName};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("failed to parse domain document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("domain document has no name")]
    EmptyName,
}

/// Kind of a guest device as declared in the domain document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Disk,
    Cdrom,
    Floppy,
    Lun,
    #[serde(untagged)]
    Other(String),
}

/// Backing of a disk's source: a regular file or a block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Block,
    #[serde(untagged)]
    Other(String),
}

/// On-disk image format reported by the driver element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverFormat {
    Raw,
    Qcow2,
    #[serde(untagged)]
    Other(String),
}

/// Value of the per-disk `snapshot` attribute, when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    No,
    Internal,
    External,
    Manual,
    #[serde(untagged)]
    Other(String),
}

/// One disk element of the domain document. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDescriptor {
    /// Device kind (`disk`, `cdrom`, ...).
    pub device: DeviceKind,
    /// Guest-visible target device name.
    pub target_dev: DeviceName,
    /// Path of the backing source; absent for e.g. an empty cdrom tray.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// `file` or `block` backing.
    pub source_kind: SourceKind,
    /// Driver name (`qemu` for the supported hypervisor).
    pub driver_name: String,
    /// Image format of the source.
    pub driver_format: DriverFormat,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub shareable: bool,
    #[serde(default)]
    pub transient: bool,
    /// Per-disk snapshot mode attribute; `None` when the document omits it.
    #[serde(default)]
    pub snapshot: Option<SnapshotMode>,
}

/// The parsed domain document: name plus disk list in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: DomainName,
    #[serde(default)]
    pub disks: Vec<DiskDescriptor>,
}

/// Parse a JSON domain document as returned by `HypervisorClient::describe`.
pub fn parse_domain_str(document: &str) -> Result<DomainConfig, DomainError> {
    let config: DomainConfig = serde_json::from_str(document)?;
    if config.name.as_str().is_empty() {
        return Err(DomainError::EmptyName);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_json(target: &str) -> String {
        format!(
            r#"{{
                "device": "disk",
                "target_dev": "{target}",
                "source_path": "/var/lib/images/{target}.qcow2",
                "source_kind": "file",
                "driver_name": "qemu",
                "driver_format": "qcow2"
            }}"#
        )
    }

    #[test]
    fn parse_minimal_domain() {
        let doc = format!(r#"{{ "name": "vm1", "disks": [{}] }}"#, disk_json("vda"));
        let config = parse_domain_str(&doc).unwrap();
        assert_eq!(config.name, "vm1");
        assert_eq!(config.disks.len(), 1);

        let disk = &config.disks[0];
        assert_eq!(disk.device, DeviceKind::Disk);
        assert_eq!(disk.target_dev, "vda");
        assert_eq!(disk.source_kind, SourceKind::File);
        assert_eq!(disk.driver_format, DriverFormat::Qcow2);
        assert!(!disk.readonly);
        assert!(!disk.shareable);
        assert!(!disk.transient);
        assert!(disk.snapshot.is_none());
    }

    #[test]
    fn parse_preserves_disk_order() {
        let doc = format!(
            r#"{{ "name": "vm1", "disks": [{}, {}, {}] }}"#,
            disk_json("vda"),
            disk_json("vdb"),
            disk_json("vdc")
        );
        let config = parse_domain_str(&doc).unwrap();
        let devs: Vec<&str> = config.disks.iter().map(|d| d.target_dev.as_str()).collect();
        assert_eq!(devs, vec!["vda", "vdb", "vdc"]);
    }

    #[test]
    fn parse_empty_name_rejected() {
        let err = parse_domain_str(r#"{ "name": "", "disks": [] }"#).unwrap_err();
        assert!(matches!(err, DomainError::EmptyName));
    }

    #[test]
    fn parse_garbage_rejected() {
        assert!(matches!(
            parse_domain_str("not a document"),
            Err(DomainError::Parse(_))
        ));
    }

    #[test]
    fn unknown_attribute_values_parse_as_other() {
        let doc = r#"{
            "name": "vm1",
            "disks": [{
                "device": "nvdimm",
                "target_dev": "pmem0",
                "source_kind": "nvme",
                "driver_name": "qemu",
                "driver_format": "vmdk",
                "snapshot": "manual"
            }]
        }"#;
        let config = parse_domain_str(doc).unwrap();
        let disk = &config.disks[0];
        assert_eq!(disk.device, DeviceKind::Other("nvdimm".to_owned()));
        assert_eq!(disk.source_kind, SourceKind::Other("nvme".to_owned()));
        assert_eq!(disk.driver_format, DriverFormat::Other("vmdk".to_owned()));
        assert_eq!(disk.snapshot, Some(SnapshotMode::Manual));
        assert!(disk.source_path.is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let doc = format!(r#"{{ "name": "vm1", "disks": [{}] }}"#, disk_json("vda"));
        let config = parse_domain_str(&doc).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: DomainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
