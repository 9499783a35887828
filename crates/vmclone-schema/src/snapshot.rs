//! Planned-snapshot shapes: what the transaction asks the hypervisor to create.

use crate::domain::{DriverFormat, SourceKind};
use crate::types::DeviceName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How guest memory is captured when the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryCapture {
    /// Disk-only snapshot; no memory state is written.
    None,
    /// Memory state is written to an external file.
    ExternalFile(PathBuf),
}

/// One external delta: writes to `device` land in `delta_path` after the
/// snapshot is taken, leaving the base image untouched until merged back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDelta {
    pub device: DeviceName,
    pub delta_path: PathBuf,
    /// Always the external-snapshot container format (qcow2), regardless of
    /// the base image's format.
    pub format: DriverFormat,
}

/// The full snapshot plan handed to `HypervisorClient::create_snapshot`.
/// Built once per transaction; immutable after the prepare step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub name: String,
    pub description: String,
    pub memory: MemoryCapture,
    /// Deltas in domain-document order.
    pub deltas: Vec<DiskDelta>,
}

/// Snapshot creation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlags {
    pub atomic: bool,
    pub no_metadata: bool,
    pub disk_only: bool,
    pub quiesce: bool,
}

/// A selected disk's base image, as consumed by the copy step: the source
/// path here is the pre-snapshot image, not the delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDisk {
    pub device: DeviceName,
    pub source: PathBuf,
    pub source_kind: SourceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_all_clear() {
        let flags = SnapshotFlags::default();
        assert!(!flags.atomic);
        assert!(!flags.no_metadata);
        assert!(!flags.disk_only);
        assert!(!flags.quiesce);
    }

    #[test]
    fn descriptor_serde_roundtrip() {
        let descriptor = SnapshotDescriptor {
            name: "vmclone".to_owned(),
            description: "vmclone".to_owned(),
            memory: MemoryCapture::ExternalFile(PathBuf::from("/w/memory.state")),
            deltas: vec![DiskDelta {
                device: DeviceName::new("vda"),
                delta_path: PathBuf::from("/w/vm1-vda-unmerged.qcow2"),
                format: DriverFormat::Qcow2,
            }],
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: SnapshotDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }
}
