//! Snapshot-spec construction.
//!
//! Pure over its inputs: given the domain name, the selected disks and the
//! transaction configuration it computes delta-file locations, memory-state
//! handling and creation flags, without touching the hypervisor or the
//! filesystem.

use crate::TransactionError;
use std::path::Path;
use vmclone_schema::{
    DiskDelta, DiskDescriptor, DomainName, DriverFormat, MemoryCapture, SnapshotDescriptor,
    SnapshotDisk, SnapshotFlags, SourceKind,
};

/// Name recorded on the snapshot at the hypervisor.
const SNAPSHOT_NAME: &str = "vmclone";

/// Everything the prepare step freezes: the descriptor sent to the
/// hypervisor, the creation flags, and the base-image triples the copy step
/// consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSpec {
    pub descriptor: SnapshotDescriptor,
    pub flags: SnapshotFlags,
    pub disks: Vec<SnapshotDisk>,
}

/// Build the snapshot spec for the selected disks.
///
/// Delta placement: with a workdir, deltas are staged as
/// `<workdir>/<domain>-<device>-unmerged.qcow2`; without one, each delta
/// lives beside its base image as `<stem>-unmerged.qcow2`, which requires
/// file-backed sources. Memory capture outside disk-only mode also requires
/// a workdir. Both requirements surface as configuration errors here.
pub fn build_snapshot_spec(
    domain: &DomainName,
    disks: &[DiskDescriptor],
    workdir: Option<&Path>,
    disk_only: bool,
    quiesce: bool,
) -> Result<SnapshotSpec, TransactionError> {
    let memory = if disk_only {
        MemoryCapture::None
    } else {
        let workdir = workdir.ok_or_else(|| {
            TransactionError::Config("memory capture requires a workdir".to_owned())
        })?;
        MemoryCapture::ExternalFile(workdir.join("memory.state"))
    };

    let mut deltas = Vec::with_capacity(disks.len());
    let mut snapshot_disks = Vec::with_capacity(disks.len());

    for disk in disks {
        let source = disk.source_path.as_ref().ok_or_else(|| {
            TransactionError::Config(format!("disk {} has no source path", disk.target_dev))
        })?;

        let delta_path = if let Some(dir) = workdir {
            dir.join(format!("{domain}-{}-unmerged.qcow2", disk.target_dev))
        } else {
            if disk.source_kind != SourceKind::File {
                return Err(TransactionError::Config(format!(
                    "no workdir is available to back up disk {}",
                    disk.target_dev
                )));
            }
            let dir = source.parent().unwrap_or_else(|| Path::new(""));
            let stem = source
                .file_stem()
                .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
            dir.join(format!("{stem}-unmerged.qcow2"))
        };

        deltas.push(DiskDelta {
            device: disk.target_dev.clone(),
            delta_path,
            format: DriverFormat::Qcow2,
        });
        snapshot_disks.push(SnapshotDisk {
            device: disk.target_dev.clone(),
            source: source.clone(),
            source_kind: disk.source_kind.clone(),
        });
    }

    let descriptor = SnapshotDescriptor {
        name: SNAPSHOT_NAME.to_owned(),
        description: SNAPSHOT_NAME.to_owned(),
        memory,
        deltas,
    };
    let flags = SnapshotFlags {
        atomic: true,
        no_metadata: true,
        disk_only,
        quiesce,
    };

    Ok(SnapshotSpec {
        descriptor,
        flags,
        disks: snapshot_disks,
    })
}
