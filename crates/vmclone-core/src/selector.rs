//! Disk snapshot eligibility.

use tracing::debug;
use vmclone_schema::{DeviceKind, DiskDescriptor, DriverFormat, SnapshotMode, SourceKind};

/// Predicate deciding whether a disk participates in the snapshot.
///
/// Selectors are pure; they are consulted once per disk, in domain-document
/// order, during the prepare step and are frozen once the transaction is
/// initialized.
pub trait DiskSelector {
    fn select(&self, disk: &DiskDescriptor) -> bool;
}

impl<F> DiskSelector for F
where
    F: Fn(&DiskDescriptor) -> bool,
{
    fn select(&self, disk: &DiskDescriptor) -> bool {
        self(disk)
    }
}

/// The policy applied when the caller supplies no selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSelector;

impl DiskSelector for DefaultSelector {
    fn select(&self, disk: &DiskDescriptor) -> bool {
        // Skip snapshot=no, readonly, shareable and transient disks
        if disk.snapshot == Some(SnapshotMode::No)
            || disk.readonly
            || disk.shareable
            || disk.transient
        {
            debug!("reject dev {} due to property", disk.target_dev);
            return false;
        }

        // Ignore non-qemu driver
        if disk.driver_name != "qemu" {
            debug!("reject dev {} due to driver type", disk.target_dev);
            return false;
        }

        // Only raw and qcow2 formats are supported
        if !matches!(disk.driver_format, DriverFormat::Raw | DriverFormat::Qcow2) {
            debug!("reject dev {} due to driver subtype", disk.target_dev);
            return false;
        }

        // Only disk devices backed by file and block are currently supported
        if disk.device == DeviceKind::Disk
            && matches!(disk.source_kind, SourceKind::File | SourceKind::Block)
            && disk.source_path.is_some()
        {
            debug!("accept dev {}", disk.target_dev);
            return true;
        }

        debug!("reject dev {}", disk.target_dev);
        false
    }
}
