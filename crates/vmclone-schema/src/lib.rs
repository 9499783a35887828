//! Descriptor data model for vmclone transactions.
//!
//! This crate holds the passive shapes the transaction core operates on: the
//! structured projection of a hypervisor domain document (`DomainConfig` and
//! its `DiskDescriptor`s) and the planned snapshot (`SnapshotDescriptor`,
//! `SnapshotFlags`, `SnapshotDisk`). Nothing here talks to a hypervisor; the
//! document crosses the client boundary as JSON and is parsed with
//! [`parse_domain_str`].

pub mod domain;
pub mod snapshot;
pub mod types;

pub use domain::{
    parse_domain_str, DeviceKind, DiskDescriptor, DomainConfig, DomainError, DriverFormat,
    SnapshotMode, SourceKind,
};
pub use snapshot::{DiskDelta, MemoryCapture, SnapshotDescriptor, SnapshotDisk, SnapshotFlags};
pub use types::{DeviceName, DomainName};
