//! Transaction core for live VM disk cloning.
//!
//! This crate ties the descriptor model and the hypervisor client into
//! [`VmTransaction`], a single-use, strictly staged transaction that
//! inspects a domain, selects its eligible disks, takes an external
//! snapshot, and later merges the deltas back with a polled block-commit
//! and pivot. It also provides the pluggable disk selector, the pure
//! snapshot-spec builder, a scoped-commit helper, and a per-domain advisory
//! lock.

pub mod builder;
pub mod concurrency;
pub mod selector;
pub mod stage;
pub mod transaction;

pub use builder::{build_snapshot_spec, SnapshotSpec};
pub use concurrency::DomainLock;
pub use selector::{DefaultSelector, DiskSelector};
pub use stage::TransactionStage;
pub use transaction::{run_scoped, TransactionOptions, VmTransaction};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("stage {expected} is expected instead of {actual}")]
    Stage {
        expected: TransactionStage,
        actual: TransactionStage,
    },
    #[error("stage {actual} is not between {start} and {end}")]
    StageRange {
        start: TransactionStage,
        end: TransactionStage,
        actual: TransactionStage,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("domain document error: {0}")]
    Domain(#[from] vmclone_schema::DomainError),
    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] vmclone_hypervisor::HypervisorError),
    #[error("failed deleting {failed} delta files")]
    Cleanup {
        failed: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("block job on device '{device}' did not finish within the deadline")]
    DeadlineExceeded { device: String },
    #[error("domain '{0}' is locked by another process")]
    LockBusy(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
