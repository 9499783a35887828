use crate::HypervisorError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vmclone_schema::{SnapshotDescriptor, SnapshotFlags};

/// Progress report for one device's block-commit job.
///
/// A `None` from [`HypervisorClient::block_job_status`] or an `end` of zero
/// means no job is running on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockJobStatus {
    pub current: u64,
    pub end: u64,
}

impl BlockJobStatus {
    /// The delta has been fully merged; the job is waiting for a pivot.
    pub fn ready_to_pivot(self) -> bool {
        self.end > 0 && self.current == self.end
    }
}

/// Flags for starting a block-commit job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommitFlags {
    /// Commit only the topmost delta into its immediate backing image.
    pub shallow: bool,
    /// Required when committing the active layer of a running domain.
    pub active: bool,
}

/// Capabilities the transaction core requires from a hypervisor binding.
///
/// All operations are synchronous; block-commit completion is observed by
/// polling [`block_job_status`](Self::block_job_status).
pub trait HypervisorClient: Send + Sync {
    fn name(&self) -> &str;

    /// Return the domain's configuration document as JSON (see
    /// `vmclone_schema::parse_domain_str` for the expected fields).
    fn describe(&self, domain: &str) -> Result<String, HypervisorError>;

    fn create_snapshot(
        &self,
        domain: &str,
        descriptor: &SnapshotDescriptor,
        flags: SnapshotFlags,
    ) -> Result<(), HypervisorError>;

    /// Start flattening `top` back into `base` (or the immediate backing
    /// image when `base` is `None`). `bandwidth_kib` of zero means
    /// unthrottled.
    fn start_block_commit(
        &self,
        domain: &str,
        device: &str,
        base: Option<&Path>,
        top: &Path,
        bandwidth_kib: u64,
        flags: BlockCommitFlags,
    ) -> Result<(), HypervisorError>;

    fn block_job_status(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<BlockJobStatus>, HypervisorError>;

    /// Abort the device's block job; with `pivot` set, finalize a fully
    /// merged job by switching the disk back to its base image.
    fn abort_block_job(&self, domain: &str, device: &str, pivot: bool)
        -> Result<(), HypervisorError>;

    fn is_active(&self, domain: &str) -> Result<bool, HypervisorError>;
}

/// Resolve a client from a connection URI, by scheme.
///
/// `mock:` URIs yield an empty [`crate::MockHypervisor`]; any other scheme
/// names a binding this build does not carry.
pub fn select_client(uri: &str) -> Result<Box<dyn HypervisorClient>, HypervisorError> {
    let scheme = uri.split(':').next().unwrap_or(uri);
    match scheme {
        "mock" => Ok(Box::new(crate::mock::MockHypervisor::new())),
        other => Err(HypervisorError::ClientUnavailable(other.to_owned())),
    }
}
