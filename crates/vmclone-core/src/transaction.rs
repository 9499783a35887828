//! The snapshot transaction state machine.

use crate::builder::{build_snapshot_spec, SnapshotSpec};
use crate::selector::{DefaultSelector, DiskSelector};
use crate::stage::{check_stage, check_stage_between, TransactionStage};
use crate::TransactionError;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vmclone_hypervisor::{BlockCommitFlags, HypervisorClient};
use vmclone_schema::{
    parse_domain_str, DomainConfig, DomainName, SnapshotDescriptor, SnapshotDisk, SnapshotFlags,
};

/// Interval between block-job progress polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Caller-facing configuration of a transaction.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Staging directory for delta files and the memory-state file. Without
    /// one, deltas are co-located with their base images (file-backed disks
    /// only).
    pub workdir: Option<PathBuf>,
    /// Capture disk state only; no memory state is preserved.
    pub disk_only: bool,
    /// Ask the guest to flush filesystem buffers before the snapshot.
    pub quiesce: bool,
    /// Sleep between block-job progress polls.
    pub poll_interval: Duration,
    /// Upper bound on how long one device's block job may be polled. The
    /// default of `None` preserves the poll-forever behavior; setting it
    /// turns an overdue job into [`TransactionError::DeadlineExceeded`].
    pub poll_deadline: Option<Duration>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            workdir: None,
            disk_only: true,
            quiesce: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_deadline: None,
        }
    }
}

/// Transaction logic for manipulating the images of a virtual machine.
///
/// A transaction is single-use and strictly staged: `initialize` →
/// `prepare` → `begin` → `commit`, each requiring the stage the previous
/// step established. Between `begin` and `commit` the caller copies the
/// now-quiescent base images listed by [`snapshot_disks`](Self::snapshot_disks).
/// Any unrecovered error in begun/committing work moves the transaction to
/// `Failed`, after which only [`stage`](Self::stage) remains useful; there
/// is no retry-in-place, so discard the object and build a new one.
pub struct VmTransaction<'c> {
    client: &'c dyn HypervisorClient,
    domain: String,
    options: TransactionOptions,
    selector: Box<dyn DiskSelector>,
    stage: TransactionStage,
    // Set at Initialized, read-only afterwards.
    config: Option<DomainConfig>,
    // Set at Prepared, frozen afterwards.
    spec: Option<SnapshotSpec>,
}

impl<'c> VmTransaction<'c> {
    pub fn new(
        client: &'c dyn HypervisorClient,
        domain: impl Into<String>,
        options: TransactionOptions,
    ) -> Self {
        Self {
            client,
            domain: domain.into(),
            options,
            selector: Box::new(DefaultSelector),
            stage: TransactionStage::Uninitialized,
            config: None,
            spec: None,
        }
    }

    pub fn stage(&self) -> TransactionStage {
        self.stage
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Replace the disk selector. Allowed until the prepare step has run;
    /// the selector is frozen for the rest of the transaction afterwards.
    pub fn set_selector<S>(&mut self, selector: S) -> Result<(), TransactionError>
    where
        S: DiskSelector + 'static,
    {
        check_stage_between(
            self.stage,
            TransactionStage::Uninitialized,
            TransactionStage::Initialized,
        )?;
        self.selector = Box::new(selector);
        Ok(())
    }

    pub fn domain_name(&self) -> Result<&DomainName, TransactionError> {
        Ok(&self.initialized_config()?.name)
    }

    pub fn domain_config(&self) -> Result<&DomainConfig, TransactionError> {
        self.initialized_config()
    }

    pub fn snapshot_descriptor(&self) -> Result<&SnapshotDescriptor, TransactionError> {
        Ok(&self.prepared_spec()?.descriptor)
    }

    pub fn snapshot_flags(&self) -> Result<SnapshotFlags, TransactionError> {
        Ok(self.prepared_spec()?.flags)
    }

    /// Base-image triples of the selected disks, in domain-document order.
    /// These are the pre-snapshot sources the caller's copy step reads.
    pub fn snapshot_disks(&self) -> Result<&[SnapshotDisk], TransactionError> {
        Ok(&self.prepared_spec()?.disks)
    }

    /// Fetch and parse the domain document. Stage: uninitialized → initialized.
    pub fn initialize(&mut self) -> Result<(), TransactionError> {
        check_stage(self.stage, TransactionStage::Uninitialized)?;

        let document = self.client.describe(&self.domain)?;
        let config = parse_domain_str(&document)?;
        debug!(
            "domain {} described with {} disks",
            config.name,
            config.disks.len()
        );

        self.config = Some(config);
        self.set_stage(TransactionStage::Initialized);
        Ok(())
    }

    /// Select disks and freeze the snapshot spec. Stage: initialized → prepared.
    pub fn prepare(&mut self) -> Result<(), TransactionError> {
        check_stage(self.stage, TransactionStage::Initialized)?;
        let config = self.initialized_config()?;

        let mut selected = Vec::new();
        for disk in &config.disks {
            if self.selector.select(disk) {
                info!("accept disk {}", disk.target_dev);
                selected.push(disk.clone());
            }
        }

        let spec = build_snapshot_spec(
            &config.name,
            &selected,
            self.options.workdir.as_deref(),
            self.options.disk_only,
            self.options.quiesce,
        )?;

        self.spec = Some(spec);
        self.set_stage(TransactionStage::Prepared);
        Ok(())
    }

    /// Take the snapshot. Stage: prepared → begun, or → failed on a provider
    /// error. Runs at most once per transaction.
    pub fn begin(&mut self) -> Result<(), TransactionError> {
        check_stage(self.stage, TransactionStage::Prepared)?;
        let spec = self.prepared_spec()?;
        debug!(
            "creating snapshot for {} disks (disk_only={}, quiesce={})",
            spec.descriptor.deltas.len(),
            spec.flags.disk_only,
            spec.flags.quiesce
        );

        match self
            .client
            .create_snapshot(&self.domain, &spec.descriptor, spec.flags)
        {
            Ok(()) => {
                self.set_stage(TransactionStage::Begun);
                Ok(())
            }
            Err(e) => {
                info!("snapshot creation failed: {e}");
                self.set_stage(TransactionStage::Failed);
                Err(e.into())
            }
        }
    }

    /// Merge every delta back into its base image and delete the delta
    /// files. Stage: begun → committing → finished, or → failed if any
    /// block-commit step errors (in which case no delta file is deleted).
    ///
    /// A [`TransactionError::Cleanup`] means the commit itself succeeded
    /// (the stage is `Finished`) but one or more delta files could not be
    /// deleted.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        check_stage(self.stage, TransactionStage::Begun)?;
        self.set_stage(TransactionStage::Committing);

        let deleting = match self.commit_deltas() {
            Ok(paths) => paths,
            Err(e) => {
                self.set_stage(TransactionStage::Failed);
                return Err(e);
            }
        };

        self.set_stage(TransactionStage::Finished);

        let mut failures = Vec::new();
        for path in &deleting {
            match fs::remove_file(path) {
                Ok(()) => debug!("deleted delta file {}", path.display()),
                Err(e) => {
                    warn!("failed to delete delta file {}: {e}", path.display());
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let failed = failures.len();
            let source = failures.swap_remove(0);
            Err(TransactionError::Cleanup { failed, source })
        }
    }

    /// The committing-stage loop: per delta disk in descriptor order, start
    /// a shallow block commit and poll it to completion, pivoting when the
    /// job reports ready. Returns the delta paths pending deletion.
    fn commit_deltas(&self) -> Result<Vec<PathBuf>, TransactionError> {
        let spec = self.prepared_spec()?;

        // Liveness decides the active flag for the whole commit stage.
        let active = self.client.is_active(&self.domain)?;

        let mut deleting = Vec::with_capacity(spec.descriptor.deltas.len());
        for delta in &spec.descriptor.deltas {
            let flags = BlockCommitFlags {
                shallow: true,
                active,
            };
            info!(
                "block commit: device {} with bandwidth 0 (shallow={}, active={})",
                delta.device, flags.shallow, flags.active
            );
            self.client.start_block_commit(
                &self.domain,
                &delta.device,
                None,
                &delta.delta_path,
                0,
                flags,
            )?;

            let started = Instant::now();
            loop {
                let status = self.client.block_job_status(&self.domain, &delta.device)?;
                let Some(status) = status else {
                    break;
                };
                if status.end == 0 {
                    break;
                }
                if status.ready_to_pivot() {
                    self.client.abort_block_job(&self.domain, &delta.device, true)?;
                    info!("block job pivoted: device {}", delta.device);
                    break;
                }

                debug!(
                    "block job: device {} progress {}/{}",
                    delta.device, status.current, status.end
                );
                if let Some(deadline) = self.options.poll_deadline {
                    if started.elapsed() >= deadline {
                        return Err(TransactionError::DeadlineExceeded {
                            device: delta.device.to_string(),
                        });
                    }
                }
                thread::sleep(self.options.poll_interval);
            }

            deleting.push(delta.delta_path.clone());
        }

        Ok(deleting)
    }

    fn set_stage(&mut self, stage: TransactionStage) {
        self.stage = stage;
        debug!("stage changed to {stage}");
    }

    fn initialized_config(&self) -> Result<&DomainConfig, TransactionError> {
        check_stage_between(
            self.stage,
            TransactionStage::Initialized,
            TransactionStage::Finished,
        )?;
        self.config.as_ref().ok_or(TransactionError::StageRange {
            start: TransactionStage::Initialized,
            end: TransactionStage::Finished,
            actual: self.stage,
        })
    }

    fn prepared_spec(&self) -> Result<&SnapshotSpec, TransactionError> {
        check_stage_between(
            self.stage,
            TransactionStage::Prepared,
            TransactionStage::Finished,
        )?;
        self.spec.as_ref().ok_or(TransactionError::StageRange {
            start: TransactionStage::Prepared,
            end: TransactionStage::Finished,
            actual: self.stage,
        })
    }
}

/// Drive a transaction to begun, run the caller's copy step, and commit on
/// every exit path.
///
/// An error from the copy step takes precedence over a commit error; a
/// commit failure after a failed copy step is logged rather than swallowed
/// silently.
pub fn run_scoped<'c, T, F>(
    client: &'c dyn HypervisorClient,
    domain: &str,
    options: TransactionOptions,
    f: F,
) -> Result<T, TransactionError>
where
    F: FnOnce(&VmTransaction<'c>) -> Result<T, TransactionError>,
{
    let mut txn = VmTransaction::new(client, domain, options);
    txn.initialize()?;
    txn.prepare()?;
    txn.begin()?;

    let result = f(&txn);

    match txn.commit() {
        Ok(()) => result,
        Err(commit_err) => match result {
            Ok(_) => Err(commit_err),
            Err(caller_err) => {
                error!("commit failed after copy-step error: {commit_err}");
                Err(caller_err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmclone_hypervisor::MockHypervisor;
    use vmclone_schema::DiskDescriptor;

    const DOC: &str = r#"{
        "name": "vm1",
        "disks": [{
            "device": "disk",
            "target_dev": "vda",
            "source_path": "/data/vm1.qcow2",
            "source_kind": "file",
            "driver_name": "qemu",
            "driver_format": "qcow2"
        }]
    }"#;

    fn mock_with_domain() -> MockHypervisor {
        let mock = MockHypervisor::new();
        mock.define_domain("vm1", DOC);
        mock
    }

    #[test]
    fn fresh_transaction_is_uninitialized() {
        let mock = mock_with_domain();
        let txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());
        assert_eq!(txn.stage(), TransactionStage::Uninitialized);
    }

    #[test]
    fn operations_out_of_order_fail_and_leave_stage() {
        let mock = mock_with_domain();
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());

        assert!(matches!(
            txn.prepare(),
            Err(TransactionError::Stage { .. })
        ));
        assert!(matches!(txn.begin(), Err(TransactionError::Stage { .. })));
        assert!(matches!(txn.commit(), Err(TransactionError::Stage { .. })));
        assert_eq!(txn.stage(), TransactionStage::Uninitialized);
    }

    #[test]
    fn accessors_gated_by_stage() {
        let mock = mock_with_domain();
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());

        assert!(matches!(
            txn.domain_name(),
            Err(TransactionError::StageRange { .. })
        ));
        txn.initialize().unwrap();
        assert_eq!(txn.domain_name().unwrap(), &"vm1");
        assert!(matches!(
            txn.snapshot_disks(),
            Err(TransactionError::StageRange { .. })
        ));
        txn.prepare().unwrap();
        assert_eq!(txn.snapshot_disks().unwrap().len(), 1);
    }

    #[test]
    fn initialize_twice_fails() {
        let mock = mock_with_domain();
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());
        txn.initialize().unwrap();
        assert!(matches!(
            txn.initialize(),
            Err(TransactionError::Stage { .. })
        ));
        assert_eq!(txn.stage(), TransactionStage::Initialized);
    }

    #[test]
    fn describe_failure_leaves_stage_uninitialized() {
        let mock = MockHypervisor::new();
        let mut txn = VmTransaction::new(&mock, "ghost", TransactionOptions::default());
        assert!(matches!(
            txn.initialize(),
            Err(TransactionError::Hypervisor(_))
        ));
        assert_eq!(txn.stage(), TransactionStage::Uninitialized);
    }

    #[test]
    fn selector_frozen_after_prepare() {
        let mock = mock_with_domain();
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());

        txn.set_selector(|_: &DiskDescriptor| true).unwrap();
        txn.initialize().unwrap();
        txn.set_selector(|_: &DiskDescriptor| false).unwrap();
        txn.prepare().unwrap();
        assert!(matches!(
            txn.set_selector(|_: &DiskDescriptor| true),
            Err(TransactionError::StageRange { .. })
        ));
    }

    #[test]
    fn custom_selector_excludes_disks() {
        let mock = mock_with_domain();
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());
        txn.set_selector(|_: &DiskDescriptor| false).unwrap();
        txn.initialize().unwrap();
        txn.prepare().unwrap();
        assert!(txn.snapshot_disks().unwrap().is_empty());
    }

    #[test]
    fn disk_only_false_without_workdir_stays_initialized() {
        let mock = mock_with_domain();
        let options = TransactionOptions {
            disk_only: false,
            ..TransactionOptions::default()
        };
        let mut txn = VmTransaction::new(&mock, "vm1", options);
        txn.initialize().unwrap();
        assert!(matches!(txn.prepare(), Err(TransactionError::Config(_))));
        assert_eq!(txn.stage(), TransactionStage::Initialized);
    }

    #[test]
    fn begin_failure_is_absorbing() {
        let mock = mock_with_domain();
        mock.fail_next_snapshot("vm1", "no space");
        let mut txn = VmTransaction::new(&mock, "vm1", TransactionOptions::default());
        txn.initialize().unwrap();
        txn.prepare().unwrap();

        assert!(matches!(
            txn.begin(),
            Err(TransactionError::Hypervisor(_))
        ));
        assert_eq!(txn.stage(), TransactionStage::Failed);

        // Failed is absorbing: nothing but stage() works anymore.
        assert!(txn.begin().is_err());
        assert!(txn.commit().is_err());
        assert!(txn.snapshot_disks().is_err());
        assert_eq!(txn.stage(), TransactionStage::Failed);
    }
}
