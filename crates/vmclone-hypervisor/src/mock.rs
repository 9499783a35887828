//! Deterministic in-process hypervisor for tests and dry runs.
//!
//! Domains are defined up front with their JSON document; block-job progress
//! is scripted per device as a queue of status reports that
//! `block_job_status` drains in order (an exhausted queue reads as "no
//! job"). Every trait call is recorded in a typed log so tests can assert
//! exact call sequences.

use crate::client::{BlockCommitFlags, BlockJobStatus, HypervisorClient};
use crate::HypervisorError;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use vmclone_schema::{SnapshotDescriptor, SnapshotFlags};

/// One recorded trait call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Describe {
        domain: String,
    },
    CreateSnapshot {
        domain: String,
        flags: SnapshotFlags,
        delta_paths: Vec<PathBuf>,
    },
    StartBlockCommit {
        domain: String,
        device: String,
        top: PathBuf,
        bandwidth_kib: u64,
        flags: BlockCommitFlags,
    },
    BlockJobStatus {
        domain: String,
        device: String,
    },
    AbortBlockJob {
        domain: String,
        device: String,
        pivot: bool,
    },
    IsActive {
        domain: String,
    },
}

#[derive(Debug, Default)]
struct MockDomain {
    document: String,
    active: bool,
    jobs: HashMap<String, VecDeque<Option<BlockJobStatus>>>,
    fail_next_snapshot: Option<String>,
    fail_next_commit: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    domains: HashMap<String, MockDomain>,
    calls: Vec<MockCall>,
}

#[derive(Debug, Default)]
pub struct MockHypervisor {
    state: Mutex<MockState>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a domain with its JSON document; inactive until
    /// [`set_active`](Self::set_active).
    pub fn define_domain(&self, name: &str, document: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let domain = state.domains.entry(name.to_owned()).or_default();
        domain.document = document.to_owned();
    }

    pub fn set_active(&self, name: &str, active: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.domains.entry(name.to_owned()).or_default().active = active;
    }

    /// Append one scripted status report to a device's block-job queue.
    /// `None` reads as "no job running".
    pub fn script_job_status(&self, domain: &str, device: &str, status: Option<BlockJobStatus>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .domains
            .entry(domain.to_owned())
            .or_default()
            .jobs
            .entry(device.to_owned())
            .or_default()
            .push_back(status);
    }

    /// Make the next `create_snapshot` on this domain fail with `reason`.
    pub fn fail_next_snapshot(&self, domain: &str, reason: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .domains
            .entry(domain.to_owned())
            .or_default()
            .fail_next_snapshot = Some(reason.to_owned());
    }

    /// Make the next `start_block_commit` on this domain fail with `reason`.
    pub fn fail_next_commit(&self, domain: &str, reason: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .domains
            .entry(domain.to_owned())
            .or_default()
            .fail_next_commit = Some(reason.to_owned());
    }

    /// Snapshot of the recorded call log.
    pub fn calls(&self) -> Vec<MockCall> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.clone()
    }

    fn with_domain<T>(
        &self,
        domain: &str,
        call: MockCall,
        f: impl FnOnce(&mut MockDomain) -> Result<T, HypervisorError>,
    ) -> Result<T, HypervisorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| HypervisorError::Provider(format!("mutex poisoned: {e}")))?;
        state.calls.push(call);
        let entry = state
            .domains
            .get_mut(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_owned()))?;
        f(entry)
    }
}

impl HypervisorClient for MockHypervisor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn describe(&self, domain: &str) -> Result<String, HypervisorError> {
        self.with_domain(
            domain,
            MockCall::Describe {
                domain: domain.to_owned(),
            },
            |d| Ok(d.document.clone()),
        )
    }

    fn create_snapshot(
        &self,
        domain: &str,
        descriptor: &SnapshotDescriptor,
        flags: SnapshotFlags,
    ) -> Result<(), HypervisorError> {
        let call = MockCall::CreateSnapshot {
            domain: domain.to_owned(),
            flags,
            delta_paths: descriptor.deltas.iter().map(|d| d.delta_path.clone()).collect(),
        };
        self.with_domain(domain, call, |d| {
            if let Some(reason) = d.fail_next_snapshot.take() {
                return Err(HypervisorError::Provider(reason));
            }
            debug!("mock snapshot created for domain {domain}");
            Ok(())
        })
    }

    fn start_block_commit(
        &self,
        domain: &str,
        device: &str,
        _base: Option<&Path>,
        top: &Path,
        bandwidth_kib: u64,
        flags: BlockCommitFlags,
    ) -> Result<(), HypervisorError> {
        let call = MockCall::StartBlockCommit {
            domain: domain.to_owned(),
            device: device.to_owned(),
            top: top.to_path_buf(),
            bandwidth_kib,
            flags,
        };
        self.with_domain(domain, call, |d| {
            if let Some(reason) = d.fail_next_commit.take() {
                return Err(HypervisorError::Provider(reason));
            }
            debug!("mock block commit started on {domain}/{device}");
            Ok(())
        })
    }

    fn block_job_status(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<BlockJobStatus>, HypervisorError> {
        let call = MockCall::BlockJobStatus {
            domain: domain.to_owned(),
            device: device.to_owned(),
        };
        self.with_domain(domain, call, |d| {
            let status = d
                .jobs
                .get_mut(device)
                .and_then(VecDeque::pop_front)
                .flatten();
            Ok(status)
        })
    }

    fn abort_block_job(
        &self,
        domain: &str,
        device: &str,
        pivot: bool,
    ) -> Result<(), HypervisorError> {
        let call = MockCall::AbortBlockJob {
            domain: domain.to_owned(),
            device: device.to_owned(),
            pivot,
        };
        self.with_domain(domain, call, |d| {
            d.jobs.remove(device);
            Ok(())
        })
    }

    fn is_active(&self, domain: &str) -> Result<bool, HypervisorError> {
        self.with_domain(
            domain,
            MockCall::IsActive {
                domain: domain.to_owned(),
            },
            |d| Ok(d.active),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{ "name": "vm1", "disks": [] }"#;

    #[test]
    fn describe_returns_defined_document() {
        let mock = MockHypervisor::new();
        mock.define_domain("vm1", DOC);
        assert_eq!(mock.describe("vm1").unwrap(), DOC);
    }

    #[test]
    fn describe_unknown_domain_fails() {
        let mock = MockHypervisor::new();
        let err = mock.describe("ghost").unwrap_err();
        assert!(matches!(err, HypervisorError::DomainNotFound(d) if d == "ghost"));
    }

    #[test]
    fn job_queue_drains_in_order_then_reads_empty() {
        let mock = MockHypervisor::new();
        mock.define_domain("vm1", DOC);
        mock.script_job_status("vm1", "vda", Some(BlockJobStatus { current: 5, end: 10 }));
        mock.script_job_status("vm1", "vda", Some(BlockJobStatus { current: 10, end: 10 }));

        assert_eq!(
            mock.block_job_status("vm1", "vda").unwrap(),
            Some(BlockJobStatus { current: 5, end: 10 })
        );
        assert_eq!(
            mock.block_job_status("vm1", "vda").unwrap(),
            Some(BlockJobStatus { current: 10, end: 10 })
        );
        assert_eq!(mock.block_job_status("vm1", "vda").unwrap(), None);
    }

    #[test]
    fn injected_snapshot_failure_fires_once() {
        let mock = MockHypervisor::new();
        mock.define_domain("vm1", DOC);
        mock.fail_next_snapshot("vm1", "no space");

        let descriptor = SnapshotDescriptor {
            name: "vmclone".to_owned(),
            description: "vmclone".to_owned(),
            memory: vmclone_schema::MemoryCapture::None,
            deltas: Vec::new(),
        };
        let err = mock
            .create_snapshot("vm1", &descriptor, SnapshotFlags::default())
            .unwrap_err();
        assert!(matches!(err, HypervisorError::Provider(r) if r == "no space"));

        mock.create_snapshot("vm1", &descriptor, SnapshotFlags::default())
            .unwrap();
    }

    #[test]
    fn calls_are_recorded_in_order() {
        let mock = MockHypervisor::new();
        mock.define_domain("vm1", DOC);
        mock.set_active("vm1", true);

        let _ = mock.describe("vm1");
        let _ = mock.is_active("vm1");
        let calls = mock.calls();
        assert_eq!(
            calls,
            vec![
                MockCall::Describe {
                    domain: "vm1".to_owned()
                },
                MockCall::IsActive {
                    domain: "vm1".to_owned()
                },
            ]
        );
    }
}
