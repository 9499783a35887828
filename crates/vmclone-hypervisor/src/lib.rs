//! Hypervisor client abstraction for vmclone.
//!
//! The transaction core consumes hypervisors through the object-safe
//! [`HypervisorClient`] trait: describe a domain, create an external
//! snapshot, drive block-commit jobs. A concrete binding (libvirt socket,
//! remote management protocol) is an external crate that slots into
//! [`select_client`]; this crate ships the trait and a deterministic
//! [`MockHypervisor`] sufficient to exercise the whole transaction without a
//! live system.

pub mod client;
pub mod mock;

pub use client::{select_client, BlockCommitFlags, BlockJobStatus, HypervisorClient};
pub use mock::{MockCall, MockHypervisor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("hypervisor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client '{0}' is not available in this build")]
    ClientUnavailable(String),
    #[error("domain '{0}' is not known to the hypervisor")]
    DomainNotFound(String),
    #[error("hypervisor operation failed: {0}")]
    Provider(String),
}
