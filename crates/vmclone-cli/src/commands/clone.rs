use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use vmclone_core::{run_scoped, DomainLock, TransactionError, TransactionOptions};
use vmclone_hypervisor::select_client;
use vmclone_schema::{SnapshotDisk, SourceKind};

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub disk_only: bool,
    pub quiesce: bool,
    pub workdir: Option<PathBuf>,
    pub overwrite: bool,
    pub dry_run: bool,
    pub poll_deadline: Option<u64>,
}

pub fn run(
    connect: &str,
    lockdir: &Path,
    domain: &str,
    destdir: &Path,
    options: &CloneOptions,
    json: bool,
) -> Result<u8, String> {
    let client = select_client(connect).map_err(|e| e.to_string())?;

    let txn_options = TransactionOptions {
        workdir: options.workdir.clone(),
        disk_only: options.disk_only,
        quiesce: options.quiesce,
        poll_deadline: options.poll_deadline.map(Duration::from_secs),
        ..TransactionOptions::default()
    };

    if options.dry_run {
        return super::plan::print_plan(client.as_ref(), domain, txn_options, json);
    }

    let _lock =
        DomainLock::try_acquire(lockdir, domain).map_err(|e| format!("domain lock: {e}"))?;

    info!("cloning domain {domain} into {}", destdir.display());
    let pb = if json {
        None
    } else {
        Some(spinner("cloning domain..."))
    };

    let overwrite = options.overwrite;
    let result = run_scoped(client.as_ref(), domain, txn_options, |txn| {
        let mut copied = Vec::new();
        for disk in txn.snapshot_disks()? {
            let dest = destdir.join(backup_filename(disk));
            copy_disk(disk, &dest, overwrite)?;
            copied.push((disk.device.to_string(), dest));
        }
        Ok(copied)
    });

    match result {
        Ok(copied) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "clone finished");
            }
            if json {
                let disks: Vec<serde_json::Value> = copied
                    .iter()
                    .map(|(device, dest)| {
                        serde_json::json!({ "device": device, "backup": dest })
                    })
                    .collect();
                let payload = serde_json::json!({ "domain": domain, "disks": disks });
                println!("{}", json_pretty(&payload)?);
            } else {
                for (device, dest) in &copied {
                    println!("copied {device} to {}", dest.display());
                }
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e @ TransactionError::Cleanup { .. }) => {
            // The commit itself succeeded; only delta-file deletion failed.
            if let Some(ref pb) = pb {
                spin_fail(pb, "clone finished, cleanup incomplete");
            }
            Err(e.to_string())
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "clone failed");
            }
            Err(e.to_string())
        }
    }
}

/// Backup filename for a disk: block sources become `<device>.img`, file
/// sources keep their original extension as `<device><ext>`.
fn backup_filename(disk: &SnapshotDisk) -> String {
    match disk.source_kind {
        SourceKind::Block => format!("{}.img", disk.device),
        _ => match disk.source.extension() {
            Some(ext) => format!("{}.{}", disk.device, ext.to_string_lossy()),
            None => disk.device.to_string(),
        },
    }
}

fn copy_disk(disk: &SnapshotDisk, dest: &Path, overwrite: bool) -> Result<(), TransactionError> {
    match disk.source_kind {
        SourceKind::Block => copy_block(&disk.source, dest),
        _ => copy_file(&disk.source, dest, overwrite),
    }
}

/// Convert a block-backed source into a sparse qcow2 image.
fn copy_block(source: &Path, dest: &Path) -> Result<(), TransactionError> {
    let mut cmd = Command::new("qemu-img");
    cmd.args(["convert", "-f", "raw", "-O", "qcow2", "-S", "4k"])
        .arg(source)
        .arg(dest);
    debug!(
        "executing qemu-img convert {} -> {}",
        source.display(),
        dest.display()
    );
    run_command(&mut cmd)
}

/// Sparse-preserving copy of a file-backed source.
fn copy_file(source: &Path, dest: &Path, overwrite: bool) -> Result<(), TransactionError> {
    if !overwrite && dest.exists() {
        return Err(TransactionError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dest.display()),
        )));
    }

    let mut cmd = Command::new("cp");
    cmd.arg("--sparse=auto");
    if !overwrite {
        cmd.arg("--no-clobber");
    }
    cmd.arg(source).arg(dest);
    debug!("executing cp {} -> {}", source.display(), dest.display());
    run_command(&mut cmd)
}

fn run_command(cmd: &mut Command) -> Result<(), TransactionError> {
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        let program = cmd.get_program().to_string_lossy().into_owned();
        Err(TransactionError::Io(std::io::Error::other(format!(
            "{program} exited with {status}"
        ))))
    }
}
