use super::{json_pretty, EXIT_SUCCESS};
use console::Style;
use std::path::PathBuf;
use vmclone_core::{TransactionOptions, VmTransaction};
use vmclone_hypervisor::{select_client, HypervisorClient};
use vmclone_schema::SourceKind;

pub fn run(
    connect: &str,
    domain: &str,
    disk_only: bool,
    quiesce: bool,
    workdir: Option<PathBuf>,
    json: bool,
) -> Result<u8, String> {
    let client = select_client(connect).map_err(|e| e.to_string())?;
    let options = TransactionOptions {
        workdir,
        disk_only,
        quiesce,
        ..TransactionOptions::default()
    };
    print_plan(client.as_ref(), domain, options, json)
}

/// Initialize and prepare only: report the frozen selection without taking
/// a snapshot. Also backs `clone --dry-run`.
pub fn print_plan(
    client: &dyn HypervisorClient,
    domain: &str,
    options: TransactionOptions,
    json: bool,
) -> Result<u8, String> {
    let mut txn = VmTransaction::new(client, domain, options);
    txn.initialize().map_err(|e| e.to_string())?;
    txn.prepare().map_err(|e| e.to_string())?;

    let name = txn.domain_name().map_err(|e| e.to_string())?;
    let disks = txn.snapshot_disks().map_err(|e| e.to_string())?;
    let descriptor = txn.snapshot_descriptor().map_err(|e| e.to_string())?;
    let flags = txn.snapshot_flags().map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "domain": name,
            "disks": disks,
            "deltas": descriptor.deltas,
            "flags": flags,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    if disks.is_empty() {
        println!("no disks selected for domain {name}");
    } else {
        let header = Style::new().bold();
        println!(
            "{}",
            header.apply_to(format!("{:<8} {:<7} {:<36} DELTA", "DEVICE", "KIND", "SOURCE"))
        );
        for (disk, delta) in disks.iter().zip(&descriptor.deltas) {
            println!(
                "{:<8} {:<7} {:<36} {}",
                disk.device,
                kind_str(&disk.source_kind),
                disk.source.display(),
                delta.delta_path.display()
            );
        }
    }

    let mut flag_names = vec!["atomic", "no-metadata"];
    if flags.disk_only {
        flag_names.push("disk-only");
    }
    if flags.quiesce {
        flag_names.push("quiesce");
    }
    println!(
        "{}",
        Style::new()
            .dim()
            .apply_to(format!("flags: {}", flag_names.join(" ")))
    );

    Ok(EXIT_SUCCESS)
}

fn kind_str(kind: &SourceKind) -> &str {
    match kind {
        SourceKind::File => "file",
        SourceKind::Block => "block",
        SourceKind::Other(other) => other,
    }
}
