mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::clone::CloneOptions;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_LOCK_BUSY};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "vmclone",
    version,
    about = "Live snapshot-based cloning of virtual machine disks"
)]
struct Cli {
    /// URI of the hypervisor to connect to.
    #[arg(short = 'c', long, default_value = "qemu:///system", global = true)]
    connect: String,

    /// Directory for per-domain advisory locks.
    #[arg(long, default_value = "~/.local/state/vmclone", global = true)]
    lockdir: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Increase logging verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Snapshot a domain's disks and copy the base images into a directory.
    Clone {
        /// Name of the domain.
        domain: String,
        /// Target directory used to store the backup.
        destdir: PathBuf,
        /// Save the disk state only; no memory state is preserved.
        #[arg(long, default_value_t = false)]
        disk_only: bool,
        /// Ask the guest to flush filesystem buffers before the snapshot.
        #[arg(long, default_value_t = false)]
        quiesce: bool,
        /// Working directory for delta and memory-state files.
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Overwrite existing files in the destination directory.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Print the clone plan without touching the domain.
        #[arg(short = 'n', long, default_value_t = false)]
        dry_run: bool,
        /// Give up on a block job after this many seconds.
        #[arg(long, value_name = "SECONDS")]
        poll_deadline: Option<u64>,
    },
    /// Show which disks would be selected and where deltas would be staged.
    Plan {
        /// Name of the domain.
        domain: String,
        /// Save the disk state only; no memory state is preserved.
        #[arg(long, default_value_t = false)]
        disk_only: bool,
        /// Ask the guest to flush filesystem buffers before the snapshot.
        #[arg(long, default_value_t = false)]
        quiesce: bool,
        /// Working directory for delta and memory-state files.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VMCLONE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let lockdir = expand_tilde(&cli.lockdir);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Clone {
            domain,
            destdir,
            disk_only,
            quiesce,
            workdir,
            overwrite,
            dry_run,
            poll_deadline,
        } => commands::clone::run(
            &cli.connect,
            &lockdir,
            &domain,
            &destdir,
            &CloneOptions {
                disk_only,
                quiesce,
                workdir,
                overwrite,
                dry_run,
                poll_deadline,
            },
            json_output,
        ),
        Commands::Plan {
            domain,
            disk_only,
            quiesce,
            workdir,
        } => commands::plan::run(
            &cli.connect,
            &domain,
            disk_only,
            quiesce,
            workdir,
            json_output,
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("configuration error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("domain lock:") {
                EXIT_LOCK_BUSY
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
