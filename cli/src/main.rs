mod commands;
mod utils;

use berth_machine::VmType;
use clap::{Parser, Subcommand};
use commands::{
    DiskCommands, InitArgs, PortsCommands, handle_decompress, handle_disk_command, handle_init,
    handle_ports_command,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Berth - set up and manage local container VMs")]
struct Cli {
    /// Keep all machine state under this directory instead of the user defaults
    #[arg(long, global = true, env = "BERTH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Hypervisor the machine runs on
    #[arg(long, global = true, default_value = "qemu")]
    vm_type: VmType,

    /// Talk plain http to image registries
    #[arg(long, global = true, env = "BERTH_REGISTRY_INSECURE")]
    insecure_registry: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a boot disk and write a new machine's configuration
    Init(InitArgs),
    /// Manage SSH port reservations
    #[command(subcommand)]
    Ports(PortsCommands),
    /// Manage machine boot disks
    #[command(subcommand)]
    Disk(DiskCommands),
    /// Decompress a disk image into a sparse file
    Decompress {
        /// Compressed image
        src: PathBuf,
        /// Destination file
        dst: PathBuf,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let dirs = utils::machine_dirs(cli.data_dir.as_deref(), cli.vm_type)?;

    match cli.command {
        Commands::Init(args) => {
            handle_init(&dirs, cli.vm_type, cli.insecure_registry, args).await?;
        }
        Commands::Ports(cmd) => {
            handle_ports_command(&dirs, cmd).await?;
        }
        Commands::Disk(cmd) => {
            handle_disk_command(&dirs, cli.vm_type, cli.insecure_registry, cmd).await?;
        }
        Commands::Decompress { src, dst } => {
            handle_decompress(&src, &dst).await?;
        }
    }

    Ok(())
}
