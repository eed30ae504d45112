use berth_machine::MachineDirs;
use berth_ports::{PortAllocator, is_locally_available};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum PortsCommands {
    /// Reserve a free local port
    Allocate,
    /// Drop a port from the reservation set
    Release {
        port: u16,
    },
    /// Check whether a port can be bound on 127.0.0.1
    Check {
        port: u16,
    },
    /// List reserved ports
    #[command(name = "list", visible_alias = "ls")]
    List,
}

pub async fn handle_ports_command(
    dirs: &MachineDirs,
    cmd: PortsCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let allocator = PortAllocator::new(&dirs.global_data_dir);

    match cmd {
        PortsCommands::Allocate => {
            let port = tokio::task::spawn_blocking(move || allocator.allocate()).await??;
            println!("{}", port);
        }
        PortsCommands::Release { port } => {
            tokio::task::spawn_blocking(move || allocator.release(port)).await??;
        }
        PortsCommands::Check { port } => {
            if is_locally_available(port) {
                println!("{} is available", port);
            } else {
                return Err(format!("{} is in use", port).into());
            }
        }
        PortsCommands::List => {
            let ports = tokio::task::spawn_blocking(move || allocator.reserved()).await??;
            if ports.is_empty() {
                println!("No reserved ports");
            }
            for port in ports {
                let state = if is_locally_available(port) {
                    "free"
                } else {
                    "in use"
                };
                println!("{:<8} {}", port, state);
            }
        }
    }

    Ok(())
}
