pub mod disk;
pub mod init;
pub mod ports;

pub use disk::{DiskCommands, handle_decompress, handle_disk_command};
pub use init::{InitArgs, handle_init};
pub use ports::{PortsCommands, handle_ports_command};
