use crate::utils::{format_size, registry_source};
use berth_disk::{final_disk_path, get_disk};
use berth_machine::{MachineDirs, VmType};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum DiskCommands {
    /// Fetch a boot disk without creating a machine
    Pull {
        /// Machine the disk is named after
        #[arg(default_value = "berth-machine-default")]
        name: String,

        /// OCI reference, http(s) URL or local file; defaults to the release image
        #[arg(long, default_value = "")]
        image: String,

        /// Write the disk here instead of the machine data directory
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

pub async fn handle_disk_command(
    dirs: &MachineDirs,
    vm_type: VmType,
    insecure: bool,
    cmd: DiskCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        DiskCommands::Pull {
            name,
            image,
            output,
        } => {
            dirs.create_all().await?;
            let final_path = match output {
                Some(path) => path,
                None => final_disk_path(dirs, &name, vm_type)?,
            };

            get_disk(&image, dirs, &final_path, vm_type, registry_source(insecure)?).await?;
            print_disk(&final_path).await?;
        }
    }

    Ok(())
}

pub async fn handle_decompress(src: &Path, dst: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || berth_compress::decompress(&from, &to)).await??;
    print_disk(dst).await
}

async fn print_disk(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let size = tokio::fs::metadata(path).await?.len();
    println!("{} ({})", path.display(), format_size(size));
    Ok(())
}
