// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Operational command line for extent-backed layer devices.
//!
//! Every invocation replays the persisted catalogue against the backing
//! device, performs one operation, and flushes the catalogue back.

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};

use layerdev::{
    driveropts::parse_ram_bytes,
    result::LayerResult,
    DmTool, DM,
};

#[derive(Parser)]
#[command(name = "layerdev", version, about = "Manage extent-backed device-mapper layer devices")]
struct Cli {
    /// Backing block device
    #[arg(long)]
    devname: PathBuf,

    /// Extent size as a human-readable value, e.g. 4M
    #[arg(long, default_value = "4M")]
    extentsize: String,

    /// Path of the persisted device catalogue
    #[arg(long, default_value = "dmtool.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty device with a placeholder mapping
    Create {
        /// Device name
        name: String,
    },
    /// Grow a device to hold at least the given size, e.g. 40M
    Resize {
        /// Device name
        name: String,
        /// Requested size
        size: String,
    },
    /// Remove a device and free its extents
    Delete {
        /// Device name
        name: String,
    },
    /// List catalogued devices
    List,
    /// Re-establish kernel mappings and rewrite the catalogue
    Flush,
}

fn run(cli: Cli) -> LayerResult<()> {
    let extent_size = parse_ram_bytes(&cli.extentsize)?;

    let dm = DM::new()?;
    let mut tool = DmTool::setup(&dm, &cli.devname, extent_size, &cli.state)?;

    match cli.command {
        Commands::Create { name } => {
            tool.create_device(&dm, &name)?;
            tool.flush()?;
        }
        Commands::Resize { name, size } => {
            tool.resize_device(&dm, &name, parse_ram_bytes(&size)?)?;
            tool.flush()?;
        }
        Commands::Delete { name } => {
            tool.delete_device(&dm, &name)?;
            tool.flush()?;
        }
        Commands::List => {
            for (name, device) in tool.devices() {
                println!(
                    "{}\t{}\treadonly={}\tfstype={}\ttargets={:?}",
                    name,
                    device.extents(),
                    device.readonly(),
                    device.fs_type(),
                    device.targets(),
                );
            }
        }
        Commands::Flush => tool.cleanup()?,
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("layerdev: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
