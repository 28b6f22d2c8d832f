//! partman - Partition layout resolver
//!
//! Reads partition requirement documents, places every partition inside the
//! regions given on the command line and writes the resolved layout.
//!
//! ```text
//! partman resolve -i pm.toml -i pm_mcuboot.toml \
//!     -r flash_primary,size=0x100000,placement_strategy=complex \
//!     -r sram_primary,base_address=0x20000000,size=0x40000,placement_strategy=end_to_start \
//!     -o partitions.toml
//! partman show partitions.toml
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Resolve {
            input,
            static_config,
            region,
            output,
        } => commands::resolve::cmd_resolve(
            &input,
            static_config.as_deref(),
            &region,
            output.as_deref(),
        ),
        Commands::Show { file } => commands::show::cmd_show(&file),
    }
}
