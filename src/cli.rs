//! CLI argument parsing

use clap::{Parser, Subcommand};
use partman_core::layout::RegionConfig;
use std::path::PathBuf;

/// Parse `name,size=...,base_address=...,placement_strategy=...,device=...`
fn parse_region(s: &str) -> Result<RegionConfig, String> {
    s.parse::<RegionConfig>().map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "partman")]
#[command(author, version, about = "Partition layout resolver", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve partition requirements into absolute addresses
    Resolve {
        /// Requirement document (TOML), may be given several times
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Static configuration: partitions with a fixed address and size
        #[arg(short, long)]
        static_config: Option<PathBuf>,

        /// Region to place partitions in, may be given several times
        /// (e.g. flash_primary,size=0x100000,placement_strategy=complex)
        #[arg(short, long, required = true, value_parser = parse_region)]
        region: Vec<RegionConfig>,

        /// Write the resolved layout to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a resolved layout file
    Show {
        /// Resolved layout file (TOML)
        file: PathBuf,
    },
}
