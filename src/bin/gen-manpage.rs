//! Man pages for the partman partition layout resolver
//!
//! Writes `partman.1` for the tool itself and one `partman-<command>.1`
//! page for each subcommand: `resolve` places the partitions of one or more
//! `--region name,size=...,placement_strategy=...` regions and `show` prints
//! a resolved layout.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn write_page(dir: &Path, page: &str, man: clap_mangen::Man) -> std::io::Result<PathBuf> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    let path = dir.join(format!("{}.1", page));
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let mut pages = vec![write_page(
        &output_dir,
        "partman",
        clap_mangen::Man::new(cmd.clone()),
    )?];
    for sub in cmd.get_subcommands() {
        let page = format!("partman-{}", sub.get_name());
        let man = clap_mangen::Man::new(sub.clone()).title(page.to_uppercase());
        pages.push(write_page(&output_dir, &page, man)?);
    }

    println!("Partition layout resolver man pages:");
    for path in &pages {
        println!("  {}", path.display());
    }
    println!("\nTo view the resolve page:");
    println!("  man -l {}", output_dir.join("partman-resolve.1").display());

    Ok(())
}
