//! Resolve command implementation

use partman_core::layout::{resolve_all, RegionConfig, Requirements, ResolvedLayout};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolve requirement documents into a layout
///
/// Every input document is merged into one set of requirements. Without an
/// output file the layout is printed as TOML after the summary table.
pub fn cmd_resolve(
    inputs: &[PathBuf],
    static_config: Option<&Path>,
    regions: &[RegionConfig],
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        let content = fs::read_to_string(input)
            .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
        documents.push((input.display().to_string(), content));
    }
    let reqs = Requirements::merge_documents(
        documents
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str())),
    )?;
    log::info!(
        "Loaded {} partitions from {} documents",
        reqs.len(),
        documents.len()
    );

    let statics = match static_config {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            let statics =
                Requirements::merge_documents([(path.display().to_string().as_str(), content.as_str())])?;
            log::info!("Loaded {} static partitions", statics.len());
            statics
        }
        None => Requirements::new(),
    };

    let layout = resolve_all(reqs, statics, regions)?;
    print_layout(&layout);

    let text = layout.to_toml_string();
    if let Some(out) = output {
        fs::write(out, &text)?;
        println!("\nSaved layout to {:?}", out);
    } else {
        println!("\n--- TOML Output ---\n");
        print!("{}", text);
    }

    Ok(())
}

/// Print the resolved partitions region by region
pub fn print_layout(layout: &ResolvedLayout) {
    println!("Partition Layout");
    println!("================");

    for (name, region) in &layout.regions {
        println!(
            "\n{} ({}, {:#010X}, {}):",
            name,
            region.placement_strategy,
            region.base_address,
            super::format_size(region.size)
        );
        println!(
            "{:<24} {:>10} {:>10} {:>10} {:>16}",
            "Name", "Start", "End", "Size", "Device"
        );
        println!("{:-<74}", "");

        for (partition_name, p) in layout.region_partitions(name) {
            let label = if p.is_container() {
                format!("{} *", partition_name)
            } else {
                partition_name.clone()
            };
            println!(
                "{:<24} {:#010X} {:#010X} {:>10} {:>16}",
                label,
                p.address,
                p.end_address,
                super::format_size(p.size),
                p.device.as_deref().unwrap_or("-")
            );
        }
    }

    if layout.partitions.values().any(|p| p.is_container()) {
        println!("\n* container spanning other partitions");
    }
}
