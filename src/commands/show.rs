//! Show command implementation

use partman_core::layout::ResolvedLayout;
use std::fs;
use std::path::Path;

/// Show a resolved layout file
pub fn cmd_show(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let layout = ResolvedLayout::from_toml_str(&content)?;
    super::resolve::print_layout(&layout);
    Ok(())
}
