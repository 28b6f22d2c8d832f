//! CLI command implementations
//!
//! The binary only does file I/O and printing; all layout work happens in
//! `partman_core`.

pub mod resolve;
pub mod show;

/// Format a byte count for display
fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0x100000), "1 MiB");
        assert_eq!(format_size(0xc000), "48 KiB");
        assert_eq!(format_size(0x200), "512 B");
        assert_eq!(format_size(0x1800), "6 KiB");
        assert_eq!(format_size(0x1801), "6145 B");
    }
}
