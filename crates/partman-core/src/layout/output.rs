//! Resolved layout
//!
//! The result of [`resolve_all`](super::resolve_all): every placed partition
//! with its absolute address, and the regions it was placed in. Written as
//! TOML with hexadecimal numbers:
//!
//! ```toml
//! [partitions.mcuboot]
//! address = 0x00000000
//! end_address = 0x0000C000
//! size = 0x0000C000
//! region = "flash_primary"
//! ```

use indexmap::IndexMap;
use serde::Deserialize;

use super::toml::deserialize_hex_u64;
use super::{Partition, RegionConfig};
use crate::error::{PartitionError, Result};

/// A placed partition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolvedPartition {
    /// First byte
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub address: u64,
    /// One past the last byte
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub end_address: u64,
    /// Size in bytes
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub size: u64,
    /// Region the partition was placed in
    pub region: String,
    /// Driver name inherited from the region
    #[serde(default)]
    pub device: Option<String>,
    /// Members, for containers
    #[serde(default)]
    pub span: Option<Vec<String>>,
}

impl ResolvedPartition {
    /// Snapshot a partition, `None` until it has an address and a size
    pub fn from_partition(partition: &Partition) -> Option<Self> {
        let address = partition.address?;
        let size = partition.size?;
        Some(Self {
            address,
            end_address: address + size,
            size,
            region: partition.region.clone(),
            device: partition.device.clone(),
            span: partition
                .span
                .as_ref()
                .map(|_| partition.span_names().map(str::to_string).collect()),
        })
    }

    /// True for container partitions
    pub fn is_container(&self) -> bool {
        self.span.is_some()
    }
}

/// Every resolved partition and the regions they live in
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolvedLayout {
    /// Placed partitions, region by region
    #[serde(default)]
    pub partitions: IndexMap<String, ResolvedPartition>,
    /// Regions in declaration order
    #[serde(default)]
    pub regions: IndexMap<String, RegionConfig>,
}

fn key(name: &str) -> String {
    let bare = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        name.to_string()
    } else {
        string(name)
    }
}

fn string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn hex(value: u64) -> String {
    format!("0x{:08X}", value)
}

impl ResolvedLayout {
    /// Partitions of one region, in resolution order
    pub fn region_partitions<'a>(
        &'a self,
        region: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ResolvedPartition)> + 'a {
        self.partitions.iter().filter(move |(_, p)| p.region == region)
    }

    /// Render as TOML, addresses and sizes in hexadecimal
    pub fn to_toml_string(&self) -> String {
        let mut out = String::new();

        for (name, p) in &self.partitions {
            out.push_str(&format!("[partitions.{}]\n", key(name)));
            out.push_str(&format!("address = {}\n", hex(p.address)));
            out.push_str(&format!("end_address = {}\n", hex(p.end_address)));
            out.push_str(&format!("size = {}\n", hex(p.size)));
            out.push_str(&format!("region = {}\n", string(&p.region)));
            if let Some(device) = &p.device {
                out.push_str(&format!("device = {}\n", string(device)));
            }
            if let Some(span) = &p.span {
                let members: Vec<String> = span.iter().map(|m| string(m)).collect();
                out.push_str(&format!("span = [{}]\n", members.join(", ")));
            }
            out.push('\n');
        }

        for (name, r) in &self.regions {
            out.push_str(&format!("[regions.{}]\n", key(name)));
            out.push_str(&format!("name = {}\n", string(&r.name)));
            out.push_str(&format!("base_address = {}\n", hex(r.base_address)));
            out.push_str(&format!("size = {}\n", hex(r.size)));
            out.push_str(&format!(
                "placement_strategy = {}\n",
                string(r.placement_strategy.as_str())
            ));
            if let Some(device) = &r.device {
                out.push_str(&format!("device = {}\n", string(device)));
            }
            if let Some(dp) = &r.dynamic_partition {
                out.push_str(&format!("dynamic_partition = {}\n", string(dp)));
            }
            out.push('\n');
        }

        out
    }

    /// Load a layout written by [`to_toml_string`](Self::to_toml_string)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PartitionError::Parse {
            source_name: "resolved layout".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PlacementStrategy, DEFAULT_REGION};

    fn sample() -> ResolvedLayout {
        let mut layout = ResolvedLayout::default();
        layout.partitions.insert(
            "mcuboot".into(),
            ResolvedPartition {
                address: 0,
                end_address: 0xc000,
                size: 0xc000,
                region: DEFAULT_REGION.into(),
                device: Some("flash_ctrl".into()),
                span: None,
            },
        );
        layout.partitions.insert(
            "mcuboot_primary".into(),
            ResolvedPartition {
                address: 0xc000,
                end_address: 0x80000,
                size: 0x74000,
                region: DEFAULT_REGION.into(),
                device: None,
                span: Some(vec!["mcuboot_pad".into(), "app".into()]),
            },
        );
        layout.partitions.insert(
            "odd.name".into(),
            ResolvedPartition {
                address: 0x80000,
                end_address: 0x80000,
                size: 0,
                region: DEFAULT_REGION.into(),
                device: None,
                span: None,
            },
        );
        layout.regions.insert(
            DEFAULT_REGION.into(),
            RegionConfig::complex(DEFAULT_REGION, 0x100000).with_device("flash_ctrl"),
        );
        layout
    }

    #[test]
    fn test_to_toml_string() {
        let text = sample().to_toml_string();
        assert!(text.starts_with(
            "[partitions.mcuboot]\n\
             address = 0x00000000\n\
             end_address = 0x0000C000\n\
             size = 0x0000C000\n\
             region = \"flash_primary\"\n\
             device = \"flash_ctrl\"\n"
        ));
        assert!(text.contains("span = [\"mcuboot_pad\", \"app\"]\n"));
        assert!(text.contains("[partitions.\"odd.name\"]\n"));
        assert!(text.contains("[regions.flash_primary]\n"));
        assert!(text.contains("placement_strategy = \"complex\"\n"));
    }

    #[test]
    fn test_written_layout_loads_back() {
        let layout = sample();
        let loaded = ResolvedLayout::from_toml_str(&layout.to_toml_string()).unwrap();
        assert_eq!(loaded, layout);
        assert_eq!(
            loaded.regions[DEFAULT_REGION].placement_strategy,
            PlacementStrategy::Complex
        );
    }

    #[test]
    fn test_from_partition() {
        let mut partition = Partition::new("sram");
        assert!(ResolvedPartition::from_partition(&partition).is_none());

        partition.address = Some(0x2000);
        partition.size = Some(0x100);
        let resolved = ResolvedPartition::from_partition(&partition).unwrap();
        assert_eq!(resolved.end_address, 0x2100);
        assert!(!resolved.is_container());
    }

    #[test]
    fn test_invalid_layout() {
        let err = ResolvedLayout::from_toml_str("[partitions.a]\naddress = 1\n").unwrap_err();
        assert!(matches!(err, PartitionError::Parse { .. }));
    }
}
