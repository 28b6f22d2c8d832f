//! Layout types
//!
//! Input records as they appear in requirement documents, and the partition
//! arena the resolver works on.

use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use super::toml::{deserialize_hex_u64, deserialize_opt_hex_u64, parse_number};
use crate::error::{PartitionError, Result};

/// Sentinel marking the beginning of a region's order
pub const START: &str = "start";
/// Sentinel marking the end of a region's order
pub const END: &str = "end";
/// Conventional name of the dynamic partition
pub const APP: &str = "app";
/// Region assigned to partitions that do not name one
pub const DEFAULT_REGION: &str = "flash_primary";
/// Name prefix of alignment fillers
pub const EMPTY_PREFIX: &str = "EMPTY_";

/// Returns true for the `start` / `end` sentinels
pub fn is_sentinel(name: &str) -> bool {
    name == START || name == END
}

/// How partitions are laid out inside a region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Pack sequentially from the base address upwards
    #[default]
    StartToEnd,
    /// Pack sequentially from the end of the region downwards
    EndToStart,
    /// Full constraint solving with a dynamic partition
    Complex,
}

impl PlacementStrategy {
    /// Name used in documents and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStrategy::StartToEnd => "start_to_end",
            PlacementStrategy::EndToStart => "end_to_start",
            PlacementStrategy::Complex => "complex",
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementStrategy {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "start_to_end" => Ok(PlacementStrategy::StartToEnd),
            "end_to_start" => Ok(PlacementStrategy::EndToStart),
            "complex" => Ok(PlacementStrategy::Complex),
            other => Err(PartitionError::Parse {
                source_name: "placement strategy".into(),
                message: format!(
                    "unknown strategy '{}' (expected start_to_end, end_to_start or complex)",
                    other
                ),
            }),
        }
    }
}

/// A physical memory area partitions are placed in
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionConfig {
    /// Region name, referenced by the partitions' `region` key
    pub name: String,
    /// First address of the region
    #[serde(default, deserialize_with = "deserialize_hex_u64")]
    pub base_address: u64,
    /// Size of the region in bytes
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub size: u64,
    /// Layout strategy
    #[serde(default)]
    pub placement_strategy: PlacementStrategy,
    /// Driver name passed through to every partition of the region
    #[serde(default)]
    pub device: Option<String>,
    /// Name of the partition absorbing the free space (complex regions)
    #[serde(default)]
    pub dynamic_partition: Option<String>,
}

impl RegionConfig {
    /// Create a `start_to_end` region at address 0
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            base_address: 0,
            size,
            placement_strategy: PlacementStrategy::StartToEnd,
            device: None,
            dynamic_partition: None,
        }
    }

    /// Create a `complex` region at address 0
    pub fn complex(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size).with_strategy(PlacementStrategy::Complex)
    }

    /// Set the base address
    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    /// Set the placement strategy
    pub fn with_strategy(mut self, strategy: PlacementStrategy) -> Self {
        self.placement_strategy = strategy;
        self
    }

    /// Set the device name
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set the dynamic partition name
    pub fn with_dynamic_partition(mut self, name: impl Into<String>) -> Self {
        self.dynamic_partition = Some(name.into());
        self
    }

    /// Name of the dynamic partition, `app` unless overridden
    pub fn dynamic_partition(&self) -> &str {
        self.dynamic_partition
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(APP)
    }

    /// One past the last address of the region
    pub fn end(&self) -> u64 {
        self.base_address + self.size
    }
}

/// Parses `name,size=0x100000,base_address=0,placement_strategy=complex,...`
impl FromStr for RegionConfig {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self> {
        let parse_err = |message: String| PartitionError::Parse {
            source_name: format!("region '{}'", s),
            message,
        };

        let mut fields = s.split(',').map(str::trim);
        let name = match fields.next() {
            Some(name) if !name.is_empty() && !name.contains('=') => name,
            _ => return Err(parse_err("region must start with its name".into())),
        };

        let mut size = None;
        let mut region = RegionConfig::new(name, 0);
        for field in fields.filter(|f| !f.is_empty()) {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| parse_err(format!("expected key=value, got '{}'", field)))?;
            let value = value.trim();
            match key.trim().replace('-', "_").as_str() {
                "size" => size = Some(parse_number(value).map_err(parse_err)?),
                "base_address" => region.base_address = parse_number(value).map_err(parse_err)?,
                "placement_strategy" => region.placement_strategy = value.parse()?,
                "device" => region.device = Some(value.to_string()).filter(|v| !v.is_empty()),
                "dynamic_partition" => {
                    region.dynamic_partition = Some(value.to_string()).filter(|v| !v.is_empty())
                }
                other => return Err(parse_err(format!("unknown region key '{}'", other))),
            }
        }

        region.size = size.ok_or_else(|| parse_err("missing 'size'".into()))?;
        Ok(region)
    }
}

/// Alignment boundary of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    /// Start address must be a multiple of the value
    Start(#[serde(deserialize_with = "deserialize_hex_u64")] u64),
    /// End address must be a multiple of the value
    End(#[serde(deserialize_with = "deserialize_hex_u64")] u64),
}

impl Align {
    /// The boundary in bytes
    pub fn value(&self) -> u64 {
        match *self {
            Align::Start(v) | Align::End(v) => v,
        }
    }
}

/// `{ one_of = [...] }`: the first candidate that exists is used
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneOf {
    /// Candidates in order of preference
    pub one_of: Vec<String>,
}

/// One entry of a reference list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum RefItem {
    /// A partition name (or sentinel)
    Name(String),
    /// A group resolved to its first existing candidate
    OneOf(OneOf),
}

impl RefItem {
    /// The name, once any `one_of` has been resolved
    pub fn as_name(&self) -> Option<&str> {
        match self {
            RefItem::Name(name) => Some(name),
            RefItem::OneOf(_) => None,
        }
    }
}

impl From<&str> for RefItem {
    fn from(name: &str) -> Self {
        RefItem::Name(name.to_string())
    }
}

/// A reference field as written in a document: a name, a list or a `one_of`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PlacementRef {
    /// `key = "name"`
    Single(String),
    /// `key = ["a", { one_of = [...] }]`
    List(Vec<RefItem>),
    /// `key = { one_of = [...] }`
    OneOf(OneOf),
}

impl PlacementRef {
    /// Normalize to a list
    pub fn into_items(self) -> Vec<RefItem> {
        match self {
            PlacementRef::Single(name) => vec![RefItem::Name(name)],
            PlacementRef::List(items) => items,
            PlacementRef::OneOf(one_of) => vec![RefItem::OneOf(one_of)],
        }
    }
}

/// `placement` table of a partition record
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlacementReq {
    /// Partitions this one is placed directly before
    #[serde(default)]
    pub before: Option<PlacementRef>,
    /// Partitions this one is placed directly after
    #[serde(default)]
    pub after: Option<PlacementRef>,
    /// Alignment of this partition
    #[serde(default)]
    pub align: Option<Align>,
    /// Start alignment imposed on the following partition
    #[serde(default, deserialize_with = "deserialize_opt_hex_u64")]
    pub align_next: Option<u64>,
}

/// A partition record as it appears in a requirement document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PartitionReq {
    /// Size in bytes
    #[serde(default, deserialize_with = "deserialize_opt_hex_u64")]
    pub size: Option<u64>,
    /// Absolute address (static configuration only)
    #[serde(default, deserialize_with = "deserialize_opt_hex_u64")]
    pub address: Option<u64>,
    /// Owning region
    #[serde(default)]
    pub region: Option<String>,
    /// Relative placement
    #[serde(default)]
    pub placement: Option<PlacementReq>,
    /// Members of a container partition
    #[serde(default)]
    pub span: Option<PlacementRef>,
    /// Container this partition is added to
    #[serde(default)]
    pub inside: Option<PlacementRef>,
    /// Partition whose size this one copies
    #[serde(default)]
    pub share_size: Option<PlacementRef>,
    /// Misplaced `align`, rejected when the record is built
    #[serde(default)]
    pub align: Option<Align>,
    /// Misplaced `align_next`, rejected when the record is built
    #[serde(default, deserialize_with = "deserialize_opt_hex_u64")]
    pub align_next: Option<u64>,
}

/// Normalized placement constraints
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Before targets; the first existing one is used
    pub before: Vec<RefItem>,
    /// After targets; the first existing one is used
    pub after: Vec<RefItem>,
    /// Alignment of the partition itself
    pub align: Option<Align>,
    /// Start alignment for the following partition
    pub align_next: Option<u64>,
}

impl Placement {
    /// True when no constraint is present
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.align.is_none()
            && self.align_next.is_none()
    }

    /// Effective `before` target
    pub fn before_target(&self) -> Option<&str> {
        self.before.first().and_then(RefItem::as_name)
    }

    /// Effective `after` target
    pub fn after_target(&self) -> Option<&str> {
        self.after.first().and_then(RefItem::as_name)
    }

    /// True if the partition takes part in ordering
    pub fn is_relative(&self) -> bool {
        !self.before.is_empty() || !self.after.is_empty()
    }
}

/// A partition in the resolver's arena
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Owning region
    pub region: String,
    /// Resolved (or statically given) address
    pub address: Option<u64>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Relative placement
    pub placement: Option<Placement>,
    /// Members, for container partitions
    pub span: Option<Vec<RefItem>>,
    /// Candidate containers
    pub inside: Vec<RefItem>,
    /// Candidate size sources
    pub share_size: Vec<RefItem>,
    /// Driver name copied from the region
    pub device: Option<String>,
    pub(crate) orig_span: Option<Vec<String>>,
    pub(crate) sharers: u32,
}

impl Partition {
    /// An empty record in `region`
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    /// Build a record from its document form
    pub fn from_req(name: &str, req: PartitionReq) -> Result<Self> {
        if req.align.is_some() {
            return Err(PartitionError::MisplacedAlignment {
                partition: name.to_string(),
                key: "align",
            });
        }
        if req.align_next.is_some() {
            return Err(PartitionError::MisplacedAlignment {
                partition: name.to_string(),
                key: "align_next",
            });
        }

        let placement = req.placement.map(|p| Placement {
            before: p.before.map(PlacementRef::into_items).unwrap_or_default(),
            after: p.after.map(PlacementRef::into_items).unwrap_or_default(),
            align: p.align,
            align_next: p.align_next,
        });

        if let Some(placement) = &placement {
            if placement.align.map(|a| a.value()) == Some(0) || placement.align_next == Some(0) {
                return Err(PartitionError::InvalidAlignment {
                    partition: name.to_string(),
                    reason: "alignment must be greater than 0".into(),
                });
            }
        }

        Ok(Self {
            region: req.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            address: req.address,
            size: req.size,
            placement,
            span: req.span.map(PlacementRef::into_items),
            inside: req.inside.map(PlacementRef::into_items).unwrap_or_default(),
            share_size: req.share_size.map(PlacementRef::into_items).unwrap_or_default(),
            device: None,
            orig_span: None,
            sharers: 0,
        })
    }

    /// True for container (span) partitions
    pub fn is_container(&self) -> bool {
        self.span.is_some()
    }

    /// True when the record carries no constraint and no resolved value
    pub fn is_bare(&self) -> bool {
        self.address.is_none()
            && self.size.is_none()
            && self.placement.is_none()
            && self.span.is_none()
            && self.inside.is_empty()
            && self.share_size.is_empty()
    }

    /// One past the last byte, once resolved
    pub fn end_address(&self) -> Option<u64> {
        Some(self.address? + self.size?)
    }

    /// Alignment requirement, if any
    pub fn align(&self) -> Option<Align> {
        self.placement.as_ref().and_then(|p| p.align)
    }

    /// Names in `span`, skipping unresolved groups
    pub fn span_names(&self) -> impl Iterator<Item = &str> {
        self.span.iter().flatten().filter_map(RefItem::as_name)
    }

    /// Effective `inside` target
    pub fn inside_target(&self) -> Option<&str> {
        self.inside.first().and_then(RefItem::as_name)
    }

    /// Effective `share_size` source
    pub fn share_target(&self) -> Option<&str> {
        self.share_size.first().and_then(RefItem::as_name)
    }

    /// Every reference list of the record, for rewriting
    pub(crate) fn reference_lists_mut(&mut self) -> Vec<&mut Vec<RefItem>> {
        let mut lists = Vec::new();
        if let Some(placement) = &mut self.placement {
            lists.push(&mut placement.before);
            lists.push(&mut placement.after);
        }
        if let Some(span) = &mut self.span {
            lists.push(span);
        }
        lists.push(&mut self.inside);
        lists.push(&mut self.share_size);
        lists
    }
}

/// The partition arena
///
/// Holds every partition of every region, keyed by name in document order.
/// Regions are views into the arena given as name sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    partitions: IndexMap<String, Partition>,
}

impl Requirements {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the arena from document records
    pub fn from_reqs(reqs: IndexMap<String, PartitionReq>) -> Result<Self> {
        let mut partitions = IndexMap::with_capacity(reqs.len());
        for (name, req) in reqs {
            let partition = Partition::from_req(&name, req)?;
            partitions.insert(name, partition);
        }
        Ok(Self { partitions })
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// True if there are no partitions
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Check if a partition exists
    pub fn contains(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    /// Find a partition
    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    /// Find a partition (mutable)
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.partitions.get_mut(name)
    }

    /// Find a partition that must exist
    pub fn partition(&self, name: &str) -> Result<&Partition> {
        self.get(name)
            .ok_or_else(|| PartitionError::UnknownPartition(name.to_string()))
    }

    /// Find a partition that must exist (mutable)
    pub fn partition_mut(&mut self, name: &str) -> Result<&mut Partition> {
        self.get_mut(name)
            .ok_or_else(|| PartitionError::UnknownPartition(name.to_string()))
    }

    /// Add or replace a partition
    pub fn insert(&mut self, name: impl Into<String>, partition: Partition) -> Option<Partition> {
        self.partitions.insert(name.into(), partition)
    }

    /// Remove a partition, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<Partition> {
        self.partitions.shift_remove(name)
    }

    /// Partition names in document order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.partitions.keys()
    }

    /// Iterate over all partitions
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Partition)> {
        self.partitions.iter()
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Partition> {
        self.partitions.values_mut()
    }

    /// Names of the partitions belonging to `region`
    pub fn region_names(&self, region: &str) -> IndexSet<String> {
        self.partitions
            .iter()
            .filter(|(_, p)| p.region == region)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Size of a partition, 0 when unknown or unset
    pub(crate) fn size_of(&self, name: &str) -> u64 {
        self.get(name).and_then(|p| p.size).unwrap_or(0)
    }

    /// Next free alignment filler name
    pub(crate) fn next_empty_name(&self) -> String {
        let mut n = self
            .partitions
            .keys()
            .filter(|k| k.starts_with(EMPTY_PREFIX))
            .count();
        loop {
            let name = format!("{}{}", EMPTY_PREFIX, n);
            if !self.contains(&name) {
                return name;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_str() {
        let region: RegionConfig =
            "extflash,size=0x800000,base_address=0x10000000,placement_strategy=end_to_start,device=mx25"
                .parse()
                .unwrap();
        assert_eq!(region.name, "extflash");
        assert_eq!(region.size, 0x800000);
        assert_eq!(region.base_address, 0x1000_0000);
        assert_eq!(region.placement_strategy, PlacementStrategy::EndToStart);
        assert_eq!(region.device.as_deref(), Some("mx25"));
        assert_eq!(region.dynamic_partition(), APP);
    }

    #[test]
    fn test_region_from_str_defaults() {
        let region: RegionConfig = "sram,size=4096".parse().unwrap();
        assert_eq!(region.base_address, 0);
        assert_eq!(region.placement_strategy, PlacementStrategy::StartToEnd);
        assert!(region.device.is_none());

        let region: RegionConfig = "flash,size=1000,dynamic-partition=mcu_app,placement_strategy=complex"
            .parse()
            .unwrap();
        assert_eq!(region.dynamic_partition(), "mcu_app");
        assert_eq!(region.end(), 1000);
    }

    #[test]
    fn test_region_from_str_errors() {
        assert!("sram".parse::<RegionConfig>().is_err());
        assert!("size=100".parse::<RegionConfig>().is_err());
        assert!("sram,size=100,colour=blue".parse::<RegionConfig>().is_err());
        assert!("sram,size=100,placement_strategy=sideways".parse::<RegionConfig>().is_err());
        assert!("sram,size".parse::<RegionConfig>().is_err());
    }

    #[test]
    fn test_misplaced_alignment_rejected() {
        let req = PartitionReq {
            size: Some(100),
            align: Some(Align::Start(4000)),
            ..Default::default()
        };
        assert!(matches!(
            Partition::from_req("second", req),
            Err(PartitionError::MisplacedAlignment { key: "align", .. })
        ));

        let req = PartitionReq {
            size: Some(100),
            align_next: Some(4000),
            ..Default::default()
        };
        assert!(matches!(
            Partition::from_req("first", req),
            Err(PartitionError::MisplacedAlignment { key: "align_next", .. })
        ));
    }

    #[test]
    fn test_zero_alignment_rejected() {
        let req = PartitionReq {
            placement: Some(PlacementReq {
                align: Some(Align::End(0)),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            Partition::from_req("p", req),
            Err(PartitionError::InvalidAlignment { .. })
        ));
    }

    #[test]
    fn test_default_region() {
        let partition = Partition::from_req("p", PartitionReq::default()).unwrap();
        assert_eq!(partition.region, DEFAULT_REGION);
        assert!(partition.is_bare());
    }

    #[test]
    fn test_next_empty_name() {
        let mut reqs = Requirements::new();
        assert_eq!(reqs.next_empty_name(), "EMPTY_0");
        reqs.insert("EMPTY_0", Partition::new("flash"));
        reqs.insert("EMPTY_2", Partition::new("flash"));
        assert_eq!(reqs.next_empty_name(), "EMPTY_3");
        reqs.remove("EMPTY_0");
        assert_eq!(reqs.next_empty_name(), "EMPTY_1");
    }
}
