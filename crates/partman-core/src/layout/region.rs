//! Region strategies
//!
//! Every region is solved on its own, in an order where a region comes after
//! the regions it copies sizes from. Simple regions (`start_to_end`,
//! `end_to_start`) pack their partitions back to back and hand the rest of
//! the region to a partition named after the region. Complex regions run the
//! full constraint solver around a dynamic partition.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use indexmap::{IndexMap, IndexSet};

use super::align::{set_addresses_and_align, set_sub_partition_address_and_size};
use super::normalize::{remove_all_zero_sized_partitions, resolve_share_size};
use super::order::resolve;
use super::output::{ResolvedLayout, ResolvedPartition};
use super::size::set_shared_size;
use super::verify::verify_tiling;
use super::{
    Partition, PlacementStrategy, RefItem, RegionConfig, Requirements, APP, DEFAULT_REGION,
};
use crate::error::{PartitionError, Result};

/// Free gaps between the given static partitions, as `(start, end)`
fn static_gaps(
    reqs: &Requirements,
    statics: &IndexSet<String>,
    base: u64,
    size: u64,
    skip: Option<&str>,
) -> Result<Vec<(u64, u64)>> {
    let mut starts = BTreeSet::from([base + size]);
    let mut ends = BTreeSet::from([base]);

    for name in statics {
        if Some(name.as_str()) == skip {
            continue;
        }
        let partition = reqs.partition(name)?;
        if partition.is_container() {
            continue;
        }
        let (Some(address), Some(length)) = (partition.address, partition.size) else {
            return Err(PartitionError::IncompleteStatic(name.clone()));
        };
        starts.insert(address);
        ends.insert(address + length);
    }

    Ok(ends
        .difference(&starts)
        .copied()
        .zip(starts.difference(&ends).copied())
        .collect())
}

fn format_gaps(gaps: &[(u64, u64)]) -> String {
    if gaps.is_empty() {
        return "none".to_string();
    }
    gaps.iter()
        .map(|(start, end)| format!("{:#x}-{:#x}", start, end))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The single free area left by a region's static partitions
///
/// Containers and the dynamic partition are ignored. Returns the start and
/// size of the gap; zero or several gaps is an error listing all of them.
pub fn dynamic_area(
    reqs: &Requirements,
    statics: &IndexSet<String>,
    base: u64,
    size: u64,
    dynamic_partition: &str,
) -> Result<(u64, u64)> {
    let gaps = static_gaps(reqs, statics, base, size, Some(dynamic_partition))?;
    match gaps.as_slice() {
        [(start, end)] => Ok((*start, end - start)),
        _ => Err(PartitionError::StaticGaps {
            gaps: format_gaps(&gaps),
        }),
    }
}

fn set_device(reqs: &mut Requirements, names: &[String], device: Option<&str>) -> Result<()> {
    if let Some(device) = device {
        for name in names {
            reqs.partition_mut(name)?.device = Some(device.to_string());
        }
    }
    Ok(())
}

/// Pack the partitions of a `start_to_end` / `end_to_start` region
fn solve_simple_region(
    reqs: &mut Requirements,
    region: &RegionConfig,
    mut local: IndexSet<String>,
    statics: &IndexSet<String>,
) -> Result<()> {
    if local.contains(&region.name) {
        return Err(PartitionError::ReservedName(region.name.clone()));
    }

    let gaps = static_gaps(reqs, statics, region.base_address, region.size, None)?;
    let (gap_start, gap_end) = match gaps.as_slice() {
        [gap] => *gap,
        _ => {
            return Err(PartitionError::StaticGaps {
                gaps: format_gaps(&gaps),
            })
        }
    };
    match region.placement_strategy {
        PlacementStrategy::EndToStart if gap_start != region.base_address => {
            return Err(PartitionError::StaticNotPacked {
                region: region.name.clone(),
                side: "end",
            });
        }
        PlacementStrategy::StartToEnd if gap_end != region.end() => {
            return Err(PartitionError::StaticNotPacked {
                region: region.name.clone(),
                side: "start",
            });
        }
        _ => {}
    }
    let free = gap_end - gap_start;

    remove_all_zero_sized_partitions(reqs, &mut local, None);
    resolve_share_size(reqs, &local)?;
    set_shared_size(reqs, &local, &IndexMap::new(), None, free)?;

    let mut atomic = Vec::new();
    let mut containers = Vec::new();
    let mut required = 0u64;
    for name in &local {
        let partition = reqs.partition(name)?;
        if partition.is_container() {
            containers.push(name.clone());
            continue;
        }
        required += partition
            .size
            .ok_or_else(|| PartitionError::MissingSize(name.clone()))?;
        atomic.push(name.clone());
    }
    if required > free {
        return Err(PartitionError::DoesNotFit {
            region: region.name.clone(),
            required,
            available: free,
        });
    }

    let end_to_start = region.placement_strategy == PlacementStrategy::EndToStart;
    let mut address = if end_to_start { gap_end } else { gap_start };
    for name in &atomic {
        let partition = reqs.partition_mut(name)?;
        let size = partition.size.unwrap_or(0);
        if end_to_start {
            address -= size;
            partition.address = Some(address);
        } else {
            partition.address = Some(address);
            address += size;
        }
    }

    for name in &containers {
        let members: Vec<String> = reqs.partition(name)?.span_names().map(str::to_string).collect();
        let mut bounds: Option<(u64, u64)> = None;
        for member in &members {
            let Some(p) = reqs.get(member) else { continue };
            if let (Some(start), Some(end)) = (p.address, p.end_address()) {
                bounds = Some(bounds.map_or((start, end), |(l, h)| (l.min(start), h.max(end))));
            }
        }
        let (low, high) = bounds
            .filter(|(l, h)| h > l)
            .ok_or_else(|| PartitionError::EmptyContainer(name.clone()))?;
        let container = reqs.partition_mut(name)?;
        container.address = Some(low);
        container.size = Some(high - low);
    }

    let (rest_address, rest_size) = if end_to_start {
        (gap_start, address - gap_start)
    } else {
        (address, gap_end - address)
    };
    let mut rest = Partition::new(region.name.clone());
    rest.address = Some(rest_address);
    rest.size = Some(rest_size);
    reqs.insert(region.name.clone(), rest);
    log::debug!(
        "Region '{}' keeps {:#x} bytes at {:#x}",
        region.name,
        rest_size,
        rest_address
    );

    let mut tiles = atomic;
    tiles.push(region.name.clone());
    tiles.extend(
        statics
            .iter()
            .filter(|n| reqs.get(n).is_some_and(|p| !p.is_container()))
            .cloned(),
    );

    let mut everything = tiles.clone();
    everything.extend(containers);
    set_device(reqs, &everything, region.device.as_deref())?;

    verify_tiling(reqs, &tiles, region.base_address, region.size)
}

fn rename_references(partition: &mut Partition, from: &str, to: &str) {
    for list in partition.reference_lists_mut() {
        for item in list.iter_mut() {
            match item {
                RefItem::Name(name) if *name == from => *name = to.to_string(),
                RefItem::OneOf(group) => {
                    for candidate in group.one_of.iter_mut().filter(|c| **c == from) {
                        *candidate = to.to_string();
                    }
                }
                RefItem::Name(_) => {}
            }
        }
    }
}

/// Make `dynamic_partition` take the role of `app` inside the region
fn alias_dynamic_partition(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    region: &str,
    dynamic_partition: &str,
) -> Result<()> {
    if !reqs.contains(dynamic_partition) {
        if local.contains(APP) {
            if let Some(mut record) = reqs.remove(APP) {
                record.region = region.to_string();
                reqs.insert(dynamic_partition, record);
            }
            local.shift_remove(APP);
            local.insert(dynamic_partition.to_string());
        } else if reqs.get(APP).is_some_and(Partition::is_bare) {
            reqs.remove(APP);
        }
    }

    for name in local.iter() {
        rename_references(reqs.partition_mut(name)?, APP, dynamic_partition);
    }

    if !reqs.contains(APP) {
        let mut app = Partition::new(region);
        app.span = Some(vec![RefItem::Name(dynamic_partition.to_string())]);
        reqs.insert(APP, app);
        local.insert(APP.to_string());
    }
    Ok(())
}

/// Run the full solver on a `complex` region
fn solve_complex_region(
    reqs: &mut Requirements,
    region: &RegionConfig,
    mut local: IndexSet<String>,
    statics: &IndexSet<String>,
) -> Result<()> {
    let dynamic_partition = region.dynamic_partition().to_string();
    let dp = dynamic_partition.as_str();

    if dp != APP {
        alias_dynamic_partition(reqs, &mut local, &region.name, dp)?;
    }

    if !local.contains(dp) {
        match reqs.get(dp) {
            Some(p) if p.is_bare() => {
                log::debug!("Moving '{}' from region '{}' to '{}'", dp, p.region, region.name);
                reqs.partition_mut(dp)?.region = region.name.clone();
            }
            Some(p) => {
                return Err(PartitionError::InvalidReference {
                    partition: dp.to_string(),
                    target: region.name.clone(),
                    reason: format!(
                        "the dynamic partition is already defined in region '{}'",
                        p.region
                    ),
                });
            }
            None => {
                reqs.insert(dp, Partition::new(region.name.clone()));
            }
        }
        local.insert(dp.to_string());
    }

    let static_tiles: Vec<String> = statics
        .iter()
        .filter(|n| n.as_str() != dp && reqs.get(n).is_some_and(|p| !p.is_container()))
        .cloned()
        .collect();

    let (mut start, mut free) = (region.base_address, region.size);
    if !statics.is_empty() {
        (start, free) = dynamic_area(reqs, statics, region.base_address, region.size, dp)?;

        let alias = (dp != APP).then_some(APP);
        if local.iter().all(|n| n == dp || Some(n.as_str()) == alias) {
            log::debug!("Only '{}' is left, it gets the free area", dp);
            let mut resolved = vec![dp.to_string()];
            if let Some(alias) = alias.filter(|a| local.contains(*a)) {
                resolved.push(alias.to_string());
            }
            for name in &resolved {
                let partition = reqs.partition_mut(name)?;
                partition.address = Some(start);
                partition.size = Some(free);
            }
            resolved.extend(static_tiles.iter().cloned());
            set_device(reqs, &resolved, region.device.as_deref())?;

            let mut tiles = static_tiles;
            tiles.push(dp.to_string());
            return verify_tiling(reqs, &tiles, region.base_address, region.size);
        }
    }

    let mut ordering = resolve(reqs, &mut local, dp)?;
    set_addresses_and_align(reqs, &mut local, &mut ordering, free, start, dp)?;
    set_sub_partition_address_and_size(reqs, &ordering)?;

    let mut everything: Vec<String> = local.iter().cloned().collect();
    everything.extend(statics.iter().cloned());
    set_device(reqs, &everything, region.device.as_deref())?;

    let mut tiles = ordering.solution;
    tiles.extend(static_tiles);
    verify_tiling(reqs, &tiles, region.base_address, region.size)
}

/// Solve one region in place
///
/// The region's partitions are those whose `region` matches; the ones named
/// in `static_names` keep their given address and size.
pub fn get_region_config(
    reqs: &mut Requirements,
    region: &RegionConfig,
    static_names: &IndexSet<String>,
) -> Result<()> {
    let (statics, local): (IndexSet<String>, IndexSet<String>) = reqs
        .region_names(&region.name)
        .into_iter()
        .partition(|n| static_names.contains(n));

    log::debug!(
        "Solving region '{}' ({}, {} partitions, {} static)",
        region.name,
        region.placement_strategy,
        local.len(),
        statics.len()
    );

    match region.placement_strategy {
        PlacementStrategy::Complex => solve_complex_region(reqs, region, local, &statics),
        PlacementStrategy::StartToEnd | PlacementStrategy::EndToStart => {
            solve_simple_region(reqs, region, local, &statics)
        }
    }
}

/// Solve one region and return its resolved partitions
///
/// Partitions are ordered by address, larger (containing) partitions first.
pub fn solve_region(
    reqs: &mut Requirements,
    region: &RegionConfig,
    static_names: &IndexSet<String>,
) -> Result<IndexMap<String, ResolvedPartition>> {
    get_region_config(reqs, region, static_names)?;

    let mut resolved: Vec<(String, ResolvedPartition)> = reqs
        .iter()
        .filter(|(_, p)| p.region == region.name)
        .filter_map(|(name, p)| ResolvedPartition::from_partition(p).map(|r| (name.clone(), r)))
        .collect();
    resolved.sort_by_key(|(name, p)| (p.address, Reverse(p.size), name.clone()));

    Ok(resolved.into_iter().collect())
}

/// The first `share_size` candidate that exists in the arena
fn share_source<'a>(reqs: &'a Requirements, partition: &'a Partition) -> Option<&'a str> {
    partition.share_size.iter().find_map(|item| match item {
        RefItem::Name(name) => reqs.contains(name).then_some(name.as_str()),
        RefItem::OneOf(group) => group
            .one_of
            .iter()
            .find(|c| reqs.contains(c))
            .map(String::as_str),
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn region_depth(
    region: &str,
    deps: &IndexMap<String, IndexSet<String>>,
    marks: &mut HashMap<String, Mark>,
    depth: &mut HashMap<String, usize>,
    path: &mut Vec<String>,
) -> Result<usize> {
    match marks.get(region) {
        Some(Mark::Done) => return Ok(depth.get(region).copied().unwrap_or(0)),
        Some(Mark::Visiting) => {
            let from = path.iter().position(|r| r == region).unwrap_or(0);
            let mut cycle = path[from..].to_vec();
            cycle.push(region.to_string());
            return Err(PartitionError::RegionCycle(cycle.join(" -> ")));
        }
        None => {}
    }

    marks.insert(region.to_string(), Mark::Visiting);
    path.push(region.to_string());

    let mut own = 0;
    if let Some(needs) = deps.get(region) {
        for dep in needs {
            own = own.max(region_depth(dep, deps, marks, depth, path)? + 1);
        }
    }

    path.pop();
    marks.insert(region.to_string(), Mark::Done);
    depth.insert(region.to_string(), own);
    Ok(own)
}

/// Order regions so that a region is solved after every region it copies
/// sizes from through `share_size`
///
/// Regions without such dependencies keep their relative order.
pub fn sort_regions(reqs: &Requirements, regions: &[RegionConfig]) -> Result<Vec<RegionConfig>> {
    let declared: IndexSet<&str> = regions.iter().map(|r| r.name.as_str()).collect();

    let mut deps: IndexMap<String, IndexSet<String>> = IndexMap::new();
    for (_, partition) in reqs.iter() {
        if !declared.contains(partition.region.as_str()) {
            continue;
        }
        let Some(source) = share_source(reqs, partition).and_then(|s| reqs.get(s)) else {
            continue;
        };
        if source.region != partition.region && declared.contains(source.region.as_str()) {
            deps.entry(partition.region.clone())
                .or_default()
                .insert(source.region.clone());
        }
    }

    let mut marks = HashMap::new();
    let mut depth = HashMap::new();
    for region in regions {
        region_depth(&region.name, &deps, &mut marks, &mut depth, &mut Vec::new())?;
    }

    let mut sorted = regions.to_vec();
    sorted.sort_by_key(|r| depth.get(&r.name).copied().unwrap_or(0));
    Ok(sorted)
}

/// Resolve every region
///
/// `statics` holds partitions with a fixed address and size. Requirements
/// for the same names are dropped; the static definition of a dynamic
/// partition is ignored since that one is always recomputed.
pub fn resolve_all(
    mut reqs: Requirements,
    statics: Requirements,
    regions: &[RegionConfig],
) -> Result<ResolvedLayout> {
    let dynamic: IndexSet<&str> = regions
        .iter()
        .map(RegionConfig::dynamic_partition)
        .chain([APP])
        .collect();

    let mut static_names = IndexSet::new();
    for (name, partition) in statics.iter() {
        if dynamic.contains(name.as_str()) {
            log::debug!("Ignoring static definition of dynamic partition '{}'", name);
            continue;
        }
        if reqs.contains(name) {
            log::info!("Dropping partition '{}' since it is statically defined.", name);
        }
        reqs.insert(name.clone(), partition.clone());
        static_names.insert(name.clone());
    }

    if !reqs.contains(APP) {
        reqs.insert(APP, Partition::new(DEFAULT_REGION));
    }

    let mut layout = ResolvedLayout::default();
    for region in sort_regions(&reqs, regions)? {
        let partitions = solve_region(&mut reqs, &region, &static_names)?;
        layout.partitions.extend(partitions);
    }
    for region in regions {
        layout.regions.insert(region.name.clone(), region.clone());
    }

    for (name, partition) in reqs.iter() {
        if !layout.partitions.contains_key(name) {
            log::debug!(
                "'{}' was not resolved, region '{}' is not declared",
                name,
                partition.region
            );
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(toml: &str) -> Requirements {
        Requirements::from_toml_str(toml).unwrap()
    }

    fn with_statics(reqs: &str, statics: &str) -> (Requirements, IndexSet<String>) {
        let mut reqs = load(reqs);
        let mut names = IndexSet::new();
        for (name, partition) in load(statics).iter() {
            reqs.insert(name.clone(), partition.clone());
            names.insert(name.clone());
        }
        (reqs, names)
    }

    fn all_names(reqs: &Requirements) -> IndexSet<String> {
        reqs.names().cloned().collect()
    }

    #[track_caller]
    fn expect(reqs: &Requirements, name: &str, address: u64, size: u64) {
        let p = reqs.get(name).unwrap_or_else(|| panic!("'{name}' missing"));
        assert_eq!((p.address, p.size), (Some(address), Some(size)), "{name}");
    }

    #[test]
    fn test_dynamic_area() {
        let reqs = load(
            r#"
first = { address = 0, size = 10 }
app = { address = 20, size = 10 }
fourth = { address = 40, size = 60 }
"#,
        );
        assert_eq!(dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP).unwrap(), (10, 30));

        let reqs = load(
            r#"
first = { address = 0, size = 10 }
second = { address = 10, size = 10 }
app = { address = 20, size = 80 }
"#,
        );
        assert_eq!(dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP).unwrap(), (20, 80));

        let reqs = load("app = { address = 0, size = 10 }\nsecond = { address = 40, size = 60 }\n");
        assert_eq!(dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP).unwrap(), (0, 40));

        let reqs = load("first = { address = 0, size = 10 }\napp = { address = 20, size = 10 }\n");
        assert_eq!(dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP).unwrap(), (10, 90));
    }

    #[test]
    fn test_dynamic_area_above_zero() {
        let reqs = load("first = { address = 1000, size = 10 }\napp = { address = 1200, size = 10 }\n");
        assert_eq!(dynamic_area(&reqs, &all_names(&reqs), 1000, 400, APP).unwrap(), (1010, 390));
    }

    #[test]
    fn test_dynamic_area_gaps() {
        let reqs = load(
            r#"
first = { address = 0, size = 10 }
second = { address = 50, size = 10 }
container = { span = ["first", "second"] }
"#,
        );
        let err = dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP).unwrap_err();
        assert_eq!(
            err,
            PartitionError::StaticGaps {
                gaps: "0xa-0x32, 0x3c-0x64".into()
            }
        );

        let reqs = load("first = { address = 0, size = 100 }\n");
        assert!(matches!(
            dynamic_area(&reqs, &all_names(&reqs), 0, 100, APP),
            Err(PartitionError::StaticGaps { .. })
        ));

        let reqs = load("first = { size = 100 }\n");
        assert_eq!(
            dynamic_area(&reqs, &all_names(&reqs), 0, 1000, APP).unwrap_err(),
            PartitionError::IncompleteStatic("first".into())
        );
    }

    #[test]
    fn test_sentinels_in_one_of() {
        let mut reqs = load(
            r#"
a = { size = 100, placement = { after = ["x0", "x1", "start"] } }
b = { size = 200, placement = { before = ["x0", "x1", "end"] } }
app = {}
"#,
        );
        let region = RegionConfig::complex(DEFAULT_REGION, 1000);
        let resolved = solve_region(&mut reqs, &region, &IndexSet::new()).unwrap();
        let order: Vec<&str> = resolved.keys().map(String::as_str).collect();
        assert_eq!(order, ["a", "app", "b"]);
        expect(&reqs, "a", 0, 100);
        expect(&reqs, "app", 100, 700);
        expect(&reqs, "b", 800, 200);
    }

    #[test]
    fn test_one_of_in_share_size() {
        let mut reqs = load(
            r#"
a = { size = 100, placement = { after = "start" } }
b = { size = 200, placement = { after = ["x0", "x1", "a", "x2"] } }
c = { share_size = { one_of = ["x0", "x1", "b", "a"] }, placement = { after = "b" } }
d = { share_size = { one_of = ["a", "b"] }, placement = { after = "c" } }
s = { span = ["a", { one_of = ["x0", "b", "d"] }, { one_of = ["x2", "c", "a"] }] }
app = {}
e = { share_size = { one_of = ["x0", "app"] }, placement = { after = "app" } }
"#,
        );
        let region = RegionConfig::complex(DEFAULT_REGION, 1000);
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();
        expect(&reqs, "a", 0, 100);
        expect(&reqs, "b", 100, 200);
        expect(&reqs, "c", 300, 200);
        expect(&reqs, "d", 500, 100);
        expect(&reqs, "s", 0, 500);
        expect(&reqs, "app", 600, 200);
        expect(&reqs, "e", 800, 200);
    }

    #[test]
    fn test_dynamic_partition_gets_an_app_container() {
        let mut reqs = load(r#"a = { size = 100, region = "flash", placement = { after = "start" } }"#);
        let region = RegionConfig::complex("flash", 1000)
            .with_device("some-driver-device")
            .with_dynamic_partition("the_dynamic_partition");
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();

        let app = reqs.get(APP).unwrap();
        assert_eq!(app.span_names().next(), Some("the_dynamic_partition"));
        assert_eq!((app.address, app.size), (Some(100), Some(900)));
        expect(&reqs, "the_dynamic_partition", 100, 900);
        assert_eq!(app.device.as_deref(), Some("some-driver-device"));
    }

    #[test]
    fn test_app_references_follow_the_dynamic_partition() {
        let mut reqs = load(
            r#"
mcuboot = { size = 100, region = "flash", placement = { before = "app" } }
app = { region = "flash" }
"#,
        );
        let region = RegionConfig::complex("flash", 1000).with_dynamic_partition("mcu_app");
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();

        expect(&reqs, "mcuboot", 0, 100);
        expect(&reqs, "mcu_app", 100, 900);
        expect(&reqs, APP, 100, 900);
        let placement = reqs.get("mcuboot").unwrap().placement.clone().unwrap();
        assert_eq!(placement.before_target(), Some("mcu_app"));
    }

    #[test]
    fn test_start_to_end() {
        let mut reqs = load(r#"b = { size = 100, region = "extflash" }"#);
        let region = RegionConfig::new("extflash", 1000)
            .with_base_address(2000)
            .with_device("some-driver-device");
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();
        expect(&reqs, "b", 2000, 100);
        expect(&reqs, "extflash", 2100, 900);
        assert_eq!(reqs.get("b").unwrap().device.as_deref(), Some("some-driver-device"));
    }

    #[test]
    fn test_end_to_start() {
        let mut reqs = load(r#"b = { size = 100, region = "sram" }"#);
        let region = RegionConfig::new("sram", 1000)
            .with_base_address(2000)
            .with_strategy(PlacementStrategy::EndToStart);
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();
        expect(&reqs, "b", 2900, 100);
        expect(&reqs, "sram", 2000, 900);

        let mut reqs = load(
            r#"
b = { size = 100, region = "sram" }
c = { size = 200, region = "sram" }
d = { size = 300, region = "sram" }
"#,
        );
        get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap();
        expect(&reqs, "sram", 2000, 400);
        expect(&reqs, "b", 2900, 100);
        expect(&reqs, "c", 2700, 200);
        expect(&reqs, "d", 2400, 300);
    }

    #[test]
    fn test_end_to_start_with_statics() {
        let (mut reqs, statics) = with_statics(
            r#"
b = { size = 100, region = "sram" }
c = { size = 200, region = "sram" }
d = { size = 300, region = "sram" }
"#,
            r#"
s1 = { size = 100, address = 2900, region = "sram" }
s2 = { size = 200, address = 2700, region = "sram" }
"#,
        );
        let region = RegionConfig::new("sram", 1000)
            .with_base_address(2000)
            .with_strategy(PlacementStrategy::EndToStart);
        get_region_config(&mut reqs, &region, &statics).unwrap();
        expect(&reqs, "sram", 2000, 100);
        expect(&reqs, "b", 2600, 100);
        expect(&reqs, "s1", 2900, 100);
    }

    #[test]
    fn test_simple_region_statics_must_be_packed() {
        let region = RegionConfig::new("sram", 1000)
            .with_base_address(2000)
            .with_strategy(PlacementStrategy::EndToStart);
        let reqs_toml = r#"
a = { size = 100, placement = { after = "start" } }
b = { size = 100, region = "sram" }
app = {}
"#;

        // Hole between the statics
        let (mut reqs, statics) = with_statics(
            reqs_toml,
            r#"
s1 = { size = 100, address = 2900, region = "sram" }
s2 = { size = 200, address = 2600, region = "sram" }
"#,
        );
        let err = get_region_config(&mut reqs, &region, &statics).unwrap_err();
        assert!(matches!(err, PartitionError::StaticGaps { .. }));

        // Packed, but not against the end
        let (mut reqs, statics) = with_statics(
            reqs_toml,
            r#"
s1 = { size = 100, address = 2850, region = "sram" }
s2 = { size = 200, address = 2650, region = "sram" }
"#,
        );
        assert!(get_region_config(&mut reqs, &region, &statics).is_err());

        // Packed against the wrong side
        let (mut reqs, statics) = with_statics(reqs_toml, r#"s1 = { size = 100, address = 2000, region = "sram" }"#);
        let err = get_region_config(&mut reqs, &region, &statics).unwrap_err();
        assert_eq!(
            err,
            PartitionError::StaticNotPacked {
                region: "sram".into(),
                side: "end"
            }
        );
    }

    #[test]
    fn test_start_to_end_with_static() {
        let (mut reqs, statics) = with_statics(
            r#"b = { size = 100, region = "extflash" }"#,
            r#"secondary = { size = 200, address = 2000, region = "extflash" }"#,
        );
        let region = RegionConfig::new("extflash", 1000)
            .with_base_address(2000)
            .with_device("some-driver-device");
        get_region_config(&mut reqs, &region, &statics).unwrap();
        expect(&reqs, "secondary", 2000, 200);
        expect(&reqs, "b", 2200, 100);
        expect(&reqs, "extflash", 2300, 700);
    }

    #[test]
    fn test_region_name_is_reserved() {
        let mut reqs = load(r#"extflash = { size = 100, region = "extflash" }"#);
        let region = RegionConfig::new("extflash", 1000);
        assert_eq!(
            get_region_config(&mut reqs, &region, &IndexSet::new()).unwrap_err(),
            PartitionError::ReservedName("extflash".into())
        );
    }

    #[test]
    fn test_simple_region_does_not_fit() {
        let mut reqs = load(
            r#"
a = { size = 600, region = "sram" }
b = { size = 600, region = "sram" }
"#,
        );
        let region = RegionConfig::new("sram", 1000);
        assert!(matches!(
            get_region_config(&mut reqs, &region, &IndexSet::new()),
            Err(PartitionError::DoesNotFit { required: 1200, available: 1000, .. })
        ));
    }

    #[test]
    fn test_only_dynamic_partition_left() {
        let (mut reqs, statics) = with_statics("app = {}\n", "spm = { address = 0, size = 400 }\n");
        let region = RegionConfig::complex(DEFAULT_REGION, 1000).with_device("nordic_flash_stuff");
        get_region_config(&mut reqs, &region, &statics).unwrap();
        expect(&reqs, "app", 400, 600);
        expect(&reqs, "spm", 0, 400);
        assert_eq!(reqs.get("app").unwrap().device.as_deref(), Some("nordic_flash_stuff"));
    }

    fn regions(names: &[&str]) -> Vec<RegionConfig> {
        names.iter().map(|n| RegionConfig::new(*n, 0x1000)).collect()
    }

    fn sorted_names(sorted: &[RegionConfig]) -> Vec<&str> {
        sorted.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_sort_regions() {
        let reqs = load(
            r#"
first = { region = "region1" }
second = { region = "region1", share_size = "first" }
third = { region = "region2", share_size = "second" }
fourth = { region = "region3" }
"#,
        );
        let sorted = sort_regions(&reqs, &regions(&["region1", "region2", "region3"])).unwrap();
        assert_eq!(sorted_names(&sorted), ["region1", "region3", "region2"]);
    }

    #[test]
    fn test_sort_regions_cycle() {
        let reqs = load(
            r#"
first = { region = "region1" }
second = { region = "region1", share_size = "third" }
third = { region = "region2", share_size = "second" }
fourth = { region = "region3" }
"#,
        );
        let err = sort_regions(&reqs, &regions(&["region1", "region2", "region3"])).unwrap_err();
        assert_eq!(err, PartitionError::RegionCycle("region1 -> region2 -> region1".into()));
    }

    #[test]
    fn test_sort_regions_by_depth() {
        let reqs = load(
            r#"
first = { region = "region1", share_size = "third" }
second = { region = "region1", share_size = "fourth" }
third = { region = "region2" }
fourth = { region = "region3", share_size = "fifth" }
fifth = { region = "region4" }
sixth = { region = "region4", share_size = "seventh" }
seventh = { region = "region5" }
eighth = { region = "region2" }
"#,
        );
        let sorted = sort_regions(
            &reqs,
            &regions(&["region1", "region2", "region3", "region4", "region5"]),
        )
        .unwrap();
        assert_eq!(
            sorted_names(&sorted),
            ["region2", "region5", "region4", "region3", "region1"]
        );
    }

    #[test]
    fn test_resolve_all_regions() {
        let reqs = load(
            r#"
mcuboot = { size = 0xc000, placement = { before = "app" } }
settings = { size = 0x2000, placement = { before = "end", align = { start = 0x4000 } } }
storage = { region = "external_flash", share_size = "mcuboot" }
littlefs = { region = "external_flash", size = 0x10000 }
"#,
        );
        let regions = vec![
            RegionConfig::new("external_flash", 0x800000).with_device("mx25"),
            RegionConfig::complex(DEFAULT_REGION, 0x100000).with_device("flash_ctrl"),
        ];
        let layout = resolve_all(reqs, Requirements::new(), &regions).unwrap();

        let get = |name: &str| layout.partitions.get(name).unwrap();
        assert_eq!((get("mcuboot").address, get("mcuboot").size), (0, 0xc000));
        assert_eq!((get("app").address, get("app").size), (0xc000, 0xf0000));
        assert_eq!((get("settings").address, get("settings").size), (0xfc000, 0x2000));
        assert_eq!((get("EMPTY_0").address, get("EMPTY_0").size), (0xfe000, 0x2000));
        assert_eq!((get("storage").address, get("storage").size), (0, 0xc000));
        assert_eq!((get("littlefs").address, get("littlefs").size), (0xc000, 0x10000));
        assert_eq!(
            (get("external_flash").address, get("external_flash").size),
            (0x1c000, 0x7e4000)
        );
        assert_eq!(get("storage").device.as_deref(), Some("mx25"));
        assert_eq!(get("app").device.as_deref(), Some("flash_ctrl"));
        let regions: Vec<&String> = layout.regions.keys().collect();
        assert_eq!(regions, ["external_flash", DEFAULT_REGION]);
    }

    #[test]
    fn test_resolve_all_with_statics() {
        let reqs = load(
            r#"
spm = { size = 0x100, placement = { before = "app" } }
storage = { size = 0x1000, placement = { before = "end" } }
"#,
        );
        let statics = load(
            r#"
spm = { address = 0, size = 0x8000 }
app = { address = 0x8000, size = 0x1000 }
"#,
        );
        let regions = vec![RegionConfig::complex(DEFAULT_REGION, 0x100000)];
        let layout = resolve_all(reqs, statics, &regions).unwrap();

        let get = |name: &str| layout.partitions.get(name).unwrap();
        assert_eq!((get("spm").address, get("spm").size), (0, 0x8000));
        assert_eq!((get("app").address, get("app").size), (0x8000, 0xf7000));
        assert_eq!((get("storage").address, get("storage").size), (0xff000, 0x1000));
        let order: Vec<&str> = layout.partitions.keys().map(String::as_str).collect();
        assert_eq!(order, ["spm", "app", "storage"]);
    }
}
