//! Constraint normalization
//!
//! Runs before ordering and leaves every reference list of a region's
//! partitions holding plain names that exist.

use indexmap::IndexSet;

use super::{is_sentinel, RefItem, Requirements, END, START};
use crate::error::{PartitionError, Result};

/// Drop every partition of the region whose size resolves to 0
///
/// A partition is dropped when its `size` is 0, or when none of its
/// `share_size` candidates survive and it has no `size` of its own. Candidates
/// are checked against the whole arena, so sources in other regions count.
/// Dropping one partition can invalidate the sources of others, so this runs
/// until nothing changes. The dynamic partition is always a valid source.
pub fn remove_all_zero_sized_partitions(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    dynamic_partition: Option<&str>,
) {
    let mut dropped: IndexSet<String> = IndexSet::new();

    loop {
        let mut changed = false;

        for name in local.iter() {
            if dropped.contains(name) {
                continue;
            }

            let (size, mut share_size) = match reqs.get(name) {
                Some(p) => (p.size, p.share_size.clone()),
                None => continue,
            };

            if size == Some(0) {
                dropped.insert(name.clone());
                changed = true;
                continue;
            }
            if share_size.is_empty() {
                continue;
            }

            let is_source = |candidate: &str| {
                Some(candidate) == dynamic_partition
                    || (!dropped.contains(candidate)
                        && reqs.get(candidate).is_some_and(|p| p.size != Some(0)))
            };
            share_size.retain_mut(|item| match item {
                RefItem::Name(candidate) => is_source(candidate.as_str()),
                RefItem::OneOf(group) => {
                    group.one_of.retain(|candidate| is_source(candidate.as_str()));
                    !group.one_of.is_empty()
                }
            });

            let gone = share_size.is_empty() && size.is_none();
            if let Some(p) = reqs.get_mut(name) {
                p.share_size = share_size;
            }
            if gone {
                dropped.insert(name.clone());
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    for name in &dropped {
        log::info!("Dropping partition '{}' since its size is 0.", name);
        reqs.remove(name);
        local.shift_remove(name);
    }
}

/// Replace every `one_of` group with its first candidate accepted by `exists`
fn resolve_one_of<F>(
    partition: &str,
    items: &mut [RefItem],
    exists: F,
    available: &dyn Fn() -> Vec<String>,
) -> Result<()>
where
    F: Fn(&str) -> bool,
{
    for item in items.iter_mut() {
        if let RefItem::OneOf(group) = item {
            match group.one_of.iter().find(|c| exists(c.as_str())) {
                Some(found) => *item = RefItem::Name(found.clone()),
                None => {
                    return Err(PartitionError::EmptyOneOf {
                        partition: partition.to_string(),
                        candidates: group.one_of.clone(),
                        available: available(),
                    })
                }
            }
        }
    }
    Ok(())
}

/// Canonicalize the constraints of a complex region
///
/// - drops zero-size partitions (see [`remove_all_zero_sized_partitions`])
/// - rejects an empty `placement`
/// - resolves `one_of` groups: placement, `span` and `inside` against the
///   region's partitions plus `start`/`end`, `share_size` against the arena
/// - silently removes references to partitions that do not exist
pub fn remove_irrelevant_requirements(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    dynamic_partition: &str,
) -> Result<()> {
    remove_all_zero_sized_partitions(reqs, local, Some(dynamic_partition));

    for name in local.iter() {
        if let Some(placement) = reqs.get(name).and_then(|p| p.placement.as_ref()) {
            if placement.is_empty() {
                return Err(PartitionError::EmptyPlacement(name.clone()));
            }
        }
    }

    let snapshot = local.clone();
    let is_local = |n: &str| snapshot.contains(n) || n == dynamic_partition;
    let is_reference = |n: &str| is_local(n) || is_sentinel(n);
    let local_available = || {
        let mut names: Vec<String> = snapshot.iter().cloned().collect();
        names.push(END.to_string());
        names.push(START.to_string());
        names
    };

    let system: IndexSet<String> = reqs.names().cloned().collect();
    let system_available = || system.iter().cloned().collect::<Vec<_>>();

    for name in local.iter() {
        let partition = reqs.partition_mut(name)?;

        if let Some(placement) = &mut partition.placement {
            for list in [&mut placement.before, &mut placement.after] {
                resolve_one_of(name, list, is_reference, &local_available)?;
                list.retain(|item| item.as_name().is_some_and(is_reference));
            }
        }
        if let Some(span) = &mut partition.span {
            resolve_one_of(name, span, is_reference, &local_available)?;
            span.retain(|item| item.as_name().is_some_and(is_local));
        }
        resolve_one_of(name, &mut partition.inside, is_reference, &local_available)?;
        partition
            .inside
            .retain(|item| item.as_name().is_some_and(is_local));
        resolve_one_of(
            name,
            &mut partition.share_size,
            |n| system.contains(n) || n == dynamic_partition,
            &system_available,
        )?;
    }

    Ok(())
}

/// Resolve `share_size` groups of a simple region against the arena
pub(crate) fn resolve_share_size(reqs: &mut Requirements, local: &IndexSet<String>) -> Result<()> {
    let system: IndexSet<String> = reqs.names().cloned().collect();
    let system_available = || system.iter().cloned().collect::<Vec<_>>();

    for name in local {
        let partition = reqs.partition_mut(name)?;
        resolve_one_of(
            name,
            &mut partition.share_size,
            |n| system.contains(n),
            &system_available,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::APP;

    fn load(toml: &str) -> (Requirements, IndexSet<String>) {
        let reqs = Requirements::from_toml_str(toml).unwrap();
        let local = reqs.names().cloned().collect();
        (reqs, local)
    }

    fn names(items: &[RefItem]) -> Vec<&str> {
        items.iter().filter_map(RefItem::as_name).collect()
    }

    #[test]
    fn test_zero_size_chain_is_removed() {
        let (mut reqs, mut local) = load(
            r#"
a = { size = 0, placement = { after = "start" } }
b = { share_size = ["a"], placement = { after = ["a", "start"] } }
c = { share_size = { one_of = ["a", "b"] }, placement = { after = ["a", "b", "start"] } }
d = { share_size = { one_of = ["a", "b", "c"] }, placement = { after = ["a", "b", "c", "start"] } }
e = { size = 100, placement = { after = ["a", "b", "c", "d", "start"] } }
"#,
        );
        remove_all_zero_sized_partitions(&mut reqs, &mut local, Some(APP));
        for gone in ["a", "b", "c", "d"] {
            assert!(!reqs.contains(gone), "{gone} should have been dropped");
            assert!(!local.contains(gone));
        }
        assert!(reqs.contains("e"));
    }

    #[test]
    fn test_missing_share_source_without_size_is_dropped() {
        let (mut reqs, mut local) = load(
            r#"
should_not_exist = { share_size = "does_not_exist", placement = { before = "exists" } }
should_exist = { share_size = "does_not_exist", size = 200, placement = { before = "exists" } }
exists = { size = 100, placement = { before = "app" } }
"#,
        );
        remove_all_zero_sized_partitions(&mut reqs, &mut local, Some(APP));
        assert!(!reqs.contains("should_not_exist"));
        let kept = reqs.get("should_exist").unwrap();
        assert!(kept.share_size.is_empty());
        assert_eq!(kept.size, Some(200));
    }

    #[test]
    fn test_dynamic_partition_is_always_a_source() {
        let (mut reqs, mut local) = load(r#"e = { share_size = { one_of = ["x0", "app"] } }"#);
        remove_all_zero_sized_partitions(&mut reqs, &mut local, Some(APP));
        assert!(reqs.contains("e"));
    }

    #[test]
    fn test_one_of_resolution() {
        let (mut reqs, mut local) = load(
            r#"
a = { size = 100, placement = { after = "start" } }
b = { size = 200, placement = { after = ["x0", "x1", "a", "x2"] } }
c = { share_size = { one_of = ["x0", "x1", "b", "a"] }, placement = { after = "b" } }
s = { span = ["a", { one_of = ["x0", "b", "d"] }, { one_of = ["x2", "c", "a"] }] }
f = { size = 10, placement = { before = { one_of = ["x0", "end"] } } }
"#,
        );
        remove_irrelevant_requirements(&mut reqs, &mut local, APP).unwrap();

        let b = reqs.get("b").unwrap().placement.clone().unwrap();
        assert_eq!(names(&b.after), ["a"]);
        assert_eq!(names(&reqs.get("c").unwrap().share_size), ["b"]);
        assert_eq!(names(reqs.get("s").unwrap().span.as_ref().unwrap()), ["a", "b", "c"]);
        let f = reqs.get("f").unwrap().placement.clone().unwrap();
        assert_eq!(f.before_target(), Some("end"));
    }

    #[test]
    fn test_one_of_without_match_is_an_error() {
        let (mut reqs, mut local) = load(
            r#"
app = {}
a = { size = 100, placement = { after = "app" } }
s = { span = ["a", { one_of = ["x0", "x1"] }] }
"#,
        );
        let err = remove_irrelevant_requirements(&mut reqs, &mut local, APP).unwrap_err();
        assert!(matches!(err, PartitionError::EmptyOneOf { ref partition, .. } if partition == "s"));
    }

    #[test]
    fn test_empty_placement_is_an_error() {
        let (mut reqs, mut local) = load(
            r#"
spm = { size = 100, placement = { before = ["app"] } }
invalid = { placement = {} , size = 10 }
app = {}
"#,
        );
        let err = remove_irrelevant_requirements(&mut reqs, &mut local, APP).unwrap_err();
        assert_eq!(err, PartitionError::EmptyPlacement("invalid".into()));
    }

    #[test]
    fn test_dead_references_are_pruned() {
        let (mut reqs, mut local) = load(
            r#"
mcuboot = { size = 200, placement = { before = ["app", "spu"] } }
b0 = { size = 100, placement = { before = ["mcuboot", "app"] } }
d = { size = 10, inside = ["does_not_exist", "b"], placement = { after = ["nothing"] } }
b = { span = ["gone", "d"] }
"#,
        );
        remove_irrelevant_requirements(&mut reqs, &mut local, APP).unwrap();

        let mcuboot = reqs.get("mcuboot").unwrap().placement.clone().unwrap();
        assert_eq!(names(&mcuboot.before), ["app"]);
        let d = reqs.get("d").unwrap();
        assert_eq!(d.inside_target(), Some("b"));
        assert!(d.placement.as_ref().unwrap().after.is_empty());
        assert_eq!(names(reqs.get("b").unwrap().span.as_ref().unwrap()), ["d"]);
    }
}
