//! Size sharing and dynamic partition sizing

use indexmap::{IndexMap, IndexSet};

use super::{Partition, RefItem, Requirements, DEFAULT_REGION};
use crate::error::{PartitionError, Result};

fn region_name(reqs: &Requirements, local: &IndexSet<String>) -> String {
    local
        .iter()
        .find_map(|n| reqs.get(n))
        .map(|p| p.region.clone())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Free space left to the dynamic partition
///
/// `total_size` minus every sized atomic partition of the region other than
/// the dynamic partition itself.
pub(crate) fn dynamic_size(
    reqs: &Requirements,
    local: &IndexSet<String>,
    dynamic_partition: Option<&str>,
    total_size: u64,
) -> Result<u64> {
    let used: u64 = local
        .iter()
        .filter(|n| Some(n.as_str()) != dynamic_partition)
        .filter_map(|n| reqs.get(n))
        .filter(|p| !p.is_container())
        .filter_map(|p| p.size)
        .sum();

    total_size
        .checked_sub(used)
        .ok_or_else(|| PartitionError::DoesNotFit {
            region: region_name(reqs, local),
            required: used,
            available: total_size,
        })
}

/// Follow a `share_size` chain to the partition that owns the size
///
/// Stops early at a partition of another region that already has a size.
fn size_source(reqs: &Requirements, local: &IndexSet<String>, name: &str) -> Result<String> {
    let mut chain = vec![name.to_string()];
    let mut current = name.to_string();

    while let Some(next) = reqs.get(&current).and_then(Partition::share_target) {
        let resolved_elsewhere =
            current != name && !local.contains(&current) && reqs.size_of(&current) > 0;
        if resolved_elsewhere {
            break;
        }
        let seen = chain.iter().any(|c| c == next);
        chain.push(next.to_string());
        if seen {
            return Err(PartitionError::CircularShareSize(chain.join(" -> ")));
        }
        current = next.to_string();
    }

    Ok(current)
}

struct Sizer<'a> {
    reqs: &'a Requirements,
    spans: &'a IndexMap<String, Vec<String>>,
    dynamic_partition: Option<&'a str>,
    dynamic: u64,
}

impl Sizer<'_> {
    fn spans_dynamic(&self, name: &str) -> bool {
        let Some(dp) = self.dynamic_partition else {
            return false;
        };
        if name == dp {
            return true;
        }
        match self.spans.get(name) {
            Some(members) => members.iter().any(|m| m == dp),
            None => self
                .reqs
                .get(name)
                .is_some_and(|p| p.span_names().any(|m| m == dp)),
        }
    }

    fn size_of(&self, name: &str, stack: &mut Vec<String>) -> Result<u64> {
        if Some(name) == self.dynamic_partition {
            return Ok(self.dynamic);
        }
        if stack.iter().any(|s| s == name) {
            return Err(PartitionError::CircularSpan(name.to_string()));
        }

        let members: Vec<String> = match (self.spans.get(name), self.reqs.get(name)) {
            (Some(members), _) => members.clone(),
            (None, Some(p)) if p.is_container() && p.size.is_none() => {
                p.span_names().map(str::to_string).collect()
            }
            (None, Some(p)) => return Ok(p.size.unwrap_or(0)),
            (None, None) => return Ok(0),
        };

        stack.push(name.to_string());
        let mut total = 0;
        for member in &members {
            total += self.size_of(member, stack)?;
        }
        stack.pop();
        Ok(total)
    }

    fn shared_size(&self, source: &str) -> Result<u64> {
        let size = self.size_of(source, &mut Vec::new())?;
        if self.spans_dynamic(source) {
            let sharers = self.reqs.get(source).map(|p| p.sharers).unwrap_or(0);
            Ok(size / (u64::from(sharers) + 1))
        } else {
            Ok(size)
        }
    }
}

/// Resolve `share_size` for the partitions of a region
///
/// Every sharer gets its `share_size` collapsed to the ultimate source and
/// the source's sharer count is updated. Sharers of the dynamic partition,
/// or of a container spanning it, split the free space evenly with it; they
/// are sized together after everything else and returned. All other sharers
/// copy their source's size.
pub fn set_shared_size(
    reqs: &mut Requirements,
    local: &IndexSet<String>,
    spans: &IndexMap<String, Vec<String>>,
    dynamic_partition: Option<&str>,
    total_size: u64,
) -> Result<Vec<String>> {
    for partition in reqs.values_mut() {
        partition.sharers = 0;
    }

    let mut sharers: Vec<(String, String)> = Vec::new();
    for name in local {
        if reqs.get(name).and_then(Partition::share_target).is_none() {
            continue;
        }
        let source = size_source(reqs, local, name)?;
        if let Some(p) = reqs.get_mut(&source) {
            p.sharers += 1;
        }
        reqs.partition_mut(name)?.share_size = vec![RefItem::Name(source.clone())];
        sharers.push((name.clone(), source));
    }

    let mut dynamic_sharers = Vec::new();
    let mut static_sharers = Vec::new();
    {
        let sizer = Sizer {
            reqs,
            spans,
            dynamic_partition,
            dynamic: 0,
        };
        for (name, source) in sharers {
            if sizer.spans_dynamic(&source) {
                dynamic_sharers.push((name, source));
            } else {
                static_sharers.push((name, source));
            }
        }
    }

    for (name, source) in &static_sharers {
        let size = Sizer {
            reqs,
            spans,
            dynamic_partition,
            dynamic: 0,
        }
        .shared_size(source)?;
        log::debug!("'{}' shares size with '{}': {:#x}", name, source, size);
        reqs.partition_mut(name)?.size = Some(size);
    }

    if dynamic_sharers.is_empty() {
        return Ok(Vec::new());
    }

    let dynamic = dynamic_size(reqs, local, dynamic_partition, total_size)?;
    let sizer = Sizer {
        reqs,
        spans,
        dynamic_partition,
        dynamic,
    };
    let mut new_sizes = Vec::with_capacity(dynamic_sharers.len());
    for (name, source) in &dynamic_sharers {
        new_sizes.push((name.clone(), sizer.shared_size(source)?));
    }

    // Committed together so every sharer sees the same free space
    for (name, size) in &new_sizes {
        log::debug!("'{}' shares dynamic size: {:#x}", name, size);
        reqs.partition_mut(name)?.size = Some(*size);
    }

    Ok(new_sizes.into_iter().map(|(name, _)| name).collect())
}
