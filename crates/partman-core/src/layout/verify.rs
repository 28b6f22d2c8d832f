//! Layout consistency checks

use super::{Align, Partition, Requirements};
use crate::error::{PartitionError, Result};

/// Check that `solution` is laid out back to back over `[start, start + size)`
pub fn verify_layout(reqs: &Requirements, solution: &[String], start: u64, size: u64) -> Result<()> {
    let mut expected = start;
    for name in solution {
        let partition = reqs.partition(name)?;
        let address = partition
            .address
            .ok_or_else(|| PartitionError::Verification(format!("'{}' has no address", name)))?;
        if address != expected {
            return Err(PartitionError::Verification(format!(
                "invalid address {:#x} for '{}', expected {:#x}",
                address, name, expected
            )));
        }
        expected += partition.size.unwrap_or(0);
    }

    if expected != start + size {
        return Err(PartitionError::Verification(format!(
            "layout ends at {:#x}, expected {:#x}",
            expected,
            start + size
        )));
    }
    Ok(())
}

/// Check that the named partitions tile `[base, base + size)` exactly
///
/// Unlike [`verify_layout`] the partitions may be given in any order.
/// Zero sized partitions are allowed anywhere.
pub fn verify_tiling(reqs: &Requirements, names: &[String], base: u64, size: u64) -> Result<()> {
    let mut tiles = Vec::with_capacity(names.len());
    for name in names {
        let partition = reqs.partition(name)?;
        match (partition.address, partition.size) {
            (Some(address), Some(size)) => tiles.push((address, size, name)),
            _ => {
                return Err(PartitionError::Verification(format!(
                    "'{}' was not assigned an address and size",
                    name
                )))
            }
        }
    }
    tiles.sort();

    let mut expected = base;
    for (address, size, name) in tiles {
        if address < expected {
            return Err(PartitionError::Verification(format!(
                "'{}' at {:#x} overlaps the partition ending at {:#x}",
                name, address, expected
            )));
        }
        if address > expected {
            return Err(PartitionError::Verification(format!(
                "gap from {:#x} to {:#x} before '{}'",
                expected, address, name
            )));
        }
        expected = address + size;
    }

    if expected != base + size {
        return Err(PartitionError::Verification(format!(
            "partitions cover up to {:#x}, region ends at {:#x}",
            expected,
            base + size
        )));
    }
    Ok(())
}

/// Check every alignment declared by the partitions in `solution`
///
/// The first partition of a region is pinned to the region start, so its end
/// alignment is met by the filler after it ending on the boundary.
pub fn verify_alignment(reqs: &Requirements, solution: &[String]) -> Result<()> {
    for (i, name) in solution.iter().enumerate() {
        let partition = reqs.partition(name)?;
        let Some(align) = partition.align() else {
            continue;
        };
        let boundary = align.value();
        if boundary == 0 {
            continue;
        }
        let (Some(address), Some(end)) = (partition.address, partition.end_address()) else {
            return Err(PartitionError::Verification(format!("'{}' has no address", name)));
        };

        let (edge, which) = match align {
            Align::Start(_) => (address, "start"),
            Align::End(_) => (end, "end"),
        };
        if edge % boundary == 0 {
            continue;
        }
        let padded = i == 0
            && matches!(align, Align::End(_))
            && solution
                .get(1)
                .and_then(|next| reqs.get(next))
                .and_then(Partition::end_address)
                .is_some_and(|e| e % boundary == 0);
        if !padded {
            return Err(PartitionError::Verification(format!(
                "{} of '{}' at {:#x} is not aligned to {:#x}",
                which, name, edge, boundary
            )));
        }
    }
    Ok(())
}
