//! Address assignment and alignment
//!
//! Addresses are assigned from both ends of the region towards the dynamic
//! partition: everything ordered before it is packed upwards from the start,
//! everything after it downwards from the end. A misaligned partition gets
//! an `EMPTY_n` filler next to it and the space is taken from the dynamic
//! partition (and the partitions sharing its size). The walk then starts
//! over until every alignment holds.

use std::collections::HashSet;

use indexmap::IndexSet;

use super::size::{dynamic_size, set_shared_size};
use super::verify::{verify_alignment, verify_layout};
use super::{Align, Ordering, Partition, RefItem, Requirements};
use crate::error::{PartitionError, Result};

/// Upper bound on address assignment passes
///
/// Every pass that does not converge inserts one filler.
pub const MAX_ALIGNMENT_PASSES: usize = 1024;

/// Bytes a partition must move to satisfy `align`
///
/// With `move_up` the partition moves towards higher addresses. Otherwise it
/// moves down, unless it is `pinned` (the first partition of a region), in
/// which case an end alignment is reached by padding after it.
pub fn required_offset(align: Align, start: u64, size: u64, move_up: bool, pinned: bool) -> u64 {
    let boundary = align.value();
    if boundary == 0 {
        return 0;
    }
    let edge = match align {
        Align::Start(_) => start,
        Align::End(_) => start + size,
    };
    let rem = edge % boundary;
    if rem == 0 {
        return 0;
    }

    match align {
        _ if move_up => boundary - rem,
        Align::End(_) if pinned => boundary - rem,
        _ => rem,
    }
}

/// Turn `align_next` into a start alignment on the following partition
fn propagate_align_next(reqs: &mut Requirements, solution: &[String]) -> Result<()> {
    for pair in solution.windows(2) {
        let (previous, name) = (&pair[0], &pair[1]);
        let Some(boundary) = reqs
            .partition(previous)?
            .placement
            .as_ref()
            .and_then(|p| p.align_next)
        else {
            continue;
        };

        let placement = reqs
            .partition_mut(name)?
            .placement
            .get_or_insert_with(Default::default);
        let merged = match placement.align {
            None => Align::Start(boundary),
            Some(Align::End(_)) => {
                return Err(PartitionError::AlignmentConflict {
                    partition: name.clone(),
                    reason: format!(
                        "'{}' sets 'align_next' but '{}' is aligned by its end",
                        previous, name
                    ),
                });
            }
            Some(Align::Start(existing)) if existing % boundary == 0 || boundary % existing == 0 => {
                Align::Start(existing.max(boundary))
            }
            Some(Align::Start(existing)) => {
                return Err(PartitionError::AlignmentConflict {
                    partition: name.clone(),
                    reason: format!(
                        "{:#x} from 'align_next' of '{}' and {:#x} are not multiples of each other",
                        boundary, previous, existing
                    ),
                });
            }
        };
        log::trace!("'{}' aligned to {:?} by '{}'", name, merged, previous);
        placement.align = Some(merged);
    }
    Ok(())
}

/// Carve a filler out of the dynamic partitions to align one placed after
/// the dynamic partition
///
/// The offset is split between the dynamic partitions ordered before
/// `current` (plus `current` itself when its end is aligned); every dynamic
/// partition gives up that share. Returns the address and size of the
/// filler, which belongs right after the last dynamic partition.
pub fn carve_dynamic_filler(
    reqs: &mut Requirements,
    dynamic: &[String],
    current: &str,
    offset: u64,
    move_end: bool,
    solution: &[String],
) -> Result<(u64, u64)> {
    let invalid = |reason: String| PartitionError::DynamicAlignment {
        partition: current.to_string(),
        reason,
    };

    let position = solution
        .iter()
        .position(|n| n == current)
        .ok_or_else(|| PartitionError::UnknownPartition(current.to_string()))?;
    let mut movers = solution[..position]
        .iter()
        .filter(|n| dynamic.contains(*n))
        .count() as u64;
    if move_end {
        movers += 1;
    }

    if movers == 0 {
        return Err(invalid("no partition sharing the dynamic size is placed before it".into()));
    }
    if offset % movers != 0 {
        return Err(invalid(format!(
            "offset {:#x} can not be split evenly between {} partitions",
            offset, movers
        )));
    }
    let reduction = offset / movers;
    let filler = reduction * dynamic.len() as u64;
    if filler % 4 != 0 {
        return Err(invalid(format!(
            "filler of {:#x} bytes is not word aligned",
            filler
        )));
    }
    for name in dynamic {
        if reduction >= reqs.size_of(name) {
            return Err(invalid(format!(
                "reduction of {:#x} bytes does not fit in '{}'",
                reduction, name
            )));
        }
    }

    let last = solution
        .iter()
        .rev()
        .find(|n| dynamic.contains(*n))
        .ok_or_else(|| invalid("no dynamic partition in the order".into()))?;
    let end = reqs
        .partition(last)?
        .end_address()
        .ok_or_else(|| invalid(format!("'{}' has no address", last)))?;
    let address = end
        .checked_sub(filler)
        .ok_or_else(|| invalid(format!("filler of {:#x} bytes does not fit", filler)))?;

    for name in dynamic {
        let partition = reqs.partition_mut(name)?;
        partition.size = partition.size.map(|s| s - reduction);
    }

    Ok((address, filler))
}

fn out_of_space(partition: &str, needed: u64) -> PartitionError {
    PartitionError::AlignmentUnsatisfiable {
        reason: format!(
            "the dynamic partition has no room for {:#x} bytes of alignment for '{}'",
            needed, partition
        ),
    }
}

struct Engine<'a> {
    reqs: &'a mut Requirements,
    local: &'a mut IndexSet<String>,
    dynamic: Vec<String>,
    dynamic_partition: &'a str,
    start: u64,
    size: u64,
    settled: HashSet<String>,
}

impl Engine<'_> {
    fn insert_filler(
        &mut self,
        solution: &mut Vec<String>,
        at: usize,
        next_to: &str,
        address: u64,
        size: u64,
    ) -> Result<()> {
        let region = self.reqs.partition(next_to)?.region.clone();
        let name = self.reqs.next_empty_name();
        log::debug!(
            "Inserting {} ({:#x} bytes at {:#x}) to align '{}'",
            name,
            size,
            address,
            next_to
        );

        let mut filler = Partition::new(region);
        filler.address = Some(address);
        filler.size = Some(size);
        self.reqs.insert(name.clone(), filler);
        self.local.insert(name.clone());
        solution.insert(at, name);
        Ok(())
    }

    /// Take `offset` bytes from the dynamic partitions
    fn shrink_dynamic(&mut self, current: &str, offset: u64) -> Result<()> {
        let count = self.dynamic.len() as u64;
        let share = offset / count;
        let remainder = offset - share * (count - 1);

        for name in &self.dynamic {
            let cut = if name == self.dynamic_partition {
                remainder
            } else {
                share
            };
            let partition = self.reqs.partition_mut(name)?;
            let size = partition
                .size
                .unwrap_or(0)
                .checked_sub(cut)
                .ok_or_else(|| out_of_space(current, offset))?;
            partition.size = Some(size);
        }
        Ok(())
    }

    /// End-align a dynamic partition by handing its last `rem` bytes to a
    /// filler right after it
    fn trim_dynamic_end(
        &mut self,
        solution: &mut Vec<String>,
        at: usize,
        name: &str,
        address: u64,
        size: u64,
        rem: u64,
    ) -> Result<()> {
        if rem >= size {
            return Err(out_of_space(name, rem));
        }
        self.reqs.partition_mut(name)?.size = Some(size - rem);
        self.insert_filler(solution, at + 1, name, address + size - rem, rem)
    }

    fn set_address(&mut self, name: &str, address: u64) -> Result<()> {
        self.reqs.partition_mut(name)?.address = Some(address);
        Ok(())
    }

    /// One walk over the order; returns true if a filler was inserted
    fn pass(&mut self, solution: &mut Vec<String>) -> Result<bool> {
        let dp_index = solution
            .iter()
            .position(|n| n == self.dynamic_partition)
            .ok_or_else(|| PartitionError::UnknownPartition(self.dynamic_partition.to_string()))?;

        let mut address = self.start;
        for i in 0..=dp_index {
            let name = solution[i].clone();
            if i > 0 {
                let previous = self.reqs.partition(&solution[i - 1])?;
                address = previous.address.unwrap_or(0) + previous.size.unwrap_or(0);
            }
            self.set_address(&name, address)?;

            let Some(align) = self.reqs.partition(&name)?.align() else {
                continue;
            };
            if self.settled.contains(&name) {
                continue;
            }
            let size = self.reqs.size_of(&name);

            // Moving a dynamic partition does not move its end, shrinking it does
            if let Align::End(boundary) = align {
                if boundary != 0 && self.dynamic.contains(&name) {
                    let rem = (address + size) % boundary;
                    if rem == 0 {
                        continue;
                    }
                    self.trim_dynamic_end(solution, i, &name, address, size, rem)?;
                    return Ok(true);
                }
            }

            if i == 0 {
                if let Align::Start(boundary) = align {
                    if address % boundary != 0 {
                        return Err(PartitionError::InvalidAlignment {
                            partition: name,
                            reason: format!(
                                "the first partition of a region can not be moved to a {:#x} boundary",
                                boundary
                            ),
                        });
                    }
                    continue;
                }
                let offset = required_offset(align, address, size, false, true);
                if offset != 0 {
                    self.insert_filler(solution, 1, &name, address + size, offset)?;
                    self.shrink_dynamic(&name, offset)?;
                    self.settled.insert(name);
                    return Ok(true);
                }
                continue;
            }

            let offset = required_offset(align, address, size, true, false);
            if offset == 0 {
                continue;
            }
            if name != self.dynamic_partition && self.dynamic.contains(&name) {
                return Err(PartitionError::DynamicAlignment {
                    partition: name,
                    reason: format!(
                        "partitions sharing size with '{}' can not be aligned when placed before it",
                        self.dynamic_partition
                    ),
                });
            }
            self.insert_filler(solution, i, &name, address, offset)?;
            self.set_address(&name, address + offset)?;
            self.shrink_dynamic(&name, offset)?;
            return Ok(true);
        }

        let region_end = self.start + self.size;
        let last = solution.len() - 1;
        for i in (dp_index + 1..=last).rev() {
            let name = solution[i].clone();
            let size = self.reqs.size_of(&name);
            let top = if i == last {
                region_end
            } else {
                self.reqs.partition(&solution[i + 1])?.address.unwrap_or(0)
            };
            let address = top.checked_sub(size).ok_or_else(|| {
                PartitionError::Verification(format!("'{}' does not fit below {:#x}", name, top))
            })?;
            self.set_address(&name, address)?;

            let Some(align) = self.reqs.partition(&name)?.align() else {
                continue;
            };
            let offset = required_offset(align, address, size, false, false);
            if offset == 0 {
                continue;
            }

            if self.dynamic.contains(&name) {
                let move_end = matches!(align, Align::End(_));
                let (filler_address, filler_size) = carve_dynamic_filler(
                    self.reqs,
                    &self.dynamic,
                    &name,
                    offset,
                    move_end,
                    solution.as_slice(),
                )?;
                let after_dynamic = solution
                    .iter()
                    .rposition(|n| self.dynamic.contains(n))
                    .map_or(i + 1, |p| p + 1);
                self.insert_filler(solution, after_dynamic, &name, filler_address, filler_size)?;
            } else {
                let moved = address - offset;
                self.set_address(&name, moved)?;
                self.insert_filler(solution, i + 1, &name, moved + size, offset)?;
                self.shrink_dynamic(&name, offset)?;
            }
            return Ok(true);
        }

        Ok(false)
    }
}

/// Assign sizes and addresses to the ordered partitions of a region
///
/// Resolves `align_next` and `share_size`, gives the dynamic partition the
/// free space and walks the order until every alignment is satisfied. The
/// fillers created on the way are added to the arena, to `local` and to the
/// order. The result is checked with [`verify_layout`] and
/// [`verify_alignment`].
pub fn set_addresses_and_align(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    ordering: &mut Ordering,
    size: u64,
    start: u64,
    dynamic_partition: &str,
) -> Result<()> {
    align_within(
        reqs,
        local,
        ordering,
        size,
        start,
        dynamic_partition,
        MAX_ALIGNMENT_PASSES,
    )
}

fn align_within(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    ordering: &mut Ordering,
    size: u64,
    start: u64,
    dynamic_partition: &str,
    max_passes: usize,
) -> Result<()> {
    propagate_align_next(reqs, &ordering.solution)?;

    let sharers = set_shared_size(
        reqs,
        local,
        &ordering.sub_partitions,
        Some(dynamic_partition),
        size,
    )?;
    let mut dynamic = vec![dynamic_partition.to_string()];
    dynamic.extend(
        sharers
            .into_iter()
            .filter(|s| ordering.solution.contains(s)),
    );

    let free = dynamic_size(reqs, local, Some(dynamic_partition), size)?;
    reqs.partition_mut(dynamic_partition)?.size = Some(free);
    log::debug!("Dynamic partition '{}' gets {:#x} bytes", dynamic_partition, free);

    for name in &ordering.solution {
        if reqs.partition(name)?.size.is_none() {
            return Err(PartitionError::MissingSize(name.clone()));
        }
    }

    let mut engine = Engine {
        reqs,
        local,
        dynamic,
        dynamic_partition,
        start,
        size,
        settled: HashSet::new(),
    };
    for pass in 0..max_passes {
        if !engine.pass(&mut ordering.solution)? {
            log::trace!("Alignment converged after {} passes", pass + 1);
            verify_layout(engine.reqs, &ordering.solution, start, size)?;
            return verify_alignment(engine.reqs, &ordering.solution);
        }
    }

    Err(PartitionError::AlignmentUnsatisfiable {
        reason: format!("no stable layout after {} passes", max_passes),
    })
}

/// Give every container the address and extent of its members
///
/// The extent includes fillers placed between members. The container's
/// `span` is restored to the list it had after normalization.
pub fn set_sub_partition_address_and_size(reqs: &mut Requirements, ordering: &Ordering) -> Result<()> {
    for (name, members) in &ordering.sub_partitions {
        let mut low: Option<u64> = None;
        let mut high: Option<u64> = None;
        for member in members {
            let partition = reqs.partition(member)?;
            let (Some(address), Some(end)) = (partition.address, partition.end_address()) else {
                return Err(PartitionError::Verification(format!(
                    "'{}' of '{}' has no address",
                    member, name
                )));
            };
            low = Some(low.map_or(address, |l| l.min(address)));
            high = Some(high.map_or(end, |h| h.max(end)));
        }

        let (Some(low), Some(high)) = (low, high) else {
            return Err(PartitionError::EmptyContainer(name.clone()));
        };
        if high == low {
            return Err(PartitionError::EmptyContainer(name.clone()));
        }

        let container = reqs.partition_mut(name)?;
        container.address = Some(low);
        container.size = Some(high - low);
        if let Some(orig) = container.orig_span.take() {
            container.span = Some(orig.into_iter().map(RefItem::Name).collect());
        }
    }
    Ok(())
}
