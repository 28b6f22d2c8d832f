//! Ordering solver
//!
//! Turns the before/after/inside/span constraints of one region into a
//! single order of atomic partitions. Containers (partitions with `span`)
//! are not part of the order; they are checked to cover a contiguous run of
//! it and get their address and size from their members later.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use super::normalize::remove_irrelevant_requirements;
use super::{Partition, Placement, RefItem, Requirements, DEFAULT_REGION, END, START};
use crate::error::{PartitionError, Result};

/// The order of a region's partitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering {
    /// Atomic partitions from the lowest address to the highest
    pub solution: Vec<String>,
    /// Containers and their flattened (atomic) members
    pub sub_partitions: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Before,
    After,
}

impl Direction {
    fn target(self, placement: &Placement) -> Option<&str> {
        match self {
            Direction::Before => placement.before_target(),
            Direction::After => placement.after_target(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Before => f.write_str("before"),
            Direction::After => f.write_str("after"),
        }
    }
}

fn placement_of<'a>(reqs: &'a Requirements, name: &str) -> Option<&'a Placement> {
    reqs.get(name).and_then(|p| p.placement.as_ref())
}

/// Order the partitions of one region
///
/// Normalizes the region first (see
/// [`remove_irrelevant_requirements`](super::remove_irrelevant_requirements)),
/// then merges `inside` into container spans, drops empty containers and
/// places every partition that has a `before` or `after` target. The
/// dynamic partition is created in the arena if it does not exist yet.
pub fn resolve(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    dynamic_partition: &str,
) -> Result<Ordering> {
    remove_irrelevant_requirements(reqs, local, dynamic_partition)?;

    if !reqs.contains(dynamic_partition) {
        let region = local
            .first()
            .and_then(|n| reqs.get(n))
            .map(|p| p.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        reqs.insert(dynamic_partition, Partition::new(region));
    }
    local.insert(dynamic_partition.to_string());

    let mut atomic = Vec::new();
    let mut containers = Vec::new();
    for name in local.iter() {
        if name != dynamic_partition && reqs.partition(name)?.is_container() {
            containers.push(name.clone());
        } else {
            atomic.push(name.clone());
        }
    }

    // `inside` is only honoured on atomic partitions
    for name in &atomic {
        let target = match reqs.partition(name)?.inside_target() {
            Some(target) => target.to_string(),
            None => continue,
        };
        if !containers.contains(&target) {
            return Err(PartitionError::InvalidReference {
                partition: name.clone(),
                target,
                reason: "'inside' must name a container partition (one with 'span')".into(),
            });
        }
        if let Some(span) = &mut reqs.partition_mut(&target)?.span {
            span.push(RefItem::Name(name.clone()));
        }
    }

    let spans = clean_sub_partitions(reqs, local, &containers)?;

    let mut sub_partitions = IndexMap::new();
    for name in spans.keys() {
        let mut leaves = Vec::new();
        flatten(name, &spans, &mut Vec::new(), &mut leaves)?;
        leaves.retain(|leaf| atomic.contains(leaf));
        sub_partitions.insert(name.clone(), leaves);
    }

    let mut queue = solving_queue(reqs, &atomic, &sub_partitions);

    for name in &queue {
        if let Some(placement) = placement_of(reqs, name) {
            if placement.before_target() == Some(START) {
                return Err(PartitionError::PlacedOutsideBounds {
                    partition: name.clone(),
                    direction: "before",
                    sentinel: START,
                });
            }
            if placement.after_target() == Some(END) {
                return Err(PartitionError::PlacedOutsideBounds {
                    partition: name.clone(),
                    direction: "after",
                    sentinel: END,
                });
            }
        }
    }

    disambiguate(reqs, &queue)?;

    let mut solution = vec![
        START.to_string(),
        dynamic_partition.to_string(),
        END.to_string(),
    ];
    while !queue.is_empty() {
        let remaining = queue.len();
        solve_direction(reqs, &sub_partitions, &mut queue, &mut solution, Direction::Before);
        solve_direction(reqs, &sub_partitions, &mut queue, &mut solution, Direction::After);

        if queue.len() == remaining {
            let stuck: IndexMap<&str, Option<&Placement>> = queue
                .iter()
                .map(|n| (n.as_str(), placement_of(reqs, n)))
                .collect();
            return Err(PartitionError::Unsolvable {
                unsolved: format!("{:#?}", stuck),
            });
        }
    }
    solution.retain(|n| n != START && n != END);

    for (name, leaves) in &sub_partitions {
        let missing: Vec<String> = leaves
            .iter()
            .filter(|leaf| !solution.contains(*leaf))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PartitionError::SpanNotPlaced {
                partition: name.clone(),
                missing,
            });
        }

        let indices: Vec<usize> = leaves
            .iter()
            .filter_map(|leaf| solution.iter().position(|s| s == leaf))
            .collect();
        if let (Some(min), Some(max)) = (indices.iter().min(), indices.iter().max()) {
            if max - min + 1 != indices.len() {
                return Err(PartitionError::SpanNotContiguous {
                    partition: name.clone(),
                    span: leaves.clone(),
                    solution: solution.clone(),
                });
            }
        }
    }

    if let Some(unplaced) = atomic.iter().find(|n| !solution.contains(*n)) {
        return Err(PartitionError::Unplaced(unplaced.clone()));
    }

    log::debug!("Solved order: {:?}", solution);
    Ok(Ordering {
        solution,
        sub_partitions,
    })
}

/// Drop containers with nothing in them and back up the remaining spans
fn clean_sub_partitions(
    reqs: &mut Requirements,
    local: &mut IndexSet<String>,
    containers: &[String],
) -> Result<IndexMap<String, Vec<String>>> {
    let mut spans: IndexMap<String, Vec<String>> = IndexMap::new();
    for name in containers {
        let mut members: Vec<String> = Vec::new();
        for member in reqs.partition(name)?.span_names() {
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
        }
        spans.insert(name.clone(), members);
    }

    // A container holding only dropped containers is empty too
    let mut empty: IndexSet<String> = IndexSet::new();
    loop {
        let found = empty.len();
        for (name, members) in &spans {
            if !empty.contains(name) && members.iter().all(|m| empty.contains(m)) {
                empty.insert(name.clone());
            }
        }
        if empty.len() == found {
            break;
        }
    }

    for name in &empty {
        log::info!("Dropping partition '{}' since it is empty.", name);
        spans.shift_remove(name);
        reqs.remove(name);
        local.shift_remove(name);
    }

    for (name, members) in spans.iter_mut() {
        members.retain(|m| !empty.contains(m));
        reqs.partition_mut(name)?.orig_span = Some(members.clone());
    }

    Ok(spans)
}

fn flatten(
    name: &str,
    spans: &IndexMap<String, Vec<String>>,
    stack: &mut Vec<String>,
    leaves: &mut Vec<String>,
) -> Result<()> {
    if stack.iter().any(|s| s == name) {
        return Err(PartitionError::CircularSpan(name.to_string()));
    }
    stack.push(name.to_string());

    if let Some(members) = spans.get(name) {
        for member in members {
            if spans.contains_key(member) {
                flatten(member, spans, stack, leaves)?;
            } else if !leaves.contains(member) {
                leaves.push(member.clone());
            }
        }
    }

    stack.pop();
    Ok(())
}

/// Free-standing partitions first, then container members with the
/// shortest containers last, so that members end up next to each other
fn solving_queue(
    reqs: &Requirements,
    atomic: &[String],
    sub_partitions: &IndexMap<String, Vec<String>>,
) -> Vec<String> {
    let unsorted: Vec<&String> = atomic
        .iter()
        .filter(|n| placement_of(reqs, n).is_some_and(Placement::is_relative))
        .collect();

    let mut by_length: Vec<&Vec<String>> = sub_partitions.values().collect();
    by_length.sort_by_key(|span| span.len());

    let mut members: Vec<String> = Vec::new();
    for span in by_length {
        let mut front: Vec<String> = span
            .iter()
            .filter(|p| unsorted.contains(p) && !members.contains(*p))
            .cloned()
            .collect();
        front.append(&mut members);
        members = front;
    }

    let mut queue: Vec<String> = unsorted
        .into_iter()
        .filter(|p| !members.contains(*p))
        .cloned()
        .collect();
    queue.extend(members);
    queue
}

/// Chain partitions with identical placement in name order
fn disambiguate(reqs: &mut Requirements, queue: &[String]) -> Result<()> {
    let mut groups: IndexMap<Placement, Vec<String>> = IndexMap::new();
    for name in queue {
        if let Some(placement) = placement_of(reqs, name) {
            groups.entry(placement.clone()).or_default().push(name.clone());
        }
    }

    for (_, mut names) in groups {
        if names.len() < 2 {
            continue;
        }
        names.sort();
        for pair in names.windows(2) {
            let placement = reqs
                .partition_mut(&pair[0])?
                .placement
                .get_or_insert_with(Placement::default);
            placement.before = vec![RefItem::Name(pair[1].clone())];
            placement.after.clear();
        }
    }
    Ok(())
}

fn anchor_index(
    current: &str,
    solution: &[String],
    sub_partitions: &IndexMap<String, Vec<String>>,
    direction: Direction,
) -> Option<usize> {
    if let Some(index) = solution.iter().position(|s| s == current) {
        return Some(index);
    }
    let span = sub_partitions.get(current)?;
    match direction {
        Direction::Before => solution.iter().position(|s| span.contains(s)),
        Direction::After => solution.iter().rposition(|s| span.contains(s)),
    }
}

fn solve_direction(
    reqs: &Requirements,
    sub_partitions: &IndexMap<String, Vec<String>>,
    unsolved: &mut Vec<String>,
    solution: &mut Vec<String>,
    direction: Direction,
) {
    let pool: Vec<String> = solution
        .iter()
        .chain(sub_partitions.keys())
        .cloned()
        .collect();

    let mut index = 0;
    let mut current = match pool.first() {
        Some(first) => first.clone(),
        None => return,
    };

    loop {
        let dependent = unsolved.iter().position(|n| {
            placement_of(reqs, n).and_then(|p| direction.target(p)) == Some(current.as_str())
        });

        if let Some(position) = dependent {
            if let Some(anchor) = anchor_index(&current, solution.as_slice(), sub_partitions, direction) {
                let name = unsolved.remove(position);
                let at = match direction {
                    Direction::Before => anchor,
                    Direction::After => anchor + 1,
                };
                log::trace!("Placing '{}' {} '{}'", name, direction, current);
                solution.insert(at, name.clone());
                current = name;
                continue;
            }
        }

        index += 1;
        match pool.get(index) {
            Some(next) => current = next.clone(),
            None => break,
        }
    }
}
