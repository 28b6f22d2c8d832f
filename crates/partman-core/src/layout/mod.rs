//! Partition layout resolution
//!
//! Partitions are declared with relative constraints and resolved into
//! absolute addresses per memory region:
//!
//! - [`normalize`] prunes zero-size partitions and dead references and picks
//!   the first existing candidate of every `one_of` group
//! - [`order`] turns before/after/inside/span constraints into one order
//! - [`size`] and [`align`] assign sizes and addresses, sharing sizes and
//!   inserting `EMPTY_n` fillers to satisfy alignment
//! - [`region`] picks a strategy per region and orders the regions
//! - [`verify`] checks the result tiles each region exactly
//!
//! # Example
//!
//! ```ignore
//! let reqs = Requirements::merge_documents([("pm.toml", text.as_str())])?;
//! let layout = resolve_all(reqs, Requirements::new(), &regions)?;
//! for (name, p) in &layout.partitions {
//!     println!("{name}: {:#x}..{:#x}", p.address, p.end_address);
//! }
//! ```

mod types;

pub mod align;
pub mod normalize;
pub mod order;
pub mod output;
pub mod region;
pub mod size;
mod toml;
pub mod verify;

pub use align::{
    carve_dynamic_filler, required_offset, set_addresses_and_align,
    set_sub_partition_address_and_size,
};
pub use normalize::{remove_all_zero_sized_partitions, remove_irrelevant_requirements};
pub use order::{resolve, Ordering};
pub use output::{ResolvedLayout, ResolvedPartition};
pub use region::{dynamic_area, get_region_config, resolve_all, solve_region, sort_regions};
pub use size::set_shared_size;
pub use toml::parse_document;
pub use types::*;
pub use verify::{verify_alignment, verify_layout, verify_tiling};
