//! partman-core - Partition layout resolver
//!
//! This crate places named partitions inside physical memory regions
//! (internal flash, RAM, external flash). Partitions are described by
//! relative constraints: which partition they come before or after, which
//! container they live inside, which boundary they must be aligned to and
//! whose size they share. The resolver turns those constraints into absolute
//! addresses and sizes that exactly tile each region.
//!
//! The solver is pure: it never touches the filesystem and the same input
//! always produces the same layout.
//!
//! # Example
//!
//! ```ignore
//! use partman_core::layout::{resolve_all, RegionConfig, Requirements};
//!
//! let reqs = Requirements::from_toml_str(r#"
//! mcuboot = { size = 0xc000, placement = { before = "app" } }
//! "#)?;
//! let regions = vec![RegionConfig::complex("flash_primary", 0x100000)];
//! let layout = resolve_all(reqs, Requirements::new(), &regions)?;
//! println!("{}", layout.to_toml_string());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod layout;

pub use error::{PartitionError, Result};
