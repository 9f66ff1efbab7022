//! Merge resolution: global id offsets and the canonical body remap

mod remap;
mod resolver;

pub use remap::GlobalRemap;
pub use resolver::{assign_offsets, MergeResolver};
