//! Volume partitioning and substack adjacency
//!
//! Splits a bounding box into substacks with overlapping halos and decides
//! which substack pairs share a face that must be stitched.

pub mod adjacency;
pub mod partitioner;

pub use adjacency::{stitch_axes, AdjacencyGraph};
pub use partitioner::{num_divs, Partitioner, SubstackSource, MIN_LEFTOVER};
