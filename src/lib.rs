//! Splatkd - out-of-core kd-tree index for streaming surfel point clouds

pub mod core;
pub mod math;
pub mod surfel;
pub mod tree;
pub mod streaming;
