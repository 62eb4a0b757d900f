//! The out-of-core surfel kd-tree

pub mod node;
pub mod format;
pub mod build;
pub mod kdtree;

pub use node::{Children, KdNode, SubtreeId};
pub use format::{decode_subtree, encode_subtree, DecodedSubtree, SubtreeHeader};
pub use build::{BuiltTree, TreeBuilder};
pub use kdtree::{KdTree, RayHit, DEFAULT_ERROR_THRESHOLD, TRAVERSAL_STACK};
