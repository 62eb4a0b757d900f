//! Compact kd-node records
//!
//! Each node is four u32 words, packed the way the offline builder writes
//! them:
//!
//! - word 0: split position as f32 bits (interior only). Reading it goes
//!   through a float reinterpretation of the same storage.
//! - word 1: offset of the leaf's primitive run, or for interior nodes the
//!   index of the representative LOD surfel used as a streaming placeholder.
//! - word 2: `right_child << 1 | right_external` (interior only).
//! - word 3: leaf: `num_prims << 2 | 3`; interior:
//!   `left_child << 3 | left_external << 2 | split_axis`.
//!
//! The low two bits of word 3 tag the node: values 0-2 are the split axis of
//! an interior node, 3 marks a leaf.

use bytemuck::{Pod, Zeroable};

use crate::math::Axis;

/// Bytes per node record on the wire and in memory
pub const NODE_BYTES: usize = 16;

const LEAF_TAG: u32 = 3;

/// Stable identifier of an externally stored subtree
///
/// Derived from the subtree root's node index in the global tree, so it is
/// unique across the whole hierarchy and maps directly to a fetchable
/// resource name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubtreeId(pub u32);

impl std::fmt::Display for SubtreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two children of an interior node
///
/// The builder never mixes a local child with an external one; parse-time
/// validation rejects such records, so the mixed state has no variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Children {
    /// Both children are records in the same node table
    Local { left: u32, right: u32 },
    /// Both children are roots of separately fetched subtrees
    External { left: SubtreeId, right: SubtreeId },
}

/// One packed node record
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct KdNode {
    words: [u32; 4],
}

impl KdNode {
    /// Leaf over `num_prims` primitives starting at `prim_offset` in the
    /// primitive-index array
    pub fn leaf(num_prims: u32, prim_offset: u32) -> Self {
        Self {
            words: [0, prim_offset, 0, LEAF_TAG | (num_prims << 2)],
        }
    }

    /// Interior node; children are attached afterwards by the builder
    pub fn interior(split_pos: f32, axis: Axis, rep_surfel: u32) -> Self {
        Self {
            words: [split_pos.to_bits(), rep_surfel, 0, axis as u32],
        }
    }

    pub fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    pub fn is_leaf(&self) -> bool {
        self.words[3] & 3 == LEAF_TAG
    }

    /// Split axis; meaningful only for interior nodes
    pub fn split_axis(&self) -> Axis {
        Axis::from_index(self.words[3] & 3)
    }

    /// Split position, read through the float view of word 0
    pub fn split_pos(&self) -> f32 {
        f32::from_bits(self.words[0])
    }

    /// Leaf: offset of the primitive run. Interior: index of the
    /// representative LOD surfel.
    pub fn prim_offset(&self) -> u32 {
        self.words[1]
    }

    /// Number of primitives in a leaf's run
    pub fn num_prims(&self) -> u32 {
        self.words[3] >> 2
    }

    pub fn left_child(&self) -> u32 {
        self.words[3] >> 3
    }

    pub fn left_external(&self) -> bool {
        self.words[3] & 4 != 0
    }

    pub fn right_child(&self) -> u32 {
        self.words[2] >> 1
    }

    pub fn right_external(&self) -> bool {
        self.words[2] & 1 != 0
    }

    /// Decode the child pair of an interior node
    ///
    /// Relies on parse-time validation having rejected mixed externality.
    pub fn children(&self) -> Children {
        debug_assert!(!self.is_leaf());
        debug_assert_eq!(self.left_external(), self.right_external());
        if self.left_external() {
            Children::External {
                left: SubtreeId(self.left_child()),
                right: SubtreeId(self.right_child()),
            }
        } else {
            Children::Local {
                left: self.left_child(),
                right: self.right_child(),
            }
        }
    }

    pub fn set_left_child(&mut self, left: u32, external: bool) {
        self.words[3] = (self.words[3] & 3) | (left << 3) | if external { 4 } else { 0 };
    }

    pub fn set_right_child(&mut self, right: u32, external: bool) {
        self.words[2] = (right << 1) | u32::from(external);
    }
}

impl std::fmt::Debug for KdNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_leaf() {
            f.debug_struct("Leaf")
                .field("prim_offset", &self.prim_offset())
                .field("num_prims", &self.num_prims())
                .finish()
        } else {
            f.debug_struct("Interior")
                .field("axis", &self.split_axis())
                .field("split_pos", &self.split_pos())
                .field("rep_surfel", &self.prim_offset())
                .field("left", &(self.left_child(), self.left_external()))
                .field("right", &(self.right_child(), self.right_external()))
                .finish()
        }
    }
}
