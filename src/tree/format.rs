//! Binary subtree format
//!
//! Layout of a `.srsf` subtree buffer, all fields little endian:
//!
//! ```text
//! header   5 x u32   surfel count, surfel-block byte offset, node count,
//!                    primitive-index count, root node id
//! bounds   6 x f32   min.xyz, max.xyz
//! nodes    n x 16 B  packed node records (see tree::node)
//! prims    m x u32   indices into the surfel block
//! surfels  s x 16 B  8 half words: x, y, z, radius, nx, ny, nz, pad
//! colors   s x 4 B   RGBA
//! ```
//!
//! Section offsets are derived from the counts; the surfel-block offset is
//! also stored in the header and cross-checked here. Every header-derived
//! length is validated against the actual buffer before anything is read, so
//! an undersized or corrupt buffer fails with `MalformedTree` instead of
//! reading out of range.

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use crate::surfel::{SurfelStore, COLOR_BYTES, SURFEL_WORDS};
use super::kdtree::TRAVERSAL_STACK;
use super::node::{Children, KdNode, SubtreeId, NODE_BYTES};

/// Header size in bytes
pub const HEADER_BYTES: usize = 20;
/// Bounding box size in bytes
pub const BOUNDS_BYTES: usize = 24;
/// Surfel attribute stride in bytes
pub const SURFEL_BYTES: usize = 16;

/// The five-field subtree header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubtreeHeader {
    pub num_surfels: u32,
    pub surfel_offset: u32,
    pub num_nodes: u32,
    pub num_prim_indices: u32,
    pub root_id: u32,
}

/// A fully decoded and validated subtree, ready to become a tree
#[derive(Debug)]
pub struct DecodedSubtree {
    pub root_id: SubtreeId,
    pub bounds: Aabb,
    pub nodes: Vec<KdNode>,
    pub prim_indices: Vec<u32>,
    pub store: SurfelStore,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let b: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    u32::from_le_bytes(b)
}

fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(data, offset))
}

/// Decode and validate a subtree buffer
pub fn decode_subtree(data: &[u8]) -> Result<DecodedSubtree> {
    if data.len() < HEADER_BYTES + BOUNDS_BYTES {
        return Err(Error::MalformedTree(format!(
            "buffer of {} bytes is smaller than the fixed header",
            data.len()
        )));
    }

    let header = SubtreeHeader {
        num_surfels: read_u32(data, 0),
        surfel_offset: read_u32(data, 4),
        num_nodes: read_u32(data, 8),
        num_prim_indices: read_u32(data, 12),
        root_id: read_u32(data, 16),
    };

    if header.num_nodes == 0 {
        return Err(Error::MalformedTree("empty node table".into()));
    }

    // Derive section offsets in u64 so a hostile header cannot overflow
    let nodes_start = (HEADER_BYTES + BOUNDS_BYTES) as u64;
    let prims_start = nodes_start + header.num_nodes as u64 * NODE_BYTES as u64;
    let surfels_start = prims_start + header.num_prim_indices as u64 * 4;
    let colors_start = surfels_start + header.num_surfels as u64 * SURFEL_BYTES as u64;
    let total = colors_start + header.num_surfels as u64 * COLOR_BYTES as u64;

    if header.surfel_offset as u64 != surfels_start {
        return Err(Error::MalformedTree(format!(
            "surfel block offset {} does not match derived offset {}",
            header.surfel_offset, surfels_start
        )));
    }
    if total > data.len() as u64 {
        return Err(Error::MalformedTree(format!(
            "header describes {} bytes but buffer holds {}",
            total,
            data.len()
        )));
    }

    let bounds = Aabb::new(
        Vec3::new(
            read_f32(data, HEADER_BYTES),
            read_f32(data, HEADER_BYTES + 4),
            read_f32(data, HEADER_BYTES + 8),
        ),
        Vec3::new(
            read_f32(data, HEADER_BYTES + 12),
            read_f32(data, HEADER_BYTES + 16),
            read_f32(data, HEADER_BYTES + 20),
        ),
    );

    let mut nodes = Vec::with_capacity(header.num_nodes as usize);
    for i in 0..header.num_nodes as usize {
        let at = nodes_start as usize + i * NODE_BYTES;
        nodes.push(KdNode::from_words([
            read_u32(data, at),
            read_u32(data, at + 4),
            read_u32(data, at + 8),
            read_u32(data, at + 12),
        ]));
    }

    let mut prim_indices = Vec::with_capacity(header.num_prim_indices as usize);
    for i in 0..header.num_prim_indices as usize {
        prim_indices.push(read_u32(data, prims_start as usize + i * 4));
    }

    let attrib_words = header.num_surfels as usize * SURFEL_WORDS;
    let mut attribs = Vec::with_capacity(attrib_words);
    for i in 0..attrib_words {
        let at = surfels_start as usize + i * 2;
        attribs.push(u16::from_le_bytes([data[at], data[at + 1]]));
    }
    let colors = data[colors_start as usize..total as usize].to_vec();

    validate_structure(&nodes, &prim_indices, header.num_surfels)?;

    Ok(DecodedSubtree {
        root_id: SubtreeId(header.root_id),
        bounds,
        nodes,
        prim_indices,
        store: SurfelStore::from_raw(attribs, colors)?,
    })
}

/// Structural validation of a node table against its primitive and surfel
/// arrays
///
/// Checks, for every node: leaf runs stay inside the primitive-index array,
/// representative surfel indices stay inside the store, local child indices
/// stay inside the table, and the two children agree in externality. Also
/// walks the local tree from the root to bound its depth by the traversal
/// stack and to reject cycles.
pub fn validate_structure(
    nodes: &[KdNode],
    prim_indices: &[u32],
    num_surfels: u32,
) -> Result<()> {
    let num_nodes = nodes.len() as u32;
    for (i, node) in nodes.iter().enumerate() {
        if node.is_leaf() {
            let end = node.prim_offset() as u64 + node.num_prims() as u64;
            if end > prim_indices.len() as u64 {
                return Err(Error::MalformedTree(format!(
                    "leaf {i} run ends at {end}, past the {} primitive indices",
                    prim_indices.len()
                )));
            }
        } else {
            if node.prim_offset() >= num_surfels {
                return Err(Error::MalformedTree(format!(
                    "interior {i} representative surfel {} out of range",
                    node.prim_offset()
                )));
            }
            if node.left_external() != node.right_external() {
                return Err(Error::MalformedTree(format!(
                    "interior {i} mixes an external child with a local one"
                )));
            }
            if !node.left_external()
                && (node.left_child() >= num_nodes || node.right_child() >= num_nodes)
            {
                return Err(Error::MalformedTree(format!(
                    "interior {i} child index out of range ({}, {})",
                    node.left_child(),
                    node.right_child()
                )));
            }
        }
    }

    for (i, &prim) in prim_indices.iter().enumerate() {
        if prim >= num_surfels {
            return Err(Error::MalformedTree(format!(
                "primitive index {prim} at {i} exceeds {num_surfels} surfels"
            )));
        }
    }

    // Depth and cycle check over the local part of the tree
    let mut stack = vec![(0u32, 1usize)];
    let mut visited = 0usize;
    while let Some((id, depth)) = stack.pop() {
        visited += 1;
        if visited > nodes.len() {
            return Err(Error::MalformedTree("node table contains a cycle".into()));
        }
        if depth > TRAVERSAL_STACK {
            return Err(Error::MalformedTree(format!(
                "tree deeper than the {TRAVERSAL_STACK}-entry traversal stack"
            )));
        }
        let node = &nodes[id as usize];
        if !node.is_leaf() {
            if let Children::Local { left, right } = node.children() {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
    }

    Ok(())
}

/// Encode a subtree into the wire format
///
/// Inverse of [`decode_subtree`]; used by the offline splitter and by tests.
pub fn encode_subtree(
    root_id: SubtreeId,
    bounds: &Aabb,
    nodes: &[KdNode],
    prim_indices: &[u32],
    store: &SurfelStore,
) -> Vec<u8> {
    let surfel_offset = HEADER_BYTES
        + BOUNDS_BYTES
        + nodes.len() * NODE_BYTES
        + prim_indices.len() * 4;
    let total = surfel_offset + store.len() * (SURFEL_BYTES + COLOR_BYTES);

    let mut out = Vec::with_capacity(total);
    for v in [
        store.len() as u32,
        surfel_offset as u32,
        nodes.len() as u32,
        prim_indices.len() as u32,
        root_id.0,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in [
        bounds.min.x, bounds.min.y, bounds.min.z,
        bounds.max.x, bounds.max.y, bounds.max.z,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for node in nodes {
        for word in node.words() {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    for prim in prim_indices {
        out.extend_from_slice(&prim.to_le_bytes());
    }
    for word in store.raw_attribs() {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(store.raw_colors());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Axis;
    use crate::surfel::Surfel;

    fn one_leaf_store() -> (Vec<KdNode>, Vec<u32>, SurfelStore) {
        let mut store = SurfelStore::default();
        for i in 0..3 {
            store.push(&Surfel {
                position: Vec3::new(i as f32, 0.0, 0.0),
                radius: 0.5,
                normal: Vec3::Z,
                color: [i as u8, 0, 0],
            });
        }
        let nodes = vec![KdNode::leaf(3, 0)];
        let prims = vec![0, 1, 2];
        (nodes, prims, store)
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let (nodes, prims, store) = one_leaf_store();
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let bytes = encode_subtree(SubtreeId(7), &bounds, &nodes, &prims, &store);

        let decoded = decode_subtree(&bytes).unwrap();
        assert_eq!(decoded.root_id, SubtreeId(7));
        assert_eq!(decoded.bounds, bounds);
        assert_eq!(decoded.nodes, nodes);
        assert_eq!(decoded.prim_indices, prims);
        assert_eq!(decoded.store.len(), 3);
        assert_eq!(decoded.store.position(2), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_undersized_buffer_fails_fast() {
        let (nodes, prims, store) = one_leaf_store();
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let bytes = encode_subtree(SubtreeId(0), &bounds, &nodes, &prims, &store);

        for cut in [0, 10, HEADER_BYTES + BOUNDS_BYTES, bytes.len() - 1] {
            let err = decode_subtree(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, Error::MalformedTree(_)), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn test_mixed_externality_rejected() {
        let mut store = SurfelStore::default();
        store.push(&Surfel {
            position: Vec3::ZERO,
            radius: 1.0,
            normal: Vec3::Z,
            color: [0, 0, 0],
        });
        let mut inner = KdNode::interior(0.0, Axis::X, 0);
        inner.set_left_child(1, false);
        inner.set_right_child(99, true);
        let nodes = vec![inner, KdNode::leaf(0, 0)];

        let bytes = encode_subtree(SubtreeId(0), &Aabb::default(), &nodes, &[], &store);
        let err = decode_subtree(&bytes).unwrap_err();
        assert!(err.to_string().contains("mixes"));
    }

    #[test]
    fn test_out_of_range_primitive_rejected() {
        let (nodes, mut prims, store) = one_leaf_store();
        prims[1] = 17;
        let bytes = encode_subtree(SubtreeId(0), &Aabb::default(), &nodes, &prims, &store);
        assert!(decode_subtree(&bytes).is_err());
    }

    #[test]
    fn test_leaf_run_past_prim_array_rejected() {
        let (_, prims, store) = one_leaf_store();
        let nodes = vec![KdNode::leaf(4, 0)];
        let bytes = encode_subtree(SubtreeId(0), &Aabb::default(), &nodes, &prims, &store);
        assert!(decode_subtree(&bytes).is_err());
    }

    #[test]
    fn test_child_cycle_rejected() {
        let mut store = SurfelStore::default();
        store.push(&Surfel {
            position: Vec3::ZERO,
            radius: 1.0,
            normal: Vec3::Z,
            color: [0, 0, 0],
        });
        let mut inner = KdNode::interior(0.0, Axis::X, 0);
        inner.set_left_child(0, false);
        inner.set_right_child(0, false);
        let nodes = vec![inner];

        let bytes = encode_subtree(SubtreeId(0), &Aabb::default(), &nodes, &[], &store);
        assert!(decode_subtree(&bytes).is_err());
    }
}
