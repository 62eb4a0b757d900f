//! Offline median-split kd-tree construction
//!
//! The builder produces the whole tree in one flat node table, appending a
//! representative LOD surfel for every interior node as it recurses. A built
//! tree can then be carved into fixed-depth subtree files for streaming:
//! each subtree gets its own node table, primitive indices, and surfel copy,
//! with cross-subtree edges recorded as external child references.

use std::collections::HashSet;
use std::path::Path;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use crate::surfel::{Surfel, SurfelStore};
use super::format::encode_subtree;
use super::kdtree::{KdTree, TRAVERSAL_STACK};
use super::node::{KdNode, SubtreeId};

/// Left-child indices carry 29 usable bits in a node word
const MAX_SURFELS: usize = 1 << 29;

/// Default leaf cutoff; splitting stops once a run fits one batch page
pub const DEFAULT_MIN_PRIMS: usize = 128;

/// Configurable median-split builder
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    min_prims: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            min_prims: DEFAULT_MIN_PRIMS,
        }
    }

    /// Leaf cutoff: runs at or under this size are not split further
    pub fn min_prims(mut self, min_prims: usize) -> Self {
        self.min_prims = min_prims.max(1);
        self
    }

    /// Build the full tree over the input surfels
    ///
    /// Input surfels keep their indices in the resulting store; interior
    /// representatives are appended after them.
    pub fn build(&self, surfels: &[Surfel]) -> Result<BuiltTree> {
        if surfels.len() > MAX_SURFELS {
            return Err(Error::MalformedTree(format!(
                "{} surfels exceed the node index range",
                surfels.len()
            )));
        }

        let mut store = SurfelStore::default();
        let mut bounds = Aabb::empty();
        for s in surfels {
            store.push(s);
            bounds.expand(s.position - Vec3::splat(s.radius));
            bounds.expand(s.position + Vec3::splat(s.radius));
        }
        if surfels.is_empty() {
            bounds = Aabb::default();
        }

        // Depth cap for the usual kd heuristic, kept under the traversal
        // stack so built trees always pass structural validation
        let n = surfels.len().max(1) as f32;
        let max_depth = (8.0 + 1.3 * n.log2()) as usize;
        let max_depth = max_depth.min(TRAVERSAL_STACK - 1);

        let mut state = BuildState {
            min_prims: self.min_prims,
            max_depth,
            nodes: Vec::new(),
            node_bounds: Vec::new(),
            prim_indices: Vec::new(),
            store,
        };
        let prims: Vec<u32> = (0..surfels.len() as u32).collect();
        state.build_node(prims, bounds, 0);
        log::info!(
            "built tree: {} surfels, {} nodes, depth cap {}",
            surfels.len(),
            state.nodes.len(),
            max_depth
        );

        Ok(BuiltTree {
            bounds,
            nodes: state.nodes,
            node_bounds: state.node_bounds,
            prim_indices: state.prim_indices,
            store: state.store,
        })
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct BuildState {
    min_prims: usize,
    max_depth: usize,
    nodes: Vec<KdNode>,
    node_bounds: Vec<Aabb>,
    prim_indices: Vec<u32>,
    store: SurfelStore,
}

impl BuildState {
    /// Append the subtree over `prims` and return its root index
    fn build_node(&mut self, prims: Vec<u32>, bounds: Aabb, depth: usize) -> u32 {
        if prims.len() <= self.min_prims || depth >= self.max_depth {
            return self.push_leaf(prims, bounds);
        }

        // Median split on the longest axis of the surfel centroids
        let mut centroid_bounds = Aabb::empty();
        for &p in &prims {
            centroid_bounds.expand(self.store.position(p as usize));
        }
        let axis = centroid_bounds.longest_axis();
        let mut coords: Vec<f32> = prims
            .iter()
            .map(|&p| axis.component(self.store.position(p as usize)))
            .collect();
        coords.sort_by(f32::total_cmp);
        let split_pos = coords[coords.len() / 2];

        let (left_prims, right_prims): (Vec<u32>, Vec<u32>) = prims
            .iter()
            .copied()
            .partition(|&p| axis.component(self.store.position(p as usize)) < split_pos);
        if left_prims.is_empty() || right_prims.is_empty() {
            // Degenerate distribution, all centroids at the split plane
            return self.push_leaf(prims, bounds);
        }

        let rep = self.store.len() as u32;
        let lod = self.representative(&prims, &bounds);
        self.store.push(&lod);

        let idx = self.nodes.len();
        self.nodes.push(KdNode::interior(split_pos, axis, rep));
        self.node_bounds.push(bounds);

        let left = self.build_node(left_prims, bounds.split_below(axis, split_pos), depth + 1);
        self.nodes[idx].set_left_child(left, false);
        let right = self.build_node(right_prims, bounds.split_above(axis, split_pos), depth + 1);
        self.nodes[idx].set_right_child(right, false);
        idx as u32
    }

    fn push_leaf(&mut self, prims: Vec<u32>, bounds: Aabb) -> u32 {
        let offset = self.prim_indices.len() as u32;
        let count = prims.len() as u32;
        self.prim_indices.extend(prims);
        self.nodes.push(KdNode::leaf(count, offset));
        self.node_bounds.push(bounds);
        (self.nodes.len() - 1) as u32
    }

    /// Average surfel standing in for a whole node at a coarse LOD cut, sized
    /// to cover the node's footprint
    fn representative(&self, prims: &[u32], bounds: &Aabb) -> Surfel {
        let mut position = Vec3::ZERO;
        let mut normal = Vec3::ZERO;
        let mut color = [0f32; 3];
        for &p in prims {
            let i = p as usize;
            position += self.store.position(i);
            normal += self.store.normal(i);
            let c = self.store.color(i);
            for k in 0..3 {
                color[k] += c[k] as f32;
            }
        }
        let inv = 1.0 / prims.len() as f32;
        let normal = (normal * inv).try_normalize().unwrap_or(Vec3::Z);
        Surfel {
            position: position * inv,
            radius: bounds.half_extent().max_element() * 0.5,
            normal,
            color: [
                (color[0] * inv) as u8,
                (color[1] * inv) as u8,
                (color[2] * inv) as u8,
            ],
        }
    }
}

/// A fully built tree plus the per-node bounds the subtree splitter needs
#[derive(Debug)]
pub struct BuiltTree {
    bounds: Aabb,
    nodes: Vec<KdNode>,
    node_bounds: Vec<Aabb>,
    prim_indices: Vec<u32>,
    store: SurfelStore,
}

impl BuiltTree {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Hand the whole tree over as a single in-core unit
    pub fn into_tree(self) -> Result<KdTree> {
        KdTree::from_parts(
            SubtreeId(0),
            self.bounds,
            self.nodes,
            self.prim_indices,
            self.store,
        )
    }

    /// Carve the tree into encoded subtree files, one per `subtree_depth`
    /// levels
    ///
    /// Subtree ids are global node indices, so the group rooted at node 0 is
    /// the entry file the viewer loads first. Both children of a node always
    /// land on the same side of a cut, keeping child externality uniform.
    pub fn split_subtrees(&self, subtree_depth: usize) -> Result<Vec<(SubtreeId, Vec<u8>)>> {
        let subtree_depth = subtree_depth.max(1);
        let mut files = Vec::new();
        let mut todo = vec![0u32];

        while let Some(group_root) = todo.pop() {
            // Collect `subtree_depth` whole levels below the group root
            let mut members = HashSet::new();
            let mut level = vec![group_root];
            for _ in 0..subtree_depth {
                let mut next = Vec::new();
                for &n in &level {
                    members.insert(n);
                    let node = &self.nodes[n as usize];
                    if !node.is_leaf() {
                        next.push(node.left_child());
                        next.push(node.right_child());
                    }
                }
                level = next;
            }
            todo.extend(&level);

            let mut nodes = Vec::new();
            let mut prim_indices = Vec::new();
            let mut store = SurfelStore::default();
            self.rebuild(group_root, &members, &mut nodes, &mut prim_indices, &mut store);

            let bytes = encode_subtree(
                SubtreeId(group_root),
                &self.node_bounds[group_root as usize],
                &nodes,
                &prim_indices,
                &store,
            );
            log::debug!(
                "subtree {group_root}: {} nodes, {} surfels, {} bytes",
                nodes.len(),
                store.len(),
                bytes.len()
            );
            files.push((SubtreeId(group_root), bytes));
        }
        Ok(files)
    }

    /// Write the split subtrees into `dir` under their streaming names
    pub fn write_subtrees(&self, dir: &Path, subtree_depth: usize) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for (id, bytes) in self.split_subtrees(subtree_depth)? {
            std::fs::write(dir.join(format!("{id}.srsf")), bytes)?;
        }
        Ok(())
    }

    /// Re-index the group's nodes into a standalone subtree, copying the
    /// surfels it references and rewriting out-of-group children as external
    fn rebuild(
        &self,
        current: u32,
        members: &HashSet<u32>,
        nodes: &mut Vec<KdNode>,
        prim_indices: &mut Vec<u32>,
        store: &mut SurfelStore,
    ) -> u32 {
        let node = &self.nodes[current as usize];
        if node.is_leaf() {
            let offset = prim_indices.len() as u32;
            let start = node.prim_offset() as usize;
            for &p in &self.prim_indices[start..start + node.num_prims() as usize] {
                prim_indices.push(store.len() as u32);
                store.push(&self.store.get(p as usize));
            }
            nodes.push(KdNode::leaf(node.num_prims(), offset));
            return (nodes.len() - 1) as u32;
        }

        let rep = store.len() as u32;
        store.push(&self.store.get(node.prim_offset() as usize));
        let idx = nodes.len();
        nodes.push(KdNode::interior(node.split_pos(), node.split_axis(), rep));

        // The full tree is all-local, so children are plain indices here
        let (left, right) = (node.left_child(), node.right_child());
        if members.contains(&left) {
            let local = self.rebuild(left, members, nodes, prim_indices, store);
            nodes[idx].set_left_child(local, false);
            let local_right = self.rebuild(right, members, nodes, prim_indices, store);
            nodes[idx].set_right_child(local_right, false);
        } else {
            nodes[idx].set_left_child(left, true);
            nodes[idx].set_right_child(right, true);
        }
        idx as u32
    }
}
