//! Kd-tree queries over a surfel store
//!
//! The tree structure is immutable once constructed (only surfel colors can
//! be painted). All traversals are iterative over an explicit fixed-capacity
//! stack; recursion happens only across subtree boundaries, where a resident
//! external subtree answers its part of the query with its own stack.
//!
//! Traversals never block on streaming: an unresident external subtree
//! contributes its parent's representative surfel as a placeholder and a
//! rate-limited fetch is enqueued, picked up by a later traversal once the
//! streaming manager has spliced the subtree in.

use crate::core::types::{Result, Vec3};
use crate::math::{Aabb, Frustum, Ray};
use crate::surfel::{SurfelBatch, SurfelStore};
use crate::streaming::StreamingManager;
use super::format::{self, validate_structure};
use super::node::{Children, KdNode, SubtreeId};

/// Capacity of the traversal stacks; parse-time validation bounds tree depth
/// by this, so pushes cannot overflow
pub const TRAVERSAL_STACK: usize = 64;

/// LOD error threshold below which a node is rendered as-is instead of being
/// split further. Matches a box subtending roughly 1/20th of its distance.
pub const DEFAULT_ERROR_THRESHOLD: f32 = 0.05;

/// Closest primitive hit by a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Ray parameter; equals world distance for a unit-length direction
    pub t: f32,
    /// World-space hit point
    pub position: Vec3,
    /// Index of the hit surfel
    pub prim: u32,
}

/// One unit of the out-of-core kd-tree: a node table, its primitive-index
/// array, and the surfel store they reference
#[derive(Debug)]
pub struct KdTree {
    root_id: SubtreeId,
    bounds: Aabb,
    nodes: Vec<KdNode>,
    prim_indices: Vec<u32>,
    surfels: SurfelStore,
}

impl KdTree {
    /// Construct from a binary subtree buffer, validating it first
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let decoded = format::decode_subtree(data)?;
        Ok(Self {
            root_id: decoded.root_id,
            bounds: decoded.bounds,
            nodes: decoded.nodes,
            prim_indices: decoded.prim_indices,
            surfels: decoded.store,
        })
    }

    /// Construct from already-decoded parts (the offline builder's path)
    pub fn from_parts(
        root_id: SubtreeId,
        bounds: Aabb,
        nodes: Vec<KdNode>,
        prim_indices: Vec<u32>,
        surfels: SurfelStore,
    ) -> Result<Self> {
        validate_structure(&nodes, &prim_indices, surfels.len() as u32)?;
        Ok(Self {
            root_id,
            bounds,
            nodes,
            prim_indices,
            surfels,
        })
    }

    /// Identifier of this unit's root in the global tree (0 for the whole
    /// tree)
    pub fn root_id(&self) -> SubtreeId {
        self.root_id
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn surfel_count(&self) -> usize {
        self.surfels.len()
    }

    pub fn surfels(&self) -> &SurfelStore {
        &self.surfels
    }

    /// Paint one surfel; the store stages the edit for the next color flush
    pub fn set_color(&mut self, prim: u32, rgb: [u8; 3]) {
        self.surfels.set_color(prim as usize, rgb);
    }

    /// Whether painted colors need re-uploading
    pub fn take_colors_dirty(&mut self) -> bool {
        self.surfels.take_colors_dirty()
    }

    /// Collect one LOD cut of the tree at the given depth
    ///
    /// Leaves above the cut emit their full primitive runs; interior nodes at
    /// the cut emit their single representative surfel. A `level` past the
    /// real tree depth degenerates to a full leaf traversal. Resident
    /// external subtrees continue the cut at `level - depth - 1`; unresident
    /// ones contribute the parent's representative and are requested from
    /// `streaming`.
    pub fn query_level(
        &self,
        level: u32,
        streaming: Option<&StreamingManager>,
        out: &mut SurfelBatch,
    ) {
        let mut stack = [(0u32, 0u32); TRAVERSAL_STACK];
        let mut sp = 0usize;
        let mut cur = 0u32;
        let mut depth = 0u32;

        loop {
            let node = &self.nodes[cur as usize];
            if depth == level || node.is_leaf() {
                self.emit_node(node, out);
            } else {
                match node.children() {
                    Children::Local { left, right } => {
                        stack[sp] = (right, depth + 1);
                        sp += 1;
                        cur = left;
                        depth += 1;
                        continue;
                    }
                    Children::External { left, right } => {
                        let mut missing = false;
                        for id in [left, right] {
                            match streaming.and_then(|s| s.subtree(id)) {
                                Some(sub) => {
                                    sub.query_level(level - depth - 1, streaming, out)
                                }
                                None => {
                                    missing = true;
                                    if let Some(s) = streaming {
                                        s.request(id);
                                    }
                                }
                            }
                        }
                        if missing {
                            // Parent LOD surfel stands in while children load
                            self.surfels.append_to(node.prim_offset() as usize, out);
                        }
                    }
                }
            }

            if sp == 0 {
                break;
            }
            sp -= 1;
            (cur, depth) = stack[sp];
        }
    }

    /// Steady-state per-frame query: select surfels inside the frustum whose
    /// projected footprint warrants their detail level
    ///
    /// A node stops subdividing once `diagonal / eye distance` drops to
    /// `error_threshold` (or it is a leaf). When both halves of a split are
    /// visible, the half nearer the eye is descended first. If the root box
    /// fails the frustum test the whole tree is skipped without touching the
    /// streaming manager.
    pub fn query_frustum(
        &self,
        frustum: &Frustum,
        eye: Vec3,
        error_threshold: f32,
        streaming: Option<&StreamingManager>,
        out: &mut SurfelBatch,
    ) {
        if !frustum.contains_box(&self.bounds) {
            return;
        }

        let mut stack = [(0u32, Aabb::default()); TRAVERSAL_STACK];
        let mut sp = 0usize;
        let mut cur = 0u32;
        let mut bounds = self.bounds;

        loop {
            let node = &self.nodes[cur as usize];
            let err = bounds.diagonal() / bounds.center().distance(eye);
            if err <= error_threshold || node.is_leaf() {
                self.emit_node(node, out);
            } else {
                let axis = node.split_axis();
                let split = node.split_pos();
                let below = bounds.split_below(axis, split);
                let above = bounds.split_above(axis, split);
                let below_visible = frustum.contains_box(&below);
                let above_visible = frustum.contains_box(&above);

                match node.children() {
                    Children::Local { left, right } => {
                        if below_visible && above_visible {
                            // Descend the half nearer the eye first; a tie
                            // goes to the geometrically lower half.
                            let (near, near_bounds, far, far_bounds) =
                                if axis.component(eye) <= split {
                                    (left, below, right, above)
                                } else {
                                    (right, above, left, below)
                                };
                            stack[sp] = (far, far_bounds);
                            sp += 1;
                            cur = near;
                            bounds = near_bounds;
                            continue;
                        } else if below_visible {
                            cur = left;
                            bounds = below;
                            continue;
                        } else if above_visible {
                            cur = right;
                            bounds = above;
                            continue;
                        }
                    }
                    Children::External { left, right } => {
                        let mut missing = false;
                        for (id, visible) in [(left, below_visible), (right, above_visible)] {
                            if !visible {
                                continue;
                            }
                            match streaming.and_then(|s| s.subtree(id)) {
                                Some(sub) => sub.query_frustum(
                                    frustum,
                                    eye,
                                    error_threshold,
                                    streaming,
                                    out,
                                ),
                                None => {
                                    missing = true;
                                    if let Some(s) = streaming {
                                        s.request(id);
                                    }
                                }
                            }
                        }
                        if missing {
                            self.surfels.append_to(node.prim_offset() as usize, out);
                        }
                    }
                }
            }

            if sp == 0 {
                break;
            }
            sp -= 1;
            (cur, bounds) = stack[sp];
        }
    }

    /// Visit every surfel whose center lies within `radius` of `point`
    ///
    /// No-op when the point is outside the root bounds. Operates on resident
    /// geometry only: external subtrees are skipped even when loaded, so a
    /// brush never paints surfels it cannot re-color locally.
    pub fn query_neighbors<F: FnMut(u32)>(&self, point: Vec3, radius: f32, mut visit: F) {
        if !self.bounds.contains_point(point) {
            return;
        }
        let r2 = radius * radius;
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut sp = 0usize;
        let mut cur = 0u32;

        loop {
            let node = &self.nodes[cur as usize];
            if node.is_leaf() {
                let start = node.prim_offset() as usize;
                let end = start + node.num_prims() as usize;
                for &prim in &self.prim_indices[start..end] {
                    if self.surfels.position(prim as usize).distance_squared(point) <= r2 {
                        visit(prim);
                    }
                }
            } else if let Children::Local { left, right } = node.children() {
                let d = node.split_axis().component(point) - node.split_pos();
                if d * d > r2 {
                    // The query sphere stays on one side of the plane
                    cur = if d < 0.0 { left } else { right };
                } else {
                    stack[sp] = right;
                    sp += 1;
                    cur = left;
                }
                continue;
            }

            if sp == 0 {
                break;
            }
            sp -= 1;
            cur = stack[sp];
        }
    }

    /// Find the closest surfel disk hit by a ray
    ///
    /// `direction` need not be normalized, but the returned `t` equals world
    /// distance only when it is. Resident-local like [`Self::query_neighbors`]:
    /// geometry behind unloaded external nodes reports no hit.
    pub fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let ray = Ray::new(origin, direction);
        let (root_min, root_max) = ray.intersects_aabb(&self.bounds)?;

        let mut stack = [(0u32, 0f32, 0f32); TRAVERSAL_STACK];
        let mut sp = 0usize;
        let mut cur = 0u32;
        let mut cur_min = root_min;
        let mut cur_max = root_max;
        let mut best: Option<RayHit> = None;

        'traverse: loop {
            let node = &self.nodes[cur as usize];
            if node.is_leaf() {
                let start = node.prim_offset() as usize;
                let end = start + node.num_prims() as usize;
                for &prim in &self.prim_indices[start..end] {
                    let i = prim as usize;
                    let limit = best.as_ref().map_or(f32::INFINITY, |h| h.t);
                    if let Some(t) = intersect_disk(
                        &ray,
                        limit,
                        self.surfels.position(i),
                        self.surfels.normal(i),
                        self.surfels.radius(i),
                    ) {
                        best = Some(RayHit {
                            t,
                            position: ray.at(t),
                            prim,
                        });
                    }
                }
            } else if let Children::Local { left, right } = node.children() {
                let axis = node.split_axis();
                let split = node.split_pos();
                let o = axis.component(origin);
                let d = axis.component(direction);
                // Near child is the one containing the origin; an origin on
                // the plane goes by the direction sign.
                let (near, far) = if o < split || (o == split && d <= 0.0) {
                    (left, right)
                } else {
                    (right, left)
                };
                if d == 0.0 {
                    // Parallel ray never crosses the plane
                    cur = near;
                    continue;
                }
                let t_plane = (split - o) / d;
                if t_plane > cur_max || t_plane <= 0.0 {
                    cur = near;
                } else if t_plane < cur_min {
                    cur = far;
                } else {
                    stack[sp] = (far, t_plane, cur_max);
                    sp += 1;
                    cur = near;
                    cur_max = t_plane;
                }
                continue;
            }

            // Pop; skip frames that cannot contain a closer hit than the
            // best one found so far
            loop {
                if sp == 0 {
                    break 'traverse;
                }
                sp -= 1;
                let (node, frame_min, frame_max) = stack[sp];
                if best.as_ref().map_or(true, |h| h.t >= frame_min) {
                    cur = node;
                    cur_min = frame_min;
                    cur_max = frame_max;
                    continue 'traverse;
                }
            }
        }

        best
    }

    /// Append a node's surfels: the full run for a leaf, the single
    /// representative for an interior node at its LOD cut
    fn emit_node(&self, node: &KdNode, out: &mut SurfelBatch) {
        if node.is_leaf() {
            let start = node.prim_offset() as usize;
            let end = start + node.num_prims() as usize;
            for &prim in &self.prim_indices[start..end] {
                self.surfels.append_to(prim as usize, out);
            }
        } else {
            self.surfels.append_to(node.prim_offset() as usize, out);
        }
    }
}

/// Ray-disk intersection: plane hit inside `(0, t_max)`, then radial check
fn intersect_disk(ray: &Ray, t_max: f32, center: Vec3, normal: Vec3, radius: f32) -> Option<f32> {
    let denom = ray.direction.dot(normal);
    if denom.abs() < 1e-8 {
        return None;
    }
    let t = (center - ray.origin).dot(normal) / denom;
    if t > 0.0 && t < t_max && ray.at(t).distance(center) <= radius {
        Some(t)
    } else {
        None
    }
}
