//! Axis-aligned bounding box and split axes

use crate::core::types::Vec3;

/// One of the three world axes a kd-node can split along
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// Decode from the low bits of a node word. Values 0-2 are split axes;
    /// 3 is the leaf tag and never reaches here.
    pub fn from_index(i: u32) -> Axis {
        match i {
            0 => Axis::X,
            1 => Axis::Y,
            _ => Axis::Z,
        }
    }

    /// Component of `v` along this axis
    pub fn component(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }
}

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An empty box that any `expand` will snap to
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get half-extents
    pub fn half_extent(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Length of the box diagonal, the numerator of the LOD error metric
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Check if point is inside AABB (boundary counts as inside)
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Halve the box at a kd split plane, keeping the side below the plane
    pub fn split_below(&self, axis: Axis, pos: f32) -> Aabb {
        let mut b = *self;
        match axis {
            Axis::X => b.max.x = pos,
            Axis::Y => b.max.y = pos,
            Axis::Z => b.max.z = pos,
        }
        b
    }

    /// Halve the box at a kd split plane, keeping the side above the plane
    pub fn split_above(&self, axis: Axis, pos: f32) -> Aabb {
        let mut b = *self;
        match axis {
            Axis::X => b.min.x = pos,
            Axis::Y => b.min.y = pos,
            Axis::Z => b.min.z = pos,
        }
        b
    }

    /// Longest axis of the box, the split axis the median builder picks
    pub fn longest_axis(&self) -> Axis {
        let s = self.size();
        if s.x >= s.y && s.x >= s.z {
            Axis::X
        } else if s.y >= s.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(aabb.center(), Vec3::splat(0.5));
        assert_eq!(aabb.size(), Vec3::ONE);
        assert!((aabb.diagonal() - 3f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(!aabb.contains_point(Vec3::splat(2.0)));
    }

    #[test]
    fn test_split_at_plane() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        let below = aabb.split_below(Axis::X, 0.5);
        let above = aabb.split_above(Axis::X, 0.5);
        assert_eq!(below.max.x, 0.5);
        assert_eq!(below.min, Vec3::ZERO);
        assert_eq!(above.min.x, 0.5);
        assert_eq!(above.max, Vec3::splat(2.0));
        assert_eq!(below.merged(&above), aabb);
    }

    #[test]
    fn test_longest_axis() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 3.0, 2.0));
        assert_eq!(aabb.longest_axis(), Axis::Y);
    }

    #[test]
    fn test_expand_from_empty() {
        let mut aabb = Aabb::empty();
        aabb.expand(Vec3::new(1.0, -2.0, 3.0));
        aabb.expand(Vec3::new(-1.0, 2.0, 0.0));
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 3.0));
    }
}
