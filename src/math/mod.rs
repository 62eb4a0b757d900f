//! Geometric primitives for tree traversal

pub mod aabb;
pub mod ray;
pub mod frustum;

pub use aabb::{Aabb, Axis};
pub use ray::Ray;
pub use frustum::{Frustum, Plane};
