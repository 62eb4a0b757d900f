//! Surfel attribute storage and query accumulators

pub mod store;
pub mod batch;

pub use store::{Surfel, SurfelStore, SURFEL_WORDS, COLOR_BYTES};
pub use batch::{AttribBuffer, SurfelBatch};
