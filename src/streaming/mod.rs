//! Out-of-core subtree streaming
//!
//! A [`StreamingManager`] owns the resident set of fetched subtrees and a
//! background [`SubtreeLoader`] doing the async file reads. Traversals consult
//! the manager through a shared borrow, enqueueing rate-limited fetch requests
//! for subtrees they find missing; the application calls
//! [`StreamingManager::poll`] between frames to splice finished loads into the
//! resident set.

pub mod loader;
pub mod manager;

pub use loader::{subtree_path, FetchResult, SubtreeLoader};
pub use manager::{LoadEvent, StreamingConfig, StreamingManager, MAX_IN_FLIGHT};
