//! Resident-set management for streamed subtrees

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::tree::{KdTree, SubtreeId};
use super::loader::{FetchResult, SubtreeLoader};

/// Default cap on concurrent fetches
pub const MAX_IN_FLIGHT: usize = 8;

/// Streaming source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Directory holding the subtree files
    pub base_dir: PathBuf,
    /// Cap on fetches in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    MAX_IN_FLIGHT
}

impl StreamingConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    /// Read a JSON config file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

/// Splice notification returned by [`StreamingManager::poll`]
#[derive(Debug)]
pub enum LoadEvent {
    /// The subtree became resident this poll
    Loaded(SubtreeId),
    /// The fetch failed; the id is requestable again
    Failed(SubtreeId, Error),
}

/// Owns the resident subtrees and the fetch pipeline
///
/// Queries hold the manager by shared borrow: `subtree` answers resident
/// lookups and `request` enqueues fetches for misses, deduplicated and capped
/// behind a mutex. `poll` is the only place the resident set changes, so
/// subtree borrows handed out during one traversal stay valid for its whole
/// duration.
///
/// Resident subtrees are never evicted; the set only grows.
pub struct StreamingManager {
    resident: HashMap<SubtreeId, KdTree>,
    in_flight: Mutex<HashSet<SubtreeId>>,
    loader: SubtreeLoader,
    max_in_flight: usize,
}

impl StreamingManager {
    /// Manager with a loader on its own runtime
    pub fn new(config: StreamingConfig) -> Result<Self> {
        let loader = SubtreeLoader::new(config.base_dir.clone(), config.max_in_flight)?;
        Ok(Self::with_loader(loader, config.max_in_flight))
    }

    /// Manager whose loader runs on the caller's tokio runtime
    pub fn with_current_runtime(config: StreamingConfig) -> Self {
        let loader =
            SubtreeLoader::with_current_runtime(config.base_dir.clone(), config.max_in_flight);
        Self::with_loader(loader, config.max_in_flight)
    }

    fn with_loader(loader: SubtreeLoader, max_in_flight: usize) -> Self {
        Self {
            resident: HashMap::new(),
            in_flight: Mutex::new(HashSet::new()),
            loader,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Resident lookup; `None` means not fetched yet (or fetch still running)
    pub fn subtree(&self, id: SubtreeId) -> Option<&KdTree> {
        self.resident.get(&id)
    }

    pub fn is_resident(&self, id: SubtreeId) -> bool {
        self.resident.contains_key(&id)
    }

    pub fn is_pending(&self, id: SubtreeId) -> bool {
        self.pending().contains(&id)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Fetches currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }

    /// Ask for a subtree to be fetched
    ///
    /// Returns `false` when the subtree is already resident, already in
    /// flight, or the in-flight cap is reached; a capped request is simply
    /// re-issued by whichever later traversal still misses the subtree.
    pub fn request(&self, id: SubtreeId) -> bool {
        if self.resident.contains_key(&id) {
            return false;
        }
        let mut pending = self.pending();
        if pending.contains(&id) || pending.len() >= self.max_in_flight {
            return false;
        }
        pending.insert(id);
        drop(pending);

        log::debug!("requesting subtree {id}");
        self.loader.request(id);
        true
    }

    /// Splice finished fetches into the resident set
    ///
    /// Failed fetches clear their in-flight marker too, so the next traversal
    /// that needs the subtree retries it.
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let results = self.loader.poll_results();
        let mut events = Vec::with_capacity(results.len());
        for result in results {
            self.pending().remove(&result.id());
            match result {
                FetchResult::Loaded(id, tree) => {
                    log::info!(
                        "subtree {id} resident: {} nodes, {} surfels",
                        tree.node_count(),
                        tree.surfel_count()
                    );
                    self.resident.insert(id, tree);
                    events.push(LoadEvent::Loaded(id));
                }
                FetchResult::Failed(id, err) => {
                    log::warn!("subtree {id} fetch failed: {err}");
                    events.push(LoadEvent::Failed(id, err));
                }
            }
        }
        events
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<SubtreeId>> {
        // A panic mid-insert leaves the set usable, so poisoning is benign
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::surfel::{Surfel, SurfelBatch};
    use crate::tree::TreeBuilder;
    use std::time::Duration;

    fn test_config(dir: &Path) -> StreamingConfig {
        StreamingConfig::new(dir)
    }

    #[test]
    fn test_request_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StreamingManager::new(test_config(dir.path())).unwrap();

        assert!(mgr.request(SubtreeId(1)));
        assert!(mgr.is_pending(SubtreeId(1)));
        assert!(!mgr.request(SubtreeId(1)));
        assert_eq!(mgr.in_flight(), 1);
    }

    #[test]
    fn test_request_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StreamingManager::new(test_config(dir.path())).unwrap();

        let accepted = (1..=10)
            .filter(|&i| mgr.request(SubtreeId(i)))
            .count();
        assert_eq!(accepted, MAX_IN_FLIGHT);
        assert_eq!(mgr.in_flight(), MAX_IN_FLIGHT);
        assert!(!mgr.request(SubtreeId(11)));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = StreamingManager::with_current_runtime(test_config(dir.path()));

        assert!(mgr.request(SubtreeId(7)));
        let mut failed = false;
        for _ in 0..100 {
            if mgr
                .poll()
                .iter()
                .any(|e| matches!(e, LoadEvent::Failed(SubtreeId(7), _)))
            {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed);
        assert!(!mgr.is_pending(SubtreeId(7)));
        assert!(mgr.request(SubtreeId(7)));
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streaming.json");
        std::fs::write(&path, r#"{"base_dir": "/data/cloud"}"#).unwrap();

        let config = StreamingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/data/cloud"));
        assert_eq!(config.max_in_flight, MAX_IN_FLIGHT);

        assert!(StreamingConfig::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    fn grid_surfels(n: usize) -> Vec<Surfel> {
        (0..n)
            .map(|i| Surfel {
                position: Vec3::new((i % 8) as f32, (i / 8) as f32, 0.0),
                radius: 0.5,
                normal: Vec3::Z,
                color: [i as u8, 0, 0],
            })
            .collect()
    }

    #[tokio::test]
    async fn test_streamed_tree_converges_to_full_detail() {
        let dir = tempfile::tempdir().unwrap();
        let built = TreeBuilder::new()
            .min_prims(2)
            .build(&grid_surfels(64))
            .unwrap();
        built.write_subtrees(dir.path(), 2).unwrap();

        let root_bytes = std::fs::read(dir.path().join("0.srsf")).unwrap();
        let root = KdTree::from_bytes(&root_bytes).unwrap();
        let mut mgr = StreamingManager::with_current_runtime(test_config(dir.path()));

        // First pass sees placeholders for every unresident external subtree
        let mut batch = SurfelBatch::new();
        root.query_level(60, Some(&mgr), &mut batch);
        let first = batch.len();
        assert!(first > 0);
        assert!(first < 64);

        // Repeated query/poll rounds pull the whole hierarchy in
        let mut full = first;
        for _ in 0..500 {
            mgr.poll();
            batch.clear();
            root.query_level(60, Some(&mgr), &mut batch);
            full = batch.len();
            if full == 64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(full, 64);
        assert!(mgr.resident_count() > 0);
    }
}
