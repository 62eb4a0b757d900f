//! Async subtree fetching with concurrency control

use std::path::{Path, PathBuf};

use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::tree::{KdTree, SubtreeId};

/// Result of one subtree fetch
#[derive(Debug)]
pub enum FetchResult {
    /// Fetched and validated
    Loaded(SubtreeId, KdTree),
    /// Fetch or validation failed; the id may be re-requested
    Failed(SubtreeId, Error),
}

impl FetchResult {
    pub fn id(&self) -> SubtreeId {
        match self {
            FetchResult::Loaded(id, _) => *id,
            FetchResult::Failed(id, _) => *id,
        }
    }
}

/// File name a subtree id is stored under
pub fn subtree_path(base_dir: &Path, id: SubtreeId) -> PathBuf {
    base_dir.join(format!("{id}.srsf"))
}

/// Background fetcher for subtree files
///
/// Requests go over an unbounded channel to a worker task that fans them out
/// to at most `max_concurrent` reads at a time; decoded trees come back over
/// a result channel drained by [`SubtreeLoader::poll_results`].
pub struct SubtreeLoader {
    request_tx: mpsc::UnboundedSender<SubtreeId>,
    result_rx: mpsc::UnboundedReceiver<FetchResult>,
    // Keeps a dedicated runtime alive for the worker when the caller has none
    #[allow(dead_code)]
    runtime: Option<Runtime>,
}

impl SubtreeLoader {
    /// Loader with its own runtime, for callers outside any tokio context
    pub fn new(base_dir: PathBuf, max_concurrent: usize) -> Result<Self> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<SubtreeId>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<FetchResult>();

        let runtime = Runtime::new()?;
        runtime.spawn(async move {
            Self::worker_loop(base_dir, max_concurrent, &mut request_rx, result_tx).await;
        });

        Ok(Self {
            request_tx,
            result_rx,
            runtime: Some(runtime),
        })
    }

    /// Loader spawning its worker on the caller's runtime
    ///
    /// Panics outside a tokio runtime context.
    pub fn with_current_runtime(base_dir: PathBuf, max_concurrent: usize) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<SubtreeId>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<FetchResult>();

        tokio::spawn(async move {
            Self::worker_loop(base_dir, max_concurrent, &mut request_rx, result_tx).await;
        });

        Self {
            request_tx,
            result_rx,
            runtime: None,
        }
    }

    async fn worker_loop(
        base_dir: PathBuf,
        max_concurrent: usize,
        request_rx: &mut mpsc::UnboundedReceiver<SubtreeId>,
        result_tx: mpsc::UnboundedSender<FetchResult>,
    ) {
        let mut active = JoinSet::new();
        let mut queued: Vec<SubtreeId> = Vec::new();

        loop {
            tokio::select! {
                Some(id) = request_rx.recv() => {
                    queued.push(id);
                }

                Some(finished) = active.join_next(), if !active.is_empty() => {
                    match finished {
                        Ok(result) => {
                            let _ = result_tx.send(result);
                        }
                        Err(e) => {
                            log::error!("subtree fetch task panicked: {e}");
                        }
                    }
                }

                // Both channels closed: drain and exit
                else => {
                    if queued.is_empty() && active.is_empty() {
                        break;
                    }
                }
            }

            // Requests arrive in traversal order, which already front-loads
            // the subtrees nearest the viewer
            while active.len() < max_concurrent && !queued.is_empty() {
                let id = queued.remove(0);
                let base_dir = base_dir.clone();
                active.spawn(async move { Self::fetch_task(base_dir, id).await });
            }
        }
    }

    async fn fetch_task(base_dir: PathBuf, id: SubtreeId) -> FetchResult {
        let path = subtree_path(&base_dir, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match KdTree::from_bytes(&bytes) {
                Ok(tree) => FetchResult::Loaded(id, tree),
                Err(e) => FetchResult::Failed(id, e),
            },
            Err(e) => FetchResult::Failed(
                id,
                Error::StreamingUnavailable(format!("{}: {e}", path.display())),
            ),
        }
    }

    /// Queue a fetch. Deduplication and rate limiting happen in the manager;
    /// the loader fetches everything it is handed.
    pub fn request(&self, id: SubtreeId) {
        if self.request_tx.send(id).is_err() {
            log::error!("subtree fetch worker is gone, dropping request for {id}");
        }
    }

    /// Drain all finished fetches without blocking
    pub fn poll_results(&mut self) -> Vec<FetchResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            results.push(result);
        }
        results
    }
}
