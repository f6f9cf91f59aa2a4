//! Background scene loading.
//!
//! [`AsyncLoader`] wraps a [`SceneBackend`] and tracks the requests it has
//! issued. Each request is described by a [`LoadHandle`] whose status only
//! ever moves `Idle -> Loading -> {Loaded, Failed, Cancelled}`.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::error::{FlowError, FlowResult};
use crate::payload::{Metadata, ScenePath};

/// Identifier a backend hands out for an issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answer of a single non-blocking backend query.
#[derive(Debug)]
pub enum BackendPoll<R> {
    InProgress(f32),
    Loaded(R),
    Failed(FlowError),
}

/// The engine side of scene loading.
///
/// Requests are expected to run off-thread; `poll` must never block.
pub trait SceneBackend: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// Whether `path` names something this backend knows how to load.
    fn exists(&self, path: &ScenePath) -> bool;

    /// Loads `path` on the calling thread.
    fn load(&mut self, path: &ScenePath) -> FlowResult<Self::Resource>;

    /// Issues a background request for `path`.
    fn request(&mut self, path: &ScenePath) -> FlowResult<RequestId>;

    fn poll(&mut self, id: RequestId) -> BackendPoll<Self::Resource>;

    fn cancel(&mut self, id: RequestId);
}

/// Supplies the deterministic seed recorded on each load.
pub trait SeedSource: Send + Sync {
    fn snapshot_seed(&mut self) -> u64;
}

/// Seed source backed by a seeded [`StdRng`], reproducible from one root seed.
pub struct RngSeedSource {
    rng: StdRng,
}

impl RngSeedSource {
    pub fn new(root_seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(root_seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl SeedSource for RngSeedSource {
    fn snapshot_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    Loaded,
    Failed,
    Cancelled,
}

impl LoadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Failed | Self::Cancelled)
    }
}

/// State of one background load.
#[derive(Debug)]
pub struct LoadHandle<R> {
    pub scene_path: ScenePath,
    pub status: LoadStatus,
    pub progress: f32,
    pub error: Option<FlowError>,
    pub result: Option<R>,
    pub seed_snapshot: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    request: Option<RequestId>,
}

impl<R> LoadHandle<R> {
    pub fn new(scene_path: ScenePath, metadata: Metadata) -> Self {
        Self {
            scene_path,
            status: LoadStatus::Idle,
            progress: 0.0,
            error: None,
            result: None,
            seed_snapshot: None,
            created_at: Utc::now(),
            metadata,
            request: None,
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request
    }

    /// Moves the loaded resource out; only succeeds once.
    pub fn take_result(&mut self) -> Option<R> {
        self.result.take()
    }

    fn fail(&mut self, error: FlowError) {
        self.status = LoadStatus::Failed;
        self.error = Some(error);
    }
}

pub struct AsyncLoader<B: SceneBackend> {
    backend: B,
    pending: HashMap<RequestId, ScenePath>,
    seeds: Option<Box<dyn SeedSource>>,
}

impl<B: SceneBackend> AsyncLoader<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pending: HashMap::new(),
            seeds: None,
        }
    }

    pub fn with_seed_source(mut self, seeds: impl SeedSource + 'static) -> Self {
        self.seeds = Some(Box::new(seeds));
        self
    }

    pub(crate) fn set_seed_source(&mut self, seeds: Option<Box<dyn SeedSource>>) {
        self.seeds = seeds;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Issues a background load.
    ///
    /// The returned handle is `Loading` on success. When the request could not
    /// even be issued it is already `Failed` and carries the reason.
    pub fn start(&mut self, path: &str, metadata: Metadata) -> LoadHandle<B::Resource> {
        let scene_path = match ScenePath::new(path) {
            Ok(scene_path) => scene_path,
            Err(err) => {
                // Keep the raw input visible on the failed handle.
                let mut handle = LoadHandle::new(ScenePath::unchecked(path), metadata);
                handle.fail(err);
                return handle;
            }
        };

        let mut handle = LoadHandle::new(scene_path, metadata);
        if !self.backend.exists(&handle.scene_path) {
            handle.fail(FlowError::NotFound(handle.scene_path.to_string()));
            return handle;
        }

        match self.backend.request(&handle.scene_path) {
            Ok(id) => {
                handle.seed_snapshot = self.seeds.as_mut().map(|seeds| seeds.snapshot_seed());
                handle.request = Some(id);
                handle.status = LoadStatus::Loading;
                self.pending.insert(id, handle.scene_path.clone());
                debug!(scene = %handle.scene_path, request = %id, "load requested");
            }
            Err(err) => {
                warn!(scene = %handle.scene_path, error = %err, "load request rejected");
                handle.fail(err);
            }
        }
        handle
    }

    /// Queries the backend once and advances the handle's state.
    pub fn poll(&mut self, handle: &mut LoadHandle<B::Resource>) {
        if handle.status != LoadStatus::Loading {
            return;
        }
        let Some(id) = handle.request else {
            return;
        };

        match self.backend.poll(id) {
            BackendPoll::InProgress(progress) => {
                if progress.is_finite() {
                    handle.progress = progress.clamp(0.0, 1.0).max(handle.progress);
                }
            }
            BackendPoll::Loaded(resource) => {
                handle.progress = 1.0;
                handle.result = Some(resource);
                handle.status = LoadStatus::Loaded;
                self.pending.remove(&id);
                debug!(scene = %handle.scene_path, request = %id, "load finished");
            }
            BackendPoll::Failed(err) => {
                handle.fail(err);
                self.pending.remove(&id);
                debug!(scene = %handle.scene_path, request = %id, "load failed");
            }
        }
    }

    /// Cancels a loading handle. Safe to call on a handle in any state.
    pub fn cancel(&mut self, handle: &mut LoadHandle<B::Resource>) {
        if handle.status != LoadStatus::Loading {
            return;
        }
        if let Some(id) = handle.request {
            self.backend.cancel(id);
            self.pending.remove(&id);
        }
        handle.status = LoadStatus::Cancelled;
        debug!(scene = %handle.scene_path, "load cancelled");
    }

    pub fn is_active(&self, handle: &LoadHandle<B::Resource>) -> bool {
        handle.status == LoadStatus::Loading
            && handle
                .request
                .is_some_and(|id| self.pending.contains_key(&id))
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Cancels every outstanding request.
    pub fn clear(&mut self) {
        for (id, path) in self.pending.drain() {
            debug!(scene = %path, request = %id, "cancelling on clear");
            self.backend.cancel(id);
        }
    }

    /// Synchronous load used by the immediate navigation path.
    pub fn load_now(&mut self, path: &ScenePath) -> FlowResult<B::Resource> {
        if !self.backend.exists(path) {
            return Err(FlowError::NotFound(path.to_string()));
        }
        self.backend.load(path)
    }
}
