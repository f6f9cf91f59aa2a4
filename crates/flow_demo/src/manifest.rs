//! Scene manifests on disk, loaded on a tokio runtime.
//!
//! Each scene is a `<name>.ron` file under the scene root. Background
//! requests stream the file in fixed steps so progress is observable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use scene_flow::{BackendPoll, FlowError, FlowResult, RequestId, SceneBackend, ScenePath};

const LOAD_STEPS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Simulated streaming time for background loads.
    #[serde(default)]
    pub load_ms: u64,
    /// Scenes reachable from here, informational only.
    #[serde(default)]
    pub exits: Vec<String>,
}

impl SceneManifest {
    pub fn parse(scene: &str, source: &str) -> FlowResult<Self> {
        ron::from_str(source).map_err(|err| FlowError::cannot_open(scene, err.to_string()))
    }
}

struct PendingLoad {
    progress: watch::Receiver<f32>,
    result: oneshot::Receiver<FlowResult<SceneManifest>>,
    task: JoinHandle<()>,
}

pub struct ManifestBackend {
    root: PathBuf,
    runtime: Runtime,
    pending: HashMap<RequestId, PendingLoad>,
    next_id: u64,
}

impl ManifestBackend {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("scene-loader")
            .enable_time()
            .build()?;
        Ok(Self {
            root: root.into(),
            runtime,
            pending: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest file for `path`. Only plain relative names resolve, so a
    /// scene can never point outside the scene root.
    fn file_for(&self, path: &ScenePath) -> Option<PathBuf> {
        let relative = PathBuf::from(format!("{path}.ron"));
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            debug!(scene = %path, "scene path leaves the scene root");
            return None;
        }
        Some(self.root.join(relative))
    }
}

async fn stream_manifest(
    scene: String,
    file: PathBuf,
    progress: watch::Sender<f32>,
) -> FlowResult<SceneManifest> {
    let source = tokio::fs::read_to_string(&file)
        .await
        .map_err(|err| FlowError::cannot_open(scene.as_str(), err.to_string()))?;
    let manifest = SceneManifest::parse(&scene, &source)?;

    let step = Duration::from_millis(manifest.load_ms / u64::from(LOAD_STEPS));
    for done in 1..=LOAD_STEPS {
        tokio::time::sleep(step).await;
        // receiver gone means the request was cancelled
        if progress.send(done as f32 / LOAD_STEPS as f32).is_err() {
            break;
        }
    }
    Ok(manifest)
}

impl SceneBackend for ManifestBackend {
    type Resource = SceneManifest;

    fn exists(&self, path: &ScenePath) -> bool {
        self.file_for(path).is_some_and(|file| file.is_file())
    }

    fn load(&mut self, path: &ScenePath) -> FlowResult<SceneManifest> {
        let file = self
            .file_for(path)
            .ok_or_else(|| FlowError::NotFound(path.to_string()))?;
        let source = std::fs::read_to_string(file)
            .map_err(|err| FlowError::cannot_open(path.as_str(), err.to_string()))?;
        SceneManifest::parse(path.as_str(), &source)
    }

    fn request(&mut self, path: &ScenePath) -> FlowResult<RequestId> {
        let file = self
            .file_for(path)
            .ok_or_else(|| FlowError::NotFound(path.to_string()))?;
        self.next_id += 1;
        let id = RequestId(self.next_id);

        let (progress_tx, progress_rx) = watch::channel(0.0);
        let (result_tx, result_rx) = oneshot::channel();
        let scene = path.to_string();

        let task = self.runtime.spawn(async move {
            let result = stream_manifest(scene, file, progress_tx).await;
            let _ = result_tx.send(result);
        });

        self.pending.insert(
            id,
            PendingLoad {
                progress: progress_rx,
                result: result_rx,
                task,
            },
        );
        debug!(scene = %path, request = %id, "manifest load spawned");
        Ok(id)
    }

    fn poll(&mut self, id: RequestId) -> BackendPoll<SceneManifest> {
        let Some(load) = self.pending.get_mut(&id) else {
            return BackendPoll::Failed(FlowError::cannot_open(id.to_string(), "unknown request"));
        };

        match load.result.try_recv() {
            Ok(result) => {
                self.pending.remove(&id);
                match result {
                    Ok(manifest) => BackendPoll::Loaded(manifest),
                    Err(err) => BackendPoll::Failed(err),
                }
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                let progress = *load.progress.borrow();
                trace!(request = %id, progress, "manifest still loading");
                BackendPoll::InProgress(progress)
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending.remove(&id);
                BackendPoll::Failed(FlowError::cannot_open(
                    id.to_string(),
                    "load task ended without a result",
                ))
            }
        }
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(load) = self.pending.remove(&id) {
            load.task.abort();
            debug!(request = %id, "manifest load aborted");
        }
    }
}
