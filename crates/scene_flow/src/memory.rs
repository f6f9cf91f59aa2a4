//! In-memory [`SceneBackend`] used by tests and headless tools.
//!
//! Scenes are registered up front. A background request completes after a
//! configurable number of polls, so tests can step through `Loading` frames
//! deterministically.

use std::collections::HashMap;

use crate::error::{FlowError, FlowResult};
use crate::loader::{BackendPoll, RequestId, SceneBackend};
use crate::payload::{PayloadValue, ScenePath};

/// What a loaded in-memory scene resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryResource {
    pub scene_path: ScenePath,
    pub content: PayloadValue,
}

#[derive(Debug, Clone)]
pub struct MemoryScene {
    polls: u32,
    failure: Option<String>,
    stalled: bool,
    content: PayloadValue,
}

impl MemoryScene {
    /// A scene whose background load finishes on the `polls`-th poll.
    pub fn new(polls: u32) -> Self {
        Self {
            polls: polls.max(1),
            failure: None,
            stalled: false,
            content: PayloadValue::Null,
        }
    }

    /// Loads of this scene report `CannotOpen` with `reason`.
    pub fn failing_load(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Background loads never complete.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn with_content(mut self, content: impl Into<PayloadValue>) -> Self {
        self.content = content.into();
        self
    }
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug)]
struct Request {
    path: ScenePath,
    polled: u32,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    scenes: HashMap<String, MemoryScene>,
    requests: HashMap<RequestId, Request>,
    next_id: u64,
    cancelled: usize,
    sync_loads: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scene(mut self, path: impl Into<String>, scene: MemoryScene) -> Self {
        self.insert_scene(path, scene);
        self
    }

    pub fn insert_scene(&mut self, path: impl Into<String>, scene: MemoryScene) {
        self.scenes.insert(path.into(), scene);
    }

    pub fn remove_scene(&mut self, path: &str) -> Option<MemoryScene> {
        self.scenes.remove(path)
    }

    /// Number of `cancel` calls that hit a live request.
    pub fn cancelled_requests(&self) -> usize {
        self.cancelled
    }

    pub fn open_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn sync_loads(&self) -> usize {
        self.sync_loads
    }

    fn resolve(&self, path: &ScenePath) -> FlowResult<MemoryResource> {
        let scene = self
            .scenes
            .get(path.as_str())
            .ok_or_else(|| FlowError::NotFound(path.to_string()))?;
        if let Some(reason) = &scene.failure {
            return Err(FlowError::cannot_open(path.as_str(), reason.clone()));
        }
        Ok(MemoryResource {
            scene_path: path.clone(),
            content: scene.content.clone(),
        })
    }
}

impl SceneBackend for MemoryBackend {
    type Resource = MemoryResource;

    fn exists(&self, path: &ScenePath) -> bool {
        self.scenes.contains_key(path.as_str())
    }

    fn load(&mut self, path: &ScenePath) -> FlowResult<MemoryResource> {
        self.sync_loads += 1;
        self.resolve(path)
    }

    fn request(&mut self, path: &ScenePath) -> FlowResult<RequestId> {
        if !self.exists(path) {
            return Err(FlowError::NotFound(path.to_string()));
        }
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.requests.insert(
            id,
            Request {
                path: path.clone(),
                polled: 0,
            },
        );
        Ok(id)
    }

    fn poll(&mut self, id: RequestId) -> BackendPoll<MemoryResource> {
        let Some(request) = self.requests.get_mut(&id) else {
            return BackendPoll::Failed(FlowError::cannot_open(
                id.to_string(),
                "unknown request",
            ));
        };
        let Some(scene) = self.scenes.get(request.path.as_str()) else {
            let path = request.path.to_string();
            self.requests.remove(&id);
            return BackendPoll::Failed(FlowError::NotFound(path));
        };

        if scene.stalled {
            return BackendPoll::InProgress(0.0);
        }

        request.polled += 1;
        if request.polled < scene.polls {
            return BackendPoll::InProgress(request.polled as f32 / scene.polls as f32);
        }

        let path = request.path.clone();
        self.requests.remove(&id);
        match self.resolve(&path) {
            Ok(resource) => BackendPoll::Loaded(resource),
            Err(err) => BackendPoll::Failed(err),
        }
    }

    fn cancel(&mut self, id: RequestId) {
        if self.requests.remove(&id).is_some() {
            self.cancelled += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ScenePath {
        ScenePath::new(raw).unwrap()
    }

    #[test]
    fn request_completes_after_configured_polls() {
        let mut backend = MemoryBackend::new().with_scene("a", MemoryScene::new(3));
        let id = backend.request(&path("a")).unwrap();

        assert!(matches!(backend.poll(id), BackendPoll::InProgress(p) if p > 0.3 && p < 0.4));
        assert!(matches!(backend.poll(id), BackendPoll::InProgress(_)));
        assert!(matches!(backend.poll(id), BackendPoll::Loaded(_)));
        assert_eq!(backend.open_requests(), 0);
    }

    #[test]
    fn sync_load_reports_failure_reason() {
        let mut backend =
            MemoryBackend::new().with_scene("bad", MemoryScene::new(1).failing_load("checksum"));
        let err = backend.load(&path("bad")).unwrap_err();
        assert_eq!(err, FlowError::cannot_open("bad", "checksum"));
        assert_eq!(backend.sync_loads(), 1);
    }

    #[test]
    fn scene_removed_mid_load_fails_as_not_found() {
        let mut backend = MemoryBackend::new().with_scene("a", MemoryScene::new(2));
        let id = backend.request(&path("a")).unwrap();
        backend.remove_scene("a");
        assert!(matches!(backend.poll(id), BackendPoll::Failed(FlowError::NotFound(_))));
    }

    #[test]
    fn stalled_scene_never_finishes() {
        let mut backend = MemoryBackend::new().with_scene("slow", MemoryScene::new(1).stalled());
        let id = backend.request(&path("slow")).unwrap();
        for _ in 0..10 {
            assert!(matches!(backend.poll(id), BackendPoll::InProgress(_)));
        }
        backend.cancel(id);
        assert_eq!(backend.cancelled_requests(), 1);
    }
}
