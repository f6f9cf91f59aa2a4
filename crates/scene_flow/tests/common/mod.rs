//! Recording collaborators shared by the controller tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use scene_flow::{
    AnalyticsSink, CheckpointRecord, CheckpointSink, FlowController, FlowControllerBuilder,
    FlowError, FlowEventRecord, FlowResult, FlowSettings, LoadInfo, LoadingScreen, MemoryBackend,
    MemoryResource, MemoryScene, Metadata, Payload, SaveService, SceneHost, ScenePath,
    TimedTransitionPlayer, TransitionCatalog, TransitionDescriptor,
};
use std::time::Duration;

pub const TICK: Duration = Duration::from_millis(100);

type Shared<T> = Arc<Mutex<Vec<T>>>;

fn shared<T>() -> Shared<T> {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Clone, Default)]
pub struct Recorded {
    pub activations: Shared<String>,
    pub payloads: Shared<Payload>,
    pub screen: Shared<String>,
    pub checkpoints: Shared<CheckpointRecord>,
    pub saves: Shared<String>,
    pub events: Shared<FlowEventRecord>,
    /// Scenes the host refuses to activate.
    pub refuse: Shared<String>,
}

impl Recorded {
    pub fn activations(&self) -> Vec<String> {
        self.activations.lock().unwrap().clone()
    }

    pub fn screen(&self) -> Vec<String> {
        self.screen.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<CheckpointRecord> {
        self.checkpoints.lock().unwrap().clone()
    }

    pub fn saves(&self) -> Vec<String> {
        self.saves.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<FlowEventRecord> {
        self.events.lock().unwrap().clone()
    }

    /// The `event` tag of every analytics record, in emission order.
    pub fn event_names(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| {
                let json = serde_json::to_value(&record.event).unwrap();
                json["event"].as_str().unwrap().to_string()
            })
            .collect()
    }

    pub fn refuse(&self, scene: &str) {
        self.refuse.lock().unwrap().push(scene.to_string());
    }
}

struct RecordingHost(Recorded);

impl SceneHost<MemoryResource> for RecordingHost {
    fn activate(&mut self, scene_path: &ScenePath, resource: MemoryResource) -> FlowResult<()> {
        assert_eq!(&resource.scene_path, scene_path);
        if self.0.refuse.lock().unwrap().iter().any(|s| s == scene_path.as_str()) {
            return Err(FlowError::ActivationFailed(format!("{scene_path} refused")));
        }
        self.0.activations.lock().unwrap().push(scene_path.to_string());
        Ok(())
    }

    fn receive_payload(&mut self, payload: &Payload) -> bool {
        self.0.payloads.lock().unwrap().push(payload.clone());
        true
    }
}

struct RecordingScreen(Recorded);

impl LoadingScreen for RecordingScreen {
    fn begin_loading(&mut self, load: &LoadInfo<'_>) {
        self.0.screen.lock().unwrap().push(format!("begin:{}", load.scene_path));
    }

    fn update_progress(&mut self, progress: f32, _metadata: &Metadata) {
        self.0.screen.lock().unwrap().push(format!("progress:{progress:.2}"));
    }

    fn finish_loading(&mut self, success: bool, _metadata: &Metadata) {
        self.0.screen.lock().unwrap().push(format!("finish:{success}"));
    }
}

struct RecordingCheckpoints(Recorded);

impl CheckpointSink for RecordingCheckpoints {
    fn checkpoint(&mut self, record: &CheckpointRecord) {
        self.0.checkpoints.lock().unwrap().push(record.clone());
    }
}

struct RecordingSaves(Recorded);

impl SaveService for RecordingSaves {
    fn save(&mut self, slot: &str) -> bool {
        self.0.saves.lock().unwrap().push(slot.to_string());
        true
    }
}

struct RecordingAnalytics(Recorded);

impl AnalyticsSink for RecordingAnalytics {
    fn record(&mut self, record: &FlowEventRecord) {
        self.0.events.lock().unwrap().push(record.clone());
    }
}

/// Scenes every test can navigate to.
pub fn backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_scene("menu", MemoryScene::default())
        .with_scene("a", MemoryScene::default())
        .with_scene("b", MemoryScene::default())
        .with_scene("level", MemoryScene::new(3))
        .with_scene("slow", MemoryScene::new(1).stalled())
        .with_scene("broken", MemoryScene::new(2).failing_load("corrupt archive"))
}

pub fn transitions() -> TransitionCatalog {
    TransitionCatalog::new().with(TransitionDescriptor::new(
        "fade",
        Duration::from_millis(250),
    ))
}

/// Controller rooted at `menu` with every collaborator recording into the
/// returned `Recorded`.
pub fn controller(settings: FlowSettings) -> (FlowController<MemoryBackend>, Recorded) {
    controller_with(backend(), settings)
}

pub fn controller_with(
    backend: MemoryBackend,
    settings: FlowSettings,
) -> (FlowController<MemoryBackend>, Recorded) {
    let (builder, recorded) = recording_builder(backend, settings);
    (builder.build("menu").unwrap(), recorded)
}

pub fn recording_builder(
    backend: MemoryBackend,
    settings: FlowSettings,
) -> (FlowControllerBuilder<MemoryBackend>, Recorded) {
    let recorded = Recorded::default();
    let builder = FlowController::builder(backend)
        .settings(settings)
        .scene_host(RecordingHost(recorded.clone()))
        .loading_screen(RecordingScreen(recorded.clone()))
        .checkpoint_sink(RecordingCheckpoints(recorded.clone()))
        .save_service(RecordingSaves(recorded.clone()))
        .analytics_sink(RecordingAnalytics(recorded.clone()))
        .transition_library(transitions())
        .transition_player(TimedTransitionPlayer::new());
    (builder, recorded)
}

pub fn paths(controller: &FlowController<MemoryBackend>) -> Vec<String> {
    controller
        .entries()
        .iter()
        .map(|entry| entry.scene_path.to_string())
        .collect()
}
