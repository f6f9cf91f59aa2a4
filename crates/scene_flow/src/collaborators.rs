//! Optional services the controller talks to.
//!
//! Each one is injected once through the builder. A missing collaborator
//! turns its step into a no-op; none of them can fail a navigation.

use crate::error::FlowResult;
use crate::events::{CheckpointRecord, FlowEventRecord};
use crate::payload::{Metadata, Payload, ScenePath};

/// Snapshot of a load, handed to the loading screen when it appears.
#[derive(Debug, Clone, Copy)]
pub struct LoadInfo<'a> {
    pub scene_path: &'a ScenePath,
    pub metadata: &'a Metadata,
    pub seed_snapshot: Option<u64>,
}

pub trait LoadingScreen: Send + Sync {
    fn begin_loading(&mut self, load: &LoadInfo<'_>);

    fn update_progress(&mut self, progress: f32, metadata: &Metadata);

    fn finish_loading(&mut self, success: bool, metadata: &Metadata);
}

pub trait CheckpointSink: Send + Sync {
    fn checkpoint(&mut self, record: &CheckpointRecord);
}

/// Best-effort persistence run before the outgoing scene is torn down.
pub trait SaveService: Send + Sync {
    fn save(&mut self, slot: &str) -> bool;
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&mut self, record: &FlowEventRecord);
}

/// Makes loaded content live.
pub trait SceneHost<R>: Send + Sync {
    /// Swaps the active content for `resource`.
    fn activate(&mut self, scene_path: &ScenePath, resource: R) -> FlowResult<()>;

    /// Hands the payload to the new content. Returns false when the content
    /// has no payload hook; the payload stays readable from the controller
    /// either way.
    fn receive_payload(&mut self, _payload: &Payload) -> bool {
        false
    }
}
