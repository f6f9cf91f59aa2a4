//! Bevy integration.
//!
//! ```ignore
//! use bevy::prelude::*;
//! use scene_flow::bevy::{SceneFlowPlugin, SceneFlowFinished};
//!
//! App::new()
//!     .add_plugins(MinimalPlugins)
//!     .add_plugins(SceneFlowPlugin::new(controller))
//!     .add_systems(Update, on_finished)
//!     .run();
//!
//! fn on_finished(mut finished: MessageReader<SceneFlowFinished>) {
//!     for done in finished.read() {
//!         info!("{} finished: {:?}", done.0.scene_path, done.0.outcome);
//!     }
//! }
//! ```

use bevy::prelude::*;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use tracing::warn;

use crate::controller::{Completion, FlowController, TickResult};
use crate::loader::SceneBackend;

/// The controller as a world resource.
#[derive(Resource)]
pub struct SceneFlow<B: SceneBackend>(pub FlowController<B>);

impl<B: SceneBackend> Deref for SceneFlow<B> {
    type Target = FlowController<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B: SceneBackend> DerefMut for SceneFlow<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Written whenever a pending navigation reaches its end.
#[derive(Message, Debug, Clone)]
pub struct SceneFlowFinished(pub Completion);

/// Inserts the controller and ticks it every `Update`.
pub struct SceneFlowPlugin<B: SceneBackend> {
    controller: Mutex<Option<FlowController<B>>>,
}

impl<B: SceneBackend> SceneFlowPlugin<B> {
    pub fn new(controller: FlowController<B>) -> Self {
        Self {
            controller: Mutex::new(Some(controller)),
        }
    }
}

impl<B: SceneBackend> Plugin for SceneFlowPlugin<B> {
    fn build(&self, app: &mut App) {
        let controller = match self.controller.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(controller) = controller else {
            warn!("SceneFlowPlugin built twice, controller already inserted");
            return;
        };

        app.insert_resource(SceneFlow(controller))
            .add_message::<SceneFlowFinished>()
            .add_systems(Update, drive_scene_flow::<B>);
    }

    fn name(&self) -> &str {
        "SceneFlowPlugin"
    }
}

fn drive_scene_flow<B: SceneBackend>(
    time: Res<Time>,
    mut flow: ResMut<SceneFlow<B>>,
    mut finished: MessageWriter<SceneFlowFinished>,
) {
    // skip change detection while idle; an enter transition still needs ticks
    if !flow.is_busy() && !flow.is_transition_playing() {
        return;
    }
    if let TickResult::Finished(completion) = flow.advance(time.delta()) {
        finished.write(SceneFlowFinished(completion));
    }
}
