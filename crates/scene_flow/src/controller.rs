//! Navigation controller.
//!
//! [`FlowController`] composes the stack, the loader and the transition
//! orchestrator. Synchronous calls load on the spot; `*_async` calls start a
//! background request and leave the rest to [`FlowController::advance`],
//! which the host calls once per tick.
//!
//! At most one operation is in flight at any time. While it is, every other
//! navigation call is answered with [`FlowError::Busy`].
//!
//! Activation always runs the same sequence:
//!
//! 1. announce the change
//! 2. play the exit transition and wait for it
//! 3. swap the content in (failure here rolls the stack back)
//! 4. deliver the payload
//! 5. start the enter transition
//! 6. announce the completed change
//! 7. notify the checkpoint sink

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    AnalyticsSink, CheckpointSink, LoadInfo, LoadingScreen, SaveService, SceneHost,
};
use crate::error::{FlowError, FlowResult};
use crate::events::{CheckpointRecord, FlowEvent, FlowEventRecord, OperationKind};
use crate::loader::{AsyncLoader, LoadHandle, LoadStatus, SceneBackend, SeedSource};
use crate::payload::{Metadata, Payload, PayloadValue, ScenePath};
use crate::settings::FlowSettings;
use crate::stack::{NavigationStack, StackEntry};
use crate::transition::{
    TransitionDirection, TransitionLibrary, TransitionOrchestrator, TransitionPlayer,
};

/// How far a navigation call got before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStatus {
    /// The new scene is live.
    Completed,
    /// The rest happens in [`FlowController::advance`].
    Pending,
}

/// Terminal report of an operation that did not finish inside its call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub scene_path: ScenePath,
    pub outcome: FlowResult<()>,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    Idle,
    Loading { progress: f32 },
    AwaitingTransition,
    Finished(Completion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Push,
    Replace,
}

impl PendingKind {
    fn operation(self) -> OperationKind {
        match self {
            Self::Push => OperationKind::Push,
            Self::Replace => OperationKind::Replace,
        }
    }
}

/// An async navigation between its start and its finalize step.
struct PendingOperation<R> {
    id: Uuid,
    kind: PendingKind,
    entry: StackEntry,
    previous_entry: Option<StackEntry>,
    handle: LoadHandle<R>,
    metadata: Metadata,
    transition: Option<String>,
    loading_screen: bool,
    elapsed: Duration,
    reported_progress: f32,
}

/// How to put the stack back if activation fails.
enum Rollback {
    Push,
    Replace(StackEntry),
    Pop {
        removed: StackEntry,
        beneath: StackEntry,
    },
}

/// Loaded content waiting to become live. The stack already reflects it.
struct Activation<R> {
    id: Uuid,
    kind: OperationKind,
    entry: StackEntry,
    outgoing: Option<StackEntry>,
    resource: R,
    rollback: Rollback,
    transition: Option<String>,
    exit_started: bool,
}

enum InFlight<R> {
    Loading(PendingOperation<R>),
    Activating(Activation<R>),
}

struct Collaborators<R> {
    host: Option<Box<dyn SceneHost<R>>>,
    loading_screen: Option<Box<dyn LoadingScreen>>,
    checkpoints: Option<Box<dyn CheckpointSink>>,
    saves: Option<Box<dyn SaveService>>,
    analytics: Option<Box<dyn AnalyticsSink>>,
}

pub struct FlowControllerBuilder<B: SceneBackend> {
    backend: B,
    settings: FlowSettings,
    collaborators: Collaborators<B::Resource>,
    transition_library: Option<Box<dyn TransitionLibrary>>,
    transition_player: Option<Box<dyn TransitionPlayer>>,
    seeds: Option<Box<dyn SeedSource>>,
}

impl<B: SceneBackend> FlowControllerBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            settings: FlowSettings::default(),
            collaborators: Collaborators {
                host: None,
                loading_screen: None,
                checkpoints: None,
                saves: None,
                analytics: None,
            },
            transition_library: None,
            transition_player: None,
            seeds: None,
        }
    }

    pub fn settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scene_host(mut self, host: impl SceneHost<B::Resource> + 'static) -> Self {
        self.collaborators.host = Some(Box::new(host));
        self
    }

    pub fn loading_screen(mut self, screen: impl LoadingScreen + 'static) -> Self {
        self.collaborators.loading_screen = Some(Box::new(screen));
        self
    }

    pub fn checkpoint_sink(mut self, sink: impl CheckpointSink + 'static) -> Self {
        self.collaborators.checkpoints = Some(Box::new(sink));
        self
    }

    pub fn save_service(mut self, saves: impl SaveService + 'static) -> Self {
        self.collaborators.saves = Some(Box::new(saves));
        self
    }

    pub fn analytics_sink(mut self, sink: impl AnalyticsSink + 'static) -> Self {
        self.collaborators.analytics = Some(Box::new(sink));
        self
    }

    pub fn transition_library(mut self, library: impl TransitionLibrary + 'static) -> Self {
        self.transition_library = Some(Box::new(library));
        self
    }

    pub fn transition_player(mut self, player: impl TransitionPlayer + 'static) -> Self {
        self.transition_player = Some(Box::new(player));
        self
    }

    pub fn seed_source(mut self, seeds: impl SeedSource + 'static) -> Self {
        self.seeds = Some(Box::new(seeds));
        self
    }

    /// Builds the controller with `initial_scene` as the active entry.
    ///
    /// The initial scene is assumed to be live already; it is not loaded.
    pub fn build(self, initial_scene: &str) -> FlowResult<FlowController<B>> {
        let initial = StackEntry::new(ScenePath::new(initial_scene)?, Payload::empty());

        let mut loader = AsyncLoader::new(self.backend);
        loader.set_seed_source(self.seeds);

        let mut transitions = TransitionOrchestrator::new(self.settings.transition_timeout());
        transitions.set_library(self.transition_library);
        transitions.set_player(self.transition_player);

        debug!(scene = %initial.scene_path, "navigation stack seeded");
        Ok(FlowController {
            active_payload: Some(initial.payload.clone()),
            stack: NavigationStack::seeded(initial),
            loader,
            transitions,
            settings: self.settings,
            collaborators: self.collaborators,
            in_flight: None,
        })
    }
}

pub struct FlowController<B: SceneBackend> {
    stack: NavigationStack,
    loader: AsyncLoader<B>,
    transitions: TransitionOrchestrator,
    settings: FlowSettings,
    collaborators: Collaborators<B::Resource>,
    in_flight: Option<InFlight<B::Resource>>,
    active_payload: Option<Payload>,
}

impl<B: SceneBackend> FlowController<B> {
    pub fn builder(backend: B) -> FlowControllerBuilder<B> {
        FlowControllerBuilder::new(backend)
    }

    // ------------------------------------------------------------------
    // Synchronous navigation
    // ------------------------------------------------------------------

    pub fn push_scene(
        &mut self,
        path: &str,
        data: impl Into<PayloadValue>,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.ensure_idle()?;
        let scene_path = ScenePath::new(path)?;
        let transition = self.transition_key(&metadata);
        let outgoing = self.stack.peek().cloned();
        let entry = self.entry_for(scene_path, data.into(), metadata);

        self.stack.push(entry.clone());
        debug!(scene = %entry.scene_path, size = self.stack.len(), "pushed entry");

        let resource = match self.loader.load_now(&entry.scene_path) {
            Ok(resource) => resource,
            Err(err) => {
                self.undo(Rollback::Push);
                return Err(self.resource_failure(OperationKind::Push, &entry.scene_path, err));
            }
        };

        self.begin_activation(Activation {
            id: Uuid::new_v4(),
            kind: OperationKind::Push,
            entry,
            outgoing,
            resource,
            rollback: Rollback::Push,
            transition,
            exit_started: false,
        })
    }

    pub fn replace_scene(
        &mut self,
        path: &str,
        data: impl Into<PayloadValue>,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.ensure_idle()?;
        let scene_path = ScenePath::new(path)?;
        let transition = self.transition_key(&metadata);
        let entry = self.entry_for(scene_path, data.into(), metadata);

        let outgoing = self.stack.replace(entry.clone());
        let rollback = match &outgoing {
            Some(previous) => Rollback::Replace(previous.clone()),
            None => Rollback::Push,
        };
        debug!(scene = %entry.scene_path, size = self.stack.len(), "replaced top entry");

        let resource = match self.loader.load_now(&entry.scene_path) {
            Ok(resource) => resource,
            Err(err) => {
                self.undo(rollback);
                return Err(self.resource_failure(
                    OperationKind::Replace,
                    &entry.scene_path,
                    err,
                ));
            }
        };

        self.begin_activation(Activation {
            id: Uuid::new_v4(),
            kind: OperationKind::Replace,
            entry,
            outgoing,
            resource,
            rollback,
            transition,
            exit_started: false,
        })
    }

    /// Returns to the entry beneath the top.
    ///
    /// When `data` or `metadata` carry anything, the entry beneath receives a
    /// fresh payload sourced from the popped scene, so the returning view can
    /// learn why control came back. Otherwise it keeps the payload it had.
    pub fn pop_scene(
        &mut self,
        data: impl Into<PayloadValue>,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.ensure_idle()?;
        if self.stack.len() <= 1 {
            return Err(FlowError::NoPreviousEntry);
        }
        let transition = self.transition_key(&metadata);
        let removed = self.stack.pop()?;
        let beneath = self
            .stack
            .peek()
            .cloned()
            .ok_or(FlowError::NoPreviousEntry)?;

        let data = data.into();
        let target = if data.is_null() && metadata.is_empty() {
            beneath.clone()
        } else {
            let payload = Payload::new(data, metadata, Some(removed.scene_path.clone()));
            let returning = beneath.with_payload(payload);
            self.stack.replace(returning.clone());
            returning
        };
        debug!(popped = %removed.scene_path, scene = %target.scene_path, "popped entry");

        let rollback = Rollback::Pop {
            removed: removed.clone(),
            beneath,
        };
        let resource = match self.loader.load_now(&target.scene_path) {
            Ok(resource) => resource,
            Err(err) => {
                self.undo(rollback);
                return Err(self.resource_failure(OperationKind::Pop, &target.scene_path, err));
            }
        };

        self.begin_activation(Activation {
            id: Uuid::new_v4(),
            kind: OperationKind::Pop,
            entry: target,
            outgoing: Some(removed),
            resource,
            rollback,
            transition,
            exit_started: false,
        })
    }

    // ------------------------------------------------------------------
    // Asynchronous navigation
    // ------------------------------------------------------------------

    /// Starts a background push. The stack changes only once the load has
    /// finished and the new scene activated.
    pub fn push_scene_async(
        &mut self,
        path: &str,
        data: impl Into<PayloadValue>,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.start_async(PendingKind::Push, path, data.into(), metadata)
    }

    pub fn replace_scene_async(
        &mut self,
        path: &str,
        data: impl Into<PayloadValue>,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.start_async(PendingKind::Replace, path, data.into(), metadata)
    }

    /// Drops whatever operation is in flight and leaves the stack as it was
    /// before that operation started. Does nothing when idle.
    pub fn cancel_pending_load(&mut self) -> Option<Completion> {
        match self.in_flight.take()? {
            InFlight::Loading(mut op) => {
                self.loader.cancel(&mut op.handle);
                Some(self.finalize_cancelled(op))
            }
            InFlight::Activating(activation) => {
                self.undo(activation.rollback);
                self.transitions.cancel();
                let top = self.top_path();
                self.emit(&top, FlowEvent::LoadingCancelled);
                info!(scene = %activation.entry.scene_path, "activation cancelled");
                Some(Completion {
                    operation_id: activation.id,
                    kind: activation.kind,
                    scene_path: activation.entry.scene_path,
                    outcome: Err(FlowError::Cancelled),
                })
            }
        }
    }

    /// Drives the in-flight operation. Call once per tick.
    pub fn advance(&mut self, delta: Duration) -> TickResult {
        if let Some(done) = self.transitions.advance(delta) {
            let top = self.top_path();
            self.emit(
                &top,
                FlowEvent::TransitionCompleted {
                    key: done.key,
                    direction: done.direction,
                    abandoned: done.abandoned,
                },
            );
        }

        match self.in_flight.take() {
            None => TickResult::Idle,
            Some(InFlight::Loading(op)) => self.progress_load(op, delta),
            Some(InFlight::Activating(activation)) => {
                if self.transitions.is_playing(TransitionDirection::Exit) {
                    self.in_flight = Some(InFlight::Activating(activation));
                    return TickResult::AwaitingTransition;
                }
                let (operation_id, kind) = (activation.id, activation.kind);
                let scene_path = activation.entry.scene_path.clone();
                let outcome = self.complete_activation(activation);
                TickResult::Finished(Completion {
                    operation_id,
                    kind,
                    scene_path,
                    outcome,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Stack access
    // ------------------------------------------------------------------

    pub fn peek_scene(&self) -> Option<&StackEntry> {
        self.stack.peek()
    }

    /// Clears the stack. Any in-flight operation is cancelled first, so the
    /// cleared stack never carries a half-applied navigation.
    ///
    /// With `keep_active` only the top entry survives. Without it this is a
    /// teardown: the stack is left empty, every loader request is dropped and
    /// the active payload is forgotten. Navigation is possible again once a
    /// `replace_scene` seeds a new entry; `pop_scene` keeps failing until then.
    pub fn clear_stack(&mut self, keep_active: bool) {
        if let Some(done) = self.cancel_pending_load() {
            debug!(scene = %done.scene_path, "pending operation dropped by clear");
        }
        if !keep_active {
            self.loader.clear();
            self.active_payload = None;
        }
        self.stack.clear(keep_active);
        debug!(keep_active, size = self.stack.len(), "stack cleared");
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn entries(&self) -> &[StackEntry] {
        self.stack.entries()
    }

    /// Payload most recently delivered to the active content.
    pub fn active_payload(&self) -> Option<&Payload> {
        self.active_payload.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True while an exit or enter transition is still on screen.
    pub fn is_transition_playing(&self) -> bool {
        !self.transitions.is_idle()
    }

    /// Progress of the background load, if one is running.
    pub fn pending_progress(&self) -> Option<f32> {
        match &self.in_flight {
            Some(InFlight::Loading(op)) => Some(op.handle.progress),
            _ => None,
        }
    }

    pub fn pending_scene(&self) -> Option<&ScenePath> {
        match &self.in_flight {
            Some(InFlight::Loading(op)) => Some(&op.entry.scene_path),
            Some(InFlight::Activating(activation)) => Some(&activation.entry.scene_path),
            None => None,
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn loader(&self) -> &AsyncLoader<B> {
        &self.loader
    }

    pub fn backend(&self) -> &B {
        self.loader.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.loader.backend_mut()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_idle(&self) -> FlowResult<()> {
        if self.in_flight.is_some() {
            return Err(FlowError::Busy);
        }
        Ok(())
    }

    fn transition_key(&self, metadata: &Metadata) -> Option<String> {
        metadata
            .transition
            .clone()
            .or_else(|| self.settings.default_transition.clone())
    }

    /// Entry for `scene_path` whose payload is sourced from the current top.
    fn entry_for(&self, scene_path: ScenePath, data: PayloadValue, metadata: Metadata) -> StackEntry {
        let source = self.stack.peek().map(|top| top.scene_path.clone());
        StackEntry::new(scene_path, Payload::new(data, metadata, source))
    }

    fn top_path(&self) -> String {
        self.stack
            .peek()
            .map(|top| top.scene_path.to_string())
            .unwrap_or_default()
    }

    fn start_async(
        &mut self,
        kind: PendingKind,
        path: &str,
        data: PayloadValue,
        metadata: Metadata,
    ) -> FlowResult<NavStatus> {
        self.ensure_idle()?;
        let scene_path = ScenePath::new(path)?;
        let operation = kind.operation();

        let mut handle = self.loader.start(scene_path.as_str(), metadata.clone());
        if handle.status == LoadStatus::Failed {
            let err = handle
                .error
                .take()
                .unwrap_or_else(|| FlowError::cannot_open(scene_path.as_str(), "request failed"));
            self.emit(scene_path.as_str(), FlowEvent::loading_failed(&err));
            return Err(self.resource_failure(operation, &scene_path, err));
        }

        let transition = self.transition_key(&metadata);
        let loading_screen = metadata
            .loading_screen
            .unwrap_or(self.settings.show_loading_screen);
        let previous_entry = match kind {
            PendingKind::Replace => self.stack.peek().cloned(),
            PendingKind::Push => None,
        };
        let entry = self.entry_for(scene_path, data, metadata.clone());

        self.emit(
            entry.scene_path.as_str(),
            FlowEvent::LoadingStarted {
                operation,
                seed_snapshot: handle.seed_snapshot,
            },
        );
        if loading_screen {
            if let Some(screen) = self.collaborators.loading_screen.as_mut() {
                screen.begin_loading(&LoadInfo {
                    scene_path: &entry.scene_path,
                    metadata: &metadata,
                    seed_snapshot: handle.seed_snapshot,
                });
            }
        }

        self.emit(
            entry.scene_path.as_str(),
            FlowEvent::AboutToChange {
                operation,
                previous_scene: self.stack.peek().map(|top| top.scene_path.to_string()),
            },
        );
        self.transitions
            .begin(transition.as_deref(), TransitionDirection::Exit);

        let id = Uuid::new_v4();
        info!(
            operation_id = %id,
            scene = %entry.scene_path,
            %operation,
            "background navigation started"
        );
        self.in_flight = Some(InFlight::Loading(PendingOperation {
            id,
            kind,
            entry,
            previous_entry,
            handle,
            metadata,
            transition,
            loading_screen,
            elapsed: Duration::ZERO,
            reported_progress: 0.0,
        }));
        Ok(NavStatus::Pending)
    }

    fn progress_load(&mut self, mut op: PendingOperation<B::Resource>, delta: Duration) -> TickResult {
        self.loader.poll(&mut op.handle);

        match op.handle.status {
            LoadStatus::Loading => {
                op.elapsed += delta;
                if let Some(limit) = self.settings.load_timeout() {
                    if op.elapsed >= limit {
                        self.loader.cancel(&mut op.handle);
                        let err = FlowError::TimedOut(op.elapsed);
                        return TickResult::Finished(self.finalize_failed(op, err));
                    }
                }

                let progress = op.handle.progress;
                if progress > op.reported_progress {
                    op.reported_progress = progress;
                    if op.loading_screen {
                        if let Some(screen) = self.collaborators.loading_screen.as_mut() {
                            screen.update_progress(progress, &op.metadata);
                        }
                    }
                    self.emit(
                        op.entry.scene_path.as_str(),
                        FlowEvent::LoadingProgress { progress },
                    );
                }
                self.in_flight = Some(InFlight::Loading(op));
                TickResult::Loading { progress }
            }
            LoadStatus::Loaded => match op.handle.take_result() {
                Some(resource) => self.finalize_loaded(op, resource),
                None => {
                    let err =
                        FlowError::cannot_open(op.entry.scene_path.as_str(), "loader returned no resource");
                    TickResult::Finished(self.finalize_failed(op, err))
                }
            },
            LoadStatus::Failed => {
                let err = op.handle.error.take().unwrap_or_else(|| {
                    FlowError::cannot_open(op.entry.scene_path.as_str(), "unknown load failure")
                });
                TickResult::Finished(self.finalize_failed(op, err))
            }
            LoadStatus::Cancelled => TickResult::Finished(self.finalize_cancelled(op)),
            LoadStatus::Idle => {
                let err = FlowError::cannot_open(op.entry.scene_path.as_str(), "load never started");
                TickResult::Finished(self.finalize_failed(op, err))
            }
        }
    }

    fn finalize_loaded(&mut self, op: PendingOperation<B::Resource>, resource: B::Resource) -> TickResult {
        self.finish_loading_screen(&op, true);
        self.emit(op.entry.scene_path.as_str(), FlowEvent::LoadingCompleted);

        let outgoing = self.stack.peek().cloned();
        let rollback = match op.kind {
            PendingKind::Push => {
                self.stack.push(op.entry.clone());
                Rollback::Push
            }
            PendingKind::Replace => match self.stack.replace(op.entry.clone()) {
                Some(previous) => Rollback::Replace(previous),
                None => Rollback::Push,
            },
        };

        let activation = Activation {
            id: op.id,
            kind: op.kind.operation(),
            entry: op.entry,
            outgoing,
            resource,
            rollback,
            transition: op.transition,
            exit_started: true,
        };
        let (operation_id, kind) = (activation.id, activation.kind);
        let scene_path = activation.entry.scene_path.clone();

        match self.begin_activation(activation) {
            Ok(NavStatus::Pending) => TickResult::AwaitingTransition,
            Ok(NavStatus::Completed) => TickResult::Finished(Completion {
                operation_id,
                kind,
                scene_path,
                outcome: Ok(()),
            }),
            Err(err) => TickResult::Finished(Completion {
                operation_id,
                kind,
                scene_path,
                outcome: Err(err),
            }),
        }
    }

    fn finalize_failed(&mut self, op: PendingOperation<B::Resource>, err: FlowError) -> Completion {
        self.finish_loading_screen(&op, false);
        self.transitions.cancel();

        // The stack is untouched until a load succeeds; make sure of it.
        if let Some(previous) = op.previous_entry {
            if self.stack.peek() != Some(&previous) {
                self.stack.replace(previous);
            }
        }

        self.emit(op.entry.scene_path.as_str(), FlowEvent::loading_failed(&err));
        let err = self.resource_failure(op.kind.operation(), &op.entry.scene_path, err);
        Completion {
            operation_id: op.id,
            kind: op.kind.operation(),
            scene_path: op.entry.scene_path,
            outcome: Err(err),
        }
    }

    fn finalize_cancelled(&mut self, op: PendingOperation<B::Resource>) -> Completion {
        self.finish_loading_screen(&op, false);
        self.transitions.cancel();
        self.emit(op.entry.scene_path.as_str(), FlowEvent::LoadingCancelled);
        info!(operation_id = %op.id, scene = %op.entry.scene_path, "background navigation cancelled");
        Completion {
            operation_id: op.id,
            kind: op.kind.operation(),
            scene_path: op.entry.scene_path,
            outcome: Err(FlowError::Cancelled),
        }
    }

    fn finish_loading_screen(&mut self, op: &PendingOperation<B::Resource>, success: bool) {
        if !op.loading_screen {
            return;
        }
        if let Some(screen) = self.collaborators.loading_screen.as_mut() {
            screen.finish_loading(success, &op.metadata);
        }
    }

    /// Steps 1 and 2. Parks the activation while the exit transition plays.
    fn begin_activation(&mut self, mut activation: Activation<B::Resource>) -> FlowResult<NavStatus> {
        if !activation.exit_started {
            self.emit(
                activation.entry.scene_path.as_str(),
                FlowEvent::AboutToChange {
                    operation: activation.kind,
                    previous_scene: activation
                        .outgoing
                        .as_ref()
                        .map(|entry| entry.scene_path.to_string()),
                },
            );
            self.transitions
                .begin(activation.transition.as_deref(), TransitionDirection::Exit);
            activation.exit_started = true;
        }

        if self.transitions.is_playing(TransitionDirection::Exit) {
            debug!(scene = %activation.entry.scene_path, "waiting for exit transition");
            self.in_flight = Some(InFlight::Activating(activation));
            return Ok(NavStatus::Pending);
        }

        self.complete_activation(activation)
            .map(|()| NavStatus::Completed)
    }

    /// Steps 3 to 7.
    fn complete_activation(&mut self, activation: Activation<B::Resource>) -> FlowResult<()> {
        let Activation {
            id,
            kind,
            entry,
            outgoing,
            resource,
            rollback,
            transition,
            ..
        } = activation;

        if self.settings.save_on_transition {
            if let Some(saves) = self.collaborators.saves.as_mut() {
                if !saves.save(&self.settings.save_slot) {
                    warn!(slot = %self.settings.save_slot, "save before scene change failed");
                }
            }
        }

        let swapped = match self.collaborators.host.as_mut() {
            Some(host) => host.activate(&entry.scene_path, resource),
            None => Ok(()),
        };
        if let Err(err) = swapped {
            let err = match err {
                FlowError::ActivationFailed(_) => err,
                other => FlowError::ActivationFailed(other.to_string()),
            };
            self.undo(rollback);
            self.transitions.cancel();
            error!(operation_id = %id, scene = %entry.scene_path, error = %err, "activation failed, stack restored");
            self.emit(entry.scene_path.as_str(), FlowEvent::error(Some(kind), &err));
            return Err(err);
        }

        let hooked = self
            .collaborators
            .host
            .as_mut()
            .is_some_and(|host| host.receive_payload(&entry.payload));
        self.active_payload = Some(entry.payload.clone());

        self.transitions
            .begin(transition.as_deref(), TransitionDirection::Enter);

        let previous_scene = outgoing.as_ref().map(|entry| entry.scene_path.to_string());
        let scene = entry.scene_path.as_str();
        self.emit(
            scene,
            FlowEvent::SceneChanged {
                operation: kind,
                previous_scene: previous_scene.clone(),
            },
        );
        let detail = match (kind, &rollback) {
            (OperationKind::Pop, Rollback::Pop { removed, .. }) => FlowEvent::Popped {
                popped_scene: removed.scene_path.to_string(),
            },
            (OperationKind::Replace, _) => FlowEvent::Replaced { previous_scene },
            _ => FlowEvent::Pushed { previous_scene },
        };
        self.emit(scene, detail);

        if let Some(checkpoints) = self.collaborators.checkpoints.as_mut() {
            checkpoints.checkpoint(&CheckpointRecord {
                operation: kind,
                scene_path: entry.scene_path.clone(),
                previous_scene: outgoing.as_ref().map(|entry| entry.scene_path.clone()),
                metadata: entry.payload.metadata().clone(),
                previous_metadata: outgoing
                    .as_ref()
                    .map(|entry| entry.payload.metadata().clone())
                    .unwrap_or_default(),
                timestamp: Utc::now(),
            });
        }

        info!(
            operation_id = %id,
            %kind,
            scene = %entry.scene_path,
            size = self.stack.len(),
            payload_hook = hooked,
            "scene activated"
        );
        Ok(())
    }

    fn undo(&mut self, rollback: Rollback) {
        match rollback {
            Rollback::Push => {
                self.stack.discard_top();
            }
            Rollback::Replace(previous) => {
                self.stack.replace(previous);
            }
            Rollback::Pop { removed, beneath } => {
                self.stack.replace(beneath);
                self.stack.push(removed);
            }
        }
        debug!(size = self.stack.len(), "stack rolled back");
    }

    fn resource_failure(&mut self, kind: OperationKind, scene_path: &ScenePath, err: FlowError) -> FlowError {
        error!(%kind, scene = %scene_path, error = %err, "navigation failed");
        self.emit(scene_path.as_str(), FlowEvent::error(Some(kind), &err));
        err
    }

    fn emit(&mut self, scene_path: &str, event: FlowEvent) {
        let Some(sink) = self.collaborators.analytics.as_mut() else {
            return;
        };
        sink.record(&FlowEventRecord {
            event,
            scene_path: scene_path.to_string(),
            stack_size: self.stack.len(),
            timestamp: Utc::now(),
        });
    }
}

impl<B: SceneBackend> Drop for FlowController<B> {
    fn drop(&mut self) {
        if self.loader.has_pending_requests() {
            self.loader.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryScene};

    fn controller() -> FlowController<MemoryBackend> {
        let backend = MemoryBackend::new()
            .with_scene("root", MemoryScene::default())
            .with_scene("a", MemoryScene::default())
            .with_scene("b", MemoryScene::default());
        FlowController::builder(backend).build("root").unwrap()
    }

    #[test]
    fn build_rejects_blank_initial_scene() {
        let result = FlowController::builder(MemoryBackend::new()).build("");
        assert!(matches!(result, Err(FlowError::InvalidParameter(_))));
    }

    #[test]
    fn undo_pop_restores_both_entries() {
        let mut flow = controller();
        flow.push_scene("a", "a-data", Metadata::new()).unwrap();
        flow.push_scene("b", (), Metadata::new()).unwrap();
        let before = flow.entries().to_vec();

        let removed = flow.stack.pop().unwrap();
        let beneath = flow.stack.peek().cloned().unwrap();
        flow.stack
            .replace(beneath.with_payload(Payload::new("ret", Metadata::new(), None)));
        flow.undo(Rollback::Pop { removed, beneath });

        assert_eq!(flow.entries(), before.as_slice());
    }

    #[test]
    fn transition_key_prefers_call_metadata() {
        let mut flow = controller();
        flow.settings.default_transition = Some("fade".into());
        assert_eq!(flow.transition_key(&Metadata::new()).as_deref(), Some("fade"));
        assert_eq!(
            flow.transition_key(&Metadata::new().with_transition("wipe"))
                .as_deref(),
            Some("wipe")
        );
    }

    #[test]
    fn keep_active_clear_cancels_pending_load() {
        let mut flow = controller();
        flow.push_scene_async("a", (), Metadata::new()).unwrap();
        assert!(flow.loader().has_pending_requests());

        flow.clear_stack(true);
        assert!(!flow.is_busy());
        assert!(!flow.loader().has_pending_requests());
        assert_eq!(flow.stack_size(), 1);
    }
}
