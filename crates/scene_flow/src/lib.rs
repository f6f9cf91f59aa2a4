//! Stack-based scene navigation.
//!
//! The crate is engine agnostic: content loading, transition playback and
//! the live scene tree are reached through the traits in [`loader`],
//! [`transition`] and [`collaborators`]. [`memory::MemoryBackend`] provides a
//! deterministic backend for tests and headless tools. Enable the `bevy`
//! feature for a plugin that ticks the controller every frame.

pub mod collaborators;
pub mod controller;
pub mod error;
pub mod events;
pub mod loader;
pub mod memory;
pub mod payload;
pub mod settings;
pub mod stack;
pub mod transition;

#[cfg(feature = "bevy")]
pub mod bevy;

pub use collaborators::{
    AnalyticsSink, CheckpointSink, LoadInfo, LoadingScreen, SaveService, SceneHost,
};
pub use controller::{Completion, FlowController, FlowControllerBuilder, NavStatus, TickResult};
pub use error::{FlowError, FlowResult};
pub use events::{CheckpointRecord, FlowEvent, FlowEventRecord, JsonLinesSink, OperationKind};
pub use loader::{
    AsyncLoader, BackendPoll, LoadHandle, LoadStatus, RequestId, RngSeedSource, SceneBackend,
    SeedSource,
};
pub use memory::{MemoryBackend, MemoryResource, MemoryScene};
pub use payload::{Metadata, Payload, PayloadValue, ScenePath};
pub use settings::FlowSettings;
pub use stack::{NavigationStack, StackEntry};
pub use transition::{
    FinishedTransition, PlaybackId, TimedTransitionPlayer, TransitionCatalog,
    TransitionDescriptor, TransitionDirection, TransitionLibrary, TransitionOrchestrator,
    TransitionPlayer,
};
