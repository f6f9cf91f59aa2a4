//! Transition playback between scenes.
//!
//! The orchestrator owns at most one playback token at a time and is polled
//! once per tick, the same way load handles are. Every failure here is soft:
//! a missing library, an unknown key or a player error just skips the step.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::error::{FlowError, FlowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransitionDirection {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDescriptor {
    pub key: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl TransitionDescriptor {
    pub fn new(key: impl Into<String>, duration: Duration) -> Self {
        Self {
            key: key.into(),
            duration,
        }
    }
}

/// Resolves transition names to descriptors.
pub trait TransitionLibrary: Send + Sync {
    fn lookup(&self, key: &str) -> Option<TransitionDescriptor>;
}

/// Map-backed library, loadable from RON:
///
/// ```ron
/// (transitions: [(key: "fade", duration: 0.4)])
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "CatalogFile")]
pub struct TransitionCatalog {
    transitions: Vec<TransitionDescriptor>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// On-disk shape of a catalog, without the lookup index.
#[derive(Deserialize)]
struct CatalogFile {
    transitions: Vec<TransitionDescriptor>,
}

impl From<CatalogFile> for TransitionCatalog {
    // later duplicates win
    fn from(file: CatalogFile) -> Self {
        file.transitions
            .into_iter()
            .fold(TransitionCatalog::new(), TransitionCatalog::with)
    }
}

impl TransitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: TransitionDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: TransitionDescriptor) {
        match self.index.get(&descriptor.key) {
            Some(&slot) => self.transitions[slot] = descriptor,
            None => {
                self.index
                    .insert(descriptor.key.clone(), self.transitions.len());
                self.transitions.push(descriptor);
            }
        }
    }

    pub fn from_ron(source: &str) -> FlowResult<Self> {
        ron::from_str(source)
            .map_err(|e| FlowError::cannot_open("transition catalog", e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl TransitionLibrary for TransitionCatalog {
    fn lookup(&self, key: &str) -> Option<TransitionDescriptor> {
        self.index
            .get(key)
            .map(|&slot| self.transitions[slot].clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

/// Engine side of transition playback.
pub trait TransitionPlayer: Send + Sync {
    fn play(
        &mut self,
        descriptor: &TransitionDescriptor,
        direction: TransitionDirection,
    ) -> FlowResult<PlaybackId>;

    fn is_finished(&mut self, id: PlaybackId) -> bool;

    fn stop(&mut self, id: PlaybackId);

    /// Called once per tick before any `is_finished` query.
    fn advance(&mut self, _delta: Duration) {}
}

/// Player that finishes each playback once its duration of tick time passed.
#[derive(Debug, Default)]
pub struct TimedTransitionPlayer {
    active: HashMap<PlaybackId, Duration>,
    next_id: u64,
}

impl TimedTransitionPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransitionPlayer for TimedTransitionPlayer {
    fn play(
        &mut self,
        descriptor: &TransitionDescriptor,
        _direction: TransitionDirection,
    ) -> FlowResult<PlaybackId> {
        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        self.active.insert(id, descriptor.duration);
        Ok(id)
    }

    fn is_finished(&mut self, id: PlaybackId) -> bool {
        self.active
            .get(&id)
            .is_none_or(|remaining| remaining.is_zero())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.active.remove(&id);
    }

    fn advance(&mut self, delta: Duration) {
        for remaining in self.active.values_mut() {
            *remaining = remaining.saturating_sub(delta);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTransition {
    pub key: String,
    pub direction: TransitionDirection,
    /// The player never reported completion in time.
    pub abandoned: bool,
}

#[derive(Debug)]
struct InFlight {
    id: PlaybackId,
    key: String,
    direction: TransitionDirection,
    elapsed: Duration,
}

pub struct TransitionOrchestrator {
    library: Option<Box<dyn TransitionLibrary>>,
    player: Option<Box<dyn TransitionPlayer>>,
    in_flight: Option<InFlight>,
    timeout: Duration,
}

impl TransitionOrchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            library: None,
            player: None,
            in_flight: None,
            timeout,
        }
    }

    pub fn set_library(&mut self, library: Option<Box<dyn TransitionLibrary>>) {
        self.library = library;
    }

    pub fn set_player(&mut self, player: Option<Box<dyn TransitionPlayer>>) {
        self.player = player;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Starts playback of `key` in `direction`.
    ///
    /// Returns false when nothing was started. A playback still in flight is
    /// stopped first.
    pub fn begin(&mut self, key: Option<&str>, direction: TransitionDirection) -> bool {
        let Some(key) = key else {
            return false;
        };
        let (Some(library), Some(player)) = (self.library.as_ref(), self.player.as_mut()) else {
            debug!(key, "no transition library or player configured, skipping");
            return false;
        };
        let Some(descriptor) = library.lookup(key) else {
            warn!(key, "unknown transition, skipping");
            return false;
        };

        if let Some(previous) = self.in_flight.take() {
            player.stop(previous.id);
        }

        match player.play(&descriptor, direction) {
            Ok(id) => {
                debug!(key, %direction, "transition started");
                self.in_flight = Some(InFlight {
                    id,
                    key: descriptor.key,
                    direction,
                    elapsed: Duration::ZERO,
                });
                true
            }
            Err(err) => {
                warn!(key, error = %err, "transition player failed, skipping");
                false
            }
        }
    }

    /// Advances the player and reports a playback that finished this tick.
    pub fn advance(&mut self, delta: Duration) -> Option<FinishedTransition> {
        let player = self.player.as_mut()?;
        player.advance(delta);

        let flight = self.in_flight.as_mut()?;
        flight.elapsed += delta;

        let finished = player.is_finished(flight.id);
        let abandoned = !finished && flight.elapsed >= self.timeout;
        if !finished && !abandoned {
            return None;
        }

        let flight = self.in_flight.take()?;
        if abandoned {
            warn!(
                key = %flight.key,
                elapsed = flight.elapsed.as_secs_f32(),
                "transition did not finish in time, abandoning"
            );
            player.stop(flight.id);
        }
        Some(FinishedTransition {
            key: flight.key,
            direction: flight.direction,
            abandoned,
        })
    }

    pub fn is_playing(&self, direction: TransitionDirection) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|flight| flight.direction == direction)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn cancel(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            if let Some(player) = self.player.as_mut() {
                player.stop(flight.id);
            }
            debug!(key = %flight.key, "transition cancelled");
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(value.as_secs_f32())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f32::deserialize(deserializer)?;
        Duration::try_from_secs_f32(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    fn orchestrator() -> TransitionOrchestrator {
        let mut orchestrator = TransitionOrchestrator::new(Duration::from_secs(2));
        orchestrator.set_library(Some(Box::new(
            TransitionCatalog::new()
                .with(TransitionDescriptor::new("fade", Duration::from_millis(250))),
        )));
        orchestrator.set_player(Some(Box::new(TimedTransitionPlayer::new())));
        orchestrator
    }

    #[test]
    fn catalog_from_ron() {
        let catalog =
            TransitionCatalog::from_ron(r#"(transitions: [(key: "fade", duration: 0.5), (key: "wipe", duration: 1.0)])"#)
                .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.lookup("fade").unwrap().duration,
            Duration::from_millis(500)
        );
        assert!(catalog.lookup("zoom").is_none());
    }

    #[test]
    fn catalog_rejects_garbage() {
        assert!(TransitionCatalog::from_ron("not ron at all (").is_err());
    }

    #[test]
    fn embedded_catalog_resolves_keys() {
        #[derive(Deserialize)]
        struct Theme {
            transitions: TransitionCatalog,
        }

        let theme: Theme = serde_json::from_str(
            r#"{"transitions": {"transitions": [
                {"key": "fade", "duration": 0.25},
                {"key": "fade", "duration": 0.75}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(theme.transitions.len(), 1);
        assert_eq!(
            theme.transitions.lookup("fade").unwrap().duration,
            Duration::from_millis(750)
        );
    }

    #[test]
    fn playback_finishes_after_duration() {
        let mut orchestrator = orchestrator();
        assert!(orchestrator.begin(Some("fade"), TransitionDirection::Exit));
        assert!(orchestrator.is_playing(TransitionDirection::Exit));

        assert_eq!(orchestrator.advance(TICK), None);
        assert_eq!(orchestrator.advance(TICK), None);
        let done = orchestrator.advance(TICK).unwrap();
        assert_eq!(done.key, "fade");
        assert_eq!(done.direction, TransitionDirection::Exit);
        assert!(!done.abandoned);
        assert!(orchestrator.is_idle());
    }

    #[test]
    fn missing_pieces_are_soft_skips() {
        let mut orchestrator = orchestrator();
        assert!(!orchestrator.begin(None, TransitionDirection::Enter));
        assert!(!orchestrator.begin(Some("zoom"), TransitionDirection::Enter));

        let mut bare = TransitionOrchestrator::new(Duration::from_secs(1));
        assert!(!bare.begin(Some("fade"), TransitionDirection::Enter));
        assert_eq!(bare.advance(TICK), None);
    }

    #[test]
    fn new_playback_replaces_running_one() {
        let mut orchestrator = orchestrator();
        orchestrator.begin(Some("fade"), TransitionDirection::Exit);
        orchestrator.begin(Some("fade"), TransitionDirection::Enter);
        assert!(orchestrator.is_playing(TransitionDirection::Enter));
        assert!(!orchestrator.is_playing(TransitionDirection::Exit));
    }

    struct StuckPlayer;

    impl TransitionPlayer for StuckPlayer {
        fn play(&mut self, _: &TransitionDescriptor, _: TransitionDirection) -> FlowResult<PlaybackId> {
            Ok(PlaybackId(1))
        }

        fn is_finished(&mut self, _: PlaybackId) -> bool {
            false
        }

        fn stop(&mut self, _: PlaybackId) {}
    }

    #[test]
    fn stuck_playback_is_abandoned() {
        let mut orchestrator = orchestrator();
        orchestrator.set_timeout(Duration::from_millis(300));
        orchestrator.set_player(Some(Box::new(StuckPlayer)));
        orchestrator.begin(Some("fade"), TransitionDirection::Exit);

        assert_eq!(orchestrator.advance(TICK), None);
        assert_eq!(orchestrator.advance(TICK), None);
        let done = orchestrator.advance(TICK).unwrap();
        assert!(done.abandoned);
    }
}
