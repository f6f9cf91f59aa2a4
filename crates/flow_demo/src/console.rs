//! Terminal implementations of the controller's collaborators.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use scene_flow::{
    CheckpointRecord, CheckpointSink, FlowResult, LoadInfo, LoadingScreen, Metadata, Payload,
    SaveService, SceneHost, ScenePath,
};

use crate::manifest::SceneManifest;

const BAR_WIDTH: usize = 24;

/// Keeps the manifest of whatever scene is live.
#[derive(Clone, Default)]
pub struct ConsoleHost {
    current: Arc<Mutex<Option<SceneManifest>>>,
}

impl ConsoleHost {
    pub fn current_title(&self) -> Option<String> {
        let current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.as_ref().map(|manifest| manifest.title.clone())
    }
}

impl SceneHost<SceneManifest> for ConsoleHost {
    fn activate(&mut self, scene_path: &ScenePath, manifest: SceneManifest) -> FlowResult<()> {
        info!(scene = %scene_path, title = %manifest.title, "{}", manifest.description);
        if !manifest.exits.is_empty() {
            info!("  exits: {}", manifest.exits.join(", "));
        }
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = Some(manifest);
        Ok(())
    }

    fn receive_payload(&mut self, payload: &Payload) -> bool {
        if payload.is_blank() {
            return false;
        }
        let data = ron::to_string(payload.data()).unwrap_or_else(|err| err.to_string());
        info!(
            from = payload.source_scene().map(ScenePath::as_str).unwrap_or("-"),
            "  payload: {data}"
        );
        true
    }
}

#[derive(Default)]
pub struct ConsoleLoadingScreen;

fn bar(progress: f32) -> String {
    let filled = (progress.clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

impl LoadingScreen for ConsoleLoadingScreen {
    fn begin_loading(&mut self, load: &LoadInfo<'_>) {
        match load.seed_snapshot {
            Some(seed) => info!("loading {} (seed {seed:#018x})", load.scene_path),
            None => info!("loading {}", load.scene_path),
        }
    }

    fn update_progress(&mut self, progress: f32, _metadata: &Metadata) {
        info!("  {} {:>3.0}%", bar(progress), progress * 100.0);
    }

    fn finish_loading(&mut self, success: bool, _metadata: &Metadata) {
        if success {
            info!("  {} done", bar(1.0));
        } else {
            warn!("  load aborted");
        }
    }
}

/// Collects checkpoints so the run can be summarised at the end.
#[derive(Clone, Default)]
pub struct CheckpointLog {
    records: Arc<Mutex<Vec<CheckpointRecord>>>,
}

impl CheckpointLog {
    pub fn records(&self) -> Vec<CheckpointRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CheckpointSink for CheckpointLog {
    fn checkpoint(&mut self, record: &CheckpointRecord) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(record.clone());
    }
}

#[derive(Serialize)]
struct SaveStamp<'a> {
    slot: &'a str,
    saved_at: chrono::DateTime<Utc>,
    scene: Option<String>,
}

/// Writes a small RON stamp per slot into the saves directory.
pub struct FileSaves {
    dir: PathBuf,
    host: ConsoleHost,
}

impl FileSaves {
    pub fn new(dir: impl Into<PathBuf>, host: ConsoleHost) -> Self {
        Self {
            dir: dir.into(),
            host,
        }
    }
}

impl SaveService for FileSaves {
    fn save(&mut self, slot: &str) -> bool {
        let stamp = SaveStamp {
            slot,
            saved_at: Utc::now(),
            scene: self.host.current_title(),
        };
        let file = self.dir.join(format!("{slot}.ron"));
        let written = ron::ser::to_string_pretty(&stamp, ron::ser::PrettyConfig::default())
            .map_err(|err| err.to_string())
            .and_then(|text| fs::write(&file, text).map_err(|err| err.to_string()));
        match written {
            Ok(()) => true,
            Err(err) => {
                warn!(file = %file.display(), error = %err, "save failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_is_bounded() {
        assert_eq!(bar(0.0), format!("[{}]", ".".repeat(BAR_WIDTH)));
        assert_eq!(bar(1.0), format!("[{}]", "#".repeat(BAR_WIDTH)));
        assert_eq!(bar(7.0), bar(1.0));
    }

    #[test]
    fn saves_record_current_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = ConsoleHost::default();
        host.activate(
            &ScenePath::new("hall").unwrap(),
            SceneManifest {
                title: "Hall".into(),
                description: String::new(),
                load_ms: 0,
                exits: Vec::new(),
            },
        )
        .unwrap();

        let mut saves = FileSaves::new(dir.path(), host);
        assert!(saves.save("quick"));
        let text = fs::read_to_string(dir.path().join("quick.ron")).unwrap();
        assert!(text.contains("Hall"));

        let mut broken = FileSaves::new(dir.path().join("missing"), ConsoleHost::default());
        assert!(!broken.save("quick"));
    }
}
