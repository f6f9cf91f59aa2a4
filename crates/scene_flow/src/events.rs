//! Structured records emitted by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use strum::{AsRefStr, Display};
use tracing::warn;

use crate::collaborators::AnalyticsSink;
use crate::error::FlowError;
use crate::payload::{Metadata, ScenePath};
use crate::transition::TransitionDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Push,
    Replace,
    Pop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    AboutToChange {
        operation: OperationKind,
        previous_scene: Option<String>,
    },
    SceneChanged {
        operation: OperationKind,
        previous_scene: Option<String>,
    },
    Pushed {
        previous_scene: Option<String>,
    },
    Replaced {
        previous_scene: Option<String>,
    },
    Popped {
        popped_scene: String,
    },
    Error {
        operation: Option<OperationKind>,
        error_code: String,
        message: String,
    },
    LoadingStarted {
        operation: OperationKind,
        seed_snapshot: Option<u64>,
    },
    LoadingProgress {
        progress: f32,
    },
    LoadingCompleted,
    LoadingFailed {
        error_code: String,
        message: String,
    },
    LoadingCancelled,
    TransitionCompleted {
        key: String,
        direction: TransitionDirection,
        abandoned: bool,
    },
}

impl FlowEvent {
    pub fn error(operation: Option<OperationKind>, error: &FlowError) -> Self {
        Self::Error {
            operation,
            error_code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    pub fn loading_failed(error: &FlowError) -> Self {
        Self::LoadingFailed {
            error_code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Event plus the context every analytics record carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEventRecord {
    #[serde(flatten)]
    pub event: FlowEvent,
    pub scene_path: String,
    pub stack_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Handed to the checkpoint collaborator after every successful activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub operation: OperationKind,
    pub scene_path: ScenePath,
    pub previous_scene: Option<ScenePath>,
    pub metadata: Metadata,
    pub previous_metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

/// Writes one JSON object per event.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + Sync> AnalyticsSink for JsonLinesSink<W> {
    fn record(&mut self, record: &FlowEventRecord) {
        let written = serde_json::to_writer(&mut self.writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(err) = written {
            warn!(error = %err, "failed to write analytics record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_flat_with_event_tag() {
        let record = FlowEventRecord {
            event: FlowEvent::Popped {
                popped_scene: "inventory".into(),
            },
            scene_path: "world".into(),
            stack_size: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "popped");
        assert_eq!(json["popped_scene"], "inventory");
        assert_eq!(json["scene_path"], "world");
        assert_eq!(json["stack_size"], 2);
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new());
        for progress in [0.25, 0.5] {
            sink.record(&FlowEventRecord {
                event: FlowEvent::LoadingProgress { progress },
                scene_path: "level".into(),
                stack_size: 1,
                timestamp: Utc::now(),
            });
        }
        sink.record(&FlowEventRecord {
            event: FlowEvent::error(
                Some(OperationKind::Push),
                &FlowError::NotFound("level".into()),
            ),
            scene_path: "level".into(),
            stack_size: 1,
            timestamp: Utc::now(),
        });

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);

        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["event"], "error");
        assert_eq!(last["error_code"], "not_found");
        assert_eq!(last["operation"], "push");
    }
}
