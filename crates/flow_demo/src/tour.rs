//! Scripted navigation read from RON.
//!
//! ```ron
//! (
//!     start: "main_menu",
//!     steps: [
//!         Push((scene: "world", background: true, metadata: {"transition": "fade"})),
//!         Pop(data: "quit"),
//!     ],
//! )
//! ```

use serde::Deserialize;
use std::path::Path;

use scene_flow::{Metadata, PayloadValue};

#[derive(Debug, Clone, Deserialize)]
pub struct Tour {
    pub start: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub enum Step {
    Push(Navigation),
    Replace(Navigation),
    Pop {
        #[serde(default)]
        data: PayloadValue,
        #[serde(default)]
        metadata: Metadata,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Navigation {
    pub scene: String,
    #[serde(default)]
    pub data: PayloadValue,
    #[serde(default)]
    pub metadata: Metadata,
    /// Load through `advance` instead of on the spot.
    #[serde(default)]
    pub background: bool,
    /// Cancel a background load after this many ticks.
    #[serde(default)]
    pub cancel_after: Option<u32>,
}

impl Tour {
    pub fn from_ron(source: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(source)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("cannot read tour {}: {err}", path.display()))?;
        Self::from_ron(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps() {
        let tour = Tour::from_ron(
            r#"(
                start: "menu",
                steps: [
                    Push((scene: "world", background: true, metadata: {"transition": "fade", "difficulty": "hard"})),
                    Replace((scene: "credits", cancel_after: Some(2))),
                    Pop(data: "bye"),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(tour.start, "menu");
        assert_eq!(tour.steps.len(), 3);
        let Step::Push(push) = &tour.steps[0] else {
            panic!("expected push");
        };
        assert!(push.background);
        assert_eq!(push.metadata.transition.as_deref(), Some("fade"));
        assert_eq!(
            push.metadata.get("difficulty"),
            Some(&PayloadValue::from("hard"))
        );
        let Step::Pop { data, .. } = &tour.steps[2] else {
            panic!("expected pop");
        };
        assert_eq!(data, &PayloadValue::from("bye"));
    }

    #[test]
    fn shipped_tour_parses() {
        let tour = Tour::from_ron(include_str!("../scenes/tour.ron")).unwrap();
        assert_eq!(tour.start, "main_menu");
        assert!(tour.steps.iter().any(|step| matches!(
            step,
            Step::Push(Navigation { cancel_after: Some(_), .. })
        )));
    }
}
