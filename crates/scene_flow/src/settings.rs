use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller configuration, stored under `[scene_flow]` in the settings file.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct FlowSettings {
    /// Ask the save service to persist before each scene change.
    pub save_on_transition: bool,
    pub save_slot: String,
    pub show_loading_screen: bool,
    /// Transition used when a call does not name one.
    pub default_transition: Option<String>,
    /// Watchdog for background loads, in seconds of tick time. Off when unset.
    pub load_timeout_secs: Option<f32>,
    pub transition_timeout_secs: f32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            save_on_transition: false,
            save_slot: "autosave".into(),
            show_loading_screen: true,
            default_transition: None,
            load_timeout_secs: None,
            transition_timeout_secs: 5.0,
        }
    }
}

impl FlowSettings {
    pub const SECTION: &'static str = "scene_flow";

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f32(secs).ok())
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.transition_timeout_secs).unwrap_or(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = FlowSettings::default();
        assert!(!settings.save_on_transition);
        assert_eq!(settings.save_slot, "autosave");
        assert_eq!(settings.load_timeout(), None);
        assert_eq!(settings.transition_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_durations_fall_back() {
        let settings = FlowSettings {
            load_timeout_secs: Some(-1.0),
            transition_timeout_secs: f32::NAN,
            ..FlowSettings::default()
        };
        assert_eq!(settings.load_timeout(), None);
        assert_eq!(settings.transition_timeout(), Duration::from_secs(5));
    }
}
