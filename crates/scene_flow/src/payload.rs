//! Data handed from one navigation step to the next.
//!
//! A [`Payload`] is built once per navigation call and never mutated
//! afterwards. Its [`Metadata`] carries the keys the controller itself
//! understands (`transition`, `loading_screen`) as typed fields and keeps
//! everything else in an insertion-ordered map.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{FlowError, FlowResult};

/// Identifier of a loadable scene, e.g. `"scenes/main_menu"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScenePath(String);

impl ScenePath {
    pub fn new(path: impl Into<String>) -> FlowResult<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(FlowError::InvalidParameter(
                "scene path must not be empty".to_string(),
            ));
        }
        Ok(Self(path))
    }

    /// Skips validation; only for echoing rejected input back on a failed handle.
    pub(crate) fn unchecked(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScenePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ScenePath {
    type Error = FlowError;

    fn try_from(value: String) -> FlowResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ScenePath {
    type Error = FlowError;

    fn try_from(value: &str) -> FlowResult<Self> {
        Self::new(value)
    }
}

impl From<ScenePath> for String {
    fn from(path: ScenePath) -> Self {
        path.0
    }
}

/// Loosely structured value carried in payload data and metadata fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PayloadValue>),
    Map(IndexMap<String, PayloadValue>),
}

impl PayloadValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<PayloadValue>> From<Option<T>> for PayloadValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl<T: Into<PayloadValue>> From<Vec<T>> for PayloadValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<()> for PayloadValue {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

/// Per-call navigation metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Name of the transition to play, looked up in the transition library.
    #[serde(
        default,
        deserialize_with = "plain_or_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub transition: Option<String>,
    /// Overrides whether the loading screen is shown for an async load.
    #[serde(
        default,
        deserialize_with = "plain_or_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub loading_screen: Option<bool>,
    /// Free-form extension fields, kept in insertion order.
    #[serde(flatten)]
    pub fields: IndexMap<String, PayloadValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_transition(mut self, key: impl Into<String>) -> Self {
        self.transition = Some(key.into());
        self
    }

    pub fn with_loading_screen(mut self, show: bool) -> Self {
        self.loading_screen = Some(show);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.transition.is_none() && self.loading_screen.is_none() && self.fields.is_empty()
    }
}

/// Accepts `"fade"` as well as `Some("fade")` for the typed metadata keys, so
/// hand-written RON maps read the same as JSON.
fn plain_or_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient<T> {
        Plain(T),
        Wrapped(Option<T>),
    }

    Ok(match Lenient::deserialize(deserializer)? {
        Lenient::Plain(value) => Some(value),
        Lenient::Wrapped(value) => value,
    })
}

impl<K: Into<String>, V: Into<PayloadValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Metadata::new(), |meta, (key, value)| meta.with(key, value))
    }
}

/// Immutable data delivered to a newly active scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    data: PayloadValue,
    metadata: Metadata,
    source_scene: Option<ScenePath>,
    created_at: DateTime<Utc>,
}

impl Payload {
    /// `source_scene` names the entry that was active when the payload was
    /// created. Only the seed entry of a fresh stack has no source.
    pub fn new(
        data: impl Into<PayloadValue>,
        metadata: Metadata,
        source_scene: Option<ScenePath>,
    ) -> Self {
        Self {
            data: data.into(),
            metadata,
            source_scene,
            created_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(PayloadValue::Null, Metadata::new(), None)
    }

    pub fn data(&self) -> &PayloadValue {
        &self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn source_scene(&self) -> Option<&ScenePath> {
        self.source_scene.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True when neither data nor metadata carry anything.
    pub fn is_blank(&self) -> bool {
        self.data.is_null() && self.metadata.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_path_rejects_blank() {
        assert!(matches!(
            ScenePath::new(""),
            Err(FlowError::InvalidParameter(_))
        ));
        assert!(ScenePath::new("   ").is_err());
        assert_eq!(ScenePath::new("menu").unwrap().as_str(), "menu");
    }

    #[test]
    fn metadata_keeps_insertion_order() {
        let meta = Metadata::new()
            .with("zeta", 1)
            .with("alpha", "two")
            .with("mid", true);
        let keys: Vec<_> = meta.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert_eq!(meta.get("alpha").and_then(PayloadValue::as_str), Some("two"));
    }

    #[test]
    fn metadata_typed_keys_count_as_content() {
        assert!(Metadata::new().is_empty());
        assert!(!Metadata::new().with_transition("fade").is_empty());
        assert!(!Metadata::new().with_loading_screen(false).is_empty());
    }

    #[test]
    fn metadata_serializes_flat() {
        let meta = Metadata::new().with_transition("fade").with("reason", "quit");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["transition"], "fade");
        assert_eq!(json["reason"], "quit");

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn metadata_reads_plain_and_wrapped_ron_keys() {
        let plain: Metadata =
            ron::from_str(r#"{"transition": "fade", "loading_screen": false, "slot": 2}"#).unwrap();
        assert_eq!(plain.transition.as_deref(), Some("fade"));
        assert_eq!(plain.loading_screen, Some(false));
        assert_eq!(plain.get("slot"), Some(&PayloadValue::Int(2)));

        let wrapped: Metadata = ron::from_str(r#"{"transition": Some("wipe")}"#).unwrap();
        assert_eq!(wrapped.transition.as_deref(), Some("wipe"));

        let json: Metadata = serde_json::from_str(r#"{"transition": null}"#).unwrap();
        assert_eq!(json, Metadata::new());
    }

    #[test]
    fn blank_payload() {
        assert!(Payload::empty().is_blank());
        let payload = Payload::new("x", Metadata::new(), None);
        assert!(!payload.is_blank());
    }
}
