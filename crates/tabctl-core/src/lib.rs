use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod paths;
pub mod tree;
pub mod wire;

pub type TabId = i64;
pub type WindowId = i64;

/// A browser tab as reported by the controller. Fields the host does not
/// interpret are kept in `extra` so the record can be sent back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: TabId,
    #[serde(deserialize_with = "deserialize_id")]
    pub window_id: WindowId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Window ids in tab order, first appearance only.
pub fn distinct_windows(tabs: &[Tab]) -> Vec<WindowId> {
    let mut windows = Vec::new();
    for tab in tabs {
        if !windows.contains(&tab.window_id) {
            windows.push(tab.window_id);
        }
    }
    windows
}

/// Deserialize an ID that can be either a string or a number into an i64
fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("invalid i64")),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
