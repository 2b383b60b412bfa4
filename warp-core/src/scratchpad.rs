//! Session scratchpad: the shared key-value blackboard steps read bound
//! inputs from and write declared outputs to (§4.6).

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single overwrite of a scratchpad key, kept for audit/debugging (§4.6:
/// "scratchpad overwrite is logged").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadWrite {
    pub key: String,
    pub previous: Option<serde_json::Value>,
    pub value: serde_json::Value,
    pub written_at: Timestamp,
}

/// The scratchpad itself: a flat key-value map plus a monotonic write log.
/// Keys are never deleted, only overwritten, so a step can always find the
/// latest value a prior step declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scratchpad {
    values: HashMap<String, serde_json::Value>,
    history: Vec<ScratchpadWrite>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value by key, if present.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Write a value, recording the previous value (if any) in the history.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value, at: Timestamp) {
        let key = key.into();
        let previous = self.values.insert(key.clone(), value.clone());
        self.history.push(ScratchpadWrite {
            key,
            previous,
            value,
            written_at: at,
        });
    }

    /// Full write history, oldest first.
    pub fn history(&self) -> &[ScratchpadWrite] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn set_then_get_round_trips() {
        let mut pad = Scratchpad::new();
        let now = Utc::now();
        pad.set("destination", serde_json::json!("Tokyo"), now);
        assert_eq!(pad.get("destination"), Some(&serde_json::json!("Tokyo")));
    }

    #[test]
    fn overwrite_is_logged_with_previous_value() {
        let mut pad = Scratchpad::new();
        let now = Utc::now();
        pad.set("budget", serde_json::json!(500), now);
        pad.set("budget", serde_json::json!(750), now);
        assert_eq!(pad.history().len(), 2);
        assert_eq!(pad.history()[1].previous, Some(serde_json::json!(500)));
        assert_eq!(pad.history()[1].value, serde_json::json!(750));
    }
}
