//! `ContextData`: the small string-keyed bag attached to every session
//! record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const KEY_TUNER_SLOT: &str = "tuner_slot";
const KEY_MODE: &str = "mode";
const KEY_SOURCE: &str = "source";
const KEY_SOURCE_TYPE: &str = "source_type";
const KEY_RECOVERED: &str = "recovered";

/// Mapping from short keys to small strings, carried on every
/// [`crate::SessionRecord`]. A `BTreeMap` rather than a `HashMap` so log
/// lines and test assertions over its `Debug` output are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextData(BTreeMap<String, String>);

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn tuner_slot(&self) -> Option<u32> {
        self.get(KEY_TUNER_SLOT).and_then(|v| v.parse().ok())
    }

    pub fn set_tuner_slot(&mut self, slot: u32) {
        self.set(KEY_TUNER_SLOT, slot.to_string());
    }

    pub fn mode(&self) -> Option<&str> {
        self.get(KEY_MODE)
    }

    pub fn set_mode(&mut self, mode: &str) {
        self.set(KEY_MODE, mode);
    }

    pub fn source(&self) -> Option<&str> {
        self.get(KEY_SOURCE)
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.set(KEY_SOURCE, source.into());
    }

    pub fn source_type(&self) -> Option<&str> {
        self.get(KEY_SOURCE_TYPE)
    }

    pub fn set_source_type(&mut self, source_type: impl Into<String>) {
        self.set(KEY_SOURCE_TYPE, source_type.into());
    }

    pub fn is_recovered(&self) -> bool {
        self.get(KEY_RECOVERED) == Some("true")
    }

    pub fn set_recovered(&mut self) {
        self.set(KEY_RECOVERED, "true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuner_slot_round_trips_through_string_storage() {
        let mut ctx = ContextData::new();
        assert_eq!(ctx.tuner_slot(), None);
        ctx.set_tuner_slot(3);
        assert_eq!(ctx.tuner_slot(), Some(3));
    }

    #[test]
    fn recovered_flag_defaults_false() {
        let mut ctx = ContextData::new();
        assert!(!ctx.is_recovered());
        ctx.set_recovered();
        assert!(ctx.is_recovered());
    }
}
