//! In-memory shadow documents.

use crate::error::{BrokerResult, Rejection};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One section of an update request (`desired` or `reported`).
#[derive(Debug, Clone, PartialEq)]
pub enum SectionPatch {
    /// The section was not mentioned.
    Keep,
    /// The section was set to `null`.
    Clear,
    /// Keys to merge; `null` values remove keys.
    Merge(Map<String, Value>),
}

impl SectionPatch {
    /// Parses a section from an optional JSON value.
    pub fn parse(name: &str, value: Option<&Value>) -> BrokerResult<Self> {
        match value {
            None => Ok(SectionPatch::Keep),
            Some(Value::Null) => Ok(SectionPatch::Clear),
            Some(Value::Object(map)) => Ok(SectionPatch::Merge(map.clone())),
            Some(_) => Err(Rejection::BadRequest(format!(
                "Invalid {name}: must be an object or null"
            ))),
        }
    }

    fn apply(&self, section: &mut Option<Map<String, Value>>) {
        match self {
            SectionPatch::Keep => {}
            SectionPatch::Clear => *section = None,
            SectionPatch::Merge(patch) => {
                let target = section.get_or_insert_with(Map::new);
                merge(target, patch);
                if target.is_empty() {
                    *section = None;
                }
            }
        }
    }
}

/// The stored state of one thing's shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowDocument {
    /// Desired state.
    pub desired: Option<Map<String, Value>>,
    /// Reported state.
    pub reported: Option<Map<String, Value>>,
    /// Incremented on every accepted update.
    pub version: u64,
}

impl ShadowDocument {
    /// Keys of `desired` whose values differ from `reported`.
    pub fn delta(&self) -> Option<Map<String, Value>> {
        let desired = self.desired.as_ref()?;
        let empty = Map::new();
        let delta = diff(desired, self.reported.as_ref().unwrap_or(&empty));
        (!delta.is_empty()).then_some(delta)
    }

    /// Renders `{"desired":…,"reported":…,"delta":…}`, omitting empty parts.
    pub fn state(&self) -> Value {
        let mut state = Map::new();
        if let Some(desired) = &self.desired {
            state.insert("desired".into(), Value::Object(desired.clone()));
        }
        if let Some(reported) = &self.reported {
            state.insert("reported".into(), Value::Object(reported.clone()));
        }
        if let Some(delta) = self.delta() {
            state.insert("delta".into(), Value::Object(delta));
        }
        Value::Object(state)
    }
}

/// Shadow documents keyed by thing name.
#[derive(Debug, Default)]
pub struct ShadowStore {
    shadows: RwLock<HashMap<String, ShadowDocument>>,
}

impl ShadowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a thing's shadow.
    pub fn get(&self, thing: &str) -> Option<ShadowDocument> {
        self.shadows.read().get(thing).cloned()
    }

    /// Applies an update and returns the previous and current documents.
    ///
    /// If `expected_version` is given it must equal the current version
    /// (zero when no shadow exists).
    pub fn update(
        &self,
        thing: &str,
        desired: &SectionPatch,
        reported: &SectionPatch,
        expected_version: Option<u64>,
    ) -> BrokerResult<(Option<ShadowDocument>, ShadowDocument)> {
        let mut shadows = self.shadows.write();
        let previous = shadows.get(thing).cloned();
        let current_version = previous.as_ref().map(|doc| doc.version).unwrap_or(0);

        if let Some(requested) = expected_version {
            if requested != current_version {
                return Err(Rejection::VersionConflict {
                    current: current_version,
                    requested,
                });
            }
        }

        let mut current = previous.clone().unwrap_or(ShadowDocument {
            desired: None,
            reported: None,
            version: 0,
        });
        desired.apply(&mut current.desired);
        reported.apply(&mut current.reported);
        current.version = current_version + 1;

        shadows.insert(thing.to_string(), current.clone());
        Ok((previous, current))
    }

    /// Removes a thing's shadow and returns it.
    pub fn delete(&self, thing: &str) -> BrokerResult<ShadowDocument> {
        self.shadows
            .write()
            .remove(thing)
            .ok_or_else(|| Rejection::NotFound(thing.to_string()))
    }

    /// Returns the number of stored shadows.
    pub fn len(&self) -> usize {
        self.shadows.read().len()
    }

    /// Returns true if no shadows are stored.
    pub fn is_empty(&self) -> bool {
        self.shadows.read().is_empty()
    }
}

/// Merges `patch` into `target`. `null` removes a key; objects merge
/// recursively; anything else replaces.
fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(inner) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    merge(existing, inner);
                    if existing.is_empty() {
                        target.remove(key);
                    }
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

fn diff(desired: &Map<String, Value>, reported: &Map<String, Value>) -> Map<String, Value> {
    let mut delta = Map::new();
    for (key, want) in desired {
        match (want, reported.get(key)) {
            (Value::Object(want), Some(Value::Object(have))) => {
                let inner = diff(want, have);
                if !inner.is_empty() {
                    delta.insert(key.clone(), Value::Object(inner));
                }
            }
            (want, Some(have)) if want == have => {}
            (want, _) => {
                delta.insert(key.clone(), want.clone());
            }
        }
    }
    delta
}
