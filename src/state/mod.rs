//! Parameter cache - local mirror of the provider parameters in use
//!
//! Tracks, per bridge instance:
//! - the merged contents of every registered parameter
//! - which feedback watches which path (both directions)
//! - the crosspoint selection used by take/select actions
//! - the set of paths kept subscribed across reconnects

mod types;

pub use types::{CachedParameter, Selection, NO_SELECTION};

use crate::coerce::{enum_index_of, enum_label_of};
use crate::ember::{ElementContents, TreeElement};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

/// All mutable per-instance bridge state
#[derive(Debug, Default)]
pub struct EmberState {
    parameters: HashMap<String, CachedParameter>,
    /// feedback id → watched path
    feedback_paths: HashMap<String, String>,
    /// path → feedback ids watching it
    path_feedbacks: HashMap<String, HashSet<String>>,
    /// Paths kept subscribed (configured or picked up from use)
    monitored: BTreeSet<String>,
    pub selection: Selection,
}

impl EmberState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a provider element into the cache
    ///
    /// Non-parameter elements are ignored. Returns the merged entry.
    pub fn upsert(&mut self, path: &str, element: &TreeElement) -> Option<&CachedParameter> {
        let ElementContents::Parameter(update) = &element.contents else {
            return None;
        };
        let entry = self
            .parameters
            .entry(path.to_string())
            .and_modify(|cached| {
                cached.contents.merge(update);
                cached.element = element.clone();
            })
            .or_insert_with(|| CachedParameter {
                contents: update.clone(),
                element: element.clone(),
            });
        trace!(path, value = ?entry.contents.value, "Parameter cached");
        Some(&*entry)
    }

    pub fn get(&self, path: &str) -> Option<&CachedParameter> {
        self.parameters.get(path)
    }

    pub fn has(&self, path: &str) -> bool {
        self.parameters.contains_key(path)
    }

    /// Label of the current enum value, `""` when unknown
    pub fn current_enum_label(&self, path: &str) -> String {
        let Some(param) = self.parameters.get(path) else {
            return String::new();
        };
        match (&param.contents.enumeration, param.numeric_value()) {
            (Some(enumeration), Some(index)) => enum_label_of(enumeration, index as i64),
            _ => String::new(),
        }
    }

    /// Index of `label` in the cached enumeration
    pub fn enum_index_for(&self, path: &str, label: &str) -> Option<usize> {
        self.parameters
            .get(path)
            .and_then(|p| p.contents.enumeration.as_deref())
            .and_then(|enumeration| enum_index_of(enumeration, label))
    }

    /// Point `feedback_id` at `path`; an empty path only unregisters
    pub fn watch(&mut self, feedback_id: &str, path: &str) {
        if let Some(old) = self.feedback_paths.get(feedback_id) {
            if old == path {
                return;
            }
        }
        self.unwatch(feedback_id);
        if path.is_empty() {
            return;
        }
        self.feedback_paths
            .insert(feedback_id.to_string(), path.to_string());
        self.path_feedbacks
            .entry(path.to_string())
            .or_default()
            .insert(feedback_id.to_string());
    }

    pub fn unwatch(&mut self, feedback_id: &str) {
        let Some(old) = self.feedback_paths.remove(feedback_id) else {
            return;
        };
        if let Some(watchers) = self.path_feedbacks.get_mut(&old) {
            watchers.remove(feedback_id);
            if watchers.is_empty() {
                self.path_feedbacks.remove(&old);
            }
        }
    }

    pub fn watchers_of(&self, path: &str) -> HashSet<String> {
        self.path_feedbacks.get(path).cloned().unwrap_or_default()
    }

    pub fn is_monitored(&self, path: &str) -> bool {
        self.monitored.contains(path)
    }

    /// Returns true when the path was not monitored before
    pub fn add_monitored(&mut self, path: &str) -> bool {
        self.monitored.insert(path.to_string())
    }

    pub fn monitored(&self) -> impl Iterator<Item = &String> {
        self.monitored.iter()
    }

    /// Forget cached paths outside the monitored set
    ///
    /// Their change callbacks belong to a finished session, so the next use
    /// has to look them up again. Returns how many entries were dropped.
    pub fn drop_read_once(&mut self) -> usize {
        let before = self.parameters.len();
        let monitored = &self.monitored;
        self.parameters.retain(|path, _| monitored.contains(path));
        before - self.parameters.len()
    }

    /// Drop everything (configuration reload)
    pub fn reset(&mut self) {
        self.parameters.clear();
        self.feedback_paths.clear();
        self.path_feedbacks.clear();
        self.monitored.clear();
        self.selection.clear();
    }

    #[cfg(test)]
    pub(crate) fn watched_path_count(&self) -> usize {
        self.path_feedbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ember::{EmberValue, NodeContents, ParameterContents, ParameterType};

    fn enum_param(value: i64) -> TreeElement {
        TreeElement::parameter(
            "0.3",
            ParameterContents {
                value: Some(EmberValue::Integer(value)),
                parameter_type: Some(ParameterType::Enum),
                enumeration: Some("Off\nOn\nStandby".into()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_upsert_ignores_nodes() {
        let mut state = EmberState::new();
        let node = TreeElement {
            path: "0".into(),
            contents: ElementContents::Node(NodeContents::default()),
        };
        assert!(state.upsert("0", &node).is_none());
        assert!(!state.has("0"));
    }

    #[test]
    fn test_upsert_merges() {
        let mut state = EmberState::new();
        state.upsert("0.3", &enum_param(1));
        let partial = TreeElement::parameter(
            "0.3",
            ParameterContents {
                value: Some(EmberValue::Integer(2)),
                ..Default::default()
            },
        );
        state.upsert("0.3", &partial);

        let cached = state.get("0.3").unwrap();
        assert_eq!(cached.value(), Some(&EmberValue::Integer(2)));
        assert_eq!(cached.parameter_type(), Some(ParameterType::Enum));
        assert_eq!(cached.element, partial);
    }

    #[test]
    fn test_enum_helpers() {
        let mut state = EmberState::new();
        assert_eq!(state.current_enum_label("0.3"), "");
        assert_eq!(state.enum_index_for("0.3", "On"), None);

        state.upsert("0.3", &enum_param(2));
        assert_eq!(state.current_enum_label("0.3"), "Standby");
        assert_eq!(state.enum_index_for("0.3", "On"), Some(1));
        assert_eq!(state.enum_index_for("0.3", "Nope"), None);
    }

    #[test]
    fn test_watch_moves_and_cleans_reverse_index() {
        let mut state = EmberState::new();
        state.watch("fb1", "1.1");
        state.watch("fb2", "1.1");
        assert_eq!(state.watchers_of("1.1").len(), 2);

        state.watch("fb1", "1.2");
        assert_eq!(state.watchers_of("1.1").len(), 1);
        assert!(state.watchers_of("1.2").contains("fb1"));

        state.watch("fb2", "");
        assert!(state.watchers_of("1.1").is_empty());
        assert_eq!(state.watched_path_count(), 1);

        state.unwatch("fb1");
        assert_eq!(state.watched_path_count(), 0);
    }

    #[test]
    fn test_drop_read_once_keeps_monitored_and_watchers() {
        let mut state = EmberState::new();
        state.upsert("0.3", &enum_param(0));
        state.upsert("0.4", &enum_param(1));
        state.add_monitored("0.3");
        state.watch("fb", "0.4");

        assert_eq!(state.drop_read_once(), 1);
        assert!(state.has("0.3"));
        assert!(!state.has("0.4"));
        // The feedback keeps watching so it is re-checked on the next change
        assert!(state.watchers_of("0.4").contains("fb"));
        assert_eq!(state.drop_read_once(), 0);
    }

    #[test]
    fn test_reset() {
        let mut state = EmberState::new();
        state.upsert("0.3", &enum_param(0));
        state.watch("fb", "0.3");
        state.add_monitored("0.3");
        state.selection = Selection {
            source: 1,
            target: 2,
            matrix: 0,
        };

        state.reset();
        assert!(!state.has("0.3"));
        assert!(state.watchers_of("0.3").is_empty());
        assert!(!state.is_monitored("0.3"));
        assert_eq!(state.selection, Selection::default());
    }

    #[test]
    fn test_selection_complete() {
        let mut selection = Selection::default();
        assert!(!selection.is_complete());
        selection.source = 0;
        selection.target = 0;
        selection.matrix = 0;
        assert!(selection.is_complete());
        selection.clear();
        assert_eq!(selection.source, NO_SELECTION);
    }
}
