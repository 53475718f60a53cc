//! Migration of saved action/feedback options to the current shape
//!
//! Every step only fills in or renames fields that are missing in the
//! current shape, so running the upgrade again changes nothing and values
//! the user set are never overwritten.

use serde_json::{Map, Value};
use tracing::debug;

use super::{SavedAction, SavedFeedback, SavedItems};
use crate::coerce::normalize_path;

/// Upgrade every saved item; returns how many changed
pub fn upgrade_saved(saved: &mut SavedItems) -> usize {
    let actions = saved
        .actions
        .iter_mut()
        .map(upgrade_action)
        .filter(|changed| *changed)
        .count();
    let feedbacks = saved
        .feedbacks
        .iter_mut()
        .map(upgrade_feedback)
        .filter(|changed| *changed)
        .count();
    actions + feedbacks
}

pub fn upgrade_action(action: &mut SavedAction) -> bool {
    let options = &mut action.options;
    let mut changed = rename(options, "variable", "useVar");
    changed |= normalize_path_option(options);

    match action.action_id.as_str() {
        "setValueInt" => {
            changed |= fill(options, "factor", Value::from(1));
            changed |= fill(options, "relative", Value::Bool(false));
            changed |= fill(options, "useVar", Value::Bool(false));
        },
        "setValueReal" => {
            changed |= fill(options, "relative", Value::Bool(false));
            changed |= fill(options, "useVar", Value::Bool(false));
        },
        "setValueEnum" => {
            changed |= fill(options, "relative", Value::Bool(false));
            changed |= fill(options, "useVar", Value::Bool(false));
            changed |= fill(options, "asEnum", Value::Bool(false));
        },
        "setValueString" => {
            changed |= fill(options, "parseEscapeChars", Value::Bool(false));
            changed |= fill(options, "useVar", Value::Bool(false));
        },
        "setValueBoolean" => {
            changed |= fill(options, "toggle", Value::Bool(false));
            changed |= fill(options, "useVar", Value::Bool(false));
        },
        _ => {},
    }

    if changed {
        debug!(action = %action.action_id, "Saved action upgraded");
    }
    changed
}

pub fn upgrade_feedback(feedback: &mut SavedFeedback) -> bool {
    let options = &mut feedback.options;
    let mut changed = normalize_path_option(options);

    if feedback.feedback_id == "parameter" {
        changed |= rename(options, "comparitor", "comparator");
        changed |= fill(options, "type", Value::from("String"));
        changed |= fill(options, "parseEscapeChars", Value::Bool(false));
    }

    if changed {
        debug!(feedback = %feedback.feedback_id, "Saved feedback upgraded");
    }
    changed
}

/// Move `from` to `to` unless `to` is already set
fn rename(options: &mut Map<String, Value>, from: &str, to: &str) -> bool {
    let Some(value) = options.remove(from) else {
        return false;
    };
    if !options.contains_key(to) {
        options.insert(to.to_string(), value);
    }
    true
}

fn fill(options: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    if options.contains_key(key) {
        return false;
    }
    options.insert(key.to_string(), value);
    true
}

fn normalize_path_option(options: &mut Map<String, Value>) -> bool {
    let Some(Value::String(path)) = options.get("path") else {
        return false;
    };
    let normalized = normalize_path(path);
    if &normalized == path {
        return false;
    }
    options.insert("path".to_string(), Value::String(normalized));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_action_upgrade_is_idempotent() {
        let mut action = SavedAction {
            action_id: "setValueInt".into(),
            options: options(json!({ "path": "1/2", "variable": true, "value": "$(x:y)" })),
        };

        assert!(upgrade_action(&mut action));
        assert_eq!(
            Value::Object(action.options.clone()),
            json!({
                "path": "1.2",
                "useVar": true,
                "value": "$(x:y)",
                "factor": 1,
                "relative": false,
            })
        );

        let snapshot = action.clone();
        assert!(!upgrade_action(&mut action));
        assert_eq!(action, snapshot);
    }

    #[test]
    fn test_user_values_are_kept() {
        let mut action = SavedAction {
            action_id: "setValueInt".into(),
            options: options(json!({ "path": "1.2", "factor": 10, "useVar": false, "variable": true })),
        };
        upgrade_action(&mut action);
        assert_eq!(action.options["factor"], json!(10));
        assert_eq!(action.options["useVar"], json!(false));
        assert!(!action.options.contains_key("variable"));
    }

    #[test]
    fn test_feedback_upgrade() {
        let mut feedback = SavedFeedback {
            feedback_id: "parameter".into(),
            options: options(json!({ "path": "node[0.3]", "comparitor": "GreaterThan", "value": "5" })),
        };
        assert!(upgrade_feedback(&mut feedback));
        assert_eq!(feedback.options["path"], json!("0.3"));
        assert_eq!(feedback.options["comparator"], json!("GreaterThan"));
        assert_eq!(feedback.options["type"], json!("String"));
        assert!(!upgrade_feedback(&mut feedback));
    }

    #[test]
    fn test_upgrade_saved_counts_changes() {
        let mut saved = SavedItems {
            actions: vec![
                SavedAction {
                    action_id: "take".into(),
                    options: Map::new(),
                },
                SavedAction {
                    action_id: "setValueString".into(),
                    options: options(json!({ "path": "0.1", "value": "a" })),
                },
            ],
            feedbacks: vec![],
        };
        assert_eq!(upgrade_saved(&mut saved), 1);
        assert_eq!(upgrade_saved(&mut saved), 0);
    }
}
