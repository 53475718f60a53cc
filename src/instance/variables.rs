//! Device change notifications → host variables, feedback re-checks, recorder

use serde_json::{json, Map, Value};
use std::sync::atomic::Ordering;
use tracing::trace;

use super::{FeedbackId, InstanceContext};
use crate::coerce::{encode_escapes, enum_label_of, sanitize_variable_id};
use crate::ember::{EmberValue, ParameterType, TreeElement};
use crate::host::RecordedAction;
use crate::state::{CachedParameter, Selection};

/// Suffix of the label variable emitted for Enum parameters
pub(crate) const ENUM_SUFFIX: &str = "_ENUM";

pub(crate) const SELECTED_MATRIX: &str = "selected_matrix";
pub(crate) const SELECTED_SOURCE: &str = "selected_source";
pub(crate) const SELECTED_TARGET: &str = "selected_target";

impl InstanceContext {
    /// Merge a device update and schedule the host-facing refresh
    pub(crate) fn handle_changed_value(&self, path: &str, element: &TreeElement) {
        let apply_factor = self.config.read().factor;
        let (cached, watchers) = {
            let mut state = self.state.lock();
            let Some(cached) = state.upsert(path, element).cloned() else {
                return;
            };
            (cached, state.watchers_of(path))
        };
        trace!(path, watchers = watchers.len(), "Parameter changed");

        let id = sanitize_variable_id(path);
        let display = display_value(&cached, apply_factor);
        let label = enum_label(&cached);
        self.variables.schedule(move |batch| {
            if let Some(label) = label {
                batch.insert(format!("{}{}", id, ENUM_SUFFIX), Value::String(label));
            }
            batch.insert(id, display);
        });

        if !watchers.is_empty() {
            self.feedback_checks
                .schedule(move |checks| checks.ids.extend(watchers));
        }

        if self.recording.load(Ordering::SeqCst) {
            if let Some(action) = recorded_action(path, &cached, apply_factor) {
                self.host.record_action(action, Some(path.to_string()));
            }
        }
    }

    /// Push selection variables and re-check the selection feedbacks
    pub(crate) fn selection_changed(&self) {
        let selection = self.state.lock().selection;
        self.variables.schedule(|batch| {
            batch.extend(selection_variables(&selection));
        });
        self.feedback_checks.schedule(|checks| {
            for kind in [
                FeedbackId::SourceSelected,
                FeedbackId::TargetSelected,
                FeedbackId::TakeReady,
            ] {
                checks.kinds.insert(kind.as_str().to_string());
            }
        });
    }
}

fn selection_variables(selection: &Selection) -> [(String, Value); 3] {
    [
        (SELECTED_MATRIX.to_string(), json!(selection.matrix)),
        (SELECTED_SOURCE.to_string(), json!(selection.source)),
        (SELECTED_TARGET.to_string(), json!(selection.target)),
    ]
}

/// Host-facing form of a cached value
///
/// With `apply_factor`, Integer values are divided by their factor.
pub(crate) fn display_value(cached: &CachedParameter, apply_factor: bool) -> Value {
    let Some(value) = cached.value() else {
        return Value::Null;
    };
    match (value, cached.contents.factor) {
        (EmberValue::Integer(raw), Some(factor))
            if apply_factor
                && factor != 0
                && cached.parameter_type() != Some(ParameterType::Enum) =>
        {
            let scaled = *raw as f64 / factor as f64;
            if scaled.fract() == 0.0 {
                json!(scaled as i64)
            } else {
                json!(scaled)
            }
        },
        (EmberValue::Boolean(b), _) => json!(b),
        (EmberValue::Integer(i), _) => json!(i),
        (EmberValue::Real(r), _) => json!(r),
        (EmberValue::String(s), _) => json!(s),
        (EmberValue::Octets(_), _) => json!(value.to_display_string()),
    }
}

fn enum_label(cached: &CachedParameter) -> Option<String> {
    if cached.parameter_type() != Some(ParameterType::Enum) {
        return None;
    }
    let index = cached.numeric_value()? as i64;
    Some(
        cached
            .contents
            .enumeration
            .as_deref()
            .map(|e| enum_label_of(e, index))
            .unwrap_or_default(),
    )
}

/// Set-value action mirroring a device-applied value
fn recorded_action(path: &str, cached: &CachedParameter, apply_factor: bool) -> Option<RecordedAction> {
    let value = cached.value()?;
    let mut options = Map::new();
    options.insert("path".to_string(), json!(path));

    let action_id = match cached.parameter_type()? {
        ParameterType::Boolean => {
            options.insert("value".to_string(), json!(value.is_truthy()));
            options.insert("toggle".to_string(), json!(false));
            "setValueBoolean"
        },
        ParameterType::Integer => {
            let factor = match cached.contents.factor {
                Some(f) if apply_factor && f != 0 => f,
                _ => 1,
            };
            options.insert("value".to_string(), display_value(cached, apply_factor));
            options.insert("factor".to_string(), json!(factor));
            options.insert("relative".to_string(), json!(false));
            "setValueInt"
        },
        ParameterType::Real => {
            options.insert("value".to_string(), json!(value.as_f64()?));
            options.insert("relative".to_string(), json!(false));
            "setValueReal"
        },
        ParameterType::Enum => {
            options.insert("value".to_string(), json!(value.as_f64()? as i64));
            options.insert("asEnum".to_string(), json!(false));
            options.insert("relative".to_string(), json!(false));
            "setValueEnum"
        },
        ParameterType::String => {
            options.insert(
                "value".to_string(),
                json!(encode_escapes(&value.to_display_string())),
            );
            options.insert("parseEscapeChars".to_string(), json!(true));
            "setValueString"
        },
    };

    Some(RecordedAction {
        action_id: action_id.to_string(),
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ember::ParameterContents;

    fn cached(contents: ParameterContents) -> CachedParameter {
        CachedParameter {
            element: TreeElement::parameter("1.2", contents.clone()),
            contents,
        }
    }

    #[test]
    fn test_display_applies_factor_only_when_enabled() {
        let gain = cached(ParameterContents {
            value: Some(EmberValue::Integer(500)),
            parameter_type: Some(ParameterType::Integer),
            factor: Some(10),
            ..Default::default()
        });
        assert_eq!(display_value(&gain, true), json!(50));
        assert_eq!(display_value(&gain, false), json!(500));

        let odd = cached(ParameterContents {
            value: Some(EmberValue::Integer(505)),
            parameter_type: Some(ParameterType::Integer),
            factor: Some(10),
            ..Default::default()
        });
        assert_eq!(display_value(&odd, true), json!(50.5));
    }

    #[test]
    fn test_octets_display_as_hex() {
        let blob = cached(ParameterContents {
            value: Some(EmberValue::Octets(vec![0x0a, 0xff])),
            ..Default::default()
        });
        assert_eq!(display_value(&blob, false), json!("0aff"));
    }

    #[test]
    fn test_recorded_string_is_escaped() {
        let text = cached(ParameterContents {
            value: Some(EmberValue::String("a\nb".into())),
            parameter_type: Some(ParameterType::String),
            ..Default::default()
        });
        let action = recorded_action("0.4", &text, false).unwrap();
        assert_eq!(action.action_id, "setValueString");
        assert_eq!(action.options["value"], json!("a\\nb"));
        assert_eq!(action.options["parseEscapeChars"], json!(true));
    }

    #[test]
    fn test_recorded_integer_round_trips_through_factor() {
        let gain = cached(ParameterContents {
            value: Some(EmberValue::Integer(500)),
            parameter_type: Some(ParameterType::Integer),
            factor: Some(10),
            ..Default::default()
        });
        let action = recorded_action("1.2", &gain, true).unwrap();
        assert_eq!(action.options["value"], json!(50));
        assert_eq!(action.options["factor"], json!(10));
    }
}
