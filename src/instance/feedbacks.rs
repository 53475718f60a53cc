//! Feedback resolution against the parameter cache and selection

use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, trace};

use super::InstanceContext;
use crate::coerce::{compare, decode_escapes, normalize_path, parse_number, Comparator};
use crate::ember::{EmberValue, ParameterType};
use crate::host::LogLevel;
use crate::state::CachedParameter;

/// Feedback kinds exposed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackId {
    Parameter,
    SourceSelected,
    TargetSelected,
    TakeReady,
}

impl FeedbackId {
    pub fn all() -> &'static [FeedbackId] {
        &[
            FeedbackId::Parameter,
            FeedbackId::SourceSelected,
            FeedbackId::TargetSelected,
            FeedbackId::TakeReady,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackId::Parameter => "parameter",
            FeedbackId::SourceSelected => "sourceSelected",
            FeedbackId::TargetSelected => "targetSelected",
            FeedbackId::TakeReady => "takeReady",
        }
    }
}

impl FromStr for FeedbackId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackId::all()
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown feedback: {}", s))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParameterFeedbackOptions {
    path: String,
    /// Declared value type; anything unrecognised uses the String rule
    #[serde(rename = "type", default)]
    value_type: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    comparator: Comparator,
    #[serde(default)]
    parse_escape_chars: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionFeedbackOptions {
    matrix: i32,
    #[serde(default, alias = "source", alias = "target")]
    index: i32,
}

impl InstanceContext {
    /// Evaluate one feedback instance; never fails (bad options read as false)
    pub(crate) fn check_feedback(&self, instance_id: &str, feedback_id: &str, options: Value) -> bool {
        let kind = match feedback_id.parse::<FeedbackId>() {
            Ok(kind) => kind,
            Err(e) => {
                self.log(LogLevel::Warning, &format!("{:#}", e));
                return false;
            },
        };

        let result = match kind {
            FeedbackId::Parameter => match serde_json::from_value(options) {
                Ok(opts) => self.check_parameter(instance_id, opts),
                Err(e) => {
                    self.log(
                        LogLevel::Warning,
                        &format!("Invalid options for feedback {}: {}", instance_id, e),
                    );
                    false
                },
            },
            FeedbackId::SourceSelected | FeedbackId::TargetSelected => {
                match serde_json::from_value::<SelectionFeedbackOptions>(options) {
                    Ok(opts) => {
                        let selection = self.state.lock().selection;
                        let index = if kind == FeedbackId::SourceSelected {
                            selection.source
                        } else {
                            selection.target
                        };
                        selection.matrix == opts.matrix && index == opts.index
                    },
                    Err(e) => {
                        debug!("Invalid selection feedback options: {}", e);
                        false
                    },
                }
            },
            FeedbackId::TakeReady => self.state.lock().selection.is_complete(),
        };
        trace!(instance_id, feedback_id, result, "Feedback evaluated");
        result
    }

    fn check_parameter(&self, instance_id: &str, opts: ParameterFeedbackOptions) -> bool {
        let path = normalize_path(&opts.path);
        let cached = {
            let mut state = self.state.lock();
            state.watch(instance_id, &path);
            state.get(&path).cloned()
        };
        if path.is_empty() {
            return false;
        }

        let Some(cached) = cached else {
            // Not cached yet: look it up once, the change pipeline re-checks us
            if let (Some(ctx), Ok(runtime)) =
                (self.weak_self.upgrade(), tokio::runtime::Handle::try_current())
            {
                runtime.spawn(async move {
                    ctx.register_parameter(&path, false).await;
                });
            }
            return false;
        };

        let value_type = match opts.value_type.as_str() {
            "Boolean" => ParameterType::Boolean,
            "Integer" => ParameterType::Integer,
            "Real" => ParameterType::Real,
            "Enum" => ParameterType::Enum,
            _ => ParameterType::String,
        };
        let target = self.host.parse_variables(&value_text(&opts.value));
        let apply_factor = self.config.read().factor;

        match value_type {
            ParameterType::Boolean => cached.value().is_some_and(EmberValue::is_truthy),
            ParameterType::Integer | ParameterType::Real => {
                let Some(current) = factor_adjusted(&cached, value_type, apply_factor) else {
                    return false;
                };
                compare(parse_number(&target), opts.comparator, current)
            },
            ParameterType::Enum => {
                let current = self.state.lock().current_enum_label(&path);
                target == current
            },
            ParameterType::String => {
                let expected = if opts.parse_escape_chars {
                    decode_escapes(&target)
                } else {
                    target
                };
                cached
                    .value()
                    .is_some_and(|v| v.to_display_string() == expected)
            },
        }
    }
}

/// Cached numeric value, divided by the factor when display scaling is on
fn factor_adjusted(cached: &CachedParameter, value_type: ParameterType, apply_factor: bool) -> Option<f64> {
    let current = cached.numeric_value()?;
    match (value_type, cached.contents.factor) {
        (ParameterType::Integer, Some(factor)) if apply_factor && factor != 0 => {
            Some(current / factor as f64)
        },
        _ => Some(current),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_ids_round_trip() {
        for id in FeedbackId::all() {
            assert_eq!(id.as_str().parse::<FeedbackId>().unwrap(), *id);
        }
        assert!("nope".parse::<FeedbackId>().is_err());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&Value::from(5)), "5");
        assert_eq!(value_text(&Value::from("On")), "On");
        assert_eq!(value_text(&Value::Null), "");
    }
}
