//! Action handlers: value writes, matrix operations, crosspoint selection

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

use super::InstanceContext;
use crate::coerce::{
    clamp, decode_escapes, normalize_path, parse_bool_token, parse_index_list, parse_number,
    relative_delta, INT_LIMIT,
};
use crate::ember::{EmberValue, ParameterContents, ParameterType, TreeElement};
use crate::host::LogLevel;
use crate::state::{Selection, NO_SELECTION};

/// Action ids exposed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionId {
    SetValueBoolean,
    SetValueInt,
    SetValueReal,
    SetValueString,
    SetValueEnum,
    MatrixConnect,
    MatrixDisconnect,
    MatrixSetConnection,
    Take,
    SetSelectedSource,
    SetSelectedTarget,
    ClearSelection,
}

impl ActionId {
    pub fn all() -> &'static [ActionId] {
        &[
            ActionId::SetValueBoolean,
            ActionId::SetValueInt,
            ActionId::SetValueReal,
            ActionId::SetValueString,
            ActionId::SetValueEnum,
            ActionId::MatrixConnect,
            ActionId::MatrixDisconnect,
            ActionId::MatrixSetConnection,
            ActionId::Take,
            ActionId::SetSelectedSource,
            ActionId::SetSelectedTarget,
            ActionId::ClearSelection,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::SetValueBoolean => "setValueBoolean",
            ActionId::SetValueInt => "setValueInt",
            ActionId::SetValueReal => "setValueReal",
            ActionId::SetValueString => "setValueString",
            ActionId::SetValueEnum => "setValueEnum",
            ActionId::MatrixConnect => "matrixConnect",
            ActionId::MatrixDisconnect => "matrixDisconnect",
            ActionId::MatrixSetConnection => "matrixSetConnection",
            ActionId::Take => "take",
            ActionId::SetSelectedSource => "setSelectedSource",
            ActionId::SetSelectedTarget => "setSelectedTarget",
            ActionId::ClearSelection => "clearSelection",
        }
    }

    /// Parameter type written by a set-value action
    pub fn parameter_type(&self) -> Option<ParameterType> {
        match self {
            ActionId::SetValueBoolean => Some(ParameterType::Boolean),
            ActionId::SetValueInt => Some(ParameterType::Integer),
            ActionId::SetValueReal => Some(ParameterType::Real),
            ActionId::SetValueString => Some(ParameterType::String),
            ActionId::SetValueEnum => Some(ParameterType::Enum),
            _ => None,
        }
    }
}

impl FromStr for ActionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionId::all()
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown action: {}", s))
    }
}

fn default_factor() -> i64 {
    1
}

/// Options shared by the five set-value actions
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetValueOptions {
    pub path: String,
    #[serde(default)]
    pub value: Value,
    /// Read the input from `valueVar` (host variables expanded)
    #[serde(default)]
    pub use_var: bool,
    #[serde(default)]
    pub value_var: String,
    #[serde(default)]
    pub relative: bool,
    #[serde(default)]
    pub toggle: bool,
    #[serde(default = "default_factor")]
    pub factor: i64,
    #[serde(default)]
    pub parse_escape_chars: bool,
    #[serde(default)]
    pub as_enum: bool,
    #[serde(default)]
    pub enum_value: String,
}

impl SetValueOptions {
    /// Whether the action reads the current value and needs a standing subscription
    fn needs_cache_entry(&self) -> bool {
        self.relative || self.toggle || self.use_var || self.as_enum
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixOptions {
    path: String,
    target: u32,
    /// Comma-separated source indices
    #[serde(default)]
    sources: String,
}

#[derive(Debug, Deserialize)]
struct SelectSourceOptions {
    matrix: i32,
    source: i32,
}

#[derive(Debug, Deserialize)]
struct SelectTargetOptions {
    matrix: i32,
    target: i32,
}

#[derive(Debug, Clone, Copy)]
enum MatrixOp {
    Connect,
    Disconnect,
    SetConnection,
}

impl MatrixOp {
    fn as_str(&self) -> &'static str {
        match self {
            MatrixOp::Connect => "matrixConnect",
            MatrixOp::Disconnect => "matrixDisconnect",
            MatrixOp::SetConnection => "matrixSetConnection",
        }
    }
}

fn parse_options<T: DeserializeOwned>(action: ActionId, options: Value) -> Result<T> {
    serde_json::from_value(options)
        .with_context(|| format!("Invalid options for action {}", action.as_str()))
}

impl InstanceContext {
    pub(crate) async fn execute_action(&self, action_id: &str, options: Value) -> Result<()> {
        let action: ActionId = action_id.parse()?;
        debug!(action = action.as_str(), %options, "Executing action");

        match action {
            ActionId::SetValueBoolean
            | ActionId::SetValueInt
            | ActionId::SetValueReal
            | ActionId::SetValueString
            | ActionId::SetValueEnum => {
                let opts: SetValueOptions = parse_options(action, options)?;
                if let Some(expected) = action.parameter_type() {
                    self.set_value(expected, opts).await;
                }
            },
            ActionId::MatrixConnect => {
                self.matrix_operation(MatrixOp::Connect, parse_options(action, options)?)
                    .await
            },
            ActionId::MatrixDisconnect => {
                self.matrix_operation(MatrixOp::Disconnect, parse_options(action, options)?)
                    .await
            },
            ActionId::MatrixSetConnection => {
                self.matrix_operation(MatrixOp::SetConnection, parse_options(action, options)?)
                    .await
            },
            ActionId::Take => self.take().await,
            ActionId::SetSelectedSource => {
                let opts: SelectSourceOptions = parse_options(action, options)?;
                self.select_source(opts.matrix, opts.source).await;
            },
            ActionId::SetSelectedTarget => {
                let opts: SelectTargetOptions = parse_options(action, options)?;
                self.select_target(opts.matrix, opts.target);
            },
            ActionId::ClearSelection => {
                self.state.lock().selection.clear();
                self.selection_changed();
            },
        }
        Ok(())
    }

    /// Typed value write; every rejection is logged and skips the write
    async fn set_value(&self, expected: ParameterType, opts: SetValueOptions) {
        let path = normalize_path(&opts.path);
        if path.is_empty() {
            self.log(LogLevel::Warning, "Set value: no path given");
            return;
        }

        let Some(registered) = self
            .register_parameter(&path, opts.needs_cache_entry())
            .await
        else {
            return;
        };

        // Merged cache entry carries type/access even when the last update didn't
        let cached = self
            .state
            .lock()
            .get(&path)
            .map(|c| (c.element.clone(), c.contents.clone()));
        let (element, contents) = match cached {
            Some(cached) => cached,
            None => match registered.as_parameter() {
                Some(contents) => (registered.clone(), contents.clone()),
                None => {
                    self.log(LogLevel::Warning, &format!("{} is not a parameter", path));
                    return;
                },
            },
        };

        if contents.parameter_type != Some(expected) {
            self.log(
                LogLevel::Warning,
                &format!(
                    "Parameter {} is {} but the action writes {}",
                    path,
                    contents
                        .parameter_type
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "untyped".to_string()),
                    expected
                ),
            );
            return;
        }
        if let Some(access) = contents.access {
            if !access.is_writable() {
                self.log(
                    LogLevel::Warning,
                    &format!("Parameter {} is not writable ({:?})", path, access),
                );
                return;
            }
        }

        let Some(value) = self.compute_value(expected, &path, &opts, &contents) else {
            return;
        };
        self.enqueue_write(element, value);
    }

    fn compute_value(
        &self,
        expected: ParameterType,
        path: &str,
        opts: &SetValueOptions,
        contents: &ParameterContents,
    ) -> Option<EmberValue> {
        let previous = contents.value.as_ref().and_then(EmberValue::as_f64);
        match expected {
            ParameterType::String => {
                let text = self.input_text(opts);
                Some(EmberValue::String(if opts.parse_escape_chars {
                    decode_escapes(&text)
                } else {
                    text
                }))
            },
            ParameterType::Boolean => {
                let value = if opts.toggle {
                    !contents.value.as_ref().is_some_and(EmberValue::is_truthy)
                } else if opts.use_var {
                    parse_bool_token(&self.input_text(opts))
                } else {
                    match &opts.value {
                        Value::Bool(b) => *b,
                        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                        other => parse_bool_token(&value_text(other)),
                    }
                };
                Some(EmberValue::Boolean(value))
            },
            ParameterType::Integer => {
                let raw = (self.input_number(opts) * opts.factor as f64).floor();
                let min = contents.minimum.unwrap_or(-INT_LIMIT);
                let max = contents.maximum.unwrap_or(INT_LIMIT);
                let value = self.bounded(path, raw, previous, opts.relative, min, max, true)?;
                Some(EmberValue::Integer(value as i64))
            },
            ParameterType::Real => {
                let raw = self.input_number(opts);
                let min = contents.minimum.unwrap_or(-INT_LIMIT);
                let max = contents.maximum.unwrap_or(INT_LIMIT);
                let value = self.bounded(path, raw, previous, opts.relative, min, max, false)?;
                Some(EmberValue::Real(value))
            },
            ParameterType::Enum => {
                if opts.as_enum {
                    let label = self.host.parse_variables(&opts.enum_value);
                    let index = self.state.lock().enum_index_for(path, &label).or_else(|| {
                        contents
                            .enumeration
                            .as_deref()
                            .and_then(|e| crate::coerce::enum_index_of(e, &label))
                    });
                    return match index {
                        Some(index) => Some(EmberValue::Integer(index as i64)),
                        None => {
                            self.log(
                                LogLevel::Warning,
                                &format!("Enum label '{}' not found on {}", label, path),
                            );
                            None
                        },
                    };
                }
                let raw = self.input_number(opts).floor();
                let min = contents.minimum.unwrap_or(0.0);
                let max = contents.maximum.unwrap_or(INT_LIMIT);
                let value = self.bounded(path, raw, previous, opts.relative, min, max, true)?;
                Some(EmberValue::Integer(value as i64))
            },
        }
    }

    /// Range check, optional relative step, then clamp
    #[allow(clippy::too_many_arguments)]
    fn bounded(
        &self,
        path: &str,
        raw: f64,
        previous: Option<f64>,
        relative: bool,
        min: f64,
        max: f64,
        integer_like: bool,
    ) -> Option<f64> {
        if !raw.is_finite() || raw.abs() > INT_LIMIT {
            self.log(
                LogLevel::Warning,
                &format!("Value {} for {} is out of range, write skipped", raw, path),
            );
            return None;
        }
        Some(if relative {
            relative_delta(raw, previous, min, max, integer_like)
        } else {
            clamp(raw, min, max)
        })
    }

    fn input_text(&self, opts: &SetValueOptions) -> String {
        if opts.use_var {
            self.host.parse_variables(&opts.value_var)
        } else {
            value_text(&opts.value)
        }
    }

    fn input_number(&self, opts: &SetValueOptions) -> f64 {
        if opts.use_var {
            return parse_number(&self.host.parse_variables(&opts.value_var));
        }
        match &opts.value {
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => parse_number(&value_text(other)),
        }
    }

    /// Queue the write; the acknowledgement is only drained
    fn enqueue_write(&self, element: TreeElement, value: EmberValue) {
        let label = format!("setValue {} = {:?}", element.path, value);
        debug!("{}", label);
        let _ = self.connection.request(label, move |client| async move {
            client.set_value(&element, value, true).await?;
            Ok::<_, anyhow::Error>(())
        });
    }

    async fn matrix_operation(&self, op: MatrixOp, opts: MatrixOptions) {
        let path = normalize_path(&opts.path);
        let sources = parse_index_list(&opts.sources);

        let lookup_path = path.clone();
        let lookup = self
            .connection
            .request(format!("lookup {}", path), move |client| async move {
                Ok::<_, anyhow::Error>(client.get_element_by_path(&lookup_path, None).await?)
            })
            .outcome()
            .await;

        let matrix = match lookup {
            Ok(element) if element.is_matrix() => element,
            Ok(_) => {
                self.log(
                    LogLevel::Warning,
                    &format!("{}: {} is not a matrix", op.as_str(), path),
                );
                return;
            },
            Err(e) => {
                self.log(
                    LogLevel::Warning,
                    &format!("{}: matrix {} not found: {:#}", op.as_str(), path, e),
                );
                return;
            },
        };

        let target = opts.target;
        let _ = self.connection.request(
            format!("{} {} {} <- {:?}", op.as_str(), path, target, sources),
            move |client| async move {
                match op {
                    MatrixOp::Connect => client.matrix_connect(&matrix, target, &sources).await?,
                    MatrixOp::Disconnect => {
                        client.matrix_disconnect(&matrix, target, &sources).await?
                    },
                    MatrixOp::SetConnection => {
                        client.matrix_set_connection(&matrix, target, &sources).await?
                    },
                }
                Ok::<_, anyhow::Error>(())
            },
        );
    }

    fn select_target(&self, matrix: i32, target: i32) {
        {
            let mut state = self.state.lock();
            if target != NO_SELECTION {
                state.selection.target = target;
                state.selection.matrix = matrix;
            }
            state.selection.source = NO_SELECTION;
        }
        self.selection_changed();
    }

    async fn select_source(&self, matrix: i32, source: i32) {
        let accepted = {
            let mut state = self.state.lock();
            let accepted = source != NO_SELECTION && state.selection.matrix == matrix;
            if accepted {
                state.selection.source = source;
            }
            accepted
        };
        if !accepted {
            debug!(matrix, source, "Source selection ignored (matrix not selected)");
            return;
        }
        self.selection_changed();

        let auto_take = self.config.read().take;
        if auto_take {
            self.take().await;
        }
    }

    /// Connect the selected crosspoint; the selection is cleared either way
    async fn take(&self) {
        let selection = self.state.lock().selection;
        if !selection.is_complete() {
            debug!(?selection, "Take ignored: selection incomplete");
            return;
        }

        match self.connect_selection(selection).await {
            Ok(()) => info!(
                "Take: matrix {} target {} <- source {}",
                selection.matrix, selection.target, selection.source
            ),
            Err(e) => self.log(LogLevel::Warning, &format!("Take failed: {:#}", e)),
        }

        self.state.lock().selection.clear();
        self.selection_changed();
    }

    async fn connect_selection(&self, selection: Selection) -> Result<()> {
        let path = usize::try_from(selection.matrix)
            .ok()
            .and_then(|index| self.config.read().matrix_paths().get(index).cloned())
            .with_context(|| format!("No matrix configured at index {}", selection.matrix))?;
        let target = u32::try_from(selection.target).context("Invalid target index")?;
        let source = u32::try_from(selection.source).context("Invalid source index")?;

        self.connection
            .request(format!("take {}", path), move |client| async move {
                let matrix = client.get_element_by_path(&path, None).await?;
                if !matrix.is_matrix() {
                    anyhow::bail!("{} is not a matrix", path);
                }
                client.matrix_connect(&matrix, target, &[source]).await?;
                Ok(())
            })
            .outcome()
            .await
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
    use serde_json::json;

    #[test]
    fn test_action_ids_round_trip() {
        for id in ActionId::all() {
            assert_eq!(id.as_str().parse::<ActionId>().unwrap(), *id);
        }
        assert!("setValueFloat".parse::<ActionId>().is_err());
    }

    #[test]
    fn test_set_value_option_defaults() {
        let opts: SetValueOptions = serde_json::from_value(json!({ "path": "1.2" })).unwrap();
        assert_eq!(opts.factor, 1);
        assert!(!opts.needs_cache_entry());

        let opts: SetValueOptions =
            serde_json::from_value(json!({ "path": "1.2", "relative": true, "value": 3 })).unwrap();
        assert!(opts.needs_cache_entry());
    }
}
