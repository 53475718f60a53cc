//! Action/feedback/variable definitions announced to the host
//!
//! Always sent as full replacements, rebuilt from the monitored set and the
//! configured matrices whenever either changes.

use serde_json::Value;
use std::collections::BTreeMap;

use super::actions::ActionId;
use super::feedbacks::FeedbackId;
use super::variables::{ENUM_SUFFIX, SELECTED_MATRIX, SELECTED_SOURCE, SELECTED_TARGET};
use super::InstanceContext;
use crate::coerce::{sanitize_variable_id, Comparator};
use crate::ember::ParameterType;
use crate::host::{
    ActionDefinition, Choice, FeedbackDefinition, OptionField, OptionKind, VariableDefinition,
};

/// What the definitions depend on, captured under the locks once
struct Catalog {
    /// (path, label, type) of every monitored parameter
    parameters: Vec<(String, String, Option<ParameterType>)>,
    matrices: Vec<String>,
}

impl InstanceContext {
    pub(crate) fn announce_definitions(&self) {
        let catalog = self.catalog();
        self.host.set_action_definitions(action_definitions(&catalog));
        self.host.set_feedback_definitions(feedback_definitions(&catalog));
        self.host.set_variable_definitions(variable_definitions(&catalog));
    }

    fn catalog(&self) -> Catalog {
        let matrices = self.config.read().matrix_paths();
        let state = self.state.lock();
        let parameters = state
            .monitored()
            .map(|path| match state.get(path) {
                Some(cached) => (path.clone(), cached.label(), cached.parameter_type()),
                None => (path.clone(), path.clone(), None),
            })
            .collect();
        Catalog {
            parameters,
            matrices,
        }
    }
}

fn path_field(catalog: &Catalog, wanted: Option<ParameterType>) -> OptionField {
    let choices: Vec<Choice> = catalog
        .parameters
        .iter()
        .filter(|(_, _, kind)| wanted.is_none() || kind.is_none() || *kind == wanted)
        .map(|(path, label, _)| Choice::new(path.clone(), format!("{} ({})", label, path)))
        .collect();
    let default = choices
        .first()
        .map(|c| c.id.clone())
        .unwrap_or_else(|| Value::String(String::new()));
    OptionField::new(
        "path",
        "Path",
        OptionKind::Dropdown {
            choices,
            default,
            allow_custom: true,
        },
    )
}

fn matrix_field(catalog: &Catalog) -> OptionField {
    let choices = catalog
        .matrices
        .iter()
        .enumerate()
        .map(|(index, path)| Choice::new(index as i64, path.clone()))
        .collect();
    OptionField::new(
        "matrix",
        "Matrix",
        OptionKind::Dropdown {
            choices,
            default: Value::from(0),
            allow_custom: false,
        },
    )
}

fn checkbox(id: &str, label: &str) -> OptionField {
    OptionField::new(id, label, OptionKind::Checkbox { default: false })
}

fn text(id: &str, label: &str, default: &str) -> OptionField {
    OptionField::new(
        id,
        label,
        OptionKind::TextInput {
            default: default.to_string(),
            use_variables: true,
        },
    )
}

fn number(id: &str, label: &str, default: f64, min: f64, max: f64) -> OptionField {
    OptionField::new(id, label, OptionKind::Number { default, min, max })
}

fn index_field(id: &str, label: &str) -> OptionField {
    number(id, label, 0.0, 0.0, 4_294_967_295.0)
}

fn action_definitions(catalog: &Catalog) -> BTreeMap<String, ActionDefinition> {
    let numeric = |kind: ParameterType, extra: Vec<OptionField>| {
        let mut options = vec![
            path_field(catalog, Some(kind)),
            number("value", "Value", 0.0, -4_294_967_295.0, 4_294_967_295.0),
            checkbox("useVar", "Use variable"),
            text("valueVar", "Value (variable)", ""),
            checkbox("relative", "Relative"),
        ];
        options.extend(extra);
        options
    };

    ActionId::all()
        .iter()
        .map(|id| {
            let (name, options) = match id {
                ActionId::SetValueBoolean => (
                    "Set Value Boolean",
                    vec![
                        path_field(catalog, Some(ParameterType::Boolean)),
                        checkbox("value", "Value"),
                        checkbox("toggle", "Toggle"),
                        checkbox("useVar", "Use variable"),
                        text("valueVar", "Value (variable)", ""),
                    ],
                ),
                ActionId::SetValueInt => (
                    "Set Value Integer",
                    numeric(
                        ParameterType::Integer,
                        vec![number("factor", "Factor", 1.0, 1.0, 4_294_967_295.0)],
                    ),
                ),
                ActionId::SetValueReal => ("Set Value Real", numeric(ParameterType::Real, vec![])),
                ActionId::SetValueEnum => (
                    "Set Value Enum",
                    numeric(
                        ParameterType::Enum,
                        vec![checkbox("asEnum", "Use label"), text("enumValue", "Label", "")],
                    ),
                ),
                ActionId::SetValueString => (
                    "Set Value String",
                    vec![
                        path_field(catalog, Some(ParameterType::String)),
                        text("value", "Value", ""),
                        checkbox("useVar", "Use variable"),
                        text("valueVar", "Value (variable)", ""),
                        checkbox("parseEscapeChars", "Parse escape characters"),
                    ],
                ),
                ActionId::MatrixConnect | ActionId::MatrixDisconnect | ActionId::MatrixSetConnection => (
                    match id {
                        ActionId::MatrixConnect => "Matrix Connect",
                        ActionId::MatrixDisconnect => "Matrix Disconnect",
                        _ => "Matrix Set Connection",
                    },
                    vec![
                        text("path", "Matrix path", ""),
                        index_field("target", "Target"),
                        text("sources", "Sources (comma separated)", ""),
                    ],
                ),
                ActionId::Take => ("Take", vec![]),
                ActionId::SetSelectedSource => (
                    "Set Selected Source",
                    vec![matrix_field(catalog), index_field("source", "Source")],
                ),
                ActionId::SetSelectedTarget => (
                    "Set Selected Target",
                    vec![matrix_field(catalog), index_field("target", "Target")],
                ),
                ActionId::ClearSelection => ("Clear Selection", vec![]),
            };
            (
                id.as_str().to_string(),
                ActionDefinition {
                    name: name.to_string(),
                    description: None,
                    options,
                },
            )
        })
        .collect()
}

fn feedback_definitions(catalog: &Catalog) -> BTreeMap<String, FeedbackDefinition> {
    let comparators: Vec<Choice> = Comparator::all()
        .iter()
        .map(|c| Choice::new(format!("{:?}", c), c.label()))
        .collect();
    let types: Vec<Choice> = ParameterType::all()
        .iter()
        .map(|t| Choice::new(t.as_str(), t.as_str()))
        .collect();

    FeedbackId::all()
        .iter()
        .map(|id| {
            let (name, description, options) = match id {
                FeedbackId::Parameter => (
                    "Parameter Equals",
                    "Compare a parameter against a value",
                    vec![
                        path_field(catalog, None),
                        OptionField::new(
                            "type",
                            "Type",
                            OptionKind::Dropdown {
                                choices: types.clone(),
                                default: Value::from("String"),
                                allow_custom: false,
                            },
                        ),
                        OptionField::new(
                            "comparator",
                            "Comparator",
                            OptionKind::Dropdown {
                                choices: comparators.clone(),
                                default: Value::from("Equal"),
                                allow_custom: false,
                            },
                        ),
                        text("value", "Value", ""),
                        checkbox("parseEscapeChars", "Parse escape characters"),
                    ],
                ),
                FeedbackId::SourceSelected => (
                    "Source Selected",
                    "Source is selected on the matrix",
                    vec![matrix_field(catalog), index_field("source", "Source")],
                ),
                FeedbackId::TargetSelected => (
                    "Target Selected",
                    "Target is selected on the matrix",
                    vec![matrix_field(catalog), index_field("target", "Target")],
                ),
                FeedbackId::TakeReady => (
                    "Take Ready",
                    "Matrix, target and source are all selected",
                    vec![],
                ),
            };
            (
                id.as_str().to_string(),
                FeedbackDefinition {
                    name: name.to_string(),
                    description: Some(description.to_string()),
                    options,
                },
            )
        })
        .collect()
}

fn variable_definitions(catalog: &Catalog) -> Vec<VariableDefinition> {
    let mut definitions = Vec::with_capacity(catalog.parameters.len() + 3);
    for (path, label, kind) in &catalog.parameters {
        let id = sanitize_variable_id(path);
        if *kind == Some(ParameterType::Enum) {
            definitions.push(VariableDefinition {
                variable_id: format!("{}{}", id, ENUM_SUFFIX),
                name: format!("{} (label)", label),
            });
        }
        definitions.push(VariableDefinition {
            variable_id: id,
            name: label.clone(),
        });
    }
    for (id, name) in [
        (SELECTED_MATRIX, "Selected matrix"),
        (SELECTED_SOURCE, "Selected source"),
        (SELECTED_TARGET, "Selected target"),
    ] {
        definitions.push(VariableDefinition {
            variable_id: id.to_string(),
            name: name.to_string(),
        });
    }
    definitions
}
