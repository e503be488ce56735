//! # Parameter Validation
//!
//! Checks supplied values against a [`ParameterSchema`]:
//! - Type dispatch over the closed parameter type set
//! - Enum and dropdown membership (lists allowed only with multi-value options)
//! - All-or-nothing batch semantics: every invalid name is reported at once
//!
//! Also hosts the helpers that run around validation: flattening list
//! values before rendering and computing which placeholders still lack a
//! value.

use std::collections::BTreeSet;

use super::{ParameterDefinition, ParameterSchema, ParameterType, QueryId};
use crate::template::TemplateError;
use crate::value::{ParamValue, ParamValues};

/// A dropdown parameter references a query that cannot supply values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetachedQueryError {
    #[error("Query {query_id} does not exist")]
    UnknownQuery { query_id: QueryId },

    #[error("Query {query_id} is detached from its data source")]
    NoDataSource { query_id: QueryId },

    #[error("Query {query_id} has no cached result to read dropdown values from")]
    NoCachedResult { query_id: QueryId },
}

/// Parameter application errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    /// One or more values failed validation; nothing was applied
    #[error("Parameter validation failed for: {}", .names.join(", "))]
    InvalidParameters { names: Vec<String> },

    #[error(transparent)]
    Detached(#[from] DetachedQueryError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// One selectable dropdown entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropdownOption {
    pub name: String,
    pub value: String,
}

/// Resolves the selectable values of a `query`-type parameter.
pub trait DropdownResolver: Send + Sync {
    fn resolve_dropdown_values(
        &self,
        query_id: QueryId,
    ) -> Result<Vec<DropdownOption>, DetachedQueryError>;
}

/// Pluck `{name, value}` pairs out of result rows. The `name` and `value`
/// columns are used when present, otherwise the first column stands in for
/// both.
pub fn dropdown_options(
    columns: &[String],
    rows: &[serde_json::Map<String, serde_json::Value>],
) -> Vec<DropdownOption> {
    let Some(first) = columns.first() else {
        return Vec::new();
    };
    let name_column = if columns.iter().any(|c| c == "name") {
        "name"
    } else {
        first.as_str()
    };
    let value_column = if columns.iter().any(|c| c == "value") {
        "value"
    } else {
        first.as_str()
    };

    rows.iter()
        .map(|row| DropdownOption {
            name: cell_to_string(row.get(name_column)),
            value: cell_to_string(row.get(value_column)),
        })
        .collect()
}

fn cell_to_string(cell: Option<&serde_json::Value>) -> String {
    match cell {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Validates values against an optional schema.
///
/// Without a schema every value is accepted verbatim.
#[derive(Clone, Copy)]
pub struct ParameterValidator<'a> {
    schema: Option<&'a ParameterSchema>,
    dropdowns: Option<&'a dyn DropdownResolver>,
}

impl<'a> ParameterValidator<'a> {
    pub fn new(schema: Option<&'a ParameterSchema>) -> Self {
        ParameterValidator {
            schema,
            dropdowns: None,
        }
    }

    pub fn with_dropdowns(mut self, dropdowns: &'a dyn DropdownResolver) -> Self {
        self.dropdowns = Some(dropdowns);
        self
    }

    /// Check one value. Only dropdown resolution can fail outright; every
    /// other problem makes the value invalid.
    pub fn valid(&self, name: &str, value: &ParamValue) -> Result<bool, DetachedQueryError> {
        let Some(schema) = self.schema else {
            return Ok(true);
        };
        let Some(definition) = schema.get(name) else {
            return Ok(false);
        };

        let allow_list = definition.allows_multiple_values();

        let valid = match &definition.param_type {
            ParameterType::Text => value.as_str().is_some(),
            ParameterType::Number => value.as_number().is_some(),
            ParameterType::Enum => {
                let options = definition
                    .enum_options
                    .as_ref()
                    .map(super::EnumOptions::options)
                    .unwrap_or_default();
                within_options(value, &options, allow_list)
            }
            ParameterType::Query => {
                let options = self.dropdown_values(definition)?;
                within_options(value, &options, allow_list)
            }
            ParameterType::Date
            | ParameterType::DateTime
            | ParameterType::DateTimeWithSeconds => is_date(value),
            ParameterType::DateRange
            | ParameterType::DateTimeRange
            | ParameterType::DateTimeRangeWithSeconds => is_date_range(value),
            ParameterType::Unknown(_) => false,
        };

        Ok(valid)
    }

    /// Check every value. Reports all invalid names sorted by name (the
    /// order `ParamValues` iterates in) or the first detached dropdown.
    pub fn validate_all(&self, values: &ParamValues) -> Result<(), ParameterError> {
        let mut invalid = Vec::new();
        for (name, value) in values {
            if !self.valid(name, value)? {
                invalid.push(name.clone());
            }
        }

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ParameterError::InvalidParameters { names: invalid })
        }
    }

    fn dropdown_values(
        &self,
        definition: &ParameterDefinition,
    ) -> Result<Vec<String>, DetachedQueryError> {
        let Some(query_id) = definition.query_id else {
            return Ok(Vec::new());
        };
        let Some(dropdowns) = self.dropdowns else {
            tracing::warn!(
                parameter = %definition.name,
                query_id,
                "no dropdown resolver configured, rejecting value"
            );
            return Ok(Vec::new());
        };
        Ok(dropdowns
            .resolve_dropdown_values(query_id)?
            .into_iter()
            .map(|option| option.value)
            .collect())
    }
}

fn within_options(value: &ParamValue, options: &[String], allow_list: bool) -> bool {
    match value {
        ParamValue::List(items) => {
            allow_list
                && items
                    .iter()
                    .all(|item| options.iter().any(|o| *o == item.to_string()))
        }
        ParamValue::Map(_) => false,
        scalar => {
            let text = scalar.to_string();
            options.iter().any(|o| *o == text)
        }
    }
}

fn is_date(value: &ParamValue) -> bool {
    value.as_datetime().is_some()
}

fn is_date_range(value: &ParamValue) -> bool {
    match (value.get("start"), value.get("end")) {
        (Some(start), Some(end)) => is_date(start) && is_date(end),
        _ => false,
    }
}

/// Replace every list value with `prefix + item + suffix` joined by the
/// separator of its definition, so the template engine only sees scalars.
pub fn join_list_values(values: &ParamValues, schema: Option<&ParameterSchema>) -> ParamValues {
    values
        .iter()
        .map(|(name, value)| {
            let joined = match value {
                ParamValue::List(items) => {
                    let options = schema
                        .and_then(|s| s.get(name))
                        .and_then(|d| d.multi_values_options.clone())
                        .unwrap_or_default();
                    ParamValue::String(
                        items
                            .iter()
                            .map(|item| format!("{}{item}{}", options.prefix, options.suffix))
                            .collect::<Vec<_>>()
                            .join(&options.separator),
                    )
                }
                other => other.clone(),
            };
            (name.clone(), joined)
        })
        .collect()
}

/// Names a value set provides: compound values contribute `name.member`
/// entries instead of their own name.
pub fn parameter_names(values: &ParamValues) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (name, value) in values {
        match value {
            ParamValue::Map(members) => {
                for member in members.keys() {
                    names.insert(format!("{name}.{member}"));
                }
            }
            _ => {
                names.insert(name.clone());
            }
        }
    }
    names
}

/// Placeholders in `template_names` without a value in `applied`.
pub fn missing_params(template_names: &BTreeSet<String>, applied: &ParamValues) -> BTreeSet<String> {
    let provided = parameter_names(applied);
    template_names.difference(&provided).cloned().collect()
}
