//! # Parameter Schema
//!
//! Declared parameters of a query template. A schema is a list of
//! definitions with unique names; each definition fixes the type that
//! supplied values are checked against:
//!
//! ```json
//! [
//!   {"name": "userid", "type": "text"},
//!   {"name": "status", "type": "enum", "enumOptions": ["open", "closed"],
//!    "multiValuesOptions": {"prefix": "'", "suffix": "'", "separator": ","}},
//!   {"name": "period", "type": "date-range"}
//! ]
//! ```

pub mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use validator::{
    dropdown_options, join_list_values, missing_params, parameter_names, DetachedQueryError,
    DropdownOption, DropdownResolver, ParameterError, ParameterValidator,
};

/// Identifier of a saved query (used by dropdown parameters)
pub type QueryId = u64;

/// Parameter type. The set is closed: unrecognised type names deserialize to
/// `Unknown` and never validate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParameterType {
    Text,
    Number,
    Enum,
    /// Dropdown backed by another query's cached result
    Query,
    Date,
    DateTime,
    DateTimeWithSeconds,
    DateRange,
    DateTimeRange,
    DateTimeRangeWithSeconds,
    Unknown(String),
}

impl ParameterType {
    pub fn as_str(&self) -> &str {
        match self {
            ParameterType::Text => "text",
            ParameterType::Number => "number",
            ParameterType::Enum => "enum",
            ParameterType::Query => "query",
            ParameterType::Date => "date",
            ParameterType::DateTime => "datetime-local",
            ParameterType::DateTimeWithSeconds => "datetime-with-seconds",
            ParameterType::DateRange => "date-range",
            ParameterType::DateTimeRange => "datetime-range",
            ParameterType::DateTimeRangeWithSeconds => "datetime-range-with-seconds",
            ParameterType::Unknown(name) => name,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            ParameterType::DateRange
                | ParameterType::DateTimeRange
                | ParameterType::DateTimeRangeWithSeconds
        )
    }
}

impl From<String> for ParameterType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "text" => ParameterType::Text,
            "number" => ParameterType::Number,
            "enum" => ParameterType::Enum,
            "query" => ParameterType::Query,
            "date" => ParameterType::Date,
            "datetime" | "datetime-local" => ParameterType::DateTime,
            "datetime-with-seconds" => ParameterType::DateTimeWithSeconds,
            "date-range" => ParameterType::DateRange,
            "datetime-range" => ParameterType::DateTimeRange,
            "datetime-range-with-seconds" => ParameterType::DateTimeRangeWithSeconds,
            _ => ParameterType::Unknown(name),
        }
    }
}

impl From<&str> for ParameterType {
    fn from(name: &str) -> Self {
        ParameterType::from(name.to_string())
    }
}

impl From<ParameterType> for String {
    fn from(t: ParameterType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enum options, either a list or a newline-delimited string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumOptions {
    List(Vec<String>),
    Lines(String),
}

impl EnumOptions {
    pub fn options(&self) -> Vec<String> {
        match self {
            EnumOptions::List(items) => items.clone(),
            EnumOptions::Lines(text) => text.split('\n').map(str::to_string).collect(),
        }
    }
}

/// How list values are flattened before rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiValuesOptions {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    ",".to_string()
}

impl Default for MultiValuesOptions {
    fn default() -> Self {
        MultiValuesOptions {
            prefix: String::new(),
            suffix: String::new(),
            separator: default_separator(),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParameterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_options: Option<EnumOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,

    /// Presence enables list values for enum and query parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_values_options: Option<MultiValuesOptions>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, param_type: impl Into<ParameterType>) -> Self {
        ParameterDefinition {
            name: name.into(),
            param_type: param_type.into(),
            enum_options: None,
            query_id: None,
            multi_values_options: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Number)
    }

    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut def = Self::new(name, ParameterType::Enum);
        def.enum_options = Some(EnumOptions::List(
            options.into_iter().map(Into::into).collect(),
        ));
        def
    }

    pub fn dropdown(name: impl Into<String>, query_id: QueryId) -> Self {
        let mut def = Self::new(name, ParameterType::Query);
        def.query_id = Some(query_id);
        def
    }

    pub fn with_multi_values(mut self, options: MultiValuesOptions) -> Self {
        self.multi_values_options = Some(options);
        self
    }

    pub fn allows_multiple_values(&self) -> bool {
        self.multi_values_options.is_some()
    }
}

/// Schema errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate parameter definition '{0}'")]
    DuplicateName(String),
}

/// Parameter definitions of one query, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParameterDefinition>", into = "Vec<ParameterDefinition>")]
pub struct ParameterSchema {
    definitions: Vec<ParameterDefinition>,
}

impl ParameterSchema {
    pub fn new(definitions: Vec<ParameterDefinition>) -> Result<Self, SchemaError> {
        for (i, def) in definitions.iter().enumerate() {
            if definitions[..i].iter().any(|d| d.name == def.name) {
                return Err(SchemaError::DuplicateName(def.name.clone()));
            }
        }
        Ok(ParameterSchema { definitions })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Free-text parameters are the only ones whose values are not drawn
    /// from a closed value space.
    pub fn has_text_parameters(&self) -> bool {
        self.definitions
            .iter()
            .any(|d| d.param_type == ParameterType::Text)
    }
}

impl TryFrom<Vec<ParameterDefinition>> for ParameterSchema {
    type Error = SchemaError;

    fn try_from(definitions: Vec<ParameterDefinition>) -> Result<Self, Self::Error> {
        ParameterSchema::new(definitions)
    }
}

impl From<ParameterSchema> for Vec<ParameterDefinition> {
    fn from(schema: ParameterSchema) -> Self {
        schema.definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_json() {
        let json = r#"[
            {"name": "userid", "type": "text"},
            {"name": "status", "type": "enum", "enumOptions": "open\nclosed",
             "multiValuesOptions": {"prefix": "'", "suffix": "'"}},
            {"name": "period", "type": "date-range"},
            {"name": "owner", "type": "query", "queryId": 7}
        ]"#;
        let schema: ParameterSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.len(), 4);

        let status = schema.get("status").unwrap();
        assert_eq!(
            status.enum_options.as_ref().unwrap().options(),
            vec!["open", "closed"]
        );
        let mvo = status.multi_values_options.as_ref().unwrap();
        assert_eq!(mvo.separator, ",");
        assert_eq!(mvo.prefix, "'");

        assert!(schema.get("period").unwrap().param_type.is_range());
        assert_eq!(schema.get("owner").unwrap().query_id, Some(7));
        assert!(schema.has_text_parameters());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ParameterSchema::new(vec![
            ParameterDefinition::text("a"),
            ParameterDefinition::number("a"),
        ]);
        assert_eq!(result, Err(SchemaError::DuplicateName("a".into())));

        let json = r#"[{"name": "a", "type": "text"}, {"name": "a", "type": "text"}]"#;
        assert!(serde_json::from_str::<ParameterSchema>(json).is_err());
    }

    #[test]
    fn test_unknown_type_roundtrip() {
        let t = ParameterType::from("color");
        assert_eq!(t, ParameterType::Unknown("color".into()));
        assert_eq!(t.to_string(), "color");
        assert_eq!(ParameterType::from("datetime"), ParameterType::DateTime);
    }

    #[test]
    fn test_has_text_parameters() {
        let schema = ParameterSchema::new(vec![
            ParameterDefinition::number("n"),
            ParameterDefinition::enumeration("e", ["a", "b"]),
        ])
        .unwrap();
        assert!(!schema.has_text_parameters());
    }
}
