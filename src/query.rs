//! # Parameterized Query
//!
//! A template, an optional parameter schema and the values applied so far.
//!
//! ## Design
//!
//! Applying values is all-or-nothing: the whole batch is validated, merged
//! into a copy of the accumulated set and rendered before anything is
//! committed. A failed `apply` leaves the query exactly as it was.
//!
//! Rendering always uses the full accumulated set, so applying `{a}` and
//! then `{b}` renders the same text as applying `{a, b}` at once.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::safety;
use crate::schema::{
    join_list_values, missing_params, DropdownResolver, ParameterError, ParameterSchema,
    ParameterValidator,
};
use crate::template::Template;
use crate::value::ParamValues;

#[derive(Clone)]
pub struct ParameterizedQuery {
    template: String,
    names: BTreeSet<String>,
    schema: Option<ParameterSchema>,
    dropdowns: Option<Arc<dyn DropdownResolver>>,
    parameters: ParamValues,
    text: String,
}

impl ParameterizedQuery {
    /// Wrap a template. Until values are applied the text is the template
    /// itself.
    pub fn new(template: impl Into<String>, schema: Option<ParameterSchema>) -> Self {
        let template = template.into();
        let names = Template::parse_lenient(&template).parameter_names();
        ParameterizedQuery {
            text: template.clone(),
            template,
            names,
            schema,
            dropdowns: None,
            parameters: ParamValues::new(),
        }
    }

    /// Resolver consulted for `query`-type (dropdown) parameters.
    pub fn with_dropdowns(mut self, dropdowns: Arc<dyn DropdownResolver>) -> Self {
        self.dropdowns = Some(dropdowns);
        self
    }

    /// Validate and merge `values`, then re-render.
    ///
    /// On error nothing changes: neither the accumulated values nor the
    /// rendered text.
    pub fn apply(&mut self, values: ParamValues) -> Result<&mut Self, ParameterError> {
        let mut validator = ParameterValidator::new(self.schema.as_ref());
        if let Some(dropdowns) = self.dropdowns.as_deref() {
            validator = validator.with_dropdowns(dropdowns);
        }
        validator.validate_all(&values)?;

        let mut merged = self.parameters.clone();
        merged.extend(values);

        let joined = join_list_values(&merged, self.schema.as_ref());
        let text = Template::parse(&self.template)?.render(&joined)?;

        tracing::trace!(
            applied = merged.len(),
            missing = missing_params(&self.names, &merged).len(),
            "applied query parameters"
        );

        self.parameters = merged;
        self.text = text;
        Ok(self)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// The most recently rendered text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Every value applied so far, as supplied (lists not yet joined).
    pub fn parameters(&self) -> &ParamValues {
        &self.parameters
    }

    pub fn schema(&self) -> Option<&ParameterSchema> {
        self.schema.as_ref()
    }

    /// Placeholder names found in the template.
    pub fn parameter_names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Placeholder names that have no applied value yet.
    pub fn missing_params(&self) -> BTreeSet<String> {
        missing_params(&self.names, &self.parameters)
    }

    /// Whether the current text can be run by a restricted caller.
    ///
    /// Queries whose schema has no free-text parameters are always safe.
    /// Otherwise the rendered text must keep the template's SQL structure,
    /// with sections taken or skipped as the applied values decide.
    pub fn is_safe(&self) -> bool {
        if self.names.is_empty() {
            return true;
        }
        match &self.schema {
            Some(schema) if !schema.has_text_parameters() => true,
            _ => {
                let joined = join_list_values(&self.parameters, self.schema.as_ref());
                safety::is_safe_rendering(&self.template, &joined, &self.text)
            }
        }
    }
}

impl fmt::Debug for ParameterizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterizedQuery")
            .field("template", &self.template)
            .field("schema", &self.schema)
            .field("parameters", &self.parameters)
            .field("text", &self.text)
            .field("dropdowns", &self.dropdowns.is_some())
            .finish()
    }
}
