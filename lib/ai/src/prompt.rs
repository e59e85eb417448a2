//! Prompt templates.
//!
//! System prompts and postprocessing prompts are assembled from templates
//! with `{{variable}}` placeholders.

use crate::error::PromptError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Definition of a template variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Description of what this variable is for.
    pub description: String,
    /// Whether this variable is required.
    pub required: bool,
    /// Default value if not provided.
    pub default: Option<JsonValue>,
}

impl VariableDefinition {
    /// Creates a required variable definition.
    #[must_use]
    pub fn required(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// Creates an optional variable definition.
    #[must_use]
    pub fn optional(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: false,
            default: None,
        }
    }

    /// Sets a default value.
    #[must_use]
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template name, used in errors.
    pub name: String,
    /// Template content with placeholders.
    pub content: String,
    /// Variable definitions.
    pub variables: BTreeMap<String, VariableDefinition>,
}

fn placeholder(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PromptTemplate {
    /// Creates a new prompt template.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            variables: BTreeMap::new(),
        }
    }

    /// Adds a variable definition.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, definition: VariableDefinition) -> Self {
        self.variables.insert(name.into(), definition);
        self
    }

    /// Validates that all required variables are provided.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariable`] for the first missing one.
    pub fn validate_variables(
        &self,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<(), Report<PromptError>> {
        let missing = self
            .variables
            .iter()
            .filter(|(_, def)| def.required && def.default.is_none())
            .find(|(name, _)| !variables.contains_key(*name));

        match missing {
            Some((name, _)) => Err(PromptError::MissingVariable {
                template: self.name.clone(),
                variable: name.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Renders the template with the given variables.
    ///
    /// Declared variables that are not provided fall back to their default,
    /// or to the empty string when optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing.
    pub fn render(&self, variables: &HashMap<String, JsonValue>) -> Result<String, Report<PromptError>> {
        self.validate_variables(variables)?;

        let mut result = self.content.clone();
        for (name, value) in variables {
            result = result.replace(&placeholder(name), &as_text(value));
        }
        for (name, def) in &self.variables {
            let replacement = def.default.as_ref().map(as_text).unwrap_or_default();
            result = result.replace(&placeholder(name), &replacement);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_rendering() {
        let template = PromptTemplate::new(
            "intro",
            "You are {{side_name}}, talking with {{other_name}}.",
        );

        let mut vars = HashMap::new();
        vars.insert("side_name".to_string(), json!("OpenAI"));
        vars.insert("other_name".to_string(), json!("Anthropic"));

        let rendered = template.render(&vars).expect("render");
        assert_eq!(rendered, "You are OpenAI, talking with Anthropic.");
    }

    #[test]
    fn template_with_defaults() {
        let template = PromptTemplate::new("system", "Notes: {{notes}}|Extra: {{extra}}")
            .with_variable("notes", VariableDefinition::optional("Notes").with_default(json!("(none)")))
            .with_variable("extra", VariableDefinition::optional("Extra"));

        let rendered = template.render(&HashMap::new()).expect("render");
        assert_eq!(rendered, "Notes: (none)|Extra: ");
    }

    #[test]
    fn template_validation() {
        let template = PromptTemplate::new("test", "{{required_var}} {{optional_var}}")
            .with_variable("required_var", VariableDefinition::required("Required"))
            .with_variable("optional_var", VariableDefinition::optional("Optional"));

        let err = template.render(&HashMap::new()).expect_err("missing");
        assert!(err.to_string().contains("required_var"));

        let mut valid_vars = HashMap::new();
        valid_vars.insert("required_var".to_string(), json!("value"));
        assert!(template.validate_variables(&valid_vars).is_ok());
    }
}
