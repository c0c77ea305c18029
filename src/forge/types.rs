//! Artifact Type Definitions
//!
//! Core data structures for generated capability artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Kind of generated capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Module registering any mix of tools, hooks and commands
    Extension,
    /// Module registering a single tool
    Tool,
    /// Module subscribing a single host event
    Hook,
    /// Markdown instruction document
    Skill,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Tool => "tool",
            Self::Hook => "hook",
            Self::Skill => "skill",
        }
    }

    /// Whether artifacts of this kind are executable modules
    pub fn is_code(&self) -> bool {
        !matches!(self, Self::Skill)
    }

    /// File extension used when the source is persisted
    pub fn file_extension(&self) -> &'static str {
        if self.is_code() {
            "mjs"
        } else {
            "md"
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extension" => Ok(Self::Extension),
            "tool" => Ok(Self::Tool),
            "hook" => Ok(Self::Hook),
            "skill" => Ok(Self::Skill),
            other => Err(DefinitionError::UnknownKind(other.to_string())),
        }
    }
}

/// Complete artifact definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    /// Caller-supplied id, stable across updates
    pub id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub description: String,
    /// Tools in registration order
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// Hooks in registration order
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
    /// Markdown body (skills only)
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ArtifactDefinition {
    /// Create a minimal definition
    pub fn new(id: &str, kind: ArtifactKind, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
            tools: Vec::new(),
            hooks: Vec::new(),
            instructions: None,
            created_at: Utc::now(),
        }
    }

    /// Add a tool
    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a hook
    pub fn with_hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Set skill instructions
    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    /// Validate the definition shape
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.is_empty() {
            return Err(DefinitionError::MissingField("id".to_string()));
        }
        if !is_valid_id(&self.id) {
            return Err(DefinitionError::InvalidId(self.id.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(DefinitionError::MissingField("name".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(DefinitionError::MissingField("description".to_string()));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            tool.validate()?;
            if !seen.insert(tool.name.as_str()) {
                return Err(DefinitionError::DuplicateTool(tool.name.clone()));
            }
        }
        for hook in &self.hooks {
            hook.validate()?;
        }

        match self.kind {
            ArtifactKind::Tool if self.tools.len() != 1 || !self.hooks.is_empty() => {
                Err(DefinitionError::KindMismatch(
                    "a tool artifact declares exactly one tool and no hooks".to_string(),
                ))
            }
            ArtifactKind::Hook if self.hooks.len() != 1 || !self.tools.is_empty() => {
                Err(DefinitionError::KindMismatch(
                    "a hook artifact declares exactly one hook and no tools".to_string(),
                ))
            }
            ArtifactKind::Skill => match self.instructions.as_deref() {
                Some(body) if !body.trim().is_empty() => Ok(()),
                _ => Err(DefinitionError::MissingField("instructions".to_string())),
            },
            _ => Ok(()),
        }
    }
}

/// Ids are lowercase slugs so they can double as file names
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Tool fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (alphanumeric + underscore)
    pub name: String,
    pub description: String,
    /// Input parameters, rendered in name order
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    /// Handler body, inserted verbatim into the generated function
    pub body: String,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: BTreeMap::new(),
            body: body.to_string(),
        }
    }

    /// Add a parameter
    pub fn with_parameter(mut self, name: &str, param: ParameterSpec) -> Self {
        self.parameters.insert(name.to_string(), param);
        self
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.is_empty() {
            return Err(DefinitionError::MissingField("tool.name".to_string()));
        }
        if !self.name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(DefinitionError::InvalidName(self.name.clone()));
        }
        if self.description.trim().is_empty() {
            return Err(DefinitionError::MissingField(format!(
                "tool.{}.description",
                self.name
            )));
        }
        for (name, param) in &self.parameters {
            if name.is_empty() {
                return Err(DefinitionError::InvalidParameter(
                    "empty parameter name".to_string(),
                ));
            }
            param.validate()?;
        }
        Ok(())
    }

    /// Convert to JSON Schema for tool registration
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (name, param) in &self.parameters {
            properties.insert(name.clone(), param.to_json_schema());
            if param.required {
                required.push(serde_json::Value::String(name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Hook fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    /// Host event name, e.g. `tool_call` or `session_start`
    pub event: String,
    pub body: String,
}

impl HookSpec {
    pub fn new(event: &str, body: &str) -> Self {
        Self {
            event: event.to_string(),
            body: body.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.event.is_empty() {
            return Err(DefinitionError::MissingField("hook.event".to_string()));
        }
        if !self
            .event
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.')
        {
            return Err(DefinitionError::InvalidName(self.event.clone()));
        }
        Ok(())
    }
}

/// Parameter definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Default value if not provided
    pub default: Option<serde_json::Value>,
    /// Enum values (for string type)
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
}

impl ParameterSpec {
    fn of_type(param_type: ParameterType, description: &str, required: bool) -> Self {
        Self {
            param_type,
            description: description.to_string(),
            required,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            pattern: None,
        }
    }

    pub fn string(description: &str, required: bool) -> Self {
        Self::of_type(ParameterType::String, description, required)
    }

    pub fn number(description: &str, required: bool) -> Self {
        Self::of_type(ParameterType::Number, description, required)
    }

    pub fn boolean(description: &str, required: bool) -> Self {
        Self::of_type(ParameterType::Boolean, description, required)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.description.is_empty() {
            return Err(DefinitionError::InvalidParameter(
                "empty description".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(DefinitionError::InvalidParameter(format!(
                    "minimum {} exceeds maximum {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Convert to JSON Schema
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut schema = serde_json::json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });

        if let Some(ref default) = self.default {
            schema["default"] = default.clone();
        }
        if let Some(ref enum_values) = self.enum_values {
            schema["enum"] = serde_json::json!(enum_values);
        }
        if let Some(min) = self.minimum {
            schema["minimum"] = serde_json::json!(min);
        }
        if let Some(max) = self.maximum {
            schema["maximum"] = serde_json::json!(max);
        }
        if let Some(ref pattern) = self.pattern {
            schema["pattern"] = serde_json::json!(pattern);
        }

        schema
    }
}

/// Parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Definition shape errors
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid artifact id: {0}")]
    InvalidId(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Unknown artifact kind: {0}")]
    UnknownKind(String),

    #[error("Kind mismatch: {0}")]
    KindMismatch(String),
}
