//! Artifact Generator
//!
//! Renders an [`ArtifactDefinition`] into source text. Rendering is pure
//! data-to-text: templates with named `{{slot}}` placeholders, no validation.
//! Whatever comes out is fed to the validation pipeline like any other
//! candidate.

use super::types::*;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Rendering errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    #[error("Template slot '{0}' has no value")]
    MissingSlot(String),
    #[error("Unterminated slot in template at byte {0}")]
    Unterminated(usize),
    #[error("Skill '{0}' has no instructions")]
    MissingInstructions(String),
}

const MODULE_TEMPLATE: &str = "\
// {{name}}
// {{description}}
// Generated artifact '{{id}}' ({{kind}}). Edits are replaced on regeneration.

export default async function register(api) {
{{registrations}}}
";

const TOOL_TEMPLATE: &str = "\
  api.registerTool({
    name: {{name}},
    description: {{description}},
    parameters: {{parameters}},
    async execute(params, ctx) {
{{body}}
    },
  });
";

const HOOK_TEMPLATE: &str = "\
  api.on({{event}}, async (event, ctx) => {
{{body}}
  });
";

const SKILL_TEMPLATE: &str = "\
---
name: {{id}}
description: {{description}}
---

# {{name}}

{{instructions}}
";

/// Template with named `{{slot}}` placeholders
#[derive(Debug, Clone, Copy)]
pub struct Template {
    source: &'static str,
}

impl Template {
    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }

    /// Fill every slot. A slot without a value is an error.
    pub fn render(&self, slots: &BTreeMap<&str, String>) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.source.len() * 2);
        let mut rest = self.source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(RenderError::Unterminated(offset + start))?;
            let name = after[..end].trim();
            let value = slots
                .get(name)
                .ok_or_else(|| RenderError::MissingSlot(name.to_string()))?;
            out.push_str(value);

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// Renders definitions into module or markdown source
#[derive(Debug, Clone, Default)]
pub struct ArtifactGenerator;

impl ArtifactGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render a definition into source text
    pub fn render(&self, def: &ArtifactDefinition) -> Result<String, RenderError> {
        let source = match def.kind {
            ArtifactKind::Skill => self.render_skill(def)?,
            _ => self.render_module(def)?,
        };
        debug!(id = %def.id, kind = %def.kind, bytes = source.len(), "Rendered artifact");
        Ok(source)
    }

    fn render_module(&self, def: &ArtifactDefinition) -> Result<String, RenderError> {
        let mut registrations = String::new();

        for tool in &def.tools {
            let parameters = serde_json::to_string_pretty(&tool.to_json_schema())
                .unwrap_or_else(|_| "{}".to_string());
            let slots = BTreeMap::from([
                ("name", js_string(&tool.name)),
                ("description", js_string(&tool.description)),
                ("parameters", indent_tail(&parameters, 4)),
                ("body", indent(&tool.body, 6)),
            ]);
            registrations.push_str(&Template::new(TOOL_TEMPLATE).render(&slots)?);
        }

        for hook in &def.hooks {
            let slots = BTreeMap::from([
                ("event", js_string(&hook.event)),
                ("body", indent(&hook.body, 4)),
            ]);
            registrations.push_str(&Template::new(HOOK_TEMPLATE).render(&slots)?);
        }

        let slots = BTreeMap::from([
            ("name", single_line(&def.name)),
            ("description", single_line(&def.description)),
            ("id", def.id.clone()),
            ("kind", def.kind.to_string()),
            ("registrations", registrations),
        ]);
        Template::new(MODULE_TEMPLATE).render(&slots)
    }

    fn render_skill(&self, def: &ArtifactDefinition) -> Result<String, RenderError> {
        let instructions = def
            .instructions
            .as_deref()
            .ok_or_else(|| RenderError::MissingInstructions(def.id.clone()))?;

        let slots = BTreeMap::from([
            ("id", def.id.clone()),
            ("name", single_line(&def.name)),
            ("description", single_line(&def.description)),
            ("instructions", instructions.trim_end().to_string()),
        ]);
        Template::new(SKILL_TEMPLATE).render(&slots)
    }
}

/// JSON string literals are valid JavaScript string literals
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.trim_end()
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indent every line but the first
fn indent_tail(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut lines = text.lines();
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        out.push_str(&pad);
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_slots() {
        let slots = BTreeMap::from([("a", "1".to_string()), ("b", "2".to_string())]);
        let out = Template::new("x{{a}}y{{ b }}z").render(&slots).unwrap();
        assert_eq!(out, "x1y2z");
    }

    #[test]
    fn test_template_missing_slot() {
        let err = Template::new("{{nope}}").render(&BTreeMap::new()).unwrap_err();
        assert_eq!(err, RenderError::MissingSlot("nope".to_string()));
    }

    #[test]
    fn test_template_unterminated() {
        let slots = BTreeMap::from([("a", "1".to_string())]);
        let err = Template::new("ok {{a}} then {{broken").render(&slots).unwrap_err();
        assert_eq!(err, RenderError::Unterminated(14));
    }

    #[test]
    fn test_render_extension() {
        let def = ArtifactDefinition::new("greeter", ArtifactKind::Extension, "Greeter", "Says hi")
            .with_tool(
                ToolSpec::new("greet", "Greet someone", "return { text: `hi ${params.name}` };")
                    .with_parameter("name", ParameterSpec::string("Who", true)),
            )
            .with_hook(HookSpec::new("session_start", "ctx.log('started');"));

        let source = ArtifactGenerator::new().render(&def).unwrap();

        assert!(source.contains("export default async function register(api)"));
        assert!(source.contains("api.registerTool({"));
        assert!(source.contains("name: \"greet\""));
        assert!(source.contains("async execute(params, ctx)"));
        assert!(source.contains("      return { text: `hi ${params.name}` };"));
        assert!(source.contains("api.on(\"session_start\""));
        assert!(source.contains("\"required\": ["));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn test_render_escapes_strings() {
        let def = ArtifactDefinition::new("q", ArtifactKind::Tool, "Q", "Quotes")
            .with_tool(ToolSpec::new("q", "say \"hi\"\nthere", "return 1;"));

        let source = ArtifactGenerator::new().render(&def).unwrap();
        assert!(source.contains(r#"description: "say \"hi\"\nthere""#));
    }

    #[test]
    fn test_render_skill() {
        let def = ArtifactDefinition::new("fix-enoent", ArtifactKind::Skill, "Fix ENOENT", "Handle\nmissing files")
            .with_instructions("Create the parent directory first.\n");

        let source = ArtifactGenerator::new().render(&def).unwrap();

        assert!(source.starts_with("---\nname: fix-enoent\ndescription: Handle missing files\n---\n"));
        assert!(source.contains("# Fix ENOENT"));
        assert!(source.ends_with("Create the parent directory first.\n"));
    }

    #[test]
    fn test_render_skill_without_instructions() {
        let def = ArtifactDefinition::new("s", ArtifactKind::Skill, "S", "S");
        assert!(matches!(
            ArtifactGenerator::new().render(&def),
            Err(RenderError::MissingInstructions(_))
        ));
    }
}
