//! Agent definition type

use serde::{Deserialize, Serialize};

/// A role's behavioral contract: prompt, tool allowlist and turn budget
///
/// Immutable once built; the registry hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique role name (e.g. "product", "development")
    pub name: String,
    /// One-line summary shown to coordinators
    #[serde(default)]
    pub description: String,
    /// System prompt text passed to the worker
    pub system_prompt: String,
    /// Capability tags the worker may use
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Maximum reasoning/tool-use rounds
    pub max_turns: u32,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, max_turns: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            allowed_tools: Vec::new(),
            max_turns,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Definition for a role the coordinator invented on the fly
    pub fn ad_hoc(
        name: &str,
        system_prompt: Option<String>,
        allowed_tools: Vec<String>,
        max_turns: u32,
    ) -> Self {
        let system_prompt = system_prompt.unwrap_or_else(|| {
            format!("You are the {name} agent on a software team. Complete the task you are given and report your results concisely.")
        });
        Self {
            name: name.to_string(),
            description: "ad hoc role".to_string(),
            system_prompt,
            allowed_tools,
            max_turns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let def = AgentDefinition::new("review", "Review the change", 12)
            .with_description("Code reviewer")
            .with_tools(["Read", "Grep"]);

        assert_eq!(def.name, "review");
        assert_eq!(def.description, "Code reviewer");
        assert_eq!(def.allowed_tools, vec!["Read", "Grep"]);
        assert_eq!(def.max_turns, 12);
    }

    #[test]
    fn ad_hoc_uses_generated_prompt_when_missing() {
        let def = AgentDefinition::ad_hoc("security-audit", None, vec!["Read".to_string()], 30);
        assert!(def.system_prompt.contains("security-audit"));
        assert_eq!(def.max_turns, 30);
    }

    #[test]
    fn ad_hoc_keeps_supplied_prompt() {
        let def = AgentDefinition::ad_hoc("docs", Some("Write docs".to_string()), vec![], 5);
        assert_eq!(def.system_prompt, "Write docs");
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{"name":"qa","system_prompt":"Test it","max_turns":8}"#;
        let def: AgentDefinition = serde_json::from_str(json).unwrap();
        assert!(def.allowed_tools.is_empty());
        assert!(def.description.is_empty());
    }
}
