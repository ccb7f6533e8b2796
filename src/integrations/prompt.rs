//! Prompt rendering interface
//!
//! Templates are somebody else's problem; the runtime only asks for the
//! rendered text once per processing step.

use crate::agent::AgentSession;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A prompt ready for inference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub text: String,
    /// Values substituted while rendering, for tracing
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl RenderedPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// The external prompt collaborator
pub trait PromptProvider: Send + Sync {
    fn render(&self, session: &AgentSession) -> RenderedPrompt;
}

/// Fixed prompt text with `{agent_id}`, `{project_id}` and `{address}`
/// placeholders filled in
#[derive(Debug, Clone, Default)]
pub struct StaticPrompt {
    template: String,
}

impl StaticPrompt {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl PromptProvider for StaticPrompt {
    fn render(&self, session: &AgentSession) -> RenderedPrompt {
        let address = session.address.to_string();
        let text = self
            .template
            .replace("{agent_id}", &session.agent_id)
            .replace("{project_id}", &session.project_id)
            .replace("{address}", &address);

        RenderedPrompt::new(text)
            .with_variable("agent_id", session.agent_id.as_str())
            .with_variable("project_id", session.project_id.as_str())
            .with_variable("address", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_prompt_fills_placeholders() {
        let session = AgentSession::new("writer", "docs").unwrap();
        let prompt = StaticPrompt::new("You are {agent_id} at {address}.").render(&session);

        assert_eq!(prompt.text, "You are writer at writer@docs.agent.");
        assert_eq!(prompt.variables.get("project_id").map(String::as_str), Some("docs"));
    }

    #[test]
    fn test_empty_template() {
        let session = AgentSession::new("a", "p").unwrap();
        assert_eq!(StaticPrompt::default().render(&session).text, "");
    }
}
