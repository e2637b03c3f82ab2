//! Conversation context assembly.
//!
//! Builds the message list sent to the provider: static system prompt,
//! safety fragment, skill summaries, retrieved memory context, then the
//! session history.

use crate::session::Message;

/// Default system prompt used when the config provides none.
const DEFAULT_SYSTEM_PROMPT: &str = "You are PicoClaw, a personal assistant for a family. \
     Be concise and helpful. Use the available tools when they help you \
     answer; prefer memory_search/memory_browse for questions about past \
     conversations.";

/// An externally defined capability bundle: a prompt plus the tools a
/// subagent running under it may use.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
}

impl Skill {
    pub fn new(name: &str, prompt: &str, allowed_tools: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            prompt: prompt.to_string(),
            allowed_tools,
        }
    }
}

/// Assembles provider message lists from the configured prompt, registered
/// skills and per-turn fragments.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    system_prompt: String,
    skills: Vec<Skill>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            skills: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    pub fn with_skills(mut self, skills: Vec<Skill>) -> Self {
        self.skills = skills;
        self
    }

    pub fn find_skill(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Render the combined system message.
    ///
    /// `safety_fragment` comes from the safety filter, `memory_fragment`
    /// from pre-turn retrieval; both may be empty.
    pub fn build_system_message(&self, safety_fragment: &str, memory_fragment: &str) -> Message {
        let mut parts = vec![self.system_prompt.clone()];

        if !self.skills.is_empty() {
            let mut skills = String::from("## Skills\n");
            for skill in &self.skills {
                skills.push_str(&format!("- {}: {}\n", skill.name, skill.prompt));
            }
            parts.push(skills.trim_end().to_string());
        }
        if !safety_fragment.is_empty() {
            parts.push(safety_fragment.to_string());
        }
        if !memory_fragment.is_empty() {
            parts.push(format!("## Relevant memories\n{}", memory_fragment));
        }

        Message::system(&parts.join("\n\n"))
    }

    /// Full message list: system message followed by the session history.
    pub fn build_messages(
        &self,
        history: &[Message],
        safety_fragment: &str,
        memory_fragment: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(self.build_system_message(safety_fragment, memory_fragment));
        messages.extend_from_slice(history);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_default_system_prompt() {
        let builder = ContextBuilder::new();
        let system = builder.build_system_message("", "");
        assert!(system.content.contains("PicoClaw"));
        assert_eq!(system.role, Role::System);
    }

    #[test]
    fn test_custom_system_prompt() {
        let builder = ContextBuilder::new().with_system_prompt("Custom prompt");
        let system = builder.build_system_message("", "");
        assert!(system.content.starts_with("Custom prompt"));
    }

    #[test]
    fn test_safety_fragment_appended() {
        let builder = ContextBuilder::new();
        let system = builder.build_system_message("## Safety Context\nlevel high", "");
        assert!(system.content.contains("## Safety Context"));
    }

    #[test]
    fn test_memory_fragment_appended() {
        let builder = ContextBuilder::new();
        let system = builder.build_system_message("", "1. [2026-01-01] pizza night");
        assert!(system.content.contains("## Relevant memories"));
        assert!(system.content.contains("pizza night"));
    }

    #[test]
    fn test_skills_listed() {
        let builder = ContextBuilder::new().with_skills(vec![
            Skill::new("homework", "Help with homework", vec!["memory_search".into()]),
            Skill::new("chores", "Track chores", vec![]),
        ]);
        let system = builder.build_system_message("", "");
        assert!(system.content.contains("## Skills"));
        assert!(system.content.contains("homework"));
        assert!(system.content.contains("chores"));
    }

    #[test]
    fn test_find_skill() {
        let builder = ContextBuilder::new()
            .with_skills(vec![Skill::new("homework", "Help", vec!["echo".into()])]);
        assert!(builder.find_skill("homework").is_some());
        assert!(builder.find_skill("missing").is_none());
    }

    #[test]
    fn test_build_messages_prepends_system() {
        let builder = ContextBuilder::new();
        let history = vec![Message::user("Hello"), Message::assistant("Hi")];
        let messages = builder.build_messages(&history, "", "");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[2].content, "Hi");
    }
}
