//! Builds the completion prompt for free-form questions

use crate::config::PromptTemplate;
use crate::conversation::ConversationState;

pub const DEFAULT_NAME: &str = "there";
pub const DEFAULT_AGE: &str = "unknown";
pub const DEFAULT_MEDICAL_HISTORY: &str = "none provided";

pub struct PromptComposer {
    template: PromptTemplate,
}

impl PromptComposer {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    pub fn persona(&self) -> &str {
        &self.template.persona.name
    }

    /// Fill the template with the profile and the question.
    /// Deterministic: same inputs, same prompt.
    pub fn compose(&self, profile: &ConversationState, inquiry: &str) -> String {
        let age = profile.age.map(|a| a.to_string());

        render(
            &self.template.template.content,
            &[
                ("name", profile.name.as_deref().unwrap_or(DEFAULT_NAME)),
                ("age", age.as_deref().unwrap_or(DEFAULT_AGE)),
                (
                    "medical_history",
                    profile
                        .medical_history
                        .as_deref()
                        .unwrap_or(DEFAULT_MEDICAL_HISTORY),
                ),
                ("inquiry", inquiry),
            ],
        )
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(PromptTemplate::builtin())
    }
}

/// Single pass over the template, so braces inside substituted values are
/// never expanded. Unknown `{...}` sequences are copied through.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let substitution = after.find('}').and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (end, *value))
        });

        match substitution {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
