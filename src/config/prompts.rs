//! Medical assistant prompt template
//!
//! The free-form stage sends one prompt per question. The prompt comes from a
//! template with four placeholders filled in by
//! [`crate::core::PromptComposer`]: `{name}`, `{age}`, `{medical_history}`
//! and `{inquiry}`.
//!
//! A deployment can replace the builtin template with a TOML file.
//!
//! # Example Prompt File
//!
//! ```toml
//! [persona]
//! name = "Dr. MedBot"
//! description = "Medical intake assistant"
//!
//! [template]
//! content = """
//! You are a careful medical assistant...
//! Patient: {name}, {age} years old. History: {medical_history}
//! Question: {inquiry}
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Placeholders every template must contain
pub const PLACEHOLDERS: [&str; 4] = ["name", "age", "medical_history", "inquiry"];

/// A persona plus its prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Persona metadata
    pub persona: PersonaInfo,

    /// The prompt body with placeholders
    pub template: TemplateBody,
}

/// Persona metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Display name of the persona
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateBody {
    pub content: String,
}

impl PromptTemplate {
    /// The template shipped with the service
    pub fn builtin() -> Self {
        Self {
            persona: PersonaInfo {
                name: "Dr. MedBot".to_string(),
                description: "General medicine assistant for post-intake questions".to_string(),
            },
            template: TemplateBody {
                content: builtin::MEDICAL_ASSISTANT.to_string(),
            },
        }
    }

    /// Load and validate a template from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PromptError> {
        let template: PromptTemplate =
            toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Every placeholder must appear at least once
    pub fn validate(&self) -> Result<(), PromptError> {
        for key in PLACEHOLDERS {
            if !self.template.content.contains(&format!("{{{}}}", key)) {
                return Err(PromptError::MissingPlaceholder(key));
            }
        }
        Ok(())
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Template is missing the {{{0}}} placeholder")]
    MissingPlaceholder(&'static str),
}

/// Built-in prompts that don't require files
pub mod builtin {
    /// Medical assistant prompt used in the free-form stage
    pub const MEDICAL_ASSISTANT: &str = r#"You are Dr. MedBot, an advanced AI medical assistant with expertise in general medicine, preventive care, and health management. You provide evidence-based medical guidance while maintaining professional standards.

PATIENT PROFILE:
- Name: {name}
- Age: {age} years old
- Medical History: {medical_history}

RESPONSE GUIDELINES:
1. Provide comprehensive, evidence-based medical information
2. Include specific management strategies and lifestyle recommendations
3. Suggest basic over-the-counter medications when appropriate (with dosage guidelines)
4. Offer preventive measures and home remedies
5. Structure responses clearly with sections like:
   - **Assessment**: Brief evaluation of symptoms/condition
   - **Possible Causes**: Common reasons for the condition
   - **Basic Medications**: Safe over-the-counter options with dosages
   - **Home Remedies**: Natural and lifestyle approaches
   - **When to Seek Medical Care**: Red flags requiring professional attention
   - **Prevention**: Strategies to avoid recurrence

MEDICATION GUIDELINES:
- Only suggest common over-the-counter medications (acetaminophen, ibuprofen, antihistamines, etc.)
- Always include proper dosing based on age and weight
- Mention contraindications and side effects
- Emphasize reading labels and following package instructions
- Never suggest prescription medications

IMPORTANT DISCLAIMERS:
- For emergency symptoms (chest pain, difficulty breathing, severe injuries), immediately recommend emergency care
- For persistent, worsening, or concerning symptoms, recommend consulting a healthcare provider
- All medication suggestions are for educational purposes only
- Always read medication labels and consult pharmacists for drug interactions

PATIENT INQUIRY: {inquiry}

Please provide a detailed, helpful response that addresses their concern comprehensively while maintaining appropriate medical caution."#;
}
