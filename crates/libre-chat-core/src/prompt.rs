//! Prompt templates with `{name}` placeholders.

use serde::Serialize;

use crate::error::{ChatError, Result};

/// Default template for conversational mode (`history`, `input`).
pub const DEFAULT_CONVERSATION_PROMPT: &str = "Assistant is a large language model trained by everyone.

Assistant is designed to be able to assist with a wide range of tasks, from answering simple questions to providing in-depth explanations and discussions on a wide range of topics. As a language model, Assistant is able to generate human-like text based on the input it receives, allowing it to engage in natural-sounding conversations and provide responses that are coherent and relevant to the topic at hand.

Assistant is constantly learning and improving, and its capabilities are constantly evolving. It is able to process and understand large amounts of text, and can use this knowledge to provide accurate and informative responses to a wide range of questions. Additionally, Assistant is able to generate its own text based on the input it receives, allowing it to engage in discussions and provide explanations and descriptions on a wide range of topics.

Overall, Assistant is a powerful tool that can help with a wide range of tasks and provide valuable insights and information on a wide range of topics. Whether you need help with a specific question or just want to have a conversation about a particular topic, Assistant is here to assist.

{history}
User: {input}
Assistant:";

/// Default template for retrieval mode (`context`, `question`).
pub const DEFAULT_QA_PROMPT: &str = "Use the following pieces of information to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}
Question: {question}

Only return the helpful answer below and nothing else.
Helpful answer:
";

pub const CONVERSATION_VARIABLES: [&str; 2] = ["input", "history"];
pub const QA_VARIABLES: [&str; 2] = ["context", "question"];

/// A validated template and the variables it expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSpec {
    template: String,
    variables: Vec<String>,
}

impl PromptSpec {
    /// # Errors
    ///
    /// [`ChatError::Configuration`] if `variables` is empty or a variable has
    /// no `{name}` placeholder in `template`.
    pub fn new<S: AsRef<str>>(template: impl Into<String>, variables: &[S]) -> Result<Self> {
        let template = template.into();
        if variables.is_empty() {
            return Err(ChatError::Configuration(
                "prompt must declare at least one variable".to_string(),
            ));
        }
        let variables: Vec<String> = variables.iter().map(|v| v.as_ref().to_string()).collect();
        for var in &variables {
            if !template.contains(&format!("{{{}}}", var)) {
                return Err(ChatError::Configuration(format!(
                    "prompt variable '{}' does not appear in the template",
                    var
                )));
            }
        }
        Ok(Self {
            template,
            variables,
        })
    }

    pub fn conversation() -> Self {
        Self {
            template: DEFAULT_CONVERSATION_PROMPT.to_string(),
            variables: CONVERSATION_VARIABLES.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn question_answering() -> Self {
        Self {
            template: DEFAULT_QA_PROMPT.to_string(),
            variables: QA_VARIABLES.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Substitute every declared variable in one pass.
    ///
    /// Values are inserted verbatim: braces inside a value are never expanded.
    /// Placeholders for undeclared names are left untouched.
    ///
    /// # Errors
    ///
    /// [`ChatError::Configuration`] when a declared variable has no value.
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String> {
        for var in &self.variables {
            if !values.iter().any(|(name, _)| name == var) {
                return Err(ChatError::Configuration(format!(
                    "no value supplied for prompt variable '{}'",
                    var
                )));
            }
        }

        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let replacement = after.find('}').and_then(|close| {
                let name = &after[..close];
                self.variables
                    .iter()
                    .any(|v| v == name)
                    .then(|| values.iter().find(|(n, _)| *n == name))
                    .flatten()
                    .map(|(_, value)| (*value, close))
            });
            match replacement {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}
