//! Generation collaborator used for answering, grading and query rewriting.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RagError, Result};

/// A JSON schema the generator's structured output must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    /// Schema name, sent to providers that require one.
    pub name: &'static str,
    /// JSON Schema object describing the record.
    pub schema: Value,
}

/// A language model behind a text-in, text-out contract.
///
/// Production implementations wrap a hosted model; tests use scripted doubles.
/// Callers bound every call with their own timeout, so implementations need
/// not enforce one.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a prompt with free text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt with a JSON value matching `schema`.
    async fn complete_structured(&self, prompt: &str, schema: &OutputSchema) -> Result<Value>;
}

/// A record type the generator can be asked to produce.
pub trait StructuredOutput: DeserializeOwned {
    fn output_schema() -> OutputSchema;
}

/// Ask `generator` for a `T`, decoding its structured output.
///
/// # Errors
///
/// Returns [`RagError::GenerationUnavailable`] if the call fails or the output
/// does not decode into `T`.
pub async fn complete_typed<T: StructuredOutput>(
    generator: &dyn Generator,
    prompt: &str,
) -> Result<T> {
    let schema = T::output_schema();
    let value = generator.complete_structured(prompt, &schema).await?;
    serde_json::from_value(value).map_err(|e| {
        RagError::generation(format!("output did not match schema '{}': {e}", schema.name))
    })
}
