/// Error returned by a chat completion backend.
///
/// Callers do not branch on the variants; the assistant turns the rendered
/// message (including the source chain) into a user-facing apology. The
/// `Provider` variant carries free-form provider wording for backends that
/// do not go through [`crate::openai::OpenAiClient`].
use crate::openai::OpenAiClientError;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error(transparent)]
    Client(#[from] OpenAiClientError),

    #[error("completion returned no content")]
    EmptyCompletion,

    #[error("{0}")]
    Provider(String),
}

/// Render an error together with its `source()` chain, joined by `": "`.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let piece = inner.to_string();
        if !text.contains(&piece) {
            text.push_str(": ");
            text.push_str(&piece);
        }
        source = inner.source();
    }
    text
}
