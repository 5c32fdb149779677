/// The caller-facing operations: chat, image analysis and corpus additions.
///
/// Remote failures never escape: they are logged and replaced with the
/// classified apology sentence. Input problems (unknown image, missing
/// fields, storage faults) are returned as errors before any remote call.
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use llm_common::completion::{ChatCompleter, DecodingConfig};
use llm_common::openai::Message;

use crate::classify::apology_for;
use crate::images::{ImageError, ImageStore};
use crate::model::{last_assistant_turn, Document, HistoryEntry};
use crate::prompt::{
    assemble, UserInput, GENERAL_DECODING, GENERAL_PERSONA, IMAGE_DECODING, IMAGE_PERSONA,
    KNOWLEDGE_DECODING, KNOWLEDGE_PERSONA,
};
use crate::search;
use crate::store::{DocumentStore, StoreError};

pub const DEFAULT_IMAGE_QUESTION: &str = "What can you tell me about this medical image?";

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("failed to read image {filename}: {source}")]
    ImageUnreadable {
        filename: String,
        #[source]
        source: ImageError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AddDocumentError {
    #[error("title and content are required")]
    MissingFields,

    #[error("failed to store document: {0}")]
    Storage(#[source] StoreError),
}

pub struct Assistant {
    completer: Arc<dyn ChatCompleter>,
    model: String,
    top_k: usize,
    store: RwLock<DocumentStore>,
    images: ImageStore,
}

impl Assistant {
    pub fn new(
        completer: Arc<dyn ChatCompleter>,
        model: impl Into<String>,
        top_k: usize,
        store: DocumentStore,
        images: ImageStore,
    ) -> Self {
        Self {
            completer,
            model: model.into(),
            top_k,
            store: RwLock::new(store),
            images,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub async fn document_count(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.store.read().await.documents().to_vec()
    }

    /// Answer a text question, with knowledge context when the corpus is non-empty.
    pub async fn ask(&self, message: &str, history: &[HistoryEntry]) -> String {
        let context = last_assistant_turn(history);
        info!(
            preview = %preview(message),
            has_context = context.is_some(),
            "received message"
        );

        // Rank under the read lock, then release it before the remote call.
        let ranked = {
            let store = self.store.read().await;
            if store.is_empty() {
                None
            } else {
                Some(search::search(store.documents(), message, self.top_k))
            }
        };

        let input = UserInput::Text(message.to_string());
        match ranked {
            Some(docs) => {
                for doc in &docs {
                    debug!(
                        title = %doc.document.title,
                        score = doc.score,
                        similarity = doc.similarity,
                        origin = ?doc.origin,
                        "injecting document"
                    );
                }
                info!(documents = docs.len(), "answering with knowledge base");
                let messages = assemble(KNOWLEDGE_PERSONA, &docs, context, input);
                self.complete_or_apologize(messages, KNOWLEDGE_DECODING).await
            }
            None => {
                info!("answering without knowledge base");
                let messages = assemble(GENERAL_PERSONA, &[], context, input);
                self.complete_or_apologize(messages, GENERAL_DECODING).await
            }
        }
    }

    /// Ask about a previously uploaded image.
    pub async fn analyze_image(
        &self,
        filename: &str,
        question: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<String, AssistantError> {
        let image = match self.images.load(filename).await {
            Ok(image) => image,
            Err(ImageError::NotFound(_)) => {
                warn!(filename, "image not found");
                return Err(AssistantError::ImageNotFound(filename.to_string()));
            }
            Err(source) => {
                error!(error = %source, filename, "failed to read image");
                return Err(AssistantError::ImageUnreadable {
                    filename: filename.to_string(),
                    source,
                });
            }
        };

        info!(filename, bytes = image.bytes.len(), "analyzing image");
        let question = question
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_IMAGE_QUESTION);
        let input = UserInput::Image {
            question: question.to_string(),
            data_url: image.data_url(),
        };
        let messages = assemble(IMAGE_PERSONA, &[], last_assistant_turn(history), input);
        Ok(self.complete_or_apologize(messages, IMAGE_DECODING).await)
    }

    pub async fn add_document(
        &self,
        title: &str,
        content: &str,
        category: Option<&str>,
    ) -> Result<(), AddDocumentError> {
        let mut store = self.store.write().await;
        match store.add(title, content, category).await {
            Ok(_) => Ok(()),
            Err(StoreError::MissingFields) => Err(AddDocumentError::MissingFields),
            Err(e) => Err(AddDocumentError::Storage(e)),
        }
    }

    async fn complete_or_apologize(&self, messages: Vec<Message>, decoding: DecodingConfig) -> String {
        let request = decoding.request(&self.model, messages);
        info!(model = %self.model, max_tokens = decoding.max_tokens, "sending completion request");
        match self.completer.complete(request).await {
            Ok(answer) => {
                info!(preview = %preview(&answer), "received completion");
                answer
            }
            Err(e) => {
                let (kind, apology) = apology_for(&e);
                error!(error = %e, kind = ?kind, "completion failed");
                apology.to_string()
            }
        }
    }
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 30;
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
