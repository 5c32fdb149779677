use llm_common::completion::DecodingConfig;
use llm_common::openai::{ContentPart, ImageUrl, Message, MessageContent};

use crate::model::RankedResult;

pub const GENERAL_PERSONA: &str = "You are a healthcare assistant providing brief, accurate medical information. \
Focus on symptoms, conditions, and general wellness advice. \
Keep responses concise but informative. \
Always include appropriate disclaimers about consulting healthcare professionals for definitive advice.";

pub const KNOWLEDGE_PERSONA: &str = "You are a specialized healthcare assistant providing accurate medical information. \
Focus on symptoms, conditions, and general wellness advice. \
Keep responses concise but informative. \
Always include appropriate disclaimers about consulting healthcare professionals for definitive advice.";

pub const IMAGE_PERSONA: &str = "You are a specialized healthcare assistant providing accurate medical information based on images. \
You can analyze formal medical images like MRIs, X-rays, or CT scans. \
For casual photos or non-medical images, explain that you're designed for professional medical imagery only, \
and suggest proper medical consultation. \
Avoid making definitive diagnostic claims and always include appropriate medical disclaimers.";

const KNOWLEDGE_PREAMBLE: &str =
    "\n\nUse the following specialized information to inform your response:\n\n";

pub const GENERAL_DECODING: DecodingConfig = DecodingConfig {
    temperature: 0.7,
    top_p: 0.95,
    max_tokens: 150,
};

pub const KNOWLEDGE_DECODING: DecodingConfig = DecodingConfig {
    temperature: 0.7,
    top_p: 0.95,
    max_tokens: 250,
};

pub const IMAGE_DECODING: DecodingConfig = DecodingConfig {
    temperature: 0.7,
    top_p: 0.95,
    max_tokens: 300,
};

/// The caller's current turn.
#[derive(Debug, Clone)]
pub enum UserInput {
    Text(String),
    Image {
        question: String,
        /// `data:` URL carrying the base64 image bytes
        data_url: String,
    },
}

impl UserInput {
    fn into_content(self) -> MessageContent {
        match self {
            UserInput::Text(text) => MessageContent::Text(text),
            UserInput::Image { question, data_url } => MessageContent::Parts(vec![
                ContentPart::Text { text: question },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}

/// Build the outgoing messages: system instruction (with any knowledge
/// appended), then the prior assistant turn if any, then the user's input.
pub fn assemble(
    persona: &str,
    documents: &[RankedResult],
    context: Option<&str>,
    input: UserInput,
) -> Vec<Message> {
    let mut system = persona.to_string();
    if !documents.is_empty() {
        system.push_str(KNOWLEDGE_PREAMBLE);
        for result in documents {
            system.push_str(&result.document.title);
            system.push_str(": ");
            system.push_str(&result.document.content);
            system.push_str("\n\n");
        }
    }

    let mut messages = Vec::with_capacity(3);
    messages.push(Message::system(system));
    if let Some(context) = context {
        messages.push(Message::assistant(context));
    }
    messages.push(Message::user(input.into_content()));
    messages
}
