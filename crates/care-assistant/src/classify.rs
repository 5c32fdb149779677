/// Maps completion failures to the sentence shown to the user instead of an answer.
///
/// The provider exposes no typed error contract, so classification looks for
/// keywords in the lower-cased error text. Rules are checked in order and the
/// first match wins; unknown wording lands in [`FailureKind::Generic`].
use llm_common::error::error_chain_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Authentication,
    RateLimit,
    ContextLength,
    ContentFilter,
    Vision,
    Connection,
    Generic,
}

struct Rule {
    kind: FailureKind,
    any_of: &'static [&'static str],
    none_of: &'static [&'static str],
}

// A rate-limit message that says "exceeded" is still a rate limit.
const RULES: &[Rule] = &[
    Rule {
        kind: FailureKind::Quota,
        any_of: &["quota", "exceeded"],
        none_of: &["rate limit"],
    },
    Rule {
        kind: FailureKind::Authentication,
        any_of: &["authentication", "key"],
        none_of: &[],
    },
    Rule {
        kind: FailureKind::RateLimit,
        any_of: &["rate limit"],
        none_of: &[],
    },
    Rule {
        kind: FailureKind::ContextLength,
        any_of: &["context length", "token"],
        none_of: &[],
    },
    Rule {
        kind: FailureKind::ContentFilter,
        any_of: &["content filter", "policy", "unsafe"],
        none_of: &[],
    },
    Rule {
        kind: FailureKind::Vision,
        any_of: &["vision", "image"],
        none_of: &[],
    },
    Rule {
        kind: FailureKind::Connection,
        any_of: &["connection", "timeout", "timed out", "network"],
        none_of: &[],
    },
];

impl Rule {
    fn matches(&self, text: &str) -> bool {
        self.any_of.iter().any(|k| text.contains(k)) && !self.none_of.iter().any(|k| text.contains(k))
    }
}

pub fn classify(message: &str) -> FailureKind {
    let text = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&text))
        .map(|rule| rule.kind)
        .unwrap_or(FailureKind::Generic)
}

impl FailureKind {
    pub fn apology(self) -> &'static str {
        match self {
            FailureKind::Quota => {
                "I'm unable to respond due to API quota limitations. The account has reached its usage limit."
            }
            FailureKind::Authentication => {
                "There appears to be an issue with the API configuration. Please check the application setup and ensure the API key is valid."
            }
            FailureKind::RateLimit => {
                "The service is currently experiencing high demand. Please try again in a few moments."
            }
            FailureKind::ContextLength => {
                "Your question or conversation history is too long for me to process. Please try asking a shorter question or starting a new conversation."
            }
            FailureKind::ContentFilter => {
                "I cannot provide information on this topic due to content restrictions. Please try asking about something else."
            }
            FailureKind::Vision => {
                "I'm currently having difficulty processing this image. I work best with clearly labeled medical imagery such as MRIs or X-rays. Please consider sharing medical imaging from your healthcare provider instead."
            }
            FailureKind::Connection => {
                "I'm having trouble connecting to my knowledge source. This might be due to network issues. Please check your internet connection and try again shortly."
            }
            FailureKind::Generic => {
                "I'm sorry, I encountered an error while processing your request. Please try again later."
            }
        }
    }
}

/// Translate any completion failure into its user-facing sentence.
pub fn apology_for(err: &(dyn std::error::Error + 'static)) -> (FailureKind, &'static str) {
    let kind = classify(&error_chain_text(err));
    (kind, kind.apology())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_common::error::CompletionError;

    #[test]
    fn rate_limit_exceeded_is_a_rate_limit() {
        assert_eq!(classify("Rate Limit Exceeded"), FailureKind::RateLimit);
        assert_eq!(
            classify("upstream returned error: status=429 message=rate limit exceeded for gpt-4o"),
            FailureKind::RateLimit
        );
    }

    #[test]
    fn quota_wins_over_later_rules() {
        assert_eq!(classify("Monthly quota exceeded"), FailureKind::Quota);
        assert_eq!(classify("token budget exceeded"), FailureKind::Quota);
    }

    #[test]
    fn priority_order_is_respected() {
        assert_eq!(classify("Invalid API key"), FailureKind::Authentication);
        // "key" is checked before "token"
        assert_eq!(classify("bad token key"), FailureKind::Authentication);
        assert_eq!(
            classify("This model's maximum context length is 8192 tokens"),
            FailureKind::ContextLength
        );
        assert_eq!(
            classify("The response was filtered due to the prompt triggering content management policy"),
            FailureKind::ContentFilter
        );
        assert_eq!(classify("Unsafe image content"), FailureKind::ContentFilter);
        assert_eq!(classify("Invalid image format"), FailureKind::Vision);
        assert_eq!(classify("connection refused"), FailureKind::Connection);
        assert_eq!(classify("operation timed out"), FailureKind::Connection);
    }

    #[test]
    fn unknown_wording_is_generic() {
        assert_eq!(classify("something odd happened"), FailureKind::Generic);
        assert_eq!(classify(""), FailureKind::Generic);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("AUTHENTICATION FAILED"), FailureKind::Authentication);
        assert_eq!(classify("Network Unreachable"), FailureKind::Connection);
    }

    #[test]
    fn apology_for_uses_error_text() {
        let err = CompletionError::Provider("Rate Limit Exceeded".to_string());
        let (kind, sentence) = apology_for(&err);
        assert_eq!(kind, FailureKind::RateLimit);
        assert_eq!(sentence, FailureKind::RateLimit.apology());

        let (kind, _) = apology_for(&CompletionError::EmptyCompletion);
        assert_eq!(kind, FailureKind::Generic);
    }
}
