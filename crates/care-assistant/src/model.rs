use serde::{Deserialize, Serialize};

/// Placeholder similarity attached to every ranked result. The keyword ranker
/// does not compute a real similarity.
pub const PLACEHOLDER_SIMILARITY: f32 = 0.5;

/// A knowledge record, e.g. "Influenza" with its description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Title, also the source of the record's filename slug
    pub title: String,
    /// Body text injected into the prompt
    pub content: String,
    /// Free-form grouping such as "infectious"; written as `null` when absent
    #[serde(default)]
    pub category: Option<String>,
}

impl Document {
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.content.trim().is_empty()
    }
}

/// How a ranked result was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrigin {
    /// At least one query term matched the title or content.
    Keyword,
    /// Nothing matched; the document was drawn at random from the corpus.
    RandomFallback,
}

/// A document selected for a query, with its keyword score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub document: Document,
    pub score: u32,
    pub similarity: f32,
    pub origin: RankOrigin,
}

/// One entry of the caller-held conversation history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Content of the most recent assistant turn, used as the prior-turn context.
pub fn last_assistant_turn(history: &[HistoryEntry]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|entry| entry.role.as_deref() == Some("assistant"))
        .and_then(|entry| entry.content.as_deref())
}
