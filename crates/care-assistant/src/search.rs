/// Keyword ranker for the knowledge corpus.
///
/// A linear scan: every query term found as a substring of a document's title
/// adds 3 to its score, every term found in its content adds 1. The corpus is
/// a few dozen short records, so no index is kept.
///
/// When no term matches anything, [`random_fallback`] draws documents at
/// random instead of returning nothing, so the prompt always carries some
/// knowledge context while the corpus is non-empty.
use rand::seq::index;
use rand::Rng;
use tracing::{debug, info};

use crate::model::{Document, RankOrigin, RankedResult, PLACEHOLDER_SIMILARITY};

pub const DEFAULT_TOP_K: usize = 3;
const TITLE_WEIGHT: u32 = 3;
const CONTENT_WEIGHT: u32 = 1;

/// Rank `documents` against `query`, returning at most `top_k` results.
pub fn search(documents: &[Document], query: &str, top_k: usize) -> Vec<RankedResult> {
    search_with_rng(documents, query, top_k, &mut rand::thread_rng())
}

/// [`search`] with an explicit random source for the fallback path.
pub fn search_with_rng<R: Rng + ?Sized>(
    documents: &[Document],
    query: &str,
    top_k: usize,
    rng: &mut R,
) -> Vec<RankedResult> {
    if documents.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let terms = query_terms(query);
    let results = keyword_matches(documents, &terms, top_k);
    if !results.is_empty() {
        info!(results = results.len(), "keyword search matched documents");
        return results;
    }

    let results = random_fallback(documents, top_k, rng);
    info!(
        results = results.len(),
        "no keyword matches, using random fallback documents"
    );
    results
}

/// Lower-cased, whitespace-separated query terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Weighted count of `terms` contained in the title and content of `doc`.
pub fn score(doc: &Document, terms: &[String]) -> u32 {
    let title = doc.title.to_lowercase();
    let content = doc.content.to_lowercase();

    let title_hits = terms.iter().filter(|t| title.contains(t.as_str())).count() as u32;
    let content_hits = terms.iter().filter(|t| content.contains(t.as_str())).count() as u32;
    TITLE_WEIGHT * title_hits + CONTENT_WEIGHT * content_hits
}

/// Top `top_k` documents by score, highest first, ties in load order, with
/// zero scores dropped.
fn keyword_matches(documents: &[Document], terms: &[String], top_k: usize) -> Vec<RankedResult> {
    let mut scored: Vec<(usize, u32)> = documents
        .iter()
        .enumerate()
        .map(|(idx, doc)| (idx, score(doc, terms)))
        .collect();
    // sort_by is stable, so equal scores keep load order
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .take(top_k)
        .filter(|&(_, s)| s > 0)
        .map(|(idx, s)| {
            debug!(title = %documents[idx].title, score = s, "ranked document");
            RankedResult {
                document: documents[idx].clone(),
                score: s,
                similarity: PLACEHOLDER_SIMILARITY,
                origin: RankOrigin::Keyword,
            }
        })
        .collect()
}

/// `min(top_k, documents.len())` distinct documents chosen uniformly at random.
pub fn random_fallback<R: Rng + ?Sized>(
    documents: &[Document],
    top_k: usize,
    rng: &mut R,
) -> Vec<RankedResult> {
    let amount = top_k.min(documents.len());
    index::sample(rng, documents.len(), amount)
        .into_iter()
        .map(|idx| RankedResult {
            document: documents[idx].clone(),
            score: 0,
            similarity: PLACEHOLDER_SIMILARITY,
            origin: RankOrigin::RandomFallback,
        })
        .collect()
}
