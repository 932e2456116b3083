//! Relevance Scoring
//!
//! Scores a request against every registered handler. The router talks to
//! the model only through [`ScoringStrategy`], so alternative models
//! (embeddings, learned rankers) can replace the default without touching
//! routing or dispatch.
//!
//! # Default Model
//!
//! [`HybridScorer`] blends two signals:
//!
//! ```text
//! score = 0.4 * keyword_score + 0.6 * semantic_score
//!
//! keyword_score  = matched keyword weight / total keyword weight   (clamped 0..1)
//!                  declared keyword = 1.0, capability word = 0.8
//! semantic_score = cosine(request tf-idf, handler tf-idf)          (clamped >= 0)
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::handler::HandlerDescriptor;

/// Weight of the keyword signal in the blended score
pub const KEYWORD_WEIGHT: f64 = 0.4;

/// Weight of the semantic signal in the blended score
pub const SEMANTIC_WEIGHT: f64 = 0.6;

/// Weight of a declared keyword
pub const DECLARED_KEYWORD_WEIGHT: f64 = 1.0;

/// Weight of a word taken from a capability phrase
pub const CAPABILITY_WORD_WEIGHT: f64 = 0.8;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "its", "of", "on", "or", "that", "the", "this", "to", "via", "with",
];

// ============================================================================
// Strategy Trait
// ============================================================================

/// Relevance of one handler for one request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelevanceScore {
    /// Blended relevance in [0, 1]
    pub score: f64,
    /// Human-readable explanation of the score
    pub reasons: Vec<String>,
}

/// Pluggable relevance model
pub trait ScoringStrategy: Send + Sync {
    /// Short identifier for status output
    fn name(&self) -> &str;

    /// Rebuild the model from the full handler set
    ///
    /// Must be idempotent: training twice on the same set yields the same model.
    fn train(&mut self, handlers: &[HandlerDescriptor]);

    /// Whether `train` has run at least once
    fn is_trained(&self) -> bool;

    /// Score `text` against every trained handler, keyed by handler id
    ///
    /// Returns an empty map when untrained.
    fn score(&self, text: &str) -> HashMap<String, RelevanceScore>;
}

// ============================================================================
// Tokenization
// ============================================================================

/// Lowercase, split on non-alphanumerics, drop short tokens and stop words
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Hybrid Scorer
// ============================================================================

type SparseVector = BTreeMap<String, f64>;

/// Per-handler trained state
#[derive(Clone, Debug)]
struct HandlerModel {
    id: String,
    /// term -> weight; matched as case-insensitive substrings
    keyword_weights: BTreeMap<String, f64>,
    total_keyword_weight: f64,
    /// L2-normalized tf-idf vector
    vector: SparseVector,
}

/// Keyword + tf-idf cosine scorer
#[derive(Clone, Debug, Default)]
pub struct HybridScorer {
    handlers: Vec<HandlerModel>,
    /// term -> smoothed inverse document frequency
    idf: BTreeMap<String, f64>,
    trained: bool,
}

impl HybridScorer {
    /// Create an untrained scorer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of terms in the trained vocabulary
    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.idf.len()
    }

    fn keyword_table(descriptor: &HandlerDescriptor) -> BTreeMap<String, f64> {
        let mut table = BTreeMap::new();
        for keyword in &descriptor.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() {
                raise(&mut table, keyword, DECLARED_KEYWORD_WEIGHT);
            }
        }
        for capability in &descriptor.capabilities {
            for word in tokenize(capability) {
                raise(&mut table, word, CAPABILITY_WORD_WEIGHT);
            }
        }
        table
    }

    fn vectorize(&self, tokens: &[String]) -> SparseVector {
        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
        for token in tokens {
            if self.idf.contains_key(token) {
                *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(term, tf)| {
                let idf = self.idf.get(term).copied().unwrap_or(0.0);
                (term.to_string(), tf * idf)
            })
            .collect();

        let norm = vector.values().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for value in vector.values_mut() {
                *value /= norm;
            }
        } else {
            vector.clear();
        }
        vector
    }

    fn keyword_score<'a>(model: &'a HandlerModel, lowered: &str) -> (f64, Vec<&'a str>) {
        if model.total_keyword_weight <= 0.0 {
            return (0.0, Vec::new());
        }
        let mut matched = Vec::new();
        let mut weight = 0.0;
        for (term, w) in &model.keyword_weights {
            if lowered.contains(term.as_str()) {
                matched.push(term.as_str());
                weight += w;
            }
        }
        ((weight / model.total_keyword_weight).clamp(0.0, 1.0), matched)
    }
}

/// Insert `term` with `weight`, keeping the larger weight on collision
fn raise(table: &mut BTreeMap<String, f64>, term: String, weight: f64) {
    let entry = table.entry(term).or_insert(weight);
    if *entry < weight {
        *entry = weight;
    }
}

fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    // Both inputs are already unit length
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum()
}

impl ScoringStrategy for HybridScorer {
    fn name(&self) -> &str {
        "hybrid-keyword-tfidf"
    }

    fn train(&mut self, handlers: &[HandlerDescriptor]) {
        let documents: Vec<Vec<String>> = handlers
            .iter()
            .map(|h| tokenize(&h.corpus_text()))
            .collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for document in &documents {
            let mut seen: Vec<&str> = document.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n = documents.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let idf: BTreeMap<String, f64> = document_frequency
            .into_iter()
            .map(|(term, df)| (term.to_string(), ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0))
            .collect();
        self.idf = idf;

        self.handlers = handlers
            .iter()
            .zip(&documents)
            .map(|(descriptor, document)| {
                let keyword_weights = Self::keyword_table(descriptor);
                let total_keyword_weight = keyword_weights.values().sum();
                HandlerModel {
                    id: descriptor.id.clone(),
                    keyword_weights,
                    total_keyword_weight,
                    vector: self.vectorize(document),
                }
            })
            .collect();
        self.trained = true;

        tracing::info!(
            handlers = self.handlers.len(),
            vocabulary = self.idf.len(),
            "Relevance model trained"
        );
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn score(&self, text: &str) -> HashMap<String, RelevanceScore> {
        if !self.trained {
            return HashMap::new();
        }

        let lowered = text.to_lowercase();
        let request_vector = self.vectorize(&tokenize(text));

        self.handlers
            .iter()
            .map(|model| {
                let (keyword, matched) = Self::keyword_score(model, &lowered);
                let semantic = cosine(&request_vector, &model.vector).max(0.0);
                let score = KEYWORD_WEIGHT * keyword + SEMANTIC_WEIGHT * semantic;

                let mut reasons = Vec::new();
                if !matched.is_empty() {
                    reasons.push(format!("keyword match: {}", matched.join(", ")));
                }
                if semantic > 0.0 {
                    reasons.push(format!("semantic similarity {semantic:.2}"));
                }

                (model.id.clone(), RelevanceScore { score, reasons })
            })
            .collect()
    }
}
