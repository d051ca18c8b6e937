//! Zero-shot intent classification.
//!
//! Each category owns a small set of example utterances; their mean embedding
//! is the category centroid, computed once at initialization behind a
//! cooperative lock (concurrent callers cannot double-load, the first
//! classification after restart may block on it). Classification scores the
//! input against every centroid by cosine similarity; a best score below the
//! confidence threshold maps to `Unknown`. A regex pass extracts light
//! entities: memory keys/values, topics, node labels, and bulk-delete marks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use murmur_common::Result;
use murmur_llm::EmbeddingClient;
use murmur_store::cosine_similarity;

/// The closed set of intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Greeting,
    Farewell,
    Thanks,
    Help,
    Status,
    KnowledgeQuery,
    StudyQuery,
    MemoryStore,
    MemoryRetrieve,
    GraphQuery,
    Chitchat,
    OutOfScope,
    Unknown,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Farewell => "farewell",
            Self::Thanks => "thanks",
            Self::Help => "help",
            Self::Status => "status",
            Self::KnowledgeQuery => "knowledge_query",
            Self::StudyQuery => "study_query",
            Self::MemoryStore => "memory_store",
            Self::MemoryRetrieve => "memory_retrieve",
            Self::GraphQuery => "graph_query",
            Self::Chitchat => "chitchat",
            Self::OutOfScope => "out_of_scope",
            Self::Unknown => "unknown",
        }
    }
}

/// Example utterances per category, embedded at init time.
const EXAMPLE_SETS: &[(IntentCategory, &[&str])] = &[
    (
        IntentCategory::Greeting,
        &["hi", "hello there", "hey, good morning", "greetings"],
    ),
    (
        IntentCategory::Farewell,
        &["bye", "goodbye for now", "see you later", "good night"],
    ),
    (
        IntentCategory::Thanks,
        &["thanks", "thank you so much", "appreciated", "cheers for the help"],
    ),
    (
        IntentCategory::Help,
        &[
            "help",
            "what can you do",
            "how do I use this",
            "show me the commands",
        ],
    ),
    (
        IntentCategory::Status,
        &["status", "are you working", "health check", "is everything up"],
    ),
    (
        IntentCategory::KnowledgeQuery,
        &[
            "what do you know about rust",
            "tell me about async runtimes",
            "explain vector databases",
            "information on token buckets",
        ],
    ),
    (
        IntentCategory::StudyQuery,
        &[
            "answer strictly from the provided sources",
            "according to the documents, what applies here",
            "cite the sources for your answer",
            "study question, answer with citations",
        ],
    ),
    (
        IntentCategory::MemoryStore,
        &[
            "remember that my timezone is UTC",
            "remember my favorite editor is helix",
            "store this fact about me",
            "note that I work night shifts",
        ],
    ),
    (
        IntentCategory::MemoryRetrieve,
        &[
            "what's my timezone",
            "what is my favorite editor",
            "what do you remember about me",
            "recall what I told you",
        ],
    ),
    (
        IntentCategory::GraphQuery,
        &[
            "how is Go related to Discord",
            "what connects these concepts",
            "show the relationship between rust and tokio",
            "find a path from databases to caching",
        ],
    ),
    (
        IntentCategory::Chitchat,
        &[
            "how was your day",
            "tell me a joke",
            "what do you think about the weather",
            "just chatting",
        ],
    ),
    (
        IntentCategory::OutOfScope,
        &[
            "transfer money to this account",
            "write my legal contract",
            "diagnose my illness",
            "place an order for me",
        ],
    ),
];

/// Entities extracted by the regex pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentEntities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub node_labels: Vec<String>,
    /// Set when the text asks to wipe stored memory wholesale.
    #[serde(default)]
    pub bulk_delete: bool,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub category: IntentCategory,
    pub confidence: f32,
    pub entities: IntentEntities,
}

struct EntityPatterns {
    store: Regex,
    retrieve: Regex,
    topic: Regex,
    node_label: Regex,
    bulk_delete: Regex,
}

impl EntityPatterns {
    fn new() -> Self {
        Self {
            store: Regex::new(
                r"(?i)\b(?:remember|note)\s+(?:that\s+)?(?:my\s+)?([a-z0-9][a-z0-9 _-]*?)\s+is\s+(.+?)\s*$",
            )
            .expect("store pattern is valid"),
            retrieve: Regex::new(r"(?i)\bwhat(?:'s| is)\s+my\s+([a-z0-9][a-z0-9 _-]*?)\s*\??\s*$")
                .expect("retrieve pattern is valid"),
            topic: Regex::new(r"(?i)\b(?:about|regarding|concerning)\s+(.+?)\s*\??\s*$")
                .expect("topic pattern is valid"),
            node_label: Regex::new(r"\b[A-Z][A-Za-z0-9_]+\b").expect("label pattern is valid"),
            bulk_delete: Regex::new(r"(?i)\b(?:forget|delete|clear|wipe)\b.*\b(?:everything|all)\b")
                .expect("bulk delete pattern is valid"),
        }
    }
}

pub struct IntentClassifier {
    embedder: Arc<EmbeddingClient>,
    threshold: f32,
    patterns: EntityPatterns,
    centroids: RwLock<HashMap<IntentCategory, Vec<f32>>>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

fn mean_embedding(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut centroid = vec![0.0_f32; first.len()];
    for vector in vectors {
        for (slot, value) in centroid.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut centroid {
        *slot /= count;
    }
    centroid
}

/// Normalize a fact key: lowercased, spaces collapsed to underscores.
fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

impl IntentClassifier {
    pub fn new(embedder: Arc<EmbeddingClient>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
            patterns: EntityPatterns::new(),
            centroids: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Compute category centroids. Single-shot: concurrent callers wait on
    /// the same lock and find the work already done.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        info!("Computing intent centroids");
        let mut centroids = HashMap::new();
        for (category, examples) in EXAMPLE_SETS {
            let vectors = self.embedder.embed_batch(examples).await?;
            centroids.insert(*category, mean_embedding(&vectors));
        }

        *self.centroids.write().await = centroids;
        self.ready.store(true, Ordering::Release);
        info!(categories = EXAMPLE_SETS.len(), "Intent classifier ready");
        Ok(())
    }

    /// Best centroid for an embedding, with the confidence clamped to [0, 1].
    fn best_match(
        centroids: &HashMap<IntentCategory, Vec<f32>>,
        embedding: &[f32],
    ) -> (IntentCategory, f32) {
        let mut best = (IntentCategory::Unknown, f32::MIN);
        for (category, centroid) in centroids {
            let similarity = cosine_similarity(embedding, centroid);
            if similarity > best.1 {
                best = (*category, similarity);
            }
        }
        (best.0, best.1.clamp(0.0, 1.0))
    }

    fn result_for(&self, text: &str, category: IntentCategory, confidence: f32) -> IntentResult {
        let category = if confidence < self.threshold {
            debug!(confidence, "Confidence below threshold, mapping to unknown");
            IntentCategory::Unknown
        } else {
            category
        };
        IntentResult {
            confidence,
            entities: self.extract_entities(text, category),
            category,
        }
    }

    /// Classify one message. Deterministic for a fixed model and example set.
    pub async fn classify(&self, text: &str) -> Result<IntentResult> {
        if text.trim().is_empty() {
            return Ok(IntentResult {
                category: IntentCategory::Unknown,
                confidence: 0.0,
                entities: IntentEntities::default(),
            });
        }

        self.initialize().await?;
        let embedding = self.embedder.embed(text).await?;

        let centroids = self.centroids.read().await;
        let (category, confidence) = Self::best_match(&centroids, &embedding);
        drop(centroids);

        Ok(self.result_for(text, category, confidence))
    }

    /// Classify several texts. All non-empty inputs are embedded in one
    /// provider round-trip and scored locally against the centroids.
    pub async fn classify_batch(&self, texts: &[&str]) -> Result<Vec<IntentResult>> {
        let mut results: Vec<IntentResult> = texts
            .iter()
            .map(|_| IntentResult {
                category: IntentCategory::Unknown,
                confidence: 0.0,
                entities: IntentEntities::default(),
            })
            .collect();

        let non_empty: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(index, text)| (index, *text))
            .collect();
        if non_empty.is_empty() {
            return Ok(results);
        }

        self.initialize().await?;
        let batch: Vec<&str> = non_empty.iter().map(|(_, text)| *text).collect();
        let embeddings = self.embedder.embed_batch(&batch).await?;

        let centroids = self.centroids.read().await;
        for ((index, text), embedding) in non_empty.into_iter().zip(embeddings.iter()) {
            let (category, confidence) = Self::best_match(&centroids, embedding);
            results[index] = self.result_for(text, category, confidence);
        }
        Ok(results)
    }

    fn extract_entities(&self, text: &str, category: IntentCategory) -> IntentEntities {
        let mut entities = IntentEntities {
            word_count: text.split_whitespace().count(),
            ..IntentEntities::default()
        };

        if let Some(capture) = self.patterns.store.captures(text) {
            entities.memory_key = Some(normalize_key(&capture[1]));
            entities.memory_value = Some(capture[2].trim().to_string());
        } else if let Some(capture) = self.patterns.retrieve.captures(text) {
            entities.memory_key = Some(normalize_key(&capture[1]));
        }

        if category == IntentCategory::KnowledgeQuery {
            if let Some(capture) = self.patterns.topic.captures(text) {
                entities.topic = Some(capture[1].trim().to_string());
            }
        }

        if category == IntentCategory::GraphQuery {
            entities.node_labels = self
                .patterns
                .node_label
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect();
        }

        entities.bulk_delete = self.patterns.bulk_delete.is_match(text);
        if entities.bulk_delete {
            warn!("Bulk-delete phrasing detected");
        }

        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_llm::{LlmClient, LlmRequest, LlmResponse};
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    /// Keyword-keyed embedding: examples and queries sharing a keyword land
    /// on the same axis, so centroid scoring behaves like the real model.
    fn keyword_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0_f32; 8];
        if lower.contains("remember") || lower.contains("note that") || lower.contains("store") {
            v[0] = 1.0;
        } else if lower.contains("what's my")
            || lower.contains("what is my")
            || lower.contains("recall")
            || lower.contains("what do you remember")
        {
            v[1] = 1.0;
        } else if lower.contains("hi")
            || lower.contains("hello")
            || lower.contains("hey")
            || lower.contains("greetings")
        {
            v[2] = 1.0;
        } else if lower.contains("related") || lower.contains("path") || lower.contains("connect") {
            v[3] = 1.0;
        } else if lower.contains("about") || lower.contains("explain") || lower.contains("information")
        {
            v[4] = 1.0;
        } else if lower.contains("source")
            || lower.contains("cite")
            || lower.contains("citation")
            || lower.contains("document")
        {
            v[5] = 1.0;
        } else {
            v[7] = 1.0;
        }
        v
    }

    struct KeywordEmbedder {
        batch_calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmClient for KeywordEmbedder {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            unreachable!("triage tests never chat")
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(keyword_vector(text))
        }
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(texts.iter().map(|text| keyword_vector(text)).collect())
        }
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn embedding_model(&self) -> &str {
            "keyword-embed"
        }
    }

    fn classifier_with(batch_calls: Arc<AtomicU32>) -> IntentClassifier {
        let embedder = Arc::new(EmbeddingClient::new(
            Arc::new(KeywordEmbedder { batch_calls }),
            "keyword-embed",
            8,
            64,
            256,
            Duration::from_secs(300),
        ));
        IntentClassifier::new(embedder, 0.5)
    }

    fn classifier() -> IntentClassifier {
        classifier_with(Arc::new(AtomicU32::new(0)))
    }

    #[tokio::test]
    async fn memory_store_intent_with_key_value_extraction() {
        let classifier = classifier();
        let result = classifier
            .classify("remember that my timezone is America/Sao_Paulo")
            .await
            .unwrap();

        assert_eq!(result.category, IntentCategory::MemoryStore);
        assert!(result.confidence >= 0.5);
        assert_eq!(result.entities.memory_key.as_deref(), Some("timezone"));
        assert_eq!(
            result.entities.memory_value.as_deref(),
            Some("America/Sao_Paulo")
        );
    }

    #[tokio::test]
    async fn memory_retrieve_intent_extracts_key() {
        let classifier = classifier();
        let result = classifier.classify("what's my timezone?").await.unwrap();
        assert_eq!(result.category, IntentCategory::MemoryRetrieve);
        assert_eq!(result.entities.memory_key.as_deref(), Some("timezone"));
    }

    #[tokio::test]
    async fn empty_message_maps_to_unknown_without_embedding() {
        let classifier = classifier();
        let result = classifier.classify("   ").await.unwrap();
        assert_eq!(result.category, IntentCategory::Unknown);
        assert_eq!(result.confidence, 0.0);
        // No centroids were needed for this path.
        assert!(!classifier.is_ready());
    }

    #[tokio::test]
    async fn classification_is_deterministic() {
        let classifier = classifier();
        let a = classifier.classify("hello there friend").await.unwrap();
        let b = classifier.classify("hello there friend").await.unwrap();
        assert_eq!(a.category, b.category);
        assert_eq!(a.confidence, b.confidence);
    }

    #[tokio::test]
    async fn concurrent_initialization_is_single_shot() {
        let classifier = Arc::new(classifier());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let classifier = Arc::clone(&classifier);
            handles.push(tokio::spawn(async move { classifier.initialize().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(classifier.is_ready());
    }

    #[tokio::test]
    async fn graph_query_extracts_node_labels() {
        let classifier = classifier();
        let result = classifier
            .classify("how is Go related to Discord")
            .await
            .unwrap();
        assert_eq!(result.category, IntentCategory::GraphQuery);
        assert!(result.entities.node_labels.contains(&"Go".to_string()));
        assert!(result.entities.node_labels.contains(&"Discord".to_string()));
    }

    #[tokio::test]
    async fn bulk_delete_phrasing_is_flagged() {
        let classifier = classifier();
        let result = classifier
            .classify("please forget everything you remember about me")
            .await
            .unwrap();
        assert!(result.entities.bulk_delete);
    }

    #[tokio::test]
    async fn batch_matches_single_classification() {
        let classifier = classifier();
        let single = classifier.classify("hello there").await.unwrap();
        let batch = classifier
            .classify_batch(&["hello there", "what's my editor", "  "])
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].category, single.category);
        assert_eq!(batch[0].confidence, single.confidence);
        assert_eq!(batch[1].category, IntentCategory::MemoryRetrieve);
        assert_eq!(batch[2].category, IntentCategory::Unknown);
    }

    #[tokio::test]
    async fn batch_embeds_in_one_round_trip() {
        let batch_calls = Arc::new(AtomicU32::new(0));
        let classifier = classifier_with(Arc::clone(&batch_calls));
        classifier.initialize().await.unwrap();

        let after_init = batch_calls.load(AtomicOrdering::SeqCst);
        classifier
            .classify_batch(&[
                "hello there",
                "what's my editor",
                "remember that my city is Lisbon",
            ])
            .await
            .unwrap();

        assert_eq!(batch_calls.load(AtomicOrdering::SeqCst), after_init + 1);
    }

    #[tokio::test]
    async fn study_query_intent_is_recognized() {
        let classifier = classifier();
        let result = classifier
            .classify("cite your sources on token buckets")
            .await
            .unwrap();
        assert_eq!(result.category, IntentCategory::StudyQuery);
        assert!(result.confidence >= 0.5);
    }
}
