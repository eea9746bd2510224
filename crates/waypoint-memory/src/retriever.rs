// Knowledge Retrieval
// Vector lookup, record hydration, and context formatting

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::KnowledgeDatabase;
use crate::embeddings::Embedder;
use crate::types::{
    KnowledgeRecord, NewKnowledgeRecord, VectorMatch, DEFAULT_MAX_SECTION_CHARS, DEFAULT_TOP_K,
};

/// Similarity lookup over the knowledge base.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, text: &str, top_k: usize) -> anyhow::Result<Vec<VectorMatch>>;
}

/// Durable store that hydrates full records by id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, ids: &[i64]) -> anyhow::Result<Vec<KnowledgeRecord>>;
}

#[async_trait]
impl RecordStore for KnowledgeDatabase {
    async fn fetch(&self, ids: &[i64]) -> anyhow::Result<Vec<KnowledgeRecord>> {
        Ok(self.get_records(ids).await?)
    }
}

/// sqlite-vec index that embeds query text before searching.
#[derive(Clone)]
pub struct SqliteKnowledgeIndex {
    db: KnowledgeDatabase,
    embedder: Arc<dyn Embedder>,
}

impl SqliteKnowledgeIndex {
    pub fn new(db: KnowledgeDatabase, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Embed and store a record, returning its id.
    pub async fn ingest(&self, record: NewKnowledgeRecord) -> anyhow::Result<i64> {
        let embedding = self.embedder.embed(&record.embedding_text()).await?;
        let id = self.db.insert_record(&record, &embedding).await?;
        tracing::info!(
            target: "waypoint.memory",
            "Ingested knowledge record id={} title_len={} content_len={}",
            id,
            record.title.len(),
            record.content.len()
        );
        Ok(id)
    }
}

#[async_trait]
impl VectorIndex for SqliteKnowledgeIndex {
    async fn query(&self, text: &str, top_k: usize) -> anyhow::Result<Vec<VectorMatch>> {
        let embedding = self.embedder.embed(text).await?;
        let hits = self.db.search_vectors(&embedding, top_k).await?;
        Ok(hits
            .into_iter()
            .map(|(id, distance)| VectorMatch {
                id: id.to_string(),
                score: 1.0 / (1.0 + distance.max(0.0)),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Found,
    IndexError,
    NoMatches,
    UnresolvableIds,
    StoreError,
    NoRecords,
    NoUsableContent,
}

impl RetrievalOutcome {
    /// Context text used when retrieval produced nothing usable.
    pub fn fallback_text(self) -> &'static str {
        match self {
            RetrievalOutcome::Found => "",
            RetrievalOutcome::IndexError => {
                "Knowledge search is unavailable right now; no background context was retrieved."
            }
            RetrievalOutcome::NoMatches => "No relevant knowledge was found for this request.",
            RetrievalOutcome::UnresolvableIds => {
                "Knowledge search returned results that could not be resolved to stored records."
            }
            RetrievalOutcome::StoreError => {
                "Matching knowledge records could not be loaded from storage."
            }
            RetrievalOutcome::NoRecords => {
                "Knowledge search matched records that no longer exist in storage."
            }
            RetrievalOutcome::NoUsableContent => {
                "Matching knowledge records had no usable content."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalOutcome::Found => "found",
            RetrievalOutcome::IndexError => "index_error",
            RetrievalOutcome::NoMatches => "no_matches",
            RetrievalOutcome::UnresolvableIds => "unresolvable_ids",
            RetrievalOutcome::StoreError => "store_error",
            RetrievalOutcome::NoRecords => "no_records",
            RetrievalOutcome::NoUsableContent => "no_usable_content",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub context: String,
    pub outcome: RetrievalOutcome,
    pub sections: usize,
}

impl Retrieval {
    fn fallback(outcome: RetrievalOutcome) -> Self {
        Self {
            context: outcome.fallback_text().to_string(),
            outcome,
            sections: 0,
        }
    }
}

#[derive(Clone)]
pub struct KnowledgeRetriever {
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn RecordStore>,
    top_k: usize,
    max_section_chars: usize,
}

impl KnowledgeRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            index,
            store,
            top_k: DEFAULT_TOP_K,
            max_section_chars: DEFAULT_MAX_SECTION_CHARS,
        }
    }

    pub fn with_limits(mut self, top_k: usize, max_section_chars: usize) -> Self {
        self.top_k = top_k.max(1);
        self.max_section_chars = max_section_chars.max(1);
        self
    }

    /// Context string for a query. Never fails.
    pub async fn search(&self, query: &str) -> String {
        self.retrieve(query).await.context
    }

    pub async fn retrieve(&self, query: &str) -> Retrieval {
        let matches = match self.index.query(query, self.top_k).await {
            Ok(matches) => matches,
            Err(err) => {
                tracing::warn!(target: "waypoint.memory", "Vector query failed: {}", err);
                return Retrieval::fallback(RetrievalOutcome::IndexError);
            }
        };
        if matches.is_empty() {
            return Retrieval::fallback(RetrievalOutcome::NoMatches);
        }

        let mut seen = HashSet::new();
        let mut ordered: Vec<(i64, f64)> = Vec::new();
        for hit in &matches {
            let Ok(id) = hit.id.trim().parse::<i64>() else {
                tracing::debug!(target: "waypoint.memory", "Skipping non-numeric match id {}", hit.id);
                continue;
            };
            if seen.insert(id) {
                ordered.push((id, hit.score));
            }
        }
        if ordered.is_empty() {
            return Retrieval::fallback(RetrievalOutcome::UnresolvableIds);
        }

        let ids: Vec<i64> = ordered.iter().map(|(id, _)| *id).collect();
        let records = match self.store.fetch(&ids).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(target: "waypoint.memory", "Record hydration failed: {}", err);
                return Retrieval::fallback(RetrievalOutcome::StoreError);
            }
        };
        if records.is_empty() {
            return Retrieval::fallback(RetrievalOutcome::NoRecords);
        }

        let by_id: HashMap<i64, KnowledgeRecord> =
            records.into_iter().map(|record| (record.id, record)).collect();
        let sections: Vec<String> = ordered
            .iter()
            .filter_map(|(id, score)| by_id.get(id).map(|record| (record, *score)))
            .filter_map(|(record, score)| self.format_section(record, score))
            .enumerate()
            .map(|(idx, body)| format!("## [{}] {}", idx + 1, body))
            .collect();
        if sections.is_empty() {
            return Retrieval::fallback(RetrievalOutcome::NoUsableContent);
        }

        Retrieval {
            context: sections.join("\n\n"),
            outcome: RetrievalOutcome::Found,
            sections: sections.len(),
        }
    }

    fn format_section(&self, record: &KnowledgeRecord, score: f64) -> Option<String> {
        let content = record.content.trim();
        if content.is_empty() {
            return None;
        }
        let title = match record.title.trim() {
            "" => "Untitled",
            title => title,
        };
        let source = match record.source.trim() {
            "" => "unknown",
            source => source,
        };
        let tags = if record.tags.is_empty() {
            "none".to_string()
        } else {
            record.tags.join(", ")
        };
        let body = truncate_chars(content, self.max_section_chars);
        Some(format!(
            "{title}\nSource: {source}\nTags: {tags}\nRelevance: {score:.3}\n\n{body}"
        ))
    }
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FakeIndex(anyhow::Result<Vec<VectorMatch>>);

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(&self, _text: &str, _top_k: usize) -> anyhow::Result<Vec<VectorMatch>> {
            match &self.0 {
                Ok(matches) => Ok(matches.clone()),
                Err(err) => Err(anyhow::anyhow!(err.to_string())),
            }
        }
    }

    struct FakeStore {
        records: Vec<KnowledgeRecord>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn fetch(&self, ids: &[i64]) -> anyhow::Result<Vec<KnowledgeRecord>> {
            if self.fail {
                anyhow::bail!("store offline");
            }
            // reversed so the retriever has to restore match order
            Ok(self
                .records
                .iter()
                .rev()
                .filter(|record| ids.contains(&record.id))
                .cloned()
                .collect())
        }
    }

    fn hit(id: &str, score: f64) -> VectorMatch {
        VectorMatch {
            id: id.to_string(),
            score,
        }
    }

    fn stored(id: i64, title: &str, content: &str) -> KnowledgeRecord {
        KnowledgeRecord {
            id,
            title: title.to_string(),
            source: "wiki".to_string(),
            tags: vec!["infra".to_string()],
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn retriever(
        index: anyhow::Result<Vec<VectorMatch>>,
        records: Vec<KnowledgeRecord>,
        fail: bool,
    ) -> KnowledgeRetriever {
        KnowledgeRetriever::new(
            Arc::new(FakeIndex(index)),
            Arc::new(FakeStore { records, fail }),
        )
    }

    #[tokio::test]
    async fn formats_numbered_sections_in_match_order() {
        let r = retriever(
            Ok(vec![hit("2", 0.9), hit("1", 0.8), hit("2", 0.7)]),
            vec![stored(1, "Alpha", "first"), stored(2, "Beta", "second")],
            false,
        );
        let retrieval = r.retrieve("q").await;
        assert_eq!(retrieval.outcome, RetrievalOutcome::Found);
        assert_eq!(retrieval.sections, 2);
        let beta = retrieval.context.find("## [1] Beta").expect("beta first");
        let alpha = retrieval.context.find("## [2] Alpha").expect("alpha second");
        assert!(beta < alpha);
        assert!(retrieval.context.contains("Source: wiki"));
        assert!(retrieval.context.contains("Tags: infra"));
        assert!(retrieval.context.contains("Relevance: 0.900"));
    }

    #[tokio::test]
    async fn every_failure_mode_has_a_distinct_fallback() {
        let cases = vec![
            (
                retriever(Err(anyhow::anyhow!("boom")), vec![], false),
                RetrievalOutcome::IndexError,
            ),
            (retriever(Ok(vec![]), vec![], false), RetrievalOutcome::NoMatches),
            (
                retriever(Ok(vec![hit("abc", 0.5)]), vec![], false),
                RetrievalOutcome::UnresolvableIds,
            ),
            (
                retriever(Ok(vec![hit("1", 0.5)]), vec![stored(1, "A", "a")], true),
                RetrievalOutcome::StoreError,
            ),
            (
                retriever(Ok(vec![hit("7", 0.5)]), vec![stored(1, "A", "a")], false),
                RetrievalOutcome::NoRecords,
            ),
            (
                retriever(Ok(vec![hit("1", 0.5)]), vec![stored(1, "Empty", "   ")], false),
                RetrievalOutcome::NoUsableContent,
            ),
        ];

        let mut texts = HashSet::new();
        for (r, expected) in cases {
            let retrieval = r.retrieve("q").await;
            assert_eq!(retrieval.outcome, expected);
            assert!(!retrieval.context.is_empty());
            assert_eq!(r.search("q").await, retrieval.context);
            texts.insert(retrieval.context);
        }
        assert_eq!(texts.len(), 6);
    }

    #[tokio::test]
    async fn long_content_is_truncated() {
        let r = retriever(
            Ok(vec![hit("1", 1.0)]),
            vec![stored(1, "Long", &"x".repeat(50))],
            false,
        )
        .with_limits(3, 10);
        let context = r.search("q").await;
        assert!(context.ends_with("xxxxxxxxxx..."));
    }

    #[tokio::test]
    async fn sqlite_index_round_trips_through_embedder() {
        struct KeywordEmbedder;

        #[async_trait]
        impl Embedder for KeywordEmbedder {
            fn dimension(&self) -> usize {
                2
            }

            async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
                if text.contains("deploy") {
                    Ok(vec![1.0, 0.0])
                } else {
                    Ok(vec![0.0, 1.0])
                }
            }
        }

        let temp = tempfile::TempDir::new().unwrap();
        let db = KnowledgeDatabase::new(&temp.path().join("kb.db"), 2)
            .await
            .unwrap();
        let index = SqliteKnowledgeIndex::new(db.clone(), Arc::new(KeywordEmbedder));
        index
            .ingest(NewKnowledgeRecord {
                title: "Billing".to_string(),
                source: "wiki".to_string(),
                tags: vec![],
                content: "Invoices go out monthly".to_string(),
            })
            .await
            .unwrap();
        let deploy_id = index
            .ingest(NewKnowledgeRecord {
                title: "Deploys".to_string(),
                source: "runbook".to_string(),
                tags: vec!["ops".to_string()],
                content: "Run the deploy pipeline from main".to_string(),
            })
            .await
            .unwrap();

        let retriever = KnowledgeRetriever::new(Arc::new(index), Arc::new(db)).with_limits(1, 500);
        let retrieval = retriever.retrieve("how do I deploy?").await;
        assert_eq!(retrieval.outcome, RetrievalOutcome::Found);
        assert!(retrieval.context.contains("## [1] Deploys"));
        assert!(retrieval.context.contains("Relevance: 1.000"));
        assert!(deploy_id > 0);
    }
}
