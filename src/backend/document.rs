/// Tantivy document index for full-text search
use crate::backend::{BackendError, CandidatePayload, DocumentBackend, RetrievalCandidate, SourceType};
use std::path::PathBuf;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

/// Domain-scoped document store with BM25 ranking
pub struct DocumentIndex {
    domain: String,
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    text_field: Field,
    #[allow(dead_code)]
    index_path: PathBuf,
}

impl DocumentIndex {
    /// Open the index at `index_path`, creating it if absent
    pub fn new(domain: impl Into<String>, index_path: PathBuf) -> Result<Self, BackendError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(domain.into(), index_path)
        } else {
            Self::create(domain.into(), index_path)
        }
    }

    fn create(domain: String, index_path: PathBuf) -> Result<Self, BackendError> {
        std::fs::create_dir_all(&index_path)
            .map_err(|e| BackendError::Index(format!("Failed to create index dir: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("id", INDEXED | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| BackendError::Index(e.to_string()))?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| BackendError::Index(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| BackendError::Index(e.to_string()))?;

        Ok(Self {
            domain,
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
            index_path,
        })
    }

    fn load(domain: String, index_path: PathBuf) -> Result<Self, BackendError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| BackendError::Index(e.to_string()))?;

        let schema = index.schema();

        let id_field = schema
            .get_field("id")
            .map_err(|_| BackendError::Index("Missing 'id' field in schema".to_string()))?;

        let text_field = schema
            .get_field("text")
            .map_err(|_| BackendError::Index("Missing 'text' field in schema".to_string()))?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| BackendError::Index(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| BackendError::Index(e.to_string()))?;

        Ok(Self {
            domain,
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
            index_path,
        })
    }

    /// Queue a document for indexing; visible after [`commit`](Self::commit)
    pub fn insert(&self, id: u64, text: &str) -> Result<(), BackendError> {
        let document = doc!(
            self.id_field => id,
            self.text_field => text,
        );

        let writer = self.writer.lock().unwrap();
        writer
            .add_document(document)
            .map_err(|e| BackendError::Index(e.to_string()))?;

        Ok(())
    }

    /// Commit pending inserts and reload the reader
    pub fn commit(&self) -> Result<(), BackendError> {
        let mut writer = self.writer.lock().unwrap();
        writer
            .commit()
            .map_err(|e| BackendError::Index(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| BackendError::Index(e.to_string()))?;

        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentBackend for DocumentIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievalCandidate>, BackendError> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        // Lenient parsing: free-text queries should not fail on stray syntax
        let (parsed, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| BackendError::Index(e.to_string()))?;

        let mut candidates = Vec::new();
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| BackendError::Index(e.to_string()))?;

            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| BackendError::Index("Missing or invalid id field".to_string()))?;

            let text = retrieved
                .get_first(self.text_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            candidates.push(RetrievalCandidate {
                id: format!("document_{}", id),
                source: SourceType::Document,
                domain: self.domain.clone(),
                score,
                payload: CandidatePayload::Text { text },
            });
        }

        Ok(candidates)
    }
}
