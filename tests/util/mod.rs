use std::path::{Path, PathBuf};
use std::sync::Arc;

use cluerank::corpus::loader::{parse_corpus_text, parse_questions};
use cluerank::corpus::{CategoryIndex, DocumentStore};
use cluerank::model::types::{DocId, Document, Query};
use cluerank::search::dense::{DenseRetriever, EmbeddingRetriever};
use cluerank::search::embedder::{Embedder, EmbedderError, EmbedderResult};
use cluerank::search::hash_embedder::HashEmbedder;
use cluerank::search::lexical::{Bm25Index, LexicalRetriever};
use cluerank::search::reranker::{
    RelevanceScorer, ScorerError, ScorerResult, TokenOverlapScorer,
};
use cluerank::search::vector_index::EmbeddingMatrix;
use cluerank::{Pipeline, PipelineConfig};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Lexical retriever returning fixed per-document scores.
#[allow(dead_code)]
pub struct FixedLexical(pub Vec<f64>);

impl LexicalRetriever for FixedLexical {
    fn score_all(&self, _tokens: &[String]) -> Vec<f64> {
        self.0.clone()
    }

    fn doc_count(&self) -> usize {
        self.0.len()
    }
}

/// Dense retriever with fixed per-document similarities.
#[allow(dead_code)]
pub struct FixedDense {
    pub sims: Vec<f32>,
    pub fail: bool,
}

impl DenseRetriever for FixedDense {
    fn embed(&self, _text: &str) -> EmbedderResult<Vec<f32>> {
        if self.fail {
            return Err(EmbedderError::EmbedderUnavailable {
                model: "fixed".into(),
                reason: "offline".into(),
            });
        }
        Ok(vec![1.0])
    }

    fn search(&self, _query: &[f32], k: usize) -> Vec<(DocId, f32)> {
        let mut hits: Vec<(DocId, f32)> = self.sims.iter().copied().enumerate().collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }

    fn similarity(&self, _query: &[f32], doc_id: DocId) -> f32 {
        self.sims.get(doc_id).copied().unwrap_or(0.0)
    }
}

/// Relevance scorer with a fixed score per document title, matched on the
/// snippet's first word.
#[allow(dead_code)]
pub struct FixedScorer(pub Vec<(&'static str, f32)>);

impl RelevanceScorer for FixedScorer {
    fn score_pairs(&self, pairs: &[(&str, &str)]) -> ScorerResult<Vec<f32>> {
        pairs
            .iter()
            .map(|(_, snippet)| {
                let first = snippet.split_whitespace().next().unwrap_or("");
                self.0
                    .iter()
                    .find(|(word, _)| *word == first)
                    .map(|(_, score)| *score)
                    .ok_or_else(|| ScorerError::ScoreFailed(format!("no score for `{first}`")))
            })
            .collect()
    }

    fn id(&self) -> &str {
        "fixed"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Two-city corpus: doc0 "Paris", doc1 "Lyon", both in "cities".
#[allow(dead_code)]
pub fn paris_lyon_store() -> Arc<DocumentStore> {
    Arc::new(
        DocumentStore::new(vec![
            Document::new(0, "Paris", "paris is the capital of france", ["cities"]),
            Document::new(1, "Lyon", "lyon is a city on the rhone", ["cities"]),
        ])
        .unwrap(),
    )
}

/// Pipeline over the two-city corpus with the fixed signals
/// lexical 2.0/0.5, dense 0.9/0.3, relevance 0.8/0.1.
#[allow(dead_code)]
pub fn paris_lyon_pipeline(config: PipelineConfig) -> Pipeline {
    let store = paris_lyon_store();
    let categories = Arc::new(CategoryIndex::build(&store));
    Pipeline::new(
        store,
        categories,
        Arc::new(FixedLexical(vec![2.0, 0.5])),
        Arc::new(FixedDense {
            sims: vec![0.9, 0.3],
            fail: false,
        }),
        Arc::new(FixedScorer(vec![("paris", 0.8), ("lyon", 0.1)])),
        config,
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn paris_query() -> Query {
    Query::new("cities", "capital of france").with_expected("Paris")
}

/// Corpus file in the wiki-subset format used by the loader.
#[allow(dead_code)]
pub const WIKI_FIXTURE: &str = include_str!("../fixtures/wiki/cities.txt");

/// Question set matching [`WIKI_FIXTURE`].
#[allow(dead_code)]
pub const QUESTIONS_FIXTURE: &str = include_str!("../fixtures/questions.txt");

/// Temp directory holding a corpus dir, a questions file and an artifact dir.
#[allow(dead_code)]
pub struct Workspace {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(corpus.join("cities.txt"), WIKI_FIXTURE).unwrap();
        std::fs::write(dir.path().join("questions.txt"), QUESTIONS_FIXTURE).unwrap();
        Self { dir }
    }

    pub fn corpus(&self) -> PathBuf {
        self.dir.path().join("corpus")
    }

    pub fn questions(&self) -> PathBuf {
        self.dir.path().join("questions.txt")
    }

    pub fn artifacts(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Documents parsed from [`WIKI_FIXTURE`].
#[allow(dead_code)]
pub fn wiki_store() -> Arc<DocumentStore> {
    let mut docs = Vec::new();
    parse_corpus_text(WIKI_FIXTURE, &mut docs);
    Arc::new(DocumentStore::new(docs).unwrap())
}

/// Queries parsed from [`QUESTIONS_FIXTURE`].
#[allow(dead_code)]
pub fn wiki_queries() -> Vec<Query> {
    parse_questions(QUESTIONS_FIXTURE)
}

/// Pipeline over the wiki fixture with BM25, the hashing embedder and the
/// token-overlap scorer.
#[allow(dead_code)]
pub fn wiki_pipeline(config: PipelineConfig) -> Pipeline {
    let store = wiki_store();
    let categories = Arc::new(CategoryIndex::build(&store));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let matrix = EmbeddingMatrix::build(&store, embedder.as_ref(), 4).unwrap();
    let dense = EmbeddingRetriever::new(embedder, Arc::new(matrix)).unwrap();
    Pipeline::new(
        Arc::clone(&store),
        categories,
        Arc::new(Bm25Index::build(&store)),
        Arc::new(dense),
        Arc::new(TokenOverlapScorer),
        config,
    )
    .unwrap()
}
