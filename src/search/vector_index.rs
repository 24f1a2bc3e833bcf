//! Document embedding matrix with exact cosine search.
//!
//! Rows are L2-normalized at build time, so a dot product with a normalized
//! query is the cosine similarity. The matrix is persisted in a small binary
//! format:
//!
//! - Magic: "CVEC" (4 bytes)
//! - Version: u16
//! - Embedder ID length: u16, then bytes
//! - Corpus fingerprint length: u16, then bytes
//! - Dimension: u32
//! - Count: u32
//! - Rows: `count * dimension` little-endian f32
//! - CRC32 of everything above: u32

use std::cmp::Ordering;
use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

use crate::corpus::DocumentStore;
use crate::error::{RankError, RankResult};
use crate::model::types::{DocId, Document};
use crate::search::embedder::{Embedder, EmbedderError, EmbedderResult, dot, l2_normalize};

/// Magic bytes for the embedding matrix file format.
pub const MATRIX_MAGIC: [u8; 4] = *b"CVEC";

/// Embedding matrix file version.
pub const MATRIX_VERSION: u16 = 1;

/// Text embedded for a document: its body, or its title when the body is empty.
pub fn document_embedding_text(doc: &Document) -> &str {
    if doc.body.trim().is_empty() {
        &doc.title
    } else {
        &doc.body
    }
}

/// Sort `(doc, similarity)` hits descending, ties by ascending doc id.
pub(crate) fn sort_hits(hits: &mut [(DocId, f32)]) {
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

/// Row-major matrix of normalized document embeddings, one row per document.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    embedder_id: String,
    corpus_fingerprint: String,
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Embed every document of `store` in batches of `batch_size`.
    pub fn build(
        store: &DocumentStore,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> EmbedderResult<Self> {
        let dimension = embedder.dimension();
        let mut data = Vec::with_capacity(store.len() * dimension);

        let pb = ProgressBar::new(store.len() as u64);
        if std::io::stderr().is_terminal() {
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} documents embedded")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        for chunk in store.documents().chunks(batch_size.max(1)) {
            let texts: Vec<&str> = chunk.iter().map(document_embedding_text).collect();
            let embeddings = embedder.embed_batch_sync(&texts)?;
            if embeddings.len() != texts.len() {
                return Err(EmbedderError::EmbeddingFailed {
                    model: embedder.id().to_string(),
                    source: Box::new(std::io::Error::other(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        embeddings.len()
                    ))),
                });
            }
            for mut embedding in embeddings {
                if embedding.len() != dimension {
                    return Err(EmbedderError::EmbeddingFailed {
                        model: embedder.id().to_string(),
                        source: Box::new(std::io::Error::other(format!(
                            "dimension mismatch: expected {dimension}, got {}",
                            embedding.len()
                        ))),
                    });
                }
                l2_normalize(&mut embedding);
                data.extend_from_slice(&embedding);
            }
            pb.inc(chunk.len() as u64);
        }
        pb.finish_and_clear();

        info!(
            count = store.len(),
            dimension,
            embedder = embedder.id(),
            "Built embedding matrix"
        );

        Ok(Self {
            embedder_id: embedder.id().to_string(),
            corpus_fingerprint: store.fingerprint().to_string(),
            dimension,
            data,
        })
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn corpus_fingerprint(&self) -> &str {
        &self.corpus_fingerprint
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, id: DocId) -> Option<&[f32]> {
        let start = id.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Cosine similarity between a normalized query and document `id`.
    pub fn similarity(&self, query: &[f32], id: DocId) -> f32 {
        self.row(id).map_or(0.0, |row| dot(query, row))
    }

    /// Exact top-`k` search, descending by similarity, ties by ascending id.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Vec<(DocId, f32)> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let mut hits: Vec<(DocId, f32)> = self
            .rows()
            .enumerate()
            .map(|(id, row)| (id, dot(query, row)))
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        hits
    }

    /// Serialize into the CVEC format.
    pub fn to_bytes(&self) -> RankResult<Vec<u8>> {
        let mut out = Vec::with_capacity(32 + self.data.len() * 4);
        out.extend_from_slice(&MATRIX_MAGIC);
        out.extend_from_slice(&MATRIX_VERSION.to_le_bytes());
        write_str(&mut out, &self.embedder_id, "embedder_id")?;
        write_str(&mut out, &self.corpus_fingerprint, "corpus_fingerprint")?;
        out.extend_from_slice(&to_u32(self.dimension, "dimension")?.to_le_bytes());
        out.extend_from_slice(&to_u32(self.len(), "count")?.to_le_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Parse the CVEC format, verifying magic, version and checksum.
    pub fn from_bytes(bytes: &[u8]) -> RankResult<Self> {
        if bytes.len() < 4 {
            return Err(corrupt("file too short"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != stored_crc {
            return Err(corrupt("checksum mismatch"));
        }

        let mut reader = ByteReader { bytes: body, pos: 0 };
        if reader.take(4)? != MATRIX_MAGIC {
            return Err(corrupt("invalid magic"));
        }
        let version = reader.u16()?;
        if version != MATRIX_VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }
        let embedder_id = reader.string()?;
        let corpus_fingerprint = reader.string()?;
        let dimension = reader.u32()? as usize;
        let count = reader.u32()? as usize;
        let floats = dimension
            .checked_mul(count)
            .ok_or_else(|| corrupt("row count overflow"))?;
        let raw = reader.take(floats * 4)?;
        if reader.pos != body.len() {
            return Err(corrupt("trailing bytes"));
        }
        let data = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            embedder_id,
            corpus_fingerprint,
            dimension,
            data,
        })
    }
}

fn corrupt(reason: &str) -> RankError {
    RankError::Artifact {
        key: "embedding matrix".to_string(),
        reason: reason.to_string(),
    }
}

fn to_u32(value: usize, field: &str) -> RankResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(&format!("{field} too large")))
}

fn write_str(out: &mut Vec<u8>, value: &str, field: &str) -> RankResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| corrupt(&format!("{field} too long")))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> RankResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| corrupt("unexpected end of file"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> RankResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> RankResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> RankResult<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| corrupt("invalid utf-8 string"))
    }
}
