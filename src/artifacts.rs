//! Load-if-present, else build-and-save persistence for derived artifacts.
//!
//! Each artifact lives in one file under the store root and records the
//! fingerprint of the corpus it was derived from. [`ArtifactStore::load_or_build`]
//! holds a per-key in-process lock and an exclusive `<file>.lock` file lock
//! while it checks, builds and writes, so concurrent workers and processes
//! build a given artifact at most once. Writes go to a temp file that is
//! synced and atomically renamed into place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::RankResult;
use crate::pipeline::features::FeatureSchema;
use crate::pipeline::ranker::FusionModel;
use crate::search::lexical::Bm25Index;
use crate::search::vector_index::EmbeddingMatrix;

/// Platform data directory for artifacts (`~/.local/share/cluerank` on Linux).
pub fn default_artifact_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "cluerank")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".cluerank"))
}

/// How an artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Loaded,
    Built,
}

/// Serialization and freshness rules for one artifact type.
pub trait ArtifactCodec {
    type Artifact;

    /// File name under the store root.
    fn file_name(&self) -> String;

    fn encode(&self, artifact: &Self::Artifact) -> RankResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> RankResult<Self::Artifact>;

    /// Whether a decoded artifact may be reused for the corpus `fingerprint`.
    fn is_fresh(&self, artifact: &Self::Artifact, fingerprint: &str) -> bool;
}

/// BM25 index as MessagePack.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalCodec;

impl ArtifactCodec for LexicalCodec {
    type Artifact = Bm25Index;

    fn file_name(&self) -> String {
        "lexical-bm25.msgpack".to_string()
    }

    fn encode(&self, artifact: &Bm25Index) -> RankResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(artifact)?)
    }

    fn decode(&self, bytes: &[u8]) -> RankResult<Bm25Index> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn is_fresh(&self, artifact: &Bm25Index, fingerprint: &str) -> bool {
        artifact.corpus_fingerprint() == fingerprint
    }
}

/// Document embedding matrix in the CVEC binary format.
#[derive(Debug, Clone)]
pub struct MatrixCodec {
    embedder_id: String,
}

impl MatrixCodec {
    pub fn new(embedder_id: impl Into<String>) -> Self {
        Self {
            embedder_id: embedder_id.into(),
        }
    }
}

impl ArtifactCodec for MatrixCodec {
    type Artifact = EmbeddingMatrix;

    fn file_name(&self) -> String {
        format!("dense-{}.cvec", self.embedder_id)
    }

    fn encode(&self, artifact: &EmbeddingMatrix) -> RankResult<Vec<u8>> {
        artifact.to_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> RankResult<EmbeddingMatrix> {
        EmbeddingMatrix::from_bytes(bytes)
    }

    fn is_fresh(&self, artifact: &EmbeddingMatrix, fingerprint: &str) -> bool {
        artifact.corpus_fingerprint() == fingerprint && artifact.embedder_id() == self.embedder_id
    }
}

/// Trained fusion model as JSON, one file per feature schema.
///
/// A stored model is fresh only for the corpus, schema and training settings
/// it was fitted under, and, when `questions` is set, for that question set.
#[derive(Debug, Clone)]
pub struct ModelCodec {
    schema: FeatureSchema,
    settings: String,
    questions: Option<String>,
}

impl ModelCodec {
    /// `settings` is the pipeline's training fingerprint.
    pub fn new(schema: FeatureSchema, settings: impl Into<String>) -> Self {
        Self {
            schema,
            settings: settings.into(),
            questions: None,
        }
    }

    /// Also require the model to have been fitted on this question set.
    pub fn with_questions(mut self, questions: impl Into<String>) -> Self {
        self.questions = Some(questions.into());
        self
    }
}

impl ArtifactCodec for ModelCodec {
    type Artifact = FusionModel;

    fn file_name(&self) -> String {
        format!("fusion-{}.json", self.schema.slug())
    }

    fn encode(&self, artifact: &FusionModel) -> RankResult<Vec<u8>> {
        artifact.to_json()
    }

    fn decode(&self, bytes: &[u8]) -> RankResult<FusionModel> {
        FusionModel::from_json(bytes)
    }

    fn is_fresh(&self, artifact: &FusionModel, fingerprint: &str) -> bool {
        artifact.check_schema(&self.schema).is_ok()
            && artifact.corpus_fingerprint() == Some(fingerprint)
            && artifact.training_fingerprint() == Some(self.settings.as_str())
            && self
                .questions
                .as_deref()
                .is_none_or(|questions| artifact.questions_fingerprint() == Some(questions))
    }
}

/// Directory of persisted artifacts.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating artifact directory {}", root.display()))?;
        Ok(Self {
            root,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for<C: ArtifactCodec>(&self, codec: &C) -> PathBuf {
        self.root.join(codec.file_name())
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.key_locks.lock().entry(key.to_string()).or_default())
    }

    /// Return the stored artifact if it is fresh for `fingerprint`; otherwise
    /// run `builder`, persist the result, and return it.
    pub fn load_or_build<C, F>(
        &self,
        codec: &C,
        fingerprint: &str,
        builder: F,
    ) -> Result<(C::Artifact, ArtifactOrigin)>
    where
        C: ArtifactCodec,
        F: FnOnce() -> Result<C::Artifact>,
    {
        let key = codec.file_name();
        let path = self.root.join(&key);
        let key_lock = self.key_lock(&key);
        let _in_process = key_lock.lock();
        let _file_lock = FileLock::acquire(&path)?;

        if let Some(artifact) = self.try_load(codec, &path, fingerprint) {
            info!(artifact = %key, "Artifact loaded");
            return Ok((artifact, ArtifactOrigin::Loaded));
        }

        let artifact = builder().with_context(|| format!("building artifact {key}"))?;
        self.write_atomic(&path, &codec.encode(&artifact)?)?;
        info!(artifact = %key, path = %path.display(), "Artifact built");
        Ok((artifact, ArtifactOrigin::Built))
    }

    /// Persist `artifact`, replacing any stored version.
    pub fn save<C: ArtifactCodec>(&self, codec: &C, artifact: &C::Artifact) -> Result<PathBuf> {
        let key = codec.file_name();
        let path = self.root.join(&key);
        let key_lock = self.key_lock(&key);
        let _in_process = key_lock.lock();
        let _file_lock = FileLock::acquire(&path)?;
        self.write_atomic(&path, &codec.encode(artifact)?)?;
        info!(artifact = %key, "Artifact saved");
        Ok(path)
    }

    fn try_load<C: ArtifactCodec>(
        &self,
        codec: &C,
        path: &Path,
        fingerprint: &str,
    ) -> Option<C::Artifact> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable artifact; rebuilding");
                return None;
            }
        };
        match codec.decode(&bytes) {
            Ok(artifact) if codec.is_fresh(&artifact, fingerprint) => Some(artifact),
            Ok(_) => {
                info!(path = %path.display(), "Stale artifact; rebuilding");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt artifact; rebuilding");
                None
            }
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .with_context(|| format!("creating temp file in {}", self.root.display()))?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("renaming artifact into {}", path.display()))?;
        Ok(())
    }
}

/// Exclusive advisory lock on `<artifact>.lock`, released on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(artifact: &Path) -> Result<Self> {
        let mut name = artifact.as_os_str().to_owned();
        name.push(".lock");
        let lock_path = PathBuf::from(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("opening lock file {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking {}", lock_path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
