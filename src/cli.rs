//! Command-line surface: argument parsing, tracing setup and dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::artifacts::{
    ArtifactOrigin, ArtifactStore, LexicalCodec, MatrixCodec, ModelCodec, default_artifact_dir,
};
use crate::config::{DenseIndexKind, EmbedderKind, PipelineConfig, ScorerKind};
use crate::corpus::loader::{load_documents, load_questions};
use crate::corpus::{CategoryIndex, DocumentStore, question_set_fingerprint};
use crate::error::RankError;
use crate::model::types::Query;
use crate::pipeline::Pipeline;
use crate::pipeline::policy::CategoryPolicy;
use crate::pipeline::ranker::FusionModel;
use crate::search::dense::EmbeddingRetriever;
use crate::search::embedder::{Embedder, EmbedderInfo};
use crate::search::hash_embedder::HashEmbedder;
use crate::search::lexical::Bm25Index;
use crate::search::reranker::{RelevanceScorer, TokenOverlapScorer};
use crate::search::vector_index::EmbeddingMatrix;

#[derive(Parser, Debug)]
#[command(
    name = "cluerank",
    version,
    about = "Rank a document corpus against category-tagged clues with a learned fusion model"
)]
pub struct Cli {
    /// Raise log verbosity (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// TOML configuration file
    #[arg(long, global = true, env = "CLUERANK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or reuse) the lexical index and embedding matrix
    Index(CorpusArgs),
    /// Train the fusion model on a question set and persist it
    Train {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Questions file: blocks of category, clue, answer
        #[arg(long)]
        questions: PathBuf,
        /// Retrain even if a fresh model is stored
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Rank every question and report Precision@1 and MRR
    Evaluate {
        #[command(flatten)]
        corpus: CorpusArgs,
        #[arg(long)]
        questions: PathBuf,
        /// Use this model file instead of the stored one
        #[arg(long)]
        model: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// Directory of corpus files
    #[arg(long)]
    pub corpus: PathBuf,
    /// Artifact directory (defaults to the platform data dir)
    #[arg(long)]
    pub artifacts: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Boost,
    Filter,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Category policy
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,
    /// Drop the relevance-scorer feature
    #[arg(long)]
    pub no_relevance: bool,
    /// Drop the title-overlap feature
    #[arg(long)]
    pub no_title_overlap: bool,
    /// Add the section-header overlap feature
    #[arg(long)]
    pub header_overlap: bool,
}

impl PipelineArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        match self.policy {
            Some(PolicyArg::Filter) => config.category_policy = CategoryPolicy::Filter,
            Some(PolicyArg::Boost) if !matches!(config.category_policy, CategoryPolicy::Boost { .. }) => {
                config.category_policy = CategoryPolicy::default();
            }
            _ => {}
        }
        if self.no_relevance {
            config.features.relevance_score = false;
        }
        if self.no_title_overlap {
            config.features.title_overlap = false;
        }
        if self.header_overlap {
            config.features.header_overlap = true;
        }
    }
}

/// A failed command, with the process exit code it maps to.
#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
}

impl CliError {
    /// Configuration errors exit 2; everything else exits 1.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let configuration = err
            .chain()
            .find_map(|e| e.downcast_ref::<RankError>())
            .is_some_and(RankError::is_configuration);
        let (code, kind) = if configuration {
            (2, "configuration")
        } else {
            (1, "runtime")
        };
        Self {
            code,
            kind,
            message: format!("{err:#}"),
        }
    }
}

/// Install the stderr fmt subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "cluerank=info",
        1 => "cluerank=debug",
        _ => "cluerank=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Index(corpus) => run_index(config, &corpus),
        Commands::Train {
            corpus,
            questions,
            force,
            pipeline,
        } => {
            let config = with_overrides(config, &pipeline)?;
            run_train(config, &corpus, &questions, force)
        }
        Commands::Evaluate {
            corpus,
            questions,
            model,
            pipeline,
            json,
        } => {
            let config = with_overrides(config, &pipeline)?;
            run_evaluate(config, &corpus, &questions, model.as_deref(), json)
        }
    }
}

fn with_overrides(mut config: PipelineConfig, args: &PipelineArgs) -> Result<PipelineConfig> {
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run_index(config: PipelineConfig, corpus: &CorpusArgs) -> Result<()> {
    let env = Environment::load(&config, corpus)?;
    println!(
        "Indexed {} documents ({} categories, {} terms, {}-dim {} embeddings)",
        env.store.len(),
        env.categories.category_count(),
        env.lexical.vocabulary_size(),
        env.matrix.dimension(),
        env.embedder.id()
    );
    Ok(())
}

fn run_train(config: PipelineConfig, corpus: &CorpusArgs, questions: &Path, force: bool) -> Result<()> {
    let queries = load_questions(questions)?;
    let env = Environment::load(&config, corpus)?;
    let pipeline = env.pipeline(&config)?;
    let codec = ModelCodec::new(pipeline.schema().clone(), pipeline.training_fingerprint())
        .with_questions(question_set_fingerprint(&queries));

    let origin = if force {
        let model = pipeline.train(&queries)?;
        env.artifacts.save(&codec, &*model)?;
        ArtifactOrigin::Built
    } else {
        let (model, origin) = env.artifacts.load_or_build(&codec, env.store.fingerprint(), || {
            Ok((*pipeline.train(&queries)?).clone())
        })?;
        pipeline.install(model)?;
        origin
    };

    let path = env.artifacts.path_for(&codec);
    match origin {
        ArtifactOrigin::Built => println!("Trained fusion model -> {}", path.display()),
        ArtifactOrigin::Loaded => println!("Fusion model is up to date: {}", path.display()),
    }
    Ok(())
}

fn run_evaluate(
    config: PipelineConfig,
    corpus: &CorpusArgs,
    questions: &Path,
    model_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let queries: Vec<Query> = load_questions(questions)?;
    let env = Environment::load(&config, corpus)?;
    let pipeline = env.pipeline(&config)?;

    match model_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading model file {}", path.display()))?;
            pipeline.install(FusionModel::from_json(&bytes)?)?;
        }
        None => {
            // Reuses a model fitted on any question set.
            let codec = ModelCodec::new(pipeline.schema().clone(), pipeline.training_fingerprint());
            let (model, _) = env.artifacts.load_or_build(&codec, env.store.fingerprint(), || {
                Ok((*pipeline.train(&queries)?).clone())
            })?;
            pipeline.install(model)?;
        }
    }

    let report = pipeline.evaluate(&queries)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Corpus, artifacts and collaborators shared by every command.
struct Environment {
    store: Arc<DocumentStore>,
    categories: Arc<CategoryIndex>,
    artifacts: ArtifactStore,
    lexical: Arc<Bm25Index>,
    embedder: Arc<dyn Embedder>,
    matrix: Arc<EmbeddingMatrix>,
}

impl Environment {
    fn load(config: &PipelineConfig, corpus: &CorpusArgs) -> Result<Self> {
        let store = Arc::new(DocumentStore::new(load_documents(&corpus.corpus)?)?);
        let categories = Arc::new(CategoryIndex::build(&store));
        let root = corpus.artifacts.clone().unwrap_or_else(default_artifact_dir);
        let artifacts = ArtifactStore::new(root)?;

        let (lexical, _) = artifacts.load_or_build(&LexicalCodec, store.fingerprint(), || {
            Ok(Bm25Index::build(&store))
        })?;

        let embedder = build_embedder(&config.embedder)?;
        info!(embedder = %EmbedderInfo::from_embedder(embedder.as_ref()), "Embedder ready");
        let (matrix, _) = artifacts.load_or_build(
            &MatrixCodec::new(embedder.id()),
            store.fingerprint(),
            || Ok(EmbeddingMatrix::build(&store, embedder.as_ref(), config.batch_size)?),
        )?;

        info!(root = %artifacts.root().display(), "Artifacts ready");
        Ok(Self {
            store,
            categories,
            artifacts,
            lexical: Arc::new(lexical),
            embedder,
            matrix: Arc::new(matrix),
        })
    }

    fn pipeline(&self, config: &PipelineConfig) -> Result<Pipeline> {
        let mut dense = EmbeddingRetriever::new(Arc::clone(&self.embedder), Arc::clone(&self.matrix))?;
        if let DenseIndexKind::Hnsw {
            m,
            ef_construction,
            ef_search,
        } = config.dense_index
        {
            dense = dense.with_hnsw(m, ef_construction, ef_search);
        }
        let pipeline = Pipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.categories),
            self.lexical.clone(),
            Arc::new(dense),
            build_scorer(&config.scorer)?,
            config.clone(),
        )?;
        Ok(pipeline)
    }
}

fn build_embedder(kind: &EmbedderKind) -> Result<Arc<dyn Embedder>> {
    match kind {
        EmbedderKind::Hash { dimension } => Ok(Arc::new(HashEmbedder::new(*dimension))),
        #[cfg(feature = "fastembed")]
        EmbedderKind::Fastembed { model_dir } => Ok(Arc::new(
            crate::search::fastembed_embedder::FastEmbedder::load_from_dir(model_dir)?,
        )),
        #[cfg(not(feature = "fastembed"))]
        EmbedderKind::Fastembed { .. } => Err(RankError::InvalidConfig(
            "embedder kind `fastembed` requires building with the `fastembed` feature".into(),
        )
        .into()),
    }
}

fn build_scorer(kind: &ScorerKind) -> Result<Arc<dyn RelevanceScorer>> {
    match kind {
        ScorerKind::TokenOverlap => Ok(Arc::new(TokenOverlapScorer)),
        #[cfg(feature = "fastembed")]
        ScorerKind::CrossEncoder { model_dir } => Ok(Arc::new(
            crate::search::fastembed_reranker::FastEmbedReranker::load_from_dir(model_dir)?,
        )),
        #[cfg(not(feature = "fastembed"))]
        ScorerKind::CrossEncoder { .. } => Err(RankError::InvalidConfig(
            "scorer kind `cross-encoder` requires building with the `fastembed` feature".into(),
        )
        .into()),
    }
}
