//! Hybrid lexical + dense candidate generation with a learned fusion ranker
//! for category-tagged trivia clues.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod pipeline;
pub mod search;

pub use crate::config::PipelineConfig;
pub use crate::error::{RankError, RankResult};
pub use crate::evaluation::EvaluationReport;
pub use crate::pipeline::Pipeline;
