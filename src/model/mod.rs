//! Data model shared by the corpus, the ranking pipeline and the evaluator.

pub mod types;
