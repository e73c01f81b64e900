//! Core pipeline for award search.
//!
//! This crate ties the planner, retrieval, cache, synthesis and citation
//! stages together behind [`AwardSearchService`], the single entry point.

pub mod citations;
pub mod llm;
pub mod planner;
pub mod service;
pub mod synthesizer;
pub mod telemetry;
mod text;

pub use citations::CitationSystem;
pub use llm::{ChatCompletion, ChatMessage, ChatRequest, OpenAiClient};
pub use planner::{QueryPlanner, heuristic_intent};
pub use service::{AwardSearchService, Pipeline, ServiceOptions, build_service};
pub use synthesizer::AnswerSynthesizer;
pub use telemetry::{RequestStatus, Telemetry};
