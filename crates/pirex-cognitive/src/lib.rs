//! Cognitive layer: the candidate generators (C5), content pipeline (C4),
//! recommendation orchestrator (C6) with diversity/explanation (C7), feedback
//! processor (C8), and learning controller (C9). Everything here composes
//! the pure math in `pirex_core` with the stores/cache/rate-limiter in
//! `pirex_infra`.

pub mod facade;
pub mod feedback;
pub mod generators;
pub mod learning;
pub mod orchestrator;
pub mod pipeline;

pub use facade::PirexFacade;
pub use feedback::FeedbackProcessor;
pub use generators::{CandidateGenerator, GenerationContext, GeneratorDeps};
pub use learning::LearningController;
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use pipeline::{ContentPipeline, PipelineDeps};
